use thiserror::Error;

/// Relocation error types
#[derive(Error, Debug)]
pub enum RelocError {
    /// Invalid configuration (malformed prefix, bad config file, ...)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Image declares a type no store backend can relocate
    #[error("cannot relocate image {image} with imageType {image_type}: only oci and docker image types are currently supported")]
    UnsupportedImageType { image: String, image_type: String },

    /// Image reference could not be parsed
    #[error("Invalid image reference '{reference}': {message}")]
    InvalidReference { reference: String, message: String },

    /// Input bundle unreadable or malformed
    #[error("Failed to load bundle {path}: {message}")]
    LoadError { path: String, message: String },

    /// Image store prerequisites not met
    #[error("Image store error: {0}")]
    StoreError(String),

    /// Copying an image failed
    #[error("Failed to push image {image}: {message}")]
    PushError { image: String, message: String },

    /// Copied content does not carry the expected digest
    #[error("Digest mismatch for image {image}: expected {expected}, got {actual}")]
    DigestMismatch {
        image: String,
        expected: String,
        actual: String,
    },

    /// Container registry error
    #[error("Registry error: {registry} - {message}")]
    RegistryError { registry: String, message: String },

    /// Output bundle fails validation
    #[error("Bundle validation failed: {0}")]
    ValidationError(String),

    /// Output could not be persisted
    #[error("Failed to write {path}: {message}")]
    WriteError { path: String, message: String },

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<serde_json::Error> for RelocError {
    fn from(err: serde_json::Error) -> Self {
        RelocError::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for RelocError {
    fn from(err: serde_yaml::Error) -> Self {
        RelocError::SerializationError(err.to_string())
    }
}

/// Result type alias for relocation operations
pub type Result<T> = std::result::Result<T, RelocError>;
