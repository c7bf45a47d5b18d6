//! CNAB Relocation Core - Foundational Types
//!
//! Error taxonomy, configuration and the typed bundle descriptor shared by
//! the relocation runtime and the CLI.

pub mod bundle;
pub mod config;
pub mod error;

// Re-export commonly used types
pub use bundle::{Bundle, BundleImage, ImageSlot, ImageType};
pub use config::{LogLevel, RegistryConfig, RegistryCredential, RegistryProtocol, RelocateConfig};
pub use error::{RelocError, Result};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
