//! Pluggable image stores.
//!
//! A store copies one image at a time from a source reference to a
//! destination reference, optionally verifying the content digest.
//!
//! ```text
//!   StoreFactory::build(options)
//!        │
//!        ├── archive dir set ──► LayoutStore   (thick bundle: images staged
//!        │                                      in artifacts/layout/)
//!        └── otherwise ────────► RegistryStore (thin bundle: registry → registry)
//! ```
//!
//! Both stores push to the destination registry through [`RegistryClient`].

mod copy;
mod layout;
mod registry;
mod remote;

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sha2::{Digest, Sha256, Sha512};

use cnab_reloc_core::bundle::ImageType;
use cnab_reloc_core::config::RegistryConfig;
use cnab_reloc_core::error::{RelocError, Result};

use crate::reference::ImageReference;

pub use layout::{LayoutStore, LAYOUT_DIR, REF_NAME_ANNOTATION};
pub use registry::{RegistryAuth, RegistryClient};
pub use remote::RegistryStore;

/// Copies image content to relocated destinations.
#[async_trait]
pub trait ImageStore: Send + Sync {
    /// Directory holding staged image content for thick bundles.
    /// `None` when images stay registry-resident.
    fn archive_dir(&self) -> Option<&Path>;

    /// Copy `source` to `destination`.
    ///
    /// With `expected_digest` set, the copied content must carry exactly that
    /// digest or the push fails. Without it nothing is verified.
    async fn push(
        &self,
        expected_digest: Option<&str>,
        source: &ImageReference,
        destination: &ImageReference,
    ) -> Result<()>;
}

/// Settings a store is built from.
#[derive(Debug, Clone, Default)]
pub struct StoreOptions {
    /// Image types present in the bundle (all supported)
    pub image_types: BTreeSet<ImageType>,
    /// Unpacked thick bundle directory, if any
    pub archive_dir: Option<PathBuf>,
    /// `originalImage` of entries relocated by an earlier run, keyed by the
    /// normalized current reference. A thick bundle's layout still names its
    /// images by these.
    pub origins: HashMap<String, ImageReference>,
}

/// Builds the store for one relocation run.
pub trait StoreFactory: Send + Sync {
    /// Validate backend prerequisites and construct the store.
    /// Must not touch external state on failure.
    fn build(&self, options: &StoreOptions) -> Result<Box<dyn ImageStore>>;
}

/// Resolve a declared image type, rejecting anything no backend supports.
pub fn check_image_type(image: &str, declared: &str) -> Result<ImageType> {
    ImageType::parse(declared).ok_or_else(|| RelocError::UnsupportedImageType {
        image: image.to_string(),
        image_type: declared.to_string(),
    })
}

/// Factory for the registry-backed stores.
pub struct DefaultStoreFactory {
    registry: RegistryConfig,
}

impl DefaultStoreFactory {
    pub fn new(registry: RegistryConfig) -> Self {
        Self { registry }
    }
}

impl StoreFactory for DefaultStoreFactory {
    fn build(&self, options: &StoreOptions) -> Result<Box<dyn ImageStore>> {
        let client = RegistryClient::new(self.registry.clone());
        match options.archive_dir {
            Some(ref dir) => Ok(Box::new(
                LayoutStore::open(dir, client)?.with_origins(&options.origins),
            )),
            None => Ok(Box::new(RegistryStore::new(client))),
        }
    }
}

/// Digest of `data` using the algorithm named by `like` (`sha256:...` or
/// `sha512:...`), rendered as `<algorithm>:<hex>`.
pub(crate) fn content_digest(data: &[u8], like: &str) -> Result<String> {
    let algorithm = like.split_once(':').map(|(a, _)| a).unwrap_or("sha256");
    let hex = match algorithm {
        "sha256" => hex::encode(Sha256::digest(data)),
        "sha512" => hex::encode(Sha512::digest(data)),
        other => {
            return Err(RelocError::StoreError(format!(
                "unsupported digest algorithm '{}'",
                other
            )))
        }
    };
    Ok(format!("{}:{}", algorithm, hex))
}

/// Fail with `DigestMismatch` unless `data` hashes to `expected`.
pub(crate) fn verify_digest(image: &ImageReference, expected: &str, data: &[u8]) -> Result<()> {
    let actual = content_digest(data, expected)?;
    if actual != expected {
        return Err(RelocError::DigestMismatch {
            image: image.to_string(),
            expected: expected.to_string(),
            actual,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_image_type() {
        assert_eq!(check_image_type("a", "docker").unwrap(), ImageType::Docker);
        assert_eq!(check_image_type("a", "oci").unwrap(), ImageType::Oci);
        let err = check_image_type("c", "c").unwrap_err();
        assert_eq!(
            err.to_string(),
            "cannot relocate image c with imageType c: only oci and docker image types are currently supported"
        );
    }

    #[test]
    fn test_content_digest() {
        assert_eq!(
            content_digest(b"", "sha256:x").unwrap(),
            "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert!(content_digest(b"", "sha512:x").unwrap().starts_with("sha512:cf83e135"));
        assert!(content_digest(b"", "md5:x").is_err());
    }

    #[test]
    fn test_verify_digest() {
        let image = ImageReference::parse("org/app:v1").unwrap();
        let good = "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";
        assert!(verify_digest(&image, good, b"").is_ok());
        let err = verify_digest(&image, good, b"tampered").unwrap_err();
        assert!(matches!(err, RelocError::DigestMismatch { .. }));
    }

    #[test]
    fn test_default_factory_registry_store() {
        let factory = DefaultStoreFactory::new(RegistryConfig::default());
        let store = factory.build(&StoreOptions::default()).unwrap();
        assert!(store.archive_dir().is_none());
    }

    #[test]
    fn test_default_factory_missing_layout() {
        let tmp = tempfile::TempDir::new().unwrap();
        let factory = DefaultStoreFactory::new(RegistryConfig::default());
        let options = StoreOptions {
            archive_dir: Some(tmp.path().to_path_buf()),
            ..Default::default()
        };
        assert!(matches!(
            factory.build(&options),
            Err(RelocError::StoreError(_))
        ));
    }
}
