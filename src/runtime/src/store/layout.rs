//! OCI image layout store for thick bundles.
//!
//! A thick bundle carries its images in an OCI image layout under
//! `artifacts/layout/`:
//!
//! ```text
//! <archive dir>/
//!   bundle.json
//!   artifacts/layout/
//!     oci-layout
//!     index.json            manifests[].annotations["org.opencontainers.image.ref.name"]
//!     blobs/sha256/<hex>    manifests, configs, layers
//! ```
//!
//! Images are looked up by the reference recorded in `index.json`, or by
//! digest for digest-addressed references, and pushed to the destination
//! registry. A bundle relocated before still carries its layout under the
//! original names, so a reference missing from the index is retried under
//! its recorded origin.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use oci_distribution::manifest::OciDescriptor;
use serde::Deserialize;

use cnab_reloc_core::error::{RelocError, Result};

use super::copy::{copy_image, ContentSource};
use super::registry::RegistryClient;
use super::ImageStore;
use crate::reference::ImageReference;

/// Location of the image layout inside an unpacked thick bundle.
pub const LAYOUT_DIR: &str = "artifacts/layout";

/// Annotation naming the image a layout manifest belongs to.
pub const REF_NAME_ANNOTATION: &str = "org.opencontainers.image.ref.name";

#[derive(Debug, Deserialize)]
struct LayoutIndex {
    #[serde(default)]
    manifests: Vec<LayoutEntry>,
}

#[derive(Debug, Deserialize)]
struct LayoutEntry {
    digest: String,
    #[serde(default)]
    annotations: HashMap<String, String>,
}

/// Reads image content from an OCI layout on disk.
struct LayoutContent {
    layout_dir: PathBuf,
    /// Manifest digest by normalized image reference
    refs: HashMap<String, String>,
    /// Original normalized reference by normalized current reference
    origins: HashMap<String, String>,
}

impl LayoutContent {
    fn open(layout_dir: PathBuf) -> Result<Self> {
        let index_path = layout_dir.join("index.json");
        let raw = std::fs::read(&index_path).map_err(|e| {
            RelocError::StoreError(format!(
                "thick bundle has no image layout at {}: {}",
                index_path.display(),
                e
            ))
        })?;
        let index: LayoutIndex = serde_json::from_slice(&raw).map_err(|e| {
            RelocError::StoreError(format!("Invalid {}: {}", index_path.display(), e))
        })?;

        let mut refs = HashMap::new();
        for entry in index.manifests {
            let Some(name) = entry.annotations.get(REF_NAME_ANNOTATION) else {
                continue;
            };
            match ImageReference::parse(name) {
                Ok(image) => {
                    refs.insert(image.full_reference(), entry.digest);
                }
                Err(e) => {
                    tracing::warn!(name = %name, error = %e, "Skipping unparseable layout entry")
                }
            }
        }

        Ok(Self {
            layout_dir,
            refs,
            origins: HashMap::new(),
        })
    }

    fn blob_path(&self, digest: &str) -> Result<PathBuf> {
        let (algorithm, hex) = digest
            .split_once(':')
            .ok_or_else(|| RelocError::StoreError(format!("Invalid digest '{}'", digest)))?;
        Ok(self.layout_dir.join("blobs").join(algorithm).join(hex))
    }

    fn read_blob(&self, image: &ImageReference, digest: &str) -> Result<Vec<u8>> {
        let path = self.blob_path(digest)?;
        std::fs::read(&path).map_err(|e| {
            RelocError::StoreError(format!(
                "Failed to read {} of {} from layout: {}",
                digest, image, e
            ))
        })
    }

    fn manifest_digest(&self, image: &ImageReference) -> Result<String> {
        if let Some(digest) = &image.digest {
            return Ok(digest.clone());
        }
        let key = image.full_reference();
        if let Some(digest) = self.refs.get(&key) {
            return Ok(digest.clone());
        }
        if let Some((origin, digest)) = self
            .origins
            .get(&key)
            .and_then(|o| self.refs.get(o).map(|d| (o, d)))
        {
            tracing::debug!(image = %image, origin = %origin, "Found image under its original name");
            return Ok(digest.clone());
        }
        Err(RelocError::StoreError(format!(
            "image {} not found in bundle layout",
            image
        )))
    }
}

#[async_trait]
impl ContentSource for LayoutContent {
    async fn manifest(&self, image: &ImageReference) -> Result<Vec<u8>> {
        let digest = self.manifest_digest(image)?;
        self.read_blob(image, &digest)
    }

    async fn blob(&self, image: &ImageReference, descriptor: &OciDescriptor) -> Result<Vec<u8>> {
        self.read_blob(image, &descriptor.digest)
    }
}

/// Store for images staged inside an unpacked thick bundle.
pub struct LayoutStore {
    archive_dir: PathBuf,
    content: LayoutContent,
    client: RegistryClient,
}

impl LayoutStore {
    /// Open the layout under `archive_dir`. Fails if the directory does not
    /// hold a readable `artifacts/layout/index.json`.
    pub fn open(archive_dir: &Path, client: RegistryClient) -> Result<Self> {
        let content = LayoutContent::open(archive_dir.join(LAYOUT_DIR))?;
        tracing::debug!(
            archive_dir = %archive_dir.display(),
            images = content.refs.len(),
            "Opened bundle image layout"
        );
        Ok(Self {
            archive_dir: archive_dir.to_path_buf(),
            content,
            client,
        })
    }

    /// Resolve relocated references through their recorded originals when
    /// the layout has no entry under the current name.
    pub fn with_origins(mut self, origins: &HashMap<String, ImageReference>) -> Self {
        self.content.origins = origins
            .iter()
            .map(|(current, original)| (current.clone(), original.full_reference()))
            .collect();
        self
    }
}

#[async_trait]
impl ImageStore for LayoutStore {
    fn archive_dir(&self) -> Option<&Path> {
        Some(&self.archive_dir)
    }

    async fn push(
        &self,
        expected_digest: Option<&str>,
        source: &ImageReference,
        destination: &ImageReference,
    ) -> Result<()> {
        tracing::info!(
            source = %source,
            destination = %destination,
            verify = expected_digest.is_some(),
            "Pushing image from bundle layout"
        );
        copy_image(&self.content, &self.client, expected_digest, source, destination).await
    }
}
