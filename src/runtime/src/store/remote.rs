//! Registry-to-registry store for thin bundles.

use std::path::Path;

use async_trait::async_trait;
use oci_distribution::manifest::OciDescriptor;

use cnab_reloc_core::error::Result;

use super::copy::{copy_image, ContentSource};
use super::registry::RegistryClient;
use super::ImageStore;
use crate::reference::ImageReference;

/// Copies images that live in a registry into another registry.
pub struct RegistryStore {
    client: RegistryClient,
}

impl RegistryStore {
    pub fn new(client: RegistryClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ContentSource for RegistryClient {
    async fn manifest(&self, image: &ImageReference) -> Result<Vec<u8>> {
        self.pull_manifest_raw(image).await
    }

    async fn blob(&self, image: &ImageReference, descriptor: &OciDescriptor) -> Result<Vec<u8>> {
        self.pull_blob(image, descriptor).await
    }
}

#[async_trait]
impl ImageStore for RegistryStore {
    fn archive_dir(&self) -> Option<&Path> {
        None
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
            "Copying image between registries"
        );
        copy_image(&self.client, &self.client, expected_digest, source, destination).await?;

        if let Some(expected) = expected_digest {
            // Registries may normalize manifests; report but do not fail on drift
            match self.client.manifest_digest(destination).await {
                Ok(actual) if actual != expected => tracing::warn!(
                    destination = %destination,
                    expected = %expected,
                    actual = %actual,
                    "Destination reports a different manifest digest"
                ),
                Ok(_) => {}
                Err(e) => tracing::debug!(destination = %destination, error = %e, "Could not confirm destination digest"),
            }
        }
        Ok(())
    }
}
