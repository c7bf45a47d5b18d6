//! Manifest-first image copy shared by both stores.
//!
//! Content is read from a [`ContentSource`] and written to the destination
//! registry. Every digest is checked before the matching write, and the
//! manifest is pushed last as the exact bytes that were read.

use async_trait::async_trait;
use oci_distribution::manifest::{OciDescriptor, OciImageIndex, OciImageManifest};
use serde_json::Value;

use cnab_reloc_core::error::{RelocError, Result};

use super::registry::RegistryClient;
use super::verify_digest;
use crate::reference::ImageReference;

pub(crate) const OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
pub(crate) const OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";
pub(crate) const DOCKER_MANIFEST: &str = "application/vnd.docker.distribution.manifest.v2+json";
pub(crate) const DOCKER_MANIFEST_LIST: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";

/// Where image content is read from.
#[async_trait]
pub(crate) trait ContentSource: Send + Sync {
    /// Raw manifest bytes for `image`.
    async fn manifest(&self, image: &ImageReference) -> Result<Vec<u8>>;

    /// Raw blob bytes for one descriptor of `image`.
    async fn blob(&self, image: &ImageReference, descriptor: &OciDescriptor) -> Result<Vec<u8>>;
}

/// Copy `source` to `destination` through `client`.
pub(crate) async fn copy_image<S: ContentSource + ?Sized>(
    content: &S,
    client: &RegistryClient,
    expected_digest: Option<&str>,
    source: &ImageReference,
    destination: &ImageReference,
) -> Result<()> {
    let manifest = content.manifest(source).await?;
    if let Some(expected) = expected_digest {
        verify_digest(source, expected, &manifest)?;
    }

    let media_type = manifest_media_type(source, &manifest)?;
    client.authenticate_push(destination).await?;

    if is_index(&media_type) {
        let index: OciImageIndex = parse_manifest(source, &manifest)?;
        tracing::debug!(
            source = %source,
            manifests = index.manifests.len(),
            "Copying image index"
        );
        for entry in &index.manifests {
            let child_source = source.at_digest(&entry.digest);
            let child_destination = destination.at_digest(&entry.digest);
            let child = content.manifest(&child_source).await?;
            verify_digest(&child_source, &entry.digest, &child)?;

            let child_type = manifest_media_type(&child_source, &child)?;
            if is_index(&child_type) {
                return Err(RelocError::StoreError(format!(
                    "nested image index in {} is not supported",
                    source
                )));
            }
            copy_manifest(content, client, &child_source, &child_destination, child, &child_type)
                .await?;
        }
        client
            .push_manifest_raw(destination, manifest, &media_type)
            .await?;
    } else {
        copy_manifest(content, client, source, destination, manifest, &media_type).await?;
    }

    Ok(())
}

/// Copy the blobs of one image manifest, then the manifest itself.
async fn copy_manifest<S: ContentSource + ?Sized>(
    content: &S,
    client: &RegistryClient,
    source: &ImageReference,
    destination: &ImageReference,
    manifest: Vec<u8>,
    media_type: &str,
) -> Result<()> {
    let parsed: OciImageManifest = parse_manifest(source, &manifest)?;

    for descriptor in std::iter::once(&parsed.config).chain(parsed.layers.iter()) {
        let data = content.blob(source, descriptor).await?;
        verify_digest(source, &descriptor.digest, &data)?;
        client
            .push_blob(destination, &data, &descriptor.digest)
            .await?;
    }

    let pushed = client
        .push_manifest_raw(destination, manifest, media_type)
        .await?;
    tracing::debug!(destination = %destination, url = %pushed, "Pushed manifest");
    Ok(())
}

fn is_index(media_type: &str) -> bool {
    media_type == OCI_INDEX || media_type == DOCKER_MANIFEST_LIST
}

/// Media type declared by a manifest, inferred from its shape when absent.
fn manifest_media_type(image: &ImageReference, manifest: &[u8]) -> Result<String> {
    let value: Value = parse_manifest(image, manifest)?;
    if let Some(media_type) = value.get("mediaType").and_then(Value::as_str) {
        return Ok(media_type.to_string());
    }
    if value.get("manifests").is_some() {
        Ok(OCI_INDEX.to_string())
    } else {
        Ok(OCI_MANIFEST.to_string())
    }
}

fn parse_manifest<T: serde::de::DeserializeOwned>(
    image: &ImageReference,
    manifest: &[u8],
) -> Result<T> {
    serde_json::from_slice(manifest).map_err(|e| {
        RelocError::StoreError(format!("Invalid manifest for {}: {}", image, e))
    })
}
