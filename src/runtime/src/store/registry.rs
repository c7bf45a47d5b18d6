//! OCI registry client used by the stores.
//!
//! Uses the `oci-distribution` crate to talk to container registries. Manifests
//! are moved as raw bytes so the destination digest equals the source digest.

use http::HeaderValue;
use oci_distribution::client::{ClientConfig, ClientProtocol};
use oci_distribution::manifest::OciDescriptor;
use oci_distribution::secrets::RegistryAuth as OciRegistryAuth;
use oci_distribution::{Client, Reference, RegistryOperation};

use cnab_reloc_core::config::{RegistryConfig, RegistryProtocol};
use cnab_reloc_core::error::{RelocError, Result};

use super::copy::{DOCKER_MANIFEST, DOCKER_MANIFEST_LIST, OCI_INDEX, OCI_MANIFEST};
use crate::reference::ImageReference;

/// Manifest media types accepted when pulling.
const MANIFEST_MEDIA_TYPES: &[&str] = &[
    OCI_MANIFEST,
    OCI_INDEX,
    DOCKER_MANIFEST,
    DOCKER_MANIFEST_LIST,
];

/// Authentication credentials for a container registry.
#[derive(Debug, Clone)]
pub struct RegistryAuth {
    username: Option<String>,
    password: Option<String>,
}

impl RegistryAuth {
    /// Create anonymous authentication (no credentials).
    pub fn anonymous() -> Self {
        Self {
            username: None,
            password: None,
        }
    }

    /// Create basic authentication with username and password.
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
        }
    }

    /// Create authentication from environment variables.
    ///
    /// Reads `REGISTRY_USERNAME` and `REGISTRY_PASSWORD`.
    /// Falls back to anonymous if not set.
    pub fn from_env() -> Self {
        let username = std::env::var("REGISTRY_USERNAME").ok();
        let password = std::env::var("REGISTRY_PASSWORD").ok();

        if username.is_some() && password.is_some() {
            Self { username, password }
        } else {
            Self::anonymous()
        }
    }

    /// Credentials for `registry`: config entry first, then environment
    /// variables, then anonymous.
    pub fn resolve(config: &RegistryConfig, registry: &str) -> Self {
        match config.credential_for(registry) {
            Some(cred) => Self::basic(cred.username.clone(), cred.password.clone()),
            None => Self::from_env(),
        }
    }

    /// Convert to oci-distribution auth type.
    fn to_oci_auth(&self) -> OciRegistryAuth {
        match (&self.username, &self.password) {
            (Some(u), Some(p)) => OciRegistryAuth::Basic(u.clone(), p.clone()),
            _ => OciRegistryAuth::Anonymous,
        }
    }
}

/// Thin wrapper over the registry client that resolves credentials per
/// registry and maps failures onto relocation errors.
pub struct RegistryClient {
    client: Client,
    config: RegistryConfig,
}

impl RegistryClient {
    pub fn new(config: RegistryConfig) -> Self {
        let protocol = match config.protocol {
            RegistryProtocol::Http => ClientProtocol::Http,
            RegistryProtocol::Https if config.insecure_registries.is_empty() => {
                ClientProtocol::Https
            }
            RegistryProtocol::Https => {
                ClientProtocol::HttpsExcept(config.insecure_registries.clone())
            }
        };
        let client = Client::new(ClientConfig {
            protocol,
            ..Default::default()
        });
        Self { client, config }
    }

    fn auth_for(&self, reference: &ImageReference) -> OciRegistryAuth {
        RegistryAuth::resolve(&self.config, &reference.registry).to_oci_auth()
    }

    /// Pull the raw manifest bytes for `reference`.
    pub async fn pull_manifest_raw(&self, reference: &ImageReference) -> Result<Vec<u8>> {
        let oci_ref = to_oci_reference(reference)?;
        let (body, digest) = self
            .client
            .pull_manifest_raw(&oci_ref, &self.auth_for(reference), MANIFEST_MEDIA_TYPES)
            .await
            .map_err(|e| registry_error(reference, "Failed to pull manifest", e))?;

        tracing::debug!(reference = %reference, digest = %digest, "Pulled manifest");
        Ok(body.to_vec())
    }

    /// Pull one blob of `reference` into memory.
    pub async fn pull_blob(
        &self,
        reference: &ImageReference,
        descriptor: &OciDescriptor,
    ) -> Result<Vec<u8>> {
        let oci_ref = to_oci_reference(reference)?;
        let mut data: Vec<u8> = Vec::new();
        self.client
            .pull_blob(&oci_ref, descriptor, &mut data)
            .await
            .map_err(|e| {
                registry_error(
                    reference,
                    &format!("Failed to pull blob {}", descriptor.digest),
                    e,
                )
            })?;
        Ok(data)
    }

    /// Authenticate against the destination registry for pushing.
    pub async fn authenticate_push(&self, reference: &ImageReference) -> Result<()> {
        let oci_ref = to_oci_reference(reference)?;
        self.client
            .auth(&oci_ref, &self.auth_for(reference), RegistryOperation::Push)
            .await
            .map_err(|e| registry_error(reference, "Failed to authenticate", e))?;
        Ok(())
    }

    /// Upload one blob to the repository of `reference`.
    pub async fn push_blob(
        &self,
        reference: &ImageReference,
        data: &[u8],
        digest: &str,
    ) -> Result<()> {
        let oci_ref = to_oci_reference(reference)?;
        let location = self
            .client
            .push_blob(&oci_ref, data, digest)
            .await
            .map_err(|e| registry_error(reference, &format!("Failed to push blob {}", digest), e))?;

        tracing::debug!(
            reference = %reference,
            digest = %digest,
            size = data.len(),
            location = %location,
            "Pushed blob"
        );
        Ok(())
    }

    /// Publish raw manifest bytes under `reference`.
    pub async fn push_manifest_raw(
        &self,
        reference: &ImageReference,
        body: Vec<u8>,
        media_type: &str,
    ) -> Result<String> {
        let oci_ref = to_oci_reference(reference)?;
        let content_type = HeaderValue::from_str(media_type).map_err(|e| RelocError::PushError {
            image: reference.to_string(),
            message: format!("Invalid manifest media type '{}': {}", media_type, e),
        })?;
        self.client
            .push_manifest_raw(&oci_ref, body.into(), content_type)
            .await
            .map_err(|e| registry_error(reference, "Failed to push manifest", e))
    }

    /// Digest the registry reports for `reference`.
    pub async fn manifest_digest(&self, reference: &ImageReference) -> Result<String> {
        let oci_ref = to_oci_reference(reference)?;
        self.client
            .fetch_manifest_digest(&oci_ref, &self.auth_for(reference))
            .await
            .map_err(|e| registry_error(reference, "Failed to fetch manifest digest", e))
    }
}

/// Convert an ImageReference to an oci-distribution Reference.
fn to_oci_reference(reference: &ImageReference) -> Result<Reference> {
    let ref_str = reference.full_reference();
    ref_str
        .parse::<Reference>()
        .map_err(|e| RelocError::InvalidReference {
            reference: ref_str.clone(),
            message: e.to_string(),
        })
}

fn registry_error(
    reference: &ImageReference,
    context: &str,
    err: impl std::fmt::Display,
) -> RelocError {
    RelocError::RegistryError {
        registry: reference.registry.clone(),
        message: format!("{} for {}: {}", context, reference, err),
    }
}
