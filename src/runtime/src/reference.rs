//! Image reference parsing and normalization.
//!
//! Parses references like `ghcr.io/org/app:v0.1.0` into structured components.
//! Unqualified references are normalized here, before any name is relocated:
//! `nginx` becomes `docker.io/library/nginx:latest`.

use std::fmt;

use cnab_reloc_core::error::{RelocError, Result};

/// Default registry when none is specified.
pub const DEFAULT_REGISTRY: &str = "docker.io";

/// Default tag when neither tag nor digest is specified.
const DEFAULT_TAG: &str = "latest";

/// Parsed image reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageReference {
    /// Registry hostname, possibly with port (e.g., "ghcr.io", "localhost:5000")
    pub registry: String,
    /// Repository path (e.g., "library/nginx", "deislabs/duffle")
    pub repository: String,
    /// Tag (e.g., "latest", "0.1.0")
    pub tag: Option<String>,
    /// Digest (e.g., "sha256:abc123...")
    pub digest: Option<String>,
}

impl ImageReference {
    /// Parse and normalize an image reference string.
    ///
    /// Supports formats:
    /// - `nginx` → docker.io/library/nginx:latest
    /// - `myuser/myimage:v1` → docker.io/myuser/myimage:v1
    /// - `ghcr.io/org/image@sha256:abc...` → ghcr.io/org/image@sha256:abc...
    /// - `ghcr.io/org/image:tag@sha256:abc...` keeps both suffixes
    pub fn parse(reference: &str) -> Result<Self> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(invalid(reference, "empty image reference"));
        }

        let (name_tag, digest) = match reference.rsplit_once('@') {
            Some((name_tag, digest)) => {
                if !cnab_reloc_core::bundle::is_valid_digest(digest) {
                    return Err(invalid(reference, "invalid digest: expected algorithm:hex"));
                }
                (name_tag, Some(digest.to_string()))
            }
            None => (reference, None),
        };

        // A tag can only follow the last path separator; a colon before it
        // belongs to a registry port.
        let last_segment_start = name_tag.rfind('/').map(|p| p + 1).unwrap_or(0);
        let (name, tag) = match name_tag[last_segment_start..].rfind(':') {
            Some(colon) => {
                let colon = last_segment_start + colon;
                (&name_tag[..colon], Some(name_tag[colon + 1..].to_string()))
            }
            None => (name_tag, None),
        };

        if let Some(ref tag) = tag {
            if !is_valid_tag(tag) {
                return Err(invalid(reference, &format!("invalid tag '{}'", tag)));
            }
        }

        let (registry, repository) = split_registry_repository(name)
            .map_err(|message| invalid(reference, &message))?;

        let tag = if tag.is_none() && digest.is_none() {
            Some(DEFAULT_TAG.to_string())
        } else {
            tag
        };

        Ok(ImageReference {
            registry,
            repository,
            tag,
            digest,
        })
    }

    /// Repository name without tag or digest: `<registry>/<repository>`.
    pub fn name(&self) -> String {
        format!("{}/{}", self.registry, self.repository)
    }

    /// Path components of the repository, excluding the registry host.
    pub fn path_components(&self) -> impl Iterator<Item = &str> {
        self.repository.split('/')
    }

    /// Copy of this reference with the repository name replaced and the
    /// tag and digest carried over unchanged.
    pub fn with_name(&self, registry: &str, repository: &str) -> Self {
        ImageReference {
            registry: registry.to_string(),
            repository: repository.to_string(),
            tag: self.tag.clone(),
            digest: self.digest.clone(),
        }
    }

    /// Copy of this reference addressed by `digest` only.
    pub fn at_digest(&self, digest: &str) -> Self {
        ImageReference {
            registry: self.registry.clone(),
            repository: self.repository.clone(),
            tag: None,
            digest: Some(digest.to_string()),
        }
    }

    /// Get the full reference string.
    pub fn full_reference(&self) -> String {
        let mut s = self.name();
        if let Some(ref tag) = self.tag {
            s.push(':');
            s.push_str(tag);
        }
        if let Some(ref digest) = self.digest {
            s.push('@');
            s.push_str(digest);
        }
        s
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.full_reference())
    }
}

/// Target repository prefix for relocated images, e.g. `example.com/user`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryPrefix {
    registry: String,
    path: Option<String>,
}

impl RepositoryPrefix {
    /// Parse and validate a repository prefix.
    pub fn parse(prefix: &str) -> Result<Self> {
        let trimmed = prefix.trim().trim_end_matches('/');
        if trimmed.is_empty() {
            return Err(RelocError::ConfigError(
                "repository prefix is empty".to_string(),
            ));
        }
        if trimmed.contains('@') || trimmed.chars().any(char::is_whitespace) {
            return Err(malformed_prefix(prefix, "must not contain '@' or whitespace"));
        }
        if trimmed.split('/').any(str::is_empty) {
            return Err(malformed_prefix(prefix, "contains an empty path segment"));
        }

        let (registry, path) = match trimmed.split_once('/') {
            Some((first, rest)) if looks_like_registry(first) => {
                (first.to_string(), Some(rest.to_string()))
            }
            Some(_) => (DEFAULT_REGISTRY.to_string(), Some(trimmed.to_string())),
            None if looks_like_registry(trimmed) => (trimmed.to_string(), None),
            None => (DEFAULT_REGISTRY.to_string(), Some(trimmed.to_string())),
        };

        if let Some(ref path) = path {
            if path.contains(':') {
                return Err(malformed_prefix(prefix, "must not carry a tag"));
            }
            if !path.split('/').all(is_valid_path_component) {
                return Err(malformed_prefix(
                    prefix,
                    "path components must be lowercase alphanumerics separated by '.', '_' or '-'",
                ));
            }
        }

        Ok(RepositoryPrefix { registry, path })
    }

    /// Registry host the prefix points at.
    pub fn registry(&self) -> &str {
        &self.registry
    }

    /// Repository path under the registry, if any.
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }
}

impl fmt::Display for RepositoryPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.path {
            Some(ref path) => write!(f, "{}/{}", self.registry, path),
            None => f.write_str(&self.registry),
        }
    }
}

/// First component is a registry if it contains a dot or colon, or is "localhost".
fn looks_like_registry(component: &str) -> bool {
    component.contains('.') || component.contains(':') || component == "localhost"
}

/// Split a name into registry and repository components.
fn split_registry_repository(name: &str) -> std::result::Result<(String, String), String> {
    let (registry, repository) = match name.split_once('/') {
        Some((first, rest)) if looks_like_registry(first) => (first.to_string(), rest.to_string()),
        _ => (DEFAULT_REGISTRY.to_string(), name.to_string()),
    };

    if repository.is_empty() {
        return Err("empty repository".to_string());
    }
    if !repository.split('/').all(is_valid_path_component) {
        return Err(format!("invalid repository '{}'", repository));
    }

    // Single name like "nginx" → "library/nginx" for Docker Hub
    let repository = if registry == DEFAULT_REGISTRY && !repository.contains('/') {
        format!("library/{}", repository)
    } else {
        repository
    };

    Ok((registry, repository))
}

fn is_valid_path_component(component: &str) -> bool {
    let valid_chars = component
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || "._-".contains(c));
    let alnum_ends = component
        .chars()
        .next()
        .zip(component.chars().last())
        .map_or(false, |(a, b)| a.is_ascii_alphanumeric() && b.is_ascii_alphanumeric());
    valid_chars && alnum_ends
}

fn is_valid_tag(tag: &str) -> bool {
    !tag.is_empty()
        && tag.len() <= 128
        && !tag.starts_with(['.', '-'])
        && tag
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "._-".contains(c))
}

fn invalid(reference: &str, message: &str) -> RelocError {
    RelocError::InvalidReference {
        reference: reference.to_string(),
        message: message.to_string(),
    }
}

fn malformed_prefix(prefix: &str, message: &str) -> RelocError {
    RelocError::ConfigError(format!(
        "malformed repository prefix '{}': {}",
        prefix, message
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIGEST: &str =
        "sha256:4d41eeb38fb14266b7c0461ef1ef0b2f8c05f41cd544987a259a9d92cdad2540";

    #[test]
    fn test_parse_simple_name() {
        let r = ImageReference::parse("nginx").unwrap();
        assert_eq!(r.registry, "docker.io");
        assert_eq!(r.repository, "library/nginx");
        assert_eq!(r.tag, Some("latest".to_string()));
        assert_eq!(r.digest, None);
    }

    #[test]
    fn test_parse_user_repo_with_tag() {
        let r = ImageReference::parse("technosophos/helloworld:0.1.0").unwrap();
        assert_eq!(r.registry, "docker.io");
        assert_eq!(r.repository, "technosophos/helloworld");
        assert_eq!(r.tag, Some("0.1.0".to_string()));
        assert_eq!(r.to_string(), "docker.io/technosophos/helloworld:0.1.0");
    }

    #[test]
    fn test_parse_digest_only() {
        let r = ImageReference::parse(&format!("deislabs/duffle@{}", DIGEST)).unwrap();
        assert_eq!(r.repository, "deislabs/duffle");
        assert_eq!(r.tag, None);
        assert_eq!(r.digest.as_deref(), Some(DIGEST));
        assert_eq!(r.to_string(), format!("docker.io/deislabs/duffle@{}", DIGEST));
    }

    #[test]
    fn test_parse_tag_and_digest() {
        let r = ImageReference::parse(&format!("ghcr.io/org/app:v1@{}", DIGEST)).unwrap();
        assert_eq!(r.registry, "ghcr.io");
        assert_eq!(r.repository, "org/app");
        assert_eq!(r.tag.as_deref(), Some("v1"));
        assert_eq!(r.digest.as_deref(), Some(DIGEST));
    }

    #[test]
    fn test_parse_registry_with_port() {
        let r = ImageReference::parse("localhost:5000/myimage:v1").unwrap();
        assert_eq!(r.registry, "localhost:5000");
        assert_eq!(r.repository, "myimage");
        assert_eq!(r.tag, Some("v1".to_string()));
    }

    #[test]
    fn test_parse_registry_with_port_no_tag() {
        let r = ImageReference::parse("myregistry.io:5000/org/app").unwrap();
        assert_eq!(r.registry, "myregistry.io:5000");
        assert_eq!(r.repository, "org/app");
        assert_eq!(r.tag, Some("latest".to_string()));
    }

    #[test]
    fn test_parse_custom_registry_single_segment_not_prefixed() {
        let r = ImageReference::parse("quay.io/app:1").unwrap();
        assert_eq!(r.repository, "app");
    }

    #[test]
    fn test_parse_errors() {
        assert!(ImageReference::parse("").is_err());
        assert!(ImageReference::parse("nginx@invaliddigest").is_err());
        assert!(ImageReference::parse("Nginx:1").is_err());
        assert!(ImageReference::parse("ghcr.io/").is_err());
        assert!(ImageReference::parse("nginx:").is_err());
        assert!(ImageReference::parse("org//app").is_err());
    }

    #[test]
    fn test_name_and_path_components() {
        let r = ImageReference::parse("ghcr.io/org/sub/image:v1").unwrap();
        assert_eq!(r.name(), "ghcr.io/org/sub/image");
        let parts: Vec<&str> = r.path_components().collect();
        assert_eq!(parts, vec!["org", "sub", "image"]);
    }

    #[test]
    fn test_with_name_keeps_suffix() {
        let r = ImageReference::parse(&format!("org/app:v1@{}", DIGEST)).unwrap();
        let moved = r.with_name("example.com", "user/app");
        assert_eq!(moved.to_string(), format!("example.com/user/app:v1@{}", DIGEST));
    }

    #[test]
    fn test_at_digest() {
        let r = ImageReference::parse("org/app:v1").unwrap();
        assert_eq!(
            r.at_digest("sha256:abc").to_string(),
            "docker.io/org/app@sha256:abc"
        );
    }

    #[test]
    fn test_prefix_parse() {
        let p = RepositoryPrefix::parse("example.com/user").unwrap();
        assert_eq!(p.registry(), "example.com");
        assert_eq!(p.path(), Some("user"));
        assert_eq!(p.to_string(), "example.com/user");

        let p = RepositoryPrefix::parse("example.com/user/").unwrap();
        assert_eq!(p.to_string(), "example.com/user");

        let p = RepositoryPrefix::parse("localhost:5000").unwrap();
        assert_eq!(p.registry(), "localhost:5000");
        assert_eq!(p.path(), None);

        let p = RepositoryPrefix::parse("myorg").unwrap();
        assert_eq!(p.to_string(), "docker.io/myorg");
    }

    #[test]
    fn test_prefix_malformed() {
        for bad in ["", "  ", "example.com//user", "example.com/user:tag", "a b", "x@sha256:1", "example.com/User"] {
            assert!(
                matches!(RepositoryPrefix::parse(bad), Err(RelocError::ConfigError(_))),
                "prefix {:?} should be rejected",
                bad
            );
        }
    }
}
