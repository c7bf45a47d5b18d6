//! Relocated name computation.
//!
//! Maps an original reference onto a repository prefix by flattening its
//! repository path into one segment and appending an MD5 hash of the
//! original repository name:
//!
//! ```text
//! docker.io/deislabs/duffle:0.1.0  +  example.com/user
//!   → example.com/user/deislabs-duffle-50aa5cc4ebb040ac696a9753d1695298:0.1.0
//! ```
//!
//! The hash covers the registry host, so repositories that flatten to the
//! same segment from different registries or namespaces stay distinct.
//! Tag and digest are carried over verbatim.

use md5::{Digest, Md5};

use cnab_reloc_core::error::{RelocError, Result};

use crate::reference::{ImageReference, RepositoryPrefix};

/// Maximum length of a relocated repository name (registry and path).
pub const MAX_NAME_LENGTH: usize = 255;

/// Separator used when flattening repository paths.
const FLATTEN_SEPARATOR: &str = "-";

/// Compute the relocated reference for `original` under `prefix`.
///
/// Pure and deterministic. `original` must already be normalized (see
/// [`ImageReference::parse`]).
pub fn relocate(original: &ImageReference, prefix: &RepositoryPrefix) -> Result<ImageReference> {
    let hash = name_hash(original);
    let flat = flatten_path(original);
    let prefix_str = prefix.to_string();

    // "<prefix>/" + "<flat>" + "-" + "<hash>"
    let fixed = prefix_str.len() + 1 + hash.len();
    if fixed > MAX_NAME_LENGTH {
        return Err(RelocError::ConfigError(format!(
            "repository prefix '{}' is too long to relocate {}",
            prefix_str, original
        )));
    }
    let available = MAX_NAME_LENGTH - fixed;

    let segment = if available <= FLATTEN_SEPARATOR.len() {
        hash
    } else {
        let keep = flat.len().min(available - FLATTEN_SEPARATOR.len());
        // Truncation must not leave a dangling separator before the hash
        let flat = flat[..keep].trim_end_matches(['-', '.', '_']);
        if flat.is_empty() {
            hash
        } else {
            format!("{}{}{}", flat, FLATTEN_SEPARATOR, hash)
        }
    };

    let repository = match prefix.path() {
        Some(path) => format!("{}/{}", path, segment),
        None => segment,
    };

    Ok(original.with_name(prefix.registry(), &repository))
}

/// Join the repository path components into a single segment.
fn flatten_path(original: &ImageReference) -> String {
    original
        .path_components()
        .collect::<Vec<_>>()
        .join(FLATTEN_SEPARATOR)
}

/// Lowercase hex MD5 of the repository name, e.g. `docker.io/deislabs/duffle`.
fn name_hash(original: &ImageReference) -> String {
    let mut hasher = Md5::new();
    hasher.update(original.name().as_bytes());
    hex::encode(hasher.finalize())
}
