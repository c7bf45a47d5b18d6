//! Typed view of a CNAB bundle descriptor.
//!
//! Only the fields relocation cares about are modelled; everything else is
//! carried through `extra` so a load/serialize cycle keeps it intact.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{RelocError, Result};

/// Image type assumed when an entry does not declare one.
pub const DEFAULT_IMAGE_TYPE: &str = "oci";

/// Image types a store backend can relocate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ImageType {
    Docker,
    Oci,
}

impl ImageType {
    /// Every supported image type.
    pub const SUPPORTED: [ImageType; 2] = [ImageType::Oci, ImageType::Docker];

    /// Parse a declared `imageType`. Returns `None` for unsupported types.
    pub fn parse(declared: &str) -> Option<Self> {
        match declared {
            "" | "oci" => Some(ImageType::Oci),
            "docker" => Some(ImageType::Docker),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ImageType::Docker => "docker",
            ImageType::Oci => "oci",
        }
    }
}

impl fmt::Display for ImageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An image entry, used for both invocation images and named images.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleImage {
    /// Current image reference
    #[serde(default)]
    pub image: String,

    /// Declared image type (`docker`, `oci`, ...)
    #[serde(default)]
    pub image_type: String,

    /// Reference before relocation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_image: Option<String>,

    /// Content digest pinned by the bundle author
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl BundleImage {
    /// The declared image type, with the CNAB default applied.
    pub fn declared_type(&self) -> &str {
        if self.image_type.is_empty() {
            DEFAULT_IMAGE_TYPE
        } else {
            &self.image_type
        }
    }
}

/// Bundle descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bundle {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub version: String,

    /// Invocation images, in declared order
    #[serde(default)]
    pub invocation_images: Vec<BundleImage>,

    /// Named images
    #[serde(default)]
    pub images: BTreeMap<String, BundleImage>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Location of one image entry inside a bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSlot {
    /// Index into `invocationImages`
    Invocation(usize),
    /// Key into `images`
    Named(String),
}

impl ImageSlot {
    /// Keys leading from the descriptor root to this entry.
    pub fn path(&self) -> Vec<String> {
        match self {
            ImageSlot::Invocation(index) => {
                vec!["invocationImages".to_string(), index.to_string()]
            }
            ImageSlot::Named(name) => vec!["images".to_string(), name.clone()],
        }
    }
}

impl Bundle {
    /// Build the typed view from a descriptor tree.
    pub fn from_value(value: &Value) -> Result<Self> {
        Ok(Bundle::deserialize(value)?)
    }

    /// All image entries in processing order: invocation images first,
    /// in declared order, then named images by ascending key.
    pub fn image_entries(&self) -> impl Iterator<Item = (ImageSlot, &BundleImage)> {
        let invocation = self
            .invocation_images
            .iter()
            .enumerate()
            .map(|(i, img)| (ImageSlot::Invocation(i), img));
        let named = self
            .images
            .iter()
            .map(|(name, img)| (ImageSlot::Named(name.clone()), img));
        invocation.chain(named)
    }

    /// Human-readable name for an entry, used in error messages.
    pub fn entry_label(&self, slot: &ImageSlot) -> String {
        match slot {
            ImageSlot::Invocation(i) => self
                .invocation_images
                .get(*i)
                .map(|img| img.image.clone())
                .unwrap_or_else(|| format!("invocationImages[{}]", i)),
            ImageSlot::Named(name) => name.clone(),
        }
    }

    /// Check the descriptor for the structural rules relocation relies on.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(RelocError::ValidationError(
                "bundle name is required".to_string(),
            ));
        }
        if self.version.trim().is_empty() {
            return Err(RelocError::ValidationError(
                "bundle version is required".to_string(),
            ));
        }
        for (slot, img) in self.image_entries() {
            let label = self.entry_label(&slot);
            if img.image.trim().is_empty() {
                return Err(RelocError::ValidationError(format!(
                    "image {} has an empty image reference",
                    label
                )));
            }
            if let Some(ref digest) = img.digest {
                if !is_valid_digest(digest) {
                    return Err(RelocError::ValidationError(format!(
                        "image {} has malformed digest '{}': expected algorithm:hex",
                        label, digest
                    )));
                }
            }
        }

        Ok(())
    }
}

/// Whether `digest` looks like `<algorithm>:<hex>`.
pub fn is_valid_digest(digest: &str) -> bool {
    match digest.split_once(':') {
        Some((algo, hex)) => {
            !algo.is_empty()
                && algo
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || "+._-".contains(c))
                && !hex.is_empty()
                && hex.chars().all(|c| c.is_ascii_hexdigit())
        }
        None => false,
    }
}
