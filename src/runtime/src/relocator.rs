//! Relocation orchestrator.
//!
//! One [`Relocator::run`] call relocates one bundle:
//!
//! ```text
//! Loaded ─► TypeChecked ─► PerImage ─► Rewritten ─► Persisted ─► Validated
//!    │           │             │           │            │            │
//!    └───────────┴─────────────┴─────┬─────┴────────────┴────────────┘
//!                                    ▼
//!                                  Error
//! ```
//!
//! Every image type and reference is checked before a store is built or a
//! thick bundle is unpacked. Output is staged beside the destination and
//! only renamed into place after it has been re-read and validated, so a
//! failed run never leaves an output file behind. Images already pushed by a
//! failed run are not rolled back.

use std::collections::hash_map::Entry;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;

use cnab_reloc_core::bundle::{ImageSlot, ImageType};
use cnab_reloc_core::error::{RelocError, Result};

use crate::bundle_file::{self, BundleKind};
use crate::naming;
use crate::reference::{ImageReference, RepositoryPrefix};
use crate::replacement::{replace_in, Selector};
use crate::store::{check_image_type, StoreFactory, StoreOptions};

/// Orchestrator states, logged on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Loaded,
    TypeChecked,
    PerImage,
    Rewritten,
    Persisted,
    Validated,
    Error,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunState::Loaded => "loaded",
            RunState::TypeChecked => "type_checked",
            RunState::PerImage => "per_image",
            RunState::Rewritten => "rewritten",
            RunState::Persisted => "persisted",
            RunState::Validated => "validated",
            RunState::Error => "error",
        };
        f.write_str(s)
    }
}

/// Destinations already computed (and pushed) during one run, keyed by
/// normalized source reference.
#[derive(Debug, Default)]
pub struct RelocationMemo {
    destinations: HashMap<String, ImageReference>,
}

impl RelocationMemo {
    pub fn get(&self, source: &ImageReference) -> Option<&ImageReference> {
        self.destinations.get(&source.full_reference())
    }

    pub fn insert(&mut self, source: &ImageReference, destination: ImageReference) {
        self.destinations
            .insert(source.full_reference(), destination);
    }

    /// Number of distinct images pushed.
    pub fn pushed(&self) -> usize {
        self.destinations.len()
    }
}

/// Parameters of one relocation run.
#[derive(Debug, Clone)]
pub struct RelocateRequest {
    /// Thin (`.json`) or thick (`.tgz`/`.tar.gz`) bundle to relocate
    pub input: PathBuf,
    /// Where the relocated bundle is written; same format as `input`
    pub output: PathBuf,
    /// Registry and repository path receiving the images
    pub repository_prefix: String,
    /// Directory that thick bundles are unpacked into
    pub work_dir: PathBuf,
}

/// One image entry, checked and ready to relocate.
#[derive(Debug)]
struct PlannedImage {
    slot: ImageSlot,
    /// Entry `image` value as written in the descriptor
    current: String,
    source: ImageReference,
    expected_digest: Option<String>,
    /// Parsed `originalImage`, when an earlier relocation recorded one
    origin: Option<ImageReference>,
    keeps_original: bool,
}

/// Drives relocation runs against stores built by a [`StoreFactory`].
pub struct Relocator {
    factory: Arc<dyn StoreFactory>,
}

impl Relocator {
    pub fn new(factory: Arc<dyn StoreFactory>) -> Self {
        Self { factory }
    }

    /// Relocate `request.input` and return the path of the written output.
    pub async fn run(&self, request: &RelocateRequest) -> Result<PathBuf> {
        let result = self.relocate(request).await;
        if let Err(ref e) = result {
            tracing::error!(
                state = %RunState::Error,
                input = %request.input.display(),
                error = %e,
                "Relocation aborted"
            );
        }
        result
    }

    async fn relocate(&self, request: &RelocateRequest) -> Result<PathBuf> {
        let prefix = RepositoryPrefix::parse(&request.repository_prefix)?;
        if same_path(&request.input, &request.output) {
            return Err(RelocError::ConfigError(format!(
                "output {} must differ from the input bundle",
                request.output.display()
            )));
        }

        let loaded = bundle_file::load_bundle(&request.input)?;
        enter(RunState::Loaded, &request.input);

        let (plan, image_types) = plan_images(&loaded.bundle)?;
        enter(RunState::TypeChecked, &request.input);

        let archive_dir = match loaded.kind {
            BundleKind::Thick => Some(bundle_file::unpack_archive(
                &request.input,
                &request.work_dir,
            )?),
            BundleKind::Thin => None,
        };
        let origins = plan
            .iter()
            .filter_map(|item| Some((item.source.full_reference(), item.origin.clone()?)))
            .collect();
        let store = self.factory.build(&StoreOptions {
            image_types,
            archive_dir,
            origins,
        })?;

        enter(RunState::PerImage, &request.input);
        let mut memo = RelocationMemo::default();
        let mut document = loaded.document.clone();
        for item in &plan {
            let destination = match memo.get(&item.source) {
                Some(destination) => {
                    tracing::debug!(
                        source = %item.source,
                        destination = %destination,
                        "Image already relocated in this run"
                    );
                    destination.clone()
                }
                None => {
                    let destination = naming::relocate(&item.source, &prefix)?;
                    tracing::info!(
                        source = %item.source,
                        destination = %destination,
                        digest = item.expected_digest.as_deref().unwrap_or("-"),
                        "Relocating image"
                    );
                    store
                        .push(item.expected_digest.as_deref(), &item.source, &destination)
                        .await?;
                    memo.insert(&item.source, destination.clone());
                    destination
                }
            };
            record_relocation(&mut document, item, &destination);
        }
        enter(RunState::Rewritten, &request.input);

        let staged = bundle_file::stage_output(
            loaded.kind,
            &request.output,
            &document,
            store.archive_dir(),
        )?;
        enter(RunState::Persisted, staged.path());

        bundle_file::load_bundle(staged.path())?.bundle.validate()?;
        enter(RunState::Validated, staged.path());

        let written = staged.commit()?;
        tracing::info!(
            output = %written.display(),
            images = plan.len(),
            pushed = memo.pushed(),
            "Bundle relocated"
        );
        Ok(written)
    }
}

/// Check every entry's declared type, then parse every reference.
///
/// Types are checked over the whole bundle first so an unsupported type is
/// reported even when an earlier entry has a malformed reference. Entries
/// naming the same image share its pinned digest, so the one push it gets
/// is verified whichever entry comes first.
fn plan_images(
    bundle: &cnab_reloc_core::bundle::Bundle,
) -> Result<(Vec<PlannedImage>, BTreeSet<ImageType>)> {
    let mut image_types = BTreeSet::new();
    for (slot, img) in bundle.image_entries() {
        let image_type = check_image_type(&bundle.entry_label(&slot), img.declared_type())?;
        image_types.insert(image_type);
    }

    let mut plan = Vec::new();
    let mut pinned: HashMap<String, String> = HashMap::new();
    for (slot, img) in bundle.image_entries() {
        let source = ImageReference::parse(&img.image)?;
        let expected_digest = img.digest.clone().or_else(|| source.digest.clone());
        if let Some(ref digest) = expected_digest {
            match pinned.entry(source.full_reference()) {
                Entry::Vacant(e) => {
                    e.insert(digest.clone());
                }
                Entry::Occupied(e) if e.get() != digest => {
                    return Err(RelocError::ValidationError(format!(
                        "image {} is pinned to both {} and {}",
                        source,
                        e.get(),
                        digest
                    )));
                }
                Entry::Occupied(_) => {}
            }
        }
        let origin = match img.original_image.as_deref().map(ImageReference::parse) {
            Some(Ok(origin)) => Some(origin),
            Some(Err(e)) => {
                tracing::warn!(image = %img.image, error = %e, "Ignoring unparseable originalImage");
                None
            }
            None => None,
        };
        plan.push(PlannedImage {
            slot,
            current: img.image.clone(),
            source,
            expected_digest,
            origin,
            keeps_original: img.original_image.is_some(),
        });
    }

    for item in plan.iter_mut().filter(|item| item.expected_digest.is_none()) {
        if let Some(digest) = pinned.get(&item.source.full_reference()) {
            tracing::debug!(
                source = %item.source,
                digest = %digest,
                "Using digest pinned by another entry for the same image"
            );
            item.expected_digest = Some(digest.clone());
        }
    }
    Ok((plan, image_types))
}

/// Point the entry at `destination`, recording where it came from unless an
/// earlier relocation already did.
fn record_relocation(document: &mut Value, item: &PlannedImage, destination: &ImageReference) {
    let entry = Selector::from_keys(item.slot.path());
    if !item.keeps_original {
        replace_in(
            document,
            &entry.child("originalImage"),
            Value::String(item.current.clone()),
        );
    }
    replace_in(
        document,
        &entry.child("image"),
        Value::String(destination.to_string()),
    );
}

fn enter(state: RunState, path: &Path) {
    tracing::info!(state = %state, path = %path.display(), "Relocation state");
}

/// Whether two paths name the same file. The output need not exist yet, so
/// only its parent directory is resolved.
fn same_path(a: &Path, b: &Path) -> bool {
    fn resolve(p: &Path) -> PathBuf {
        let parent = match p.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        match (parent.canonicalize(), p.file_name()) {
            (Ok(dir), Some(name)) => dir.join(name),
            _ => p.to_path_buf(),
        }
    }
    resolve(a) == resolve(b)
}
