//! CNAB Relocation Runtime - relocation engine implementation.
//!
//! Provides image reference handling, destination name computation,
//! selector-based document rewriting, the image stores that copy content to
//! the target registry, and the orchestrator that ties them into one run.

#![allow(clippy::result_large_err)]

pub mod bundle_file;
pub mod naming;
pub mod reference;
pub mod relocator;
pub mod replacement;
pub mod store;

// Re-export common types
pub use bundle_file::{load_bundle, BundleKind, LoadedBundle, StagedOutput};
pub use naming::{relocate, MAX_NAME_LENGTH};
pub use reference::{ImageReference, RepositoryPrefix, DEFAULT_REGISTRY};
pub use relocator::{RelocateRequest, RelocationMemo, Relocator, RunState};
pub use replacement::{replace_file, replace_in, DocMap, DocumentFormat, Replacer, Selector};
pub use store::{
    check_image_type, DefaultStoreFactory, ImageStore, LayoutStore, RegistryAuth, RegistryClient,
    RegistryStore, StoreFactory, StoreOptions, LAYOUT_DIR, REF_NAME_ANNOTATION,
};

/// CNAB Relocation Runtime version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
