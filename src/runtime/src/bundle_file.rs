//! Bundle files on disk: loading, unpacking and staged output.
//!
//! A thin bundle is a `.json` descriptor. A thick bundle is a gzip tarball
//! with `bundle.json` at its root next to the image layout the
//! [`LayoutStore`](crate::store::LayoutStore) reads.
//!
//! Output is never written in place. It is staged in a temp file next to the
//! destination, checked, and renamed over the destination in one step.

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::Value;
use tempfile::NamedTempFile;

use cnab_reloc_core::bundle::Bundle;
use cnab_reloc_core::error::{RelocError, Result};

/// Descriptor file name inside a thick bundle.
pub const DESCRIPTOR_NAME: &str = "bundle.json";

const THICK_SUFFIXES: [&str; 2] = [".tar.gz", ".tgz"];

/// Shape of a bundle file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleKind {
    /// Descriptor only
    Thin,
    /// Descriptor plus staged image content
    Thick,
}

impl BundleKind {
    /// Recognize a bundle by its file name.
    pub fn detect(path: &Path) -> Result<Self> {
        let name = file_name(path)?;
        if name.ends_with(".json") {
            Ok(BundleKind::Thin)
        } else if THICK_SUFFIXES.iter().any(|s| name.ends_with(s)) {
            Ok(BundleKind::Thick)
        } else {
            Err(RelocError::LoadError {
                path: path.display().to_string(),
                message: "expected a .json descriptor or a .tgz/.tar.gz thick bundle".to_string(),
            })
        }
    }
}

/// A descriptor read from disk.
#[derive(Debug, Clone)]
pub struct LoadedBundle {
    pub path: PathBuf,
    pub kind: BundleKind,
    /// Raw descriptor tree; fields the typed view does not model survive here
    pub document: Value,
    pub bundle: Bundle,
}

/// Load the descriptor of a thin or thick bundle.
///
/// Thick bundles are not unpacked; only `bundle.json` is read from the
/// archive.
pub fn load_bundle(path: &Path) -> Result<LoadedBundle> {
    let kind = BundleKind::detect(path)?;
    let raw = match kind {
        BundleKind::Thin => std::fs::read(path).map_err(|e| load_error(path, e))?,
        BundleKind::Thick => read_archived_descriptor(path)?,
    };

    let document: Value = serde_json::from_slice(&raw).map_err(|e| load_error(path, e))?;
    if !document.is_object() {
        return Err(load_error(path, "descriptor must be a JSON object"));
    }
    let bundle = Bundle::from_value(&document).map_err(|e| load_error(path, e))?;

    tracing::debug!(
        path = %path.display(),
        kind = ?kind,
        name = %bundle.name,
        version = %bundle.version,
        "Loaded bundle descriptor"
    );
    Ok(LoadedBundle {
        path: path.to_path_buf(),
        kind,
        document,
        bundle,
    })
}

fn read_archived_descriptor(path: &Path) -> Result<Vec<u8>> {
    let file = File::open(path).map_err(|e| load_error(path, e))?;
    let mut archive = tar::Archive::new(GzDecoder::new(file));

    for entry in archive.entries().map_err(|e| load_error(path, e))? {
        let mut entry = entry.map_err(|e| load_error(path, e))?;
        let entry_path = entry.path().map_err(|e| load_error(path, e))?;
        let normalized: PathBuf = entry_path
            .components()
            .filter(|c| !matches!(c, Component::CurDir))
            .collect();
        if normalized == Path::new(DESCRIPTOR_NAME) {
            let mut raw = Vec::new();
            entry.read_to_end(&mut raw).map_err(|e| load_error(path, e))?;
            return Ok(raw);
        }
    }

    Err(load_error(
        path,
        format!("archive has no {} at its root", DESCRIPTOR_NAME),
    ))
}

/// File name of a thick bundle without its archive suffix.
pub fn archive_base_name(path: &Path) -> Result<String> {
    let name = file_name(path)?;
    THICK_SUFFIXES
        .iter()
        .find_map(|s| name.strip_suffix(s))
        .filter(|base| !base.is_empty())
        .map(str::to_string)
        .ok_or_else(|| load_error(path, "not a thick bundle archive"))
}

/// Unpack a thick bundle into `<work_dir>/<archive base name>` and return
/// that directory.
///
/// The target must not exist yet; the work directory belongs to the caller
/// and nothing in it is overwritten.
pub fn unpack_archive(archive: &Path, work_dir: &Path) -> Result<PathBuf> {
    let target = work_dir.join(archive_base_name(archive)?);
    if target.exists() {
        return Err(RelocError::ConfigError(format!(
            "cannot unpack {} into {}: directory already exists",
            archive.display(),
            target.display()
        )));
    }
    std::fs::create_dir_all(&target)?;

    let file = File::open(archive).map_err(|e| load_error(archive, e))?;
    tar::Archive::new(GzDecoder::new(file))
        .unpack(&target)
        .map_err(|e| load_error(archive, format!("failed to unpack: {}", e)))?;

    tracing::debug!(
        archive = %archive.display(),
        target = %target.display(),
        "Unpacked thick bundle"
    );
    Ok(target)
}

/// Replace the contents of `path` with `bytes` via temp file and rename.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut staged = temp_file_near(path, ".tmp")?;
    staged
        .write_all(bytes)
        .and_then(|_| staged.as_file().sync_all())
        .map_err(|e| write_error(path, e))?;
    staged
        .persist(path)
        .map_err(|e| write_error(path, e.error))?;
    Ok(())
}

/// Output written to a temp file beside its destination, not yet visible.
///
/// Dropping it without [`commit`](StagedOutput::commit) removes the temp
/// file and leaves the destination untouched.
#[derive(Debug)]
pub struct StagedOutput {
    file: NamedTempFile,
    destination: PathBuf,
}

impl StagedOutput {
    /// Where the staged bytes currently live.
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Move the staged file onto its destination.
    pub fn commit(self) -> Result<PathBuf> {
        let destination = self.destination;
        self.file
            .persist(&destination)
            .map_err(|e| write_error(&destination, e.error))?;
        Ok(destination)
    }
}

/// Stage `document` for `destination` in the shape given by `kind`.
///
/// Thick output needs `archive_dir`: the descriptor is written into it as
/// `bundle.json` and the whole directory is packed into a gzip tarball.
pub fn stage_output(
    kind: BundleKind,
    destination: &Path,
    document: &Value,
    archive_dir: Option<&Path>,
) -> Result<StagedOutput> {
    if BundleKind::detect(destination).ok() != Some(kind) {
        return Err(RelocError::ConfigError(format!(
            "output {} does not match the input bundle format",
            destination.display()
        )));
    }

    let mut body = serde_json::to_vec_pretty(document)?;
    body.push(b'\n');

    let staged = match kind {
        BundleKind::Thin => {
            let mut file = temp_file_near(destination, ".json")?;
            file.write_all(&body)
                .and_then(|_| file.as_file().sync_all())
                .map_err(|e| write_error(destination, e))?;
            file
        }
        BundleKind::Thick => {
            let dir = archive_dir.ok_or_else(|| {
                write_error(destination, "thick output requires an unpacked archive directory")
            })?;
            std::fs::write(dir.join(DESCRIPTOR_NAME), &body)
                .map_err(|e| write_error(destination, e))?;

            let suffix = if file_name(destination)?.ends_with(".tgz") {
                ".tgz"
            } else {
                ".tar.gz"
            };
            let mut file = temp_file_near(destination, suffix)?;
            pack_dir(dir, file.as_file_mut()).map_err(|e| write_error(destination, e))?;
            file
        }
    };

    tracing::debug!(
        staged = %staged.path().display(),
        destination = %destination.display(),
        "Staged output bundle"
    );
    Ok(StagedOutput {
        file: staged,
        destination: destination.to_path_buf(),
    })
}

fn pack_dir(dir: &Path, out: &mut File) -> std::io::Result<()> {
    let encoder = GzEncoder::new(out, Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.append_dir_all(".", dir)?;
    let out = builder.into_inner()?.finish()?;
    out.sync_all()
}

fn temp_file_near(path: &Path, suffix: &str) -> Result<NamedTempFile> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    tempfile::Builder::new()
        .prefix(".cnab-reloc-")
        .suffix(suffix)
        .tempfile_in(parent)
        .map_err(|e| write_error(path, e))
}

fn file_name(path: &Path) -> Result<&str> {
    path.file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| load_error(path, "path has no file name"))
}

fn load_error(path: &Path, err: impl std::fmt::Display) -> RelocError {
    RelocError::LoadError {
        path: path.display().to_string(),
        message: err.to_string(),
    }
}

fn write_error(path: &Path, err: impl std::fmt::Display) -> RelocError {
    RelocError::WriteError {
        path: path.display().to_string(),
        message: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn descriptor() -> Value {
        json!({
            "name": "testrelocate",
            "version": "0.1",
            "invocationImages": [
                { "image": "technosophos/helloworld:0.1.0", "imageType": "docker" }
            ],
            "images": {}
        })
    }

    fn write_thick(dir: &Path, file: &str) -> PathBuf {
        let src = dir.join("src");
        std::fs::create_dir_all(src.join("artifacts/layout")).unwrap();
        std::fs::write(src.join(DESCRIPTOR_NAME), descriptor().to_string()).unwrap();
        std::fs::write(src.join("artifacts/layout/index.json"), r#"{"manifests":[]}"#).unwrap();

        let path = dir.join(file);
        let mut out = File::create(&path).unwrap();
        pack_dir(&src, &mut out).unwrap();
        path
    }

    #[test]
    fn test_detect_kind() {
        assert_eq!(BundleKind::detect(Path::new("b.json")).unwrap(), BundleKind::Thin);
        assert_eq!(BundleKind::detect(Path::new("b.tgz")).unwrap(), BundleKind::Thick);
        assert_eq!(BundleKind::detect(Path::new("b.tar.gz")).unwrap(), BundleKind::Thick);
        assert!(matches!(
            BundleKind::detect(Path::new("b.zip")),
            Err(RelocError::LoadError { .. })
        ));
    }

    #[test]
    fn test_archive_base_name() {
        assert_eq!(archive_base_name(Path::new("/x/testrelocate-0.1.tgz")).unwrap(), "testrelocate-0.1");
        assert_eq!(archive_base_name(Path::new("app.tar.gz")).unwrap(), "app");
        assert!(archive_base_name(Path::new("bundle.json")).is_err());
        assert!(archive_base_name(Path::new(".tgz")).is_err());
    }

    #[test]
    fn test_load_thin() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("bundle.json");
        std::fs::write(&path, descriptor().to_string()).unwrap();

        let loaded = load_bundle(&path).unwrap();
        assert_eq!(loaded.kind, BundleKind::Thin);
        assert_eq!(loaded.document, descriptor());
        assert_eq!(loaded.bundle.name, "testrelocate");
    }

    #[test]
    fn test_load_malformed() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("bundle.json");
        std::fs::write(&path, "{ nope").unwrap();
        assert!(matches!(load_bundle(&path), Err(RelocError::LoadError { .. })));

        std::fs::write(&path, "[1, 2]").unwrap();
        assert!(matches!(load_bundle(&path), Err(RelocError::LoadError { .. })));

        let missing = tmp.path().join("missing.json");
        assert!(matches!(load_bundle(&missing), Err(RelocError::LoadError { .. })));
    }

    #[test]
    fn test_load_thick_without_unpacking() {
        let tmp = TempDir::new().unwrap();
        let path = write_thick(tmp.path(), "testrelocate-0.1.tgz");

        let loaded = load_bundle(&path).unwrap();
        assert_eq!(loaded.kind, BundleKind::Thick);
        assert_eq!(loaded.document, descriptor());
        assert!(!tmp.path().join("testrelocate-0.1").exists());
    }

    #[test]
    fn test_unpack_archive() {
        let tmp = TempDir::new().unwrap();
        let path = write_thick(tmp.path(), "testrelocate-0.1.tgz");
        let work = tmp.path().join("work");

        let dir = unpack_archive(&path, &work).unwrap();
        assert!(dir.ends_with("testrelocate-0.1"));
        assert!(dir.join(DESCRIPTOR_NAME).is_file());
        assert!(dir.join("artifacts/layout/index.json").is_file());
    }

    #[test]
    fn test_unpack_archive_keeps_existing_target() {
        let tmp = TempDir::new().unwrap();
        let path = write_thick(tmp.path(), "testrelocate-0.1.tgz");
        let work = tmp.path().join("work");
        let existing = work.join("testrelocate-0.1");
        std::fs::create_dir_all(&existing).unwrap();
        std::fs::write(existing.join("notes.txt"), "keep me").unwrap();

        let err = unpack_archive(&path, &work).unwrap_err();
        assert!(matches!(err, RelocError::ConfigError(_)));
        assert!(err.to_string().contains("already exists"));
        assert_eq!(
            std::fs::read_to_string(existing.join("notes.txt")).unwrap(),
            "keep me"
        );
        assert!(!existing.join(DESCRIPTOR_NAME).exists());
    }

    #[test]
    fn test_write_atomic() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("values.yaml");
        std::fs::write(&path, "old").unwrap();

        write_atomic(&path, b"new").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "new");
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_stage_thin_commit() {
        let tmp = TempDir::new().unwrap();
        let destination = tmp.path().join("out.json");

        let staged = stage_output(BundleKind::Thin, &destination, &descriptor(), None).unwrap();
        assert!(!destination.exists());
        assert_eq!(load_bundle(staged.path()).unwrap().document, descriptor());

        let written = staged.commit().unwrap();
        assert_eq!(written, destination);
        assert_eq!(load_bundle(&destination).unwrap().document, descriptor());
    }

    #[test]
    fn test_stage_dropped_leaves_nothing() {
        let tmp = TempDir::new().unwrap();
        let destination = tmp.path().join("out.json");

        let staged = stage_output(BundleKind::Thin, &destination, &descriptor(), None).unwrap();
        drop(staged);
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_stage_thick() {
        let tmp = TempDir::new().unwrap();
        let path = write_thick(tmp.path(), "testrelocate-0.1.tgz");
        let dir = unpack_archive(&path, &tmp.path().join("work")).unwrap();

        let mut relocated = descriptor();
        relocated["invocationImages"][0]["image"] = json!("example.com/user/hello:0.1.0");
        let destination = tmp.path().join("relocated.tgz");

        let staged =
            stage_output(BundleKind::Thick, &destination, &relocated, Some(&dir)).unwrap();
        let written = staged.commit().unwrap();

        let loaded = load_bundle(&written).unwrap();
        assert_eq!(loaded.kind, BundleKind::Thick);
        assert_eq!(loaded.document, relocated);

        let repacked = unpack_archive(&written, &tmp.path().join("check")).unwrap();
        assert!(repacked.join("artifacts/layout/index.json").is_file());
    }

    #[test]
    fn test_stage_kind_mismatch() {
        let tmp = TempDir::new().unwrap();
        let destination = tmp.path().join("out.tgz");
        let err = stage_output(BundleKind::Thin, &destination, &descriptor(), None).unwrap_err();
        assert!(matches!(err, RelocError::ConfigError(_)));
    }
}
