//! `cnab-reloc replace` command.

use std::path::PathBuf;

use clap::Args;

use cnab_reloc_core::RelocError;
use cnab_reloc_runtime::{replace_file, DocumentFormat, Selector};

#[derive(Args)]
pub struct ReplaceArgs {
    /// Document to rewrite in place
    pub file: PathBuf,

    /// Path to the field (e.g., "image.repository")
    #[arg(short, long)]
    pub selector: String,

    /// New value for the field
    #[arg(short, long)]
    pub value: String,

    /// Document format: json or yaml (default: from the file extension)
    #[arg(short, long)]
    pub format: Option<String>,

    /// Separator between selector keys
    #[arg(long, default_value_t = Selector::DEFAULT_DELIMITER)]
    pub delimiter: char,
}

pub async fn execute(args: ReplaceArgs) -> Result<(), Box<dyn std::error::Error>> {
    let format = match args.format {
        Some(ref f) => f.parse::<DocumentFormat>()?,
        None => DocumentFormat::from_path(&args.file).ok_or_else(|| {
            RelocError::ConfigError(format!(
                "cannot infer the format of {}; pass --format json|yaml",
                args.file.display()
            ))
        })?,
    };
    let selector = Selector::parse_with(&args.selector, args.delimiter);

    replace_file(&args.file, format, &selector, &args.value)?;
    tracing::info!(file = %args.file.display(), selector = %selector, "Document updated");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn args(file: PathBuf) -> ReplaceArgs {
        ReplaceArgs {
            file,
            selector: "image.repository".to_string(),
            value: "example.com/user/nginx".to_string(),
            format: None,
            delimiter: '.',
        }
    }

    #[tokio::test]
    async fn test_replace_yaml_inferred() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("values.yaml");
        std::fs::write(&path, "image:\n  repository: nginx\n").unwrap();

        execute(args(path.clone())).await.unwrap();
        let out = std::fs::read_to_string(&path).unwrap();
        assert!(out.contains("repository: example.com/user/nginx"));
    }

    #[tokio::test]
    async fn test_replace_explicit_format_and_delimiter() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("descriptor");
        std::fs::write(&path, r#"{"images":{"web.app":{"image":"nginx"}}}"#).unwrap();

        let mut a = args(path.clone());
        a.format = Some("json".to_string());
        a.selector = "images/web.app/image".to_string();
        a.delimiter = '/';
        execute(a).await.unwrap();

        let doc: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(doc["images"]["web.app"]["image"], "example.com/user/nginx");
    }

    #[tokio::test]
    async fn test_replace_unknown_extension() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("values.txt");
        std::fs::write(&path, "a: b\n").unwrap();
        assert!(execute(args(path)).await.is_err());
    }
}
