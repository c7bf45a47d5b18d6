//! `cnab-reloc relocate` command.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use tempfile::TempDir;

use cnab_reloc_core::{RegistryConfig, RelocateConfig};
use cnab_reloc_runtime::{DefaultStoreFactory, RelocateRequest, Relocator};

#[derive(Args)]
pub struct RelocateArgs {
    /// Bundle to relocate (.json, or a .tgz/.tar.gz thick bundle)
    pub input: PathBuf,

    /// Where to write the relocated bundle (same format as the input)
    pub output: PathBuf,

    /// Registry and repository path receiving the images (e.g., "example.com/user")
    #[arg(short = 'p', long)]
    pub repository_prefix: String,

    /// Directory to unpack thick bundles into (default: a temporary directory)
    #[arg(long)]
    pub work_dir: Option<PathBuf>,

    /// Registry to reach over plain HTTP (can be repeated)
    #[arg(long = "insecure-registry")]
    pub insecure_registries: Vec<String>,
}

pub async fn execute(
    args: RelocateArgs,
    config: &RelocateConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let registry = registry_config(&args, config);
    let (request, _scratch) = build_request(args, config)?;

    let relocator = Relocator::new(Arc::new(DefaultStoreFactory::new(registry)));
    let written = relocator.run(&request).await?;

    println!("Relocated bundle written to {}", written.display());
    Ok(())
}

/// Registry settings with command-line overrides applied.
fn registry_config(args: &RelocateArgs, config: &RelocateConfig) -> RegistryConfig {
    let mut registry = config.registry.clone();
    for host in &args.insecure_registries {
        if !registry.insecure_registries.contains(host) {
            registry.insecure_registries.push(host.clone());
        }
    }
    registry
}

/// Build the run request. When no work directory is configured, a scratch
/// directory is created and returned; it is removed when dropped.
fn build_request(
    args: RelocateArgs,
    config: &RelocateConfig,
) -> std::io::Result<(RelocateRequest, Option<TempDir>)> {
    let (work_dir, scratch) = match args.work_dir.or_else(|| config.work_dir.clone()) {
        Some(dir) => (dir, None),
        None => {
            let scratch = tempfile::Builder::new().prefix("cnab-reloc-").tempdir()?;
            (scratch.path().to_path_buf(), Some(scratch))
        }
    };

    let request = RelocateRequest {
        input: args.input,
        output: args.output,
        repository_prefix: args.repository_prefix,
        work_dir,
    };
    Ok((request, scratch))
}
