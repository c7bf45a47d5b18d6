//! CLI command definitions and dispatch.

mod relocate;
mod replace;
mod version;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use cnab_reloc_core::RelocateConfig;

/// cnab-reloc: copy a bundle's images to another registry and rewrite the bundle.
#[derive(Parser)]
#[command(name = "cnab-reloc", version, about)]
pub struct Cli {
    /// Configuration file (defaults to ~/.cnab-reloc/config.yaml when present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Command {
    /// Relocate a bundle's images under a repository prefix
    Relocate(relocate::RelocateArgs),
    /// Set one field of a JSON or YAML document in place
    Replace(replace::ReplaceArgs),
    /// Show version information
    Version(version::VersionArgs),
}

/// Dispatch a parsed CLI to the appropriate command handler.
pub async fn dispatch(cli: Cli, config: RelocateConfig) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Command::Relocate(args) => relocate::execute(args, &config).await,
        Command::Replace(args) => replace::execute(args).await,
        Command::Version(args) => version::execute(args).await,
    }
}
