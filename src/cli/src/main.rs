//! CNAB relocation CLI entry point.

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cnab_reloc_cli::commands::{dispatch, Cli};
use cnab_reloc_core::RelocateConfig;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config = RelocateConfig::load(cli.config.as_deref());

    // Initialize tracing
    let default_level = config
        .as_ref()
        .map(|c| c.log_level.as_filter())
        .unwrap_or("warn");
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();

    let result = match config {
        Ok(config) => dispatch(cli, config).await,
        Err(e) => Err(e.into()),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
