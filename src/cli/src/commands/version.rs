//! `cnab-reloc version` command.

use clap::Args;

#[derive(Args)]
pub struct VersionArgs;

pub async fn execute(_args: VersionArgs) -> Result<(), Box<dyn std::error::Error>> {
    println!("cnab-reloc version {}", cnab_reloc_core::VERSION);
    Ok(())
}
