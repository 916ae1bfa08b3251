//! leadscore CLI: grade social profiles against a target audience.
//!
//! Reads identifiers from a CSV, fetches profiles in bulk, grades and
//! optionally enriches each one, and writes the qualifying leads back out.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
