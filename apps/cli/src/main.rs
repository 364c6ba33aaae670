//! Sieve CLI: feed fetching, LLM grading, and report publishing.
//!
//! Reads sources from a TOML config, classifies new items through the
//! configured inference provider, and writes a JSON report of what is worth
//! reading.

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
