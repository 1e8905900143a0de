//! `unistore`: one command against the unified repository.
//!
//! Usage:
//!   unistore --config unistore.toml create container '{"name": "inbox"}'
//!   unistore --config unistore.toml related container <id> companion
//!
//! Results are printed to stdout as JSON; logs go to stderr.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;
use unistore_cli::{Cli, run};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();

    let config = cli.load_config()?;
    let output = run(&cli, &config).await?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
