//! ironwatch - connector-driven hardware and IT monitoring
//!
//! This is the main entry point for the `iw` binary.

use anyhow::Result;
use clap::Parser;
use iw_cli::Cli;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.load_config()?;

    // RUST_LOG wins, then --verbose, then the configured level
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new(&config.global.log_level)
        }
    });

    if config.global.json_logs {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr))
            .with(filter)
            .init();
    }

    cli.run(config).await?;

    Ok(())
}
