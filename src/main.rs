//! Kolosal Forecast - Main Entry Point
//!
//! Trains time-series forecasters from a JSON config and a CSV dataset.

use clap::Parser;
use kolosal_forecast::cli::{run, Cli};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kolosal_forecast=info".into()),
        )
        .init();

    run(Cli::parse())
}
