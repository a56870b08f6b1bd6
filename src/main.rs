//! # pd-operator
//!
//! ## Startup
//!
//! 1. **Tracing** - `--log-level`, else `RUST_LOG`, else `info`
//! 2. **Configuration** - defaults, TOML file, environment, then flags
//! 3. **Manifests** - every document in the manifest directory is applied
//! 4. **Loops** - one reconciliation loop per kind
//!
//! ## Shutdown
//!
//! Ctrl+C stops the loops; in-flight reconciles finish before exit.

#![forbid(unsafe_code)]
#![forbid(clippy::unwrap_used)]
#![forbid(clippy::panic)]
#![deny(clippy::expect_used)]

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use pd_operator::cli::Cli;
use pd_operator::commands::execute_command;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref());

    info!(version = env!("CARGO_PKG_VERSION"), "pd-operator starting");
    execute_command(cli.command).await
}

/// Initialize tracing subscriber with environment filter.
fn init_tracing(level: Option<&str>) {
    let filter = level
        .and_then(|level| EnvFilter::try_new(level).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
