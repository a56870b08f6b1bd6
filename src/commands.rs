//! CLI command handlers.

use std::collections::BTreeSet;
use std::future::Future;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use itertools::{Either, Itertools};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::cli::{Commands, RunArgs};
use crate::config::OperatorConfig;
use crate::manifest::{self, Document, Manifest, ManifestError};
use crate::operator::{Adapters, ManifestKey, Operator, Stores};

/// Execute a CLI command.
///
/// # Errors
///
/// Fails when configuration or manifests cannot be loaded, a loop fails, or
/// `validate` finds an invalid document.
pub async fn execute_command(command: Commands) -> Result<()> {
    match command {
        Commands::Run(args) => {
            let config = load_config(&args)?;
            cmd_run(&args, &config, shutdown_signal()).await
        }
        Commands::Validate { manifests } => cmd_validate(&manifests),
    }
}

/// Configuration from file and environment, with CLI flags on top.
///
/// # Errors
///
/// Fails when the file or an environment variable is invalid.
pub fn load_config(args: &RunArgs) -> Result<OperatorConfig> {
    let config = OperatorConfig::load(args.config.as_deref())
        .context("failed to load configuration")?
        .with_process_env()
        .context("invalid environment override")?;
    Ok(apply_flags(config, args))
}

fn apply_flags(mut config: OperatorConfig, args: &RunArgs) -> OperatorConfig {
    if let Some(workers) = args.workers {
        config.controller.workers = workers;
    }
    if let Some(secs) = args.watch_interval {
        config.manifests.watch_interval_secs = secs;
    }
    config
}

/// Load the manifests and reconcile them until `shutdown` completes.
///
/// # Errors
///
/// Fails when the manifest directory cannot be read, the PagerDuty client
/// cannot be built, or a loop fails.
pub async fn cmd_run(
    args: &RunArgs,
    config: &OperatorConfig,
    shutdown: impl Future<Output = ()>,
) -> Result<()> {
    let adapters = if args.dry_run {
        warn!("Dry run: changes stay in memory and are not sent to PagerDuty");
        Adapters::fake()
    } else {
        Adapters::rest(&config.pagerduty)?
    };

    let stores = Stores::new();
    let documents = manifest::load_dir(&args.manifests)
        .with_context(|| format!("failed to load manifests from {}", args.manifests.display()))?;
    let loaded = stores.sync(documents, &BTreeSet::new()).await;
    info!(objects = loaded.len(), "Manifests loaded");

    let watcher = config.watch_interval().map(|interval| {
        spawn_manifest_watch(stores.clone(), args.manifests.clone(), interval, loaded)
    });

    let operator = Operator::new(stores, adapters, config)?;
    let outcome = operator.run(shutdown).await;
    if let Some(watcher) = watcher {
        watcher.abort();
    }
    outcome
}

fn spawn_manifest_watch(
    stores: Stores,
    dir: std::path::PathBuf,
    interval: Duration,
    mut known: BTreeSet<ManifestKey>,
) -> JoinHandle<()> {
    info!(dir = %dir.display(), ?interval, "Watching manifest directory");
    tokio::spawn(async move {
        let mut ticks = tokio::time::interval(interval);
        ticks.tick().await;
        loop {
            ticks.tick().await;
            match manifest::load_dir(&dir) {
                Ok(documents) => known = stores.sync(documents, &known).await,
                Err(e) => warn!(error = %e, "Failed to re-read manifests"),
            }
        }
    })
}

/// Print a line per document; fail if any is invalid.
///
/// # Errors
///
/// Fails when the directory cannot be read or a document is invalid.
pub fn cmd_validate(dir: &Path) -> Result<()> {
    let documents = manifest::load_dir(dir)
        .with_context(|| format!("failed to load manifests from {}", dir.display()))?;
    let (valid, invalid) = summarize(documents);

    valid.iter().for_each(|line| println!("ok      {line}"));
    invalid.iter().for_each(|line| println!("invalid {line}"));
    println!("{} valid, {} invalid", valid.len(), invalid.len());

    if !invalid.is_empty() {
        bail!("{} invalid manifest document(s)", invalid.len());
    }
    Ok(())
}

fn summarize(documents: Vec<Document>) -> (Vec<String>, Vec<String>) {
    documents.into_iter().partition_map(|document| {
        let location = document.to_string();
        match document.manifest {
            Ok(manifest) => Either::Left(describe(&location, &manifest)),
            Err(e) => Either::Right(failure(&location, &e)),
        }
    })
}

fn describe(location: &str, manifest: &Manifest) -> String {
    format!("{location}: {} {}", manifest.kind(), manifest.key())
}

fn failure(location: &str, error: &ManifestError) -> String {
    format!("{location}: {error}")
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, initiating graceful shutdown"),
        Err(err) => {
            error!("Failed to listen for shutdown signal: {}", err);
            std::future::pending::<()>().await;
        }
    }
}
