//! CLI command definitions using clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// pd-operator
#[derive(Parser, Debug)]
#[command(name = "pd-operator")]
#[command(version)]
#[command(about = "Keeps PagerDuty escalation policies, services and business services in sync")]
#[command(
    long_about = "pd-operator reads declarative resource manifests and drives the matching PagerDuty objects towards them: creating, updating and deleting upstream records and reporting progress through Ready conditions."
)]
pub struct Cli {
    /// Log filter, e.g. `info` or `pd_operator_reconciler=debug` (overrides RUST_LOG)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Reconcile the manifests in a directory until interrupted
    Run(RunArgs),

    /// Parse and validate the manifests in a directory
    Validate {
        /// Directory holding *.yaml / *.yml manifests
        #[arg(short, long)]
        manifests: PathBuf,
    },
}

#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// Directory holding *.yaml / *.yml manifests
    #[arg(short, long)]
    pub manifests: PathBuf,

    /// TOML configuration file
    #[arg(short, long, env = "PD_OPERATOR_CONFIG")]
    pub config: Option<PathBuf>,

    /// Reconcile against an in-memory upstream instead of PagerDuty
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,

    /// Concurrent reconciles per kind
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Seconds between re-reads of the manifest directory; 0 disables
    #[arg(long)]
    pub watch_interval: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run() -> Result<(), clap::Error> {
        let cli = Cli::try_parse_from([
            "pd-operator",
            "run",
            "--manifests",
            "deploy",
            "--dry-run",
            "--workers",
            "2",
            "--watch-interval",
            "30",
            "--log-level",
            "debug",
        ])?;

        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        let Commands::Run(args) = cli.command else {
            return Err(clap::Error::new(clap::error::ErrorKind::InvalidSubcommand));
        };
        assert_eq!(args.manifests, PathBuf::from("deploy"));
        assert!(args.dry_run);
        assert_eq!(args.workers, Some(2));
        assert_eq!(args.watch_interval, Some(30));
        Ok(())
    }

    #[test]
    fn test_run_requires_manifests() {
        assert!(Cli::try_parse_from(["pd-operator", "run"]).is_err());
    }
}
