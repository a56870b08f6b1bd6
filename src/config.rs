//! Operator configuration.
//!
//! Values come from, in increasing precedence: built-in defaults, an optional
//! TOML file, environment variables, then command-line flags.

use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use pd_operator_pagerduty::PagerDutyConfig;
use pd_operator_reconciler::{DeleteNotFoundPolicy, LoopConfig, ReconcilerConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

pub const ENV_TOKEN: &str = "PAGERDUTY_TOKEN";
pub const ENV_API_URL: &str = "PAGERDUTY_API_URL";
pub const ENV_WORKERS: &str = "PD_OPERATOR_WORKERS";
pub const ENV_REQUEUE_BACKOFF: &str = "PD_OPERATOR_REQUEUE_BACKOFF_SECS";

/// Errors loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid value '{value}' for {name}: {reason}")]
    InvalidEnv {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// `[reconciler]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcilerSection {
    pub requeue_backoff_secs: u64,
    pub delete_not_found: DeleteNotFoundPolicy,
}

impl Default for ReconcilerSection {
    fn default() -> Self {
        Self {
            requeue_backoff_secs: 10,
            delete_not_found: DeleteNotFoundPolicy::default(),
        }
    }
}

/// `[controller]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerSection {
    pub workers: usize,
    /// Zero disables periodic resync.
    pub resync_interval_secs: u64,
}

impl Default for ControllerSection {
    fn default() -> Self {
        Self {
            workers: 4,
            resync_interval_secs: 300,
        }
    }
}

/// `[manifests]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManifestSection {
    /// Zero reads the manifest directory once.
    pub watch_interval_secs: u64,
}

/// Complete operator configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperatorConfig {
    pub pagerduty: PagerDutyConfig,
    pub reconciler: ReconcilerSection,
    pub controller: ControllerSection,
    pub manifests: ManifestSection,
}

impl OperatorConfig {
    /// Load from `path`, or defaults when no path is given.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be read or is not valid TOML.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(path, &text)
    }

    fn parse(path: &Path, text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply overrides from the process environment.
    ///
    /// # Errors
    ///
    /// Fails when a variable holds an unparsable value.
    pub fn with_process_env(self) -> Result<Self, ConfigError> {
        self.with_env(|name| std::env::var(name).ok())
    }

    /// Apply overrides read through `lookup`.
    ///
    /// # Errors
    ///
    /// Fails when a variable holds an unparsable value.
    pub fn with_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        if let Some(token) = lookup(ENV_TOKEN).filter(|t| !t.is_empty()) {
            self.pagerduty.token = Some(token);
        }
        if let Some(url) = parse_env::<Url>(&lookup, ENV_API_URL)? {
            self.pagerduty.base_url = Some(url);
        }
        if let Some(workers) = parse_env(&lookup, ENV_WORKERS)? {
            self.controller.workers = workers;
        }
        if let Some(secs) = parse_env(&lookup, ENV_REQUEUE_BACKOFF)? {
            self.reconciler.requeue_backoff_secs = secs;
        }
        Ok(self)
    }

    /// Settings for each reconciler.
    pub fn reconciler_config(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            requeue_backoff: Duration::from_secs(self.reconciler.requeue_backoff_secs),
            delete_not_found: self.reconciler.delete_not_found,
        }
    }

    /// Settings for each reconciliation loop.
    pub fn loop_config(&self) -> LoopConfig {
        LoopConfig {
            workers: self.controller.workers,
            resync_interval: non_zero_secs(self.controller.resync_interval_secs),
        }
    }

    /// How often to re-read the manifest directory, if at all.
    pub fn watch_interval(&self) -> Option<Duration> {
        non_zero_secs(self.manifests.watch_interval_secs)
    }
}

fn non_zero_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

fn parse_env<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    lookup(name)
        .filter(|value| !value.is_empty())
        .map(|value| {
            value.parse().map_err(|e: T::Err| ConfigError::InvalidEnv {
                name,
                reason: e.to_string(),
                value,
            })
        })
        .transpose()
}
