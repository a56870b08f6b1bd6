//! Configuration for the PagerDuty client.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

/// Public REST endpoint.
pub const DEFAULT_BASE_URL: &str = "https://api.pagerduty.com";

/// Configuration for [`PagerDutyClient`](crate::PagerDutyClient).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PagerDutyConfig {
    /// Base URL of the REST API; [`DEFAULT_BASE_URL`] when unset.
    #[serde(default)]
    pub base_url: Option<Url>,

    /// API token.
    #[serde(default, skip_serializing)]
    pub token: Option<String>,

    /// Timeout for each request.
    #[serde(rename = "timeout_secs", with = "duration_secs", default = "default_timeout")]
    pub timeout: Duration,

    /// Email sent in the `From` header, required by some account setups.
    #[serde(default)]
    pub from_email: Option<String>,
}

impl Default for PagerDutyConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            token: None,
            timeout: default_timeout(),
            from_email: None,
        }
    }
}

impl PagerDutyConfig {
    /// Create a config for the public endpoint with `token`.
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
            ..Default::default()
        }
    }

    /// Set the base URL.
    #[must_use]
    pub fn base_url(mut self, base_url: Url) -> Self {
        self.base_url = Some(base_url);
        self
    }

    /// Set the timeout.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The base URL to send requests to. Its path always ends in `/`, so
    /// request paths are appended below it.
    ///
    /// # Errors
    ///
    /// Fails only if [`DEFAULT_BASE_URL`] does not parse.
    pub fn resolved_base_url(&self) -> Result<Url, url::ParseError> {
        let mut url = self
            .base_url
            .clone()
            .map_or_else(|| Url::parse(DEFAULT_BASE_URL), Ok)?;
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        Ok(url)
    }

    /// Set the `From` email.
    #[must_use]
    pub fn from_email(mut self, email: impl Into<String>) -> Self {
        self.from_email = Some(email.into());
        self
    }
}

const fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

/// Serialization helper for Duration as seconds.
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
