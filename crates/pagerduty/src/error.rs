//! Error types for the PagerDuty crate.

use pd_operator_reconciler::UpstreamError;
use thiserror::Error;

/// Result type for PagerDuty operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur talking to the PagerDuty REST API.
#[derive(Error, Debug)]
pub enum Error {
    /// No API token configured.
    #[error("no PagerDuty API token configured")]
    MissingToken,

    /// A header value could not be encoded.
    #[error("invalid {name} header value")]
    InvalidHeader { name: &'static str },

    /// The addressed object does not exist.
    #[error("{path} not found")]
    NotFound { path: String },

    /// The API asked us to slow down.
    #[error("rate limited")]
    RateLimited,

    /// The API answered with a non-success status.
    #[error("PagerDuty returned {status}: {body}")]
    Api { status: u16, body: String },

    /// The response body did not have the expected shape.
    #[error("invalid response: {reason}")]
    InvalidResponse { reason: String },

    /// HTTP error from reqwest.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The base URL cannot carry a path.
    #[error("base URL cannot carry a path: {url}")]
    InvalidBaseUrl { url: String },

    /// URL parse error.
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create an invalid response error.
    pub fn invalid_response(reason: impl Into<String>) -> Self {
        Self::InvalidResponse {
            reason: reason.into(),
        }
    }

    /// Whether the addressed object does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Convert into the adapter error for an object of `kind` with `id`.
    pub fn into_upstream(self, kind: &str, id: &str) -> UpstreamError {
        match self {
            Self::NotFound { .. } => UpstreamError::not_found(kind, id),
            Self::RateLimited => UpstreamError::RateLimited,
            Self::Api { status, body } => UpstreamError::rejected(status, body),
            Self::InvalidResponse { reason } => UpstreamError::invalid_response(reason),
            Self::Json(e) => UpstreamError::invalid_response(e.to_string()),
            other => UpstreamError::request(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_maps_to_adapter_not_found() {
        let err = Error::NotFound {
            path: "/services/P1".to_string(),
        };
        assert!(err.is_not_found());
        assert!(err.into_upstream("PagerdutyService", "P1").is_not_found());
    }

    #[test]
    fn test_status_errors_keep_their_shape() {
        assert_eq!(
            Error::RateLimited.into_upstream("EscalationPolicy", "P1"),
            UpstreamError::RateLimited
        );
        assert_eq!(
            Error::Api {
                status: 400,
                body: "bad".to_string()
            }
            .into_upstream("EscalationPolicy", "P1"),
            UpstreamError::rejected(400, "bad")
        );
        assert_eq!(
            Error::MissingToken.into_upstream("EscalationPolicy", ""),
            UpstreamError::request("no PagerDuty API token configured")
        );
    }
}
