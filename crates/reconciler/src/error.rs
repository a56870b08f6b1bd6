//! Error types for the reconciler crate.

use thiserror::Error;

/// Result type alias for reconciler operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Failure reported by an upstream adapter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UpstreamError {
    /// The upstream record does not exist.
    #[error("{kind} '{id}' not found upstream")]
    NotFound { kind: String, id: String },

    /// The upstream service throttled the request.
    #[error("rate limited")]
    RateLimited,

    /// The request never produced a response.
    #[error("request failed: {reason}")]
    Request { reason: String },

    /// The response could not be decoded.
    #[error("invalid response: {reason}")]
    InvalidResponse { reason: String },

    /// The upstream service refused the request.
    #[error("upstream rejected the request with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

impl UpstreamError {
    /// Create a not found error.
    pub fn not_found(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            id: id.into(),
        }
    }

    /// Create a request error.
    pub fn request(reason: impl Into<String>) -> Self {
        Self::Request {
            reason: reason.into(),
        }
    }

    /// Create an invalid response error.
    pub fn invalid_response(reason: impl Into<String>) -> Self {
        Self::InvalidResponse {
            reason: reason.into(),
        }
    }

    /// Create a rejected error.
    pub fn rejected(status: u16, body: impl Into<String>) -> Self {
        Self::Rejected {
            status,
            body: body.into(),
        }
    }

    /// Whether the upstream record is absent.
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Failure reported by a state store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// No object is stored under the key.
    #[error("{kind} '{key}' not found")]
    NotFound { kind: String, key: String },

    /// The write was based on a stale resource version.
    #[error("{kind} '{key}' was modified concurrently (expected version {expected}, found {actual})")]
    Conflict {
        kind: String,
        key: String,
        expected: u64,
        actual: u64,
    },

    /// Admission rejected the object.
    #[error(transparent)]
    Invalid(#[from] pd_operator_core::Error),

    /// The store is no longer accepting requests.
    #[error("state store closed")]
    Closed,
}

impl StoreError {
    /// Create a not found error.
    pub fn not_found(kind: impl Into<String>, key: impl ToString) -> Self {
        Self::NotFound {
            kind: kind.into(),
            key: key.to_string(),
        }
    }

    /// Create a conflict error.
    pub fn conflict(kind: impl Into<String>, key: impl ToString, expected: u64, actual: u64) -> Self {
        Self::Conflict {
            kind: kind.into(),
            key: key.to_string(),
            expected,
            actual,
        }
    }

    /// Whether the object is absent.
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Whether the write lost an optimistic concurrency race.
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

/// Reconciler error types.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// An upstream call failed.
    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    /// The object could not be read from the state store.
    #[error("failed to load {key}: {source}")]
    Load { key: String, source: StoreError },

    /// A state store write failed.
    #[error("failed to persist {key}: {source}")]
    Persistence { key: String, source: StoreError },

    /// The deletion guard could not be removed.
    #[error("failed to remove deletion guard from {key}: {source}")]
    GuardRemoval { key: String, source: StoreError },

    /// A referenced object does not exist upstream yet.
    #[error("waiting for {kind} '{name}' to be created upstream")]
    ReferencePending { kind: String, name: String },

    /// A referenced object could not be looked up.
    #[error("failed to look up {kind} '{name}': {source}")]
    ReferenceLookup {
        kind: String,
        name: String,
        source: StoreError,
    },

    /// Invalid configuration.
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },
}

impl Error {
    /// Create a load error.
    pub fn load(key: impl ToString, source: StoreError) -> Self {
        Self::Load {
            key: key.to_string(),
            source,
        }
    }

    /// Create a persistence error.
    pub fn persistence(key: impl ToString, source: StoreError) -> Self {
        Self::Persistence {
            key: key.to_string(),
            source,
        }
    }

    /// Create a guard removal error.
    pub fn guard_removal(key: impl ToString, source: StoreError) -> Self {
        Self::GuardRemoval {
            key: key.to_string(),
            source,
        }
    }

    /// Create a reference pending error.
    pub fn reference_pending(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::ReferencePending {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create a reference lookup error.
    pub fn reference_lookup(
        kind: impl Into<String>,
        name: impl Into<String>,
        source: StoreError,
    ) -> Self {
        Self::ReferenceLookup {
            kind: kind.into(),
            name: name.into(),
            source,
        }
    }

    /// Create an invalid config error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_error_text_is_condition_message() {
        let err = Error::from(UpstreamError::RateLimited);
        assert_eq!(err.to_string(), "rate limited");
    }

    #[test]
    fn test_not_found_is_distinguished() {
        assert!(UpstreamError::not_found("EscalationPolicy", "P1").is_not_found());
        assert!(!UpstreamError::rejected(500, "boom").is_not_found());
        assert!(!UpstreamError::request("timeout").is_not_found());
    }

    #[test]
    fn test_persistence_error_names_key() {
        let err = Error::persistence("default/ops", StoreError::Closed);
        let text = err.to_string();
        assert!(text.contains("default/ops"));
        assert!(text.contains("closed"));
    }

    #[test]
    fn test_store_error_predicates() {
        assert!(StoreError::not_found("EscalationPolicy", "default/ops").is_not_found());
        assert!(StoreError::conflict("EscalationPolicy", "default/ops", 1, 2).is_conflict());
    }
}
