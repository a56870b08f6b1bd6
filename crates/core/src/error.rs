//! Error types for resource validation and parsing.
//!
//! All errors are explicit, typed, and recoverable - no panics allowed.

use thiserror::Error;

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// A required field is missing or empty.
    #[error("{kind} '{name}': field '{field}' is required")]
    MissingField {
        kind: String,
        name: String,
        field: String,
    },

    /// A field holds a value outside of its allowed range.
    #[error("{kind} '{name}': field '{field}' is invalid: {reason}")]
    InvalidField {
        kind: String,
        name: String,
        field: String,
        reason: String,
    },

    /// A document names a kind this operator does not manage.
    #[error("unknown kind '{kind}'")]
    UnknownKind { kind: String },

    /// JSON (de)serialization failed.
    #[error("JSON error: {reason}")]
    Json { reason: String },
}

impl Error {
    /// Create a missing field error.
    pub fn missing_field(
        kind: impl Into<String>,
        name: impl Into<String>,
        field: impl Into<String>,
    ) -> Self {
        Self::MissingField {
            kind: kind.into(),
            name: name.into(),
            field: field.into(),
        }
    }

    /// Create an invalid field error.
    pub fn invalid_field(
        kind: impl Into<String>,
        name: impl Into<String>,
        field: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidField {
            kind: kind.into(),
            name: name.into(),
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create an unknown kind error.
    pub fn unknown_kind(kind: impl Into<String>) -> Self {
        Self::UnknownKind { kind: kind.into() }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Json {
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_field_display() {
        let err = Error::missing_field("EscalationPolicy", "ops", "name");
        let text = err.to_string();
        assert!(text.contains("EscalationPolicy"));
        assert!(text.contains("'name'"));
    }

    #[test]
    fn test_invalid_field_display() {
        let err = Error::invalid_field("EscalationPolicy", "ops", "targets", "11 > 10");
        assert!(err.to_string().contains("11 > 10"));
    }
}
