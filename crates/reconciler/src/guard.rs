//! Deletion guard protocol.
//!
//! A kind's guard token sits in the object's finalizer set for as long as an
//! upstream record may exist that this loop is responsible for deleting. The
//! token can only be released with [`ReleaseEvidence`], which this crate hands
//! out solely after a confirmed upstream deletion or when no record was ever
//! created.

use std::fmt;

use pd_operator_core::{ObjectMeta, ResourceSpec};

/// Why the guard may be released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Evidence {
    /// The upstream delete call succeeded (or reported the record absent).
    UpstreamDeleted,
    /// No upstream record was ever created.
    NeverCreated,
}

impl fmt::Display for Evidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UpstreamDeleted => f.write_str("upstream record deleted"),
            Self::NeverCreated => f.write_str("upstream record never created"),
        }
    }
}

/// Proof that the upstream record is gone. Not constructible outside this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReleaseEvidence(Evidence);

impl ReleaseEvidence {
    pub(crate) const fn upstream_deleted() -> Self {
        Self(Evidence::UpstreamDeleted)
    }

    pub(crate) const fn never_created() -> Self {
        Self(Evidence::NeverCreated)
    }

    /// The evidence carried.
    pub const fn evidence(self) -> Evidence {
        self.0
    }
}

/// The guard token of one kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeletionGuard {
    token: &'static str,
}

impl DeletionGuard {
    /// Guard for kind `S`.
    pub const fn of<S: ResourceSpec>() -> Self {
        Self {
            token: S::FINALIZER,
        }
    }

    /// The token stored in the finalizer set.
    pub const fn token(&self) -> &'static str {
        self.token
    }

    /// Whether the token is present.
    pub fn is_registered(&self, meta: &ObjectMeta) -> bool {
        meta.has_finalizer(self.token)
    }

    /// Add the token. Returns false if it was already present.
    pub fn register(&self, meta: &mut ObjectMeta) -> bool {
        meta.add_finalizer(self.token)
    }

    /// Remove the token. Returns false if it was absent.
    pub fn release(&self, meta: &mut ObjectMeta, _evidence: ReleaseEvidence) -> bool {
        meta.remove_finalizer(self.token)
    }
}
