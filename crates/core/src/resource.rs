//! The generic managed resource and the traits describing a resource kind.
//!
//! Every kind is a `ManagedResource<S>` where `S` is the kind's spec. The
//! spec type carries everything kind-specific: its name, guard token, ready
//! reason, the shape of the upstream record and how to compare against it.

use std::fmt::Debug;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::condition::Conditions;
use crate::error::Result;
use crate::meta::{ObjectKey, ObjectMeta};

/// API group/version of every kind.
pub const API_VERSION: &str = "pagerduty.platform.share-now.com/v1alpha1";

/// Observed status of a kind.
pub trait ResourceStatus:
    Clone + Debug + Default + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Identifier of the upstream record; empty until created upstream.
    fn external_id(&self) -> &str;

    /// Record the upstream identifier.
    fn set_external_id(&mut self, id: String);

    /// The condition list; `None` until initialized.
    fn conditions(&self) -> Option<&Conditions>;

    /// Mutable access to the condition list.
    fn conditions_mut(&mut self) -> &mut Option<Conditions>;

    /// Upstream id of the referenced resource, for kinds that declare one.
    fn resolved_reference(&self) -> &str {
        ""
    }

    /// Record the upstream id of the referenced resource.
    fn set_resolved_reference(&mut self, _id: String) {}
}

/// Desired state of a kind plus the kind's static description.
pub trait ResourceSpec:
    Clone + Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Status sub-document of this kind.
    type Status: ResourceStatus;

    /// Upstream representation of this kind.
    type Record: Clone + Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static;

    /// Kind name as written in manifests.
    const KIND: &'static str;

    /// Deletion guard token stored in the finalizer set.
    const FINALIZER: &'static str;

    /// Reason recorded on the ready condition.
    const READY_REASON: &'static str;

    /// Ready message after a successful create.
    const CREATED_MESSAGE: &'static str;

    /// Ready message after a successful update.
    const MATCHES_MESSAGE: &'static str;

    /// Build the upstream record for this spec. The record carries the
    /// status' external id when one is set.
    fn to_record(&self, status: &Self::Status) -> Self::Record;

    /// Semantic equality between the desired state and a live record.
    fn matches(&self, status: &Self::Status, record: &Self::Record) -> bool;

    /// Name of a referenced resource in the same namespace, if any.
    fn reference(&self) -> Option<&str> {
        None
    }

    /// Reject specs the upstream service would never accept.
    ///
    /// # Errors
    ///
    /// Returns a validation error naming the offending field.
    fn validate(&self, name: &str) -> Result<()>;
}

/// A declarative resource: desired spec plus observed status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", bound = "")]
pub struct ManagedResource<S: ResourceSpec> {
    #[serde(default = "default_api_version")]
    pub api_version: String,

    #[serde(default = "default_kind::<S>")]
    pub kind: String,

    pub metadata: ObjectMeta,

    pub spec: S,

    #[serde(default)]
    pub status: S::Status,
}

fn default_api_version() -> String {
    API_VERSION.to_string()
}

fn default_kind<S: ResourceSpec>() -> String {
    S::KIND.to_string()
}

impl<S: ResourceSpec> ManagedResource<S> {
    /// Create a resource with an empty status.
    pub fn new(metadata: ObjectMeta, spec: S) -> Self {
        Self {
            api_version: default_api_version(),
            kind: S::KIND.to_string(),
            metadata,
            spec,
            status: S::Status::default(),
        }
    }

    /// The store key of this resource.
    pub fn key(&self) -> ObjectKey {
        self.metadata.key()
    }

    /// Identifier of the upstream record; empty until created.
    pub fn external_id(&self) -> &str {
        self.status.external_id()
    }

    /// Whether an upstream record has been created.
    pub fn has_external_id(&self) -> bool {
        !self.external_id().is_empty()
    }

    /// The upstream record for the current spec and status.
    pub fn to_record(&self) -> S::Record {
        self.spec.to_record(&self.status)
    }

    /// Semantic equality against a live record.
    pub fn matches(&self, record: &S::Record) -> bool {
        self.spec.matches(&self.status, record)
    }

    /// Validate the spec.
    ///
    /// # Errors
    ///
    /// Returns a validation error naming the offending field.
    pub fn validate(&self) -> Result<()> {
        self.spec.validate(&self.metadata.name)
    }
}
