//! The upstream adapter seam.

use async_trait::async_trait;
use pd_operator_core::{ManagedResource, ResourceSpec};

use crate::error::UpstreamError;

/// Result type for adapter calls.
pub type UpstreamResult<T> = std::result::Result<T, UpstreamError>;

/// Translates a resource of kind `S` into calls against the upstream service.
///
/// One implementation serves every kind; the kind-specific mapping lives on
/// `S` itself (record conversion and semantic equality).
#[async_trait]
pub trait UpstreamAdapter<S: ResourceSpec>: Send + Sync {
    /// Create the upstream record and return its identifier.
    async fn create(&self, resource: &ManagedResource<S>) -> UpstreamResult<String>;

    /// Fetch the live record. Absence is reported as [`UpstreamError::NotFound`].
    async fn get(&self, external_id: &str) -> UpstreamResult<S::Record>;

    /// Push the desired state onto the existing record.
    async fn update(&self, resource: &ManagedResource<S>) -> UpstreamResult<()>;

    /// Delete the upstream record.
    async fn delete(&self, external_id: &str) -> UpstreamResult<()>;

    /// Whether the live record already matches the desired state.
    async fn equal_to_upstream(&self, resource: &ManagedResource<S>) -> UpstreamResult<bool> {
        let record = self.get(resource.external_id()).await?;
        Ok(resource.matches(&record))
    }
}

