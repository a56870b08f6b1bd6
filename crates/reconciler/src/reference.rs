//! Lookup of a referenced resource's upstream id.

use std::sync::Arc;

use async_trait::async_trait;
use pd_operator_core::{ObjectKey, ResourceSpec};

use crate::error::StoreError;
use crate::store::StateStore;

/// Resolves a resource name in a namespace to the upstream id of the
/// resource it names.
#[async_trait]
pub trait ReferenceResolver: Send + Sync {
    /// Kind of the referenced resource.
    fn kind(&self) -> &'static str;

    /// The upstream id, or `None` while the referenced resource is missing
    /// or not yet created upstream.
    async fn resolve(&self, namespace: &str, name: &str) -> Result<Option<String>, StoreError>;
}

/// Resolves references against the state store of the referenced kind.
pub struct StoreReferenceResolver<T: ResourceSpec> {
    store: Arc<dyn StateStore<T>>,
}

impl<T: ResourceSpec> StoreReferenceResolver<T> {
    /// Create a resolver reading from `store`.
    pub fn new(store: Arc<dyn StateStore<T>>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<T: ResourceSpec> ReferenceResolver for StoreReferenceResolver<T> {
    fn kind(&self) -> &'static str {
        T::KIND
    }

    async fn resolve(&self, namespace: &str, name: &str) -> Result<Option<String>, StoreError> {
        match self.store.get(&ObjectKey::new(namespace, name)).await {
            Ok(referenced) if referenced.metadata.is_deleting() => Ok(None),
            Ok(referenced) => Ok(Some(referenced.external_id().to_string())
                .filter(|id| !id.is_empty())),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}
