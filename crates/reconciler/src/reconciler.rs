//! Reconciler implementation.

use std::sync::Arc;
use std::time::Duration;

use pd_operator_core::{ManagedResource, ObjectKey, ResourceSpec};
use serde::{Deserialize, Serialize};
use tracing::{Instrument, debug, error, info_span};

use crate::adapter::UpstreamAdapter;
use crate::condition::ConditionManager;
use crate::error::{Error, Result};
use crate::pipeline::Pipeline;
use crate::reference::ReferenceResolver;
use crate::store::StateStore;
use crate::subroutines::SubroutineHandler;
use crate::types::{Action, DEFAULT_REQUEUE_BACKOFF, ReconcileError, ReconcileResult};

/// What a not-found answer to an upstream delete means.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteNotFoundPolicy {
    /// The record is already gone; release the guard.
    #[default]
    TreatAsDeleted,
    /// Keep the guard and retry after the backoff.
    Retry,
}

/// Configuration for the reconciler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcilerConfig {
    /// Delay before retrying a failed cycle.
    pub requeue_backoff: Duration,
    /// Handling of not-found answers to upstream deletes.
    pub delete_not_found: DeleteNotFoundPolicy,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            requeue_backoff: DEFAULT_REQUEUE_BACKOFF,
            delete_not_found: DeleteNotFoundPolicy::default(),
        }
    }
}

/// Reconciles objects of kind `S`, one key per call.
pub struct Reconciler<S: ResourceSpec> {
    store: Arc<dyn StateStore<S>>,
    adapter: Arc<dyn UpstreamAdapter<S>>,
    resolver: Option<Arc<dyn ReferenceResolver>>,
    conditions: ConditionManager,
    config: ReconcilerConfig,
}

impl<S: ResourceSpec> Reconciler<S> {
    /// Create a new reconciler builder.
    pub fn builder() -> ReconcilerBuilder<S> {
        ReconcilerBuilder::new()
    }

    /// The configuration in use.
    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Run one cycle for the object under `key`.
    ///
    /// An object that no longer exists needs nothing further.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError`] when loading fails or a subroutine fails;
    /// its `requeue_after` is the delay before the key should be retried.
    pub async fn reconcile(&self, key: &ObjectKey) -> ReconcileResult {
        let span = info_span!("reconcile", kind = S::KIND, %key);
        self.reconcile_key(key).instrument(span).await
    }

    async fn reconcile_key(&self, key: &ObjectKey) -> ReconcileResult {
        let resource = match self.store.get(key).await {
            Ok(resource) => resource,
            Err(e) if e.is_not_found() => {
                debug!("Object no longer exists");
                return Ok(Action::AwaitChange);
            }
            Err(e) => {
                error!(error = %e, "Failed to load object");
                return Err(ReconcileError::at_load(
                    self.config.requeue_backoff,
                    Error::load(key, e),
                ));
            }
        };

        let mut handler = self.handler(resource);
        let outcome = Pipeline::run(&mut handler).await;
        if let Ok(action) = &outcome {
            debug!(?action, "Reconcile cycle complete");
        }
        outcome
    }

    fn handler(&self, resource: ManagedResource<S>) -> SubroutineHandler<S> {
        let handler = SubroutineHandler::new(resource, self.adapter.clone(), self.store.clone())
            .with_config(self.config.clone())
            .with_condition_manager(self.conditions.clone());
        match &self.resolver {
            Some(resolver) => handler.with_resolver(resolver.clone()),
            None => handler,
        }
    }
}

/// Builder for [`Reconciler`].
pub struct ReconcilerBuilder<S: ResourceSpec> {
    store: Option<Arc<dyn StateStore<S>>>,
    adapter: Option<Arc<dyn UpstreamAdapter<S>>>,
    resolver: Option<Arc<dyn ReferenceResolver>>,
    conditions: ConditionManager,
    config: ReconcilerConfig,
}

impl<S: ResourceSpec> Default for ReconcilerBuilder<S> {
    fn default() -> Self {
        Self {
            store: None,
            adapter: None,
            resolver: None,
            conditions: ConditionManager::default(),
            config: ReconcilerConfig::default(),
        }
    }
}

impl<S: ResourceSpec> ReconcilerBuilder<S> {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the state store.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn StateStore<S>>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the upstream adapter.
    #[must_use]
    pub fn with_adapter(mut self, adapter: Arc<dyn UpstreamAdapter<S>>) -> Self {
        self.adapter = Some(adapter);
        self
    }

    /// Resolve the kind's reference through `resolver`.
    #[must_use]
    pub fn with_resolver(mut self, resolver: Arc<dyn ReferenceResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Set the condition manager.
    #[must_use]
    pub fn with_condition_manager(mut self, conditions: ConditionManager) -> Self {
        self.conditions = conditions;
        self
    }

    /// Set the configuration.
    #[must_use]
    pub fn with_config(mut self, config: ReconcilerConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the reconciler.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] when the store or adapter is missing.
    pub fn build(self) -> Result<Reconciler<S>> {
        let store = self
            .store
            .ok_or_else(|| Error::invalid_config(format!("{} reconciler needs a state store", S::KIND)))?;
        let adapter = self
            .adapter
            .ok_or_else(|| Error::invalid_config(format!("{} reconciler needs an upstream adapter", S::KIND)))?;

        Ok(Reconciler {
            store,
            adapter,
            resolver: self.resolver,
            conditions: self.conditions,
            config: self.config,
        })
    }
}
