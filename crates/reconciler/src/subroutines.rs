//! The five subroutines run against one loaded resource.
//!
//! Every subroutine is idempotent: calling it again in the same convergence
//! state causes no further upstream side effect. Status is persisted at the
//! points where a later cycle must observe it.

use std::sync::Arc;

use async_trait::async_trait;
use pd_operator_core::{
    ConditionStatus, ConditionType, Conditions, ManagedResource, ResourceSpec, ResourceStatus,
};
use tracing::{debug, error, info, warn};

use crate::adapter::UpstreamAdapter;
use crate::condition::ConditionManager;
use crate::error::Error;
use crate::guard::{DeletionGuard, ReleaseEvidence};
use crate::pipeline::Subroutines;
use crate::reconciler::{DeleteNotFoundPolicy, ReconcilerConfig};
use crate::reference::ReferenceResolver;
use crate::store::StateStore;
use crate::types::{OperationResult, Step, SubroutineError, SubroutineResult};

/// Runs the subroutines for one resource of kind `S`.
pub struct SubroutineHandler<S: ResourceSpec> {
    resource: ManagedResource<S>,
    adapter: Arc<dyn UpstreamAdapter<S>>,
    store: Arc<dyn StateStore<S>>,
    resolver: Option<Arc<dyn ReferenceResolver>>,
    conditions: ConditionManager,
    config: ReconcilerConfig,
    guard: DeletionGuard,
}

impl<S: ResourceSpec> SubroutineHandler<S> {
    /// Create a handler with the default configuration.
    pub fn new(
        resource: ManagedResource<S>,
        adapter: Arc<dyn UpstreamAdapter<S>>,
        store: Arc<dyn StateStore<S>>,
    ) -> Self {
        Self {
            resource,
            adapter,
            store,
            resolver: None,
            conditions: ConditionManager::default(),
            config: ReconcilerConfig::default(),
            guard: DeletionGuard::of::<S>(),
        }
    }

    /// Set the configuration.
    #[must_use]
    pub fn with_config(mut self, config: ReconcilerConfig) -> Self {
        self.config = config;
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

    /// The resource as last observed or persisted.
    pub fn resource(&self) -> &ManagedResource<S> {
        &self.resource
    }

    /// Consume the handler, returning the resource.
    pub fn into_resource(self) -> ManagedResource<S> {
        self.resource
    }

    /// Make sure the condition list exists.
    ///
    /// A fresh list is persisted and an immediate retry requested, so the
    /// next cycle starts from the stored state.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::Persistence`] when the status cannot be written.
    pub async fn initialization(&mut self) -> SubroutineResult {
        if self.resource.status.conditions().is_some() {
            debug!("Initialization done");
            return Ok(OperationResult::continue_processing());
        }

        info!("Initializing status conditions");
        *self.resource.status.conditions_mut() = Some(Conditions::new());
        self.persist_status().await.map_err(|e| self.backoff(e))?;
        Ok(OperationResult::requeue())
    }

    /// Add the kind's deletion guard to the finalizer set.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::Persistence`] when the object cannot be written.
    pub async fn register_guard(&mut self) -> SubroutineResult {
        if self.guard.is_registered(&self.resource.metadata) {
            return Ok(OperationResult::continue_processing());
        }
        if self.resource.metadata.is_deleting() {
            debug!("Deletion already requested, not registering deletion guard");
            return Ok(OperationResult::continue_processing());
        }

        info!(token = self.guard.token(), "Registering deletion guard");
        self.guard.register(&mut self.resource.metadata);
        self.persist().await.map_err(|e| self.backoff(e))?;
        Ok(OperationResult::requeue())
    }

    /// Delete the upstream record once the deletion marker is set, clear the
    /// external id, then release the guard.
    ///
    /// # Errors
    ///
    /// Fails with the adapter error when the upstream delete fails, with
    /// [`Error::Persistence`] when the cleared id cannot be written, and with
    /// [`Error::GuardRemoval`] when the guard cannot be released.
    pub async fn reconcile_deletion(&mut self) -> SubroutineResult {
        if !self.resource.metadata.is_deleting() {
            debug!("No deletion marker, skipping deletion");
            return Ok(OperationResult::continue_processing());
        }

        let evidence = if self.resource.has_external_id() {
            let external_id = self.resource.external_id().to_string();
            info!(%external_id, "Deletion marker found, deleting upstream record");
            match self.adapter.delete(&external_id).await {
                Ok(()) => {}
                Err(e)
                    if e.is_not_found()
                        && self.config.delete_not_found == DeleteNotFoundPolicy::TreatAsDeleted =>
                {
                    warn!(%external_id, "Upstream record already gone, treating as deleted");
                }
                Err(e) => {
                    error!(%external_id, error = %e, "Failed to delete upstream record");
                    return self.mark_failed(e.into()).await;
                }
            }
            self.forget_external_id().await?;
            ReleaseEvidence::upstream_deleted()
        } else {
            info!("Deletion marker found, no upstream record was created");
            ReleaseEvidence::never_created()
        };

        self.release_guard(evidence).await?;
        Ok(OperationResult::stop_processing())
    }

    /// Create the upstream record when none exists yet.
    ///
    /// A declared reference is resolved first; see [`ReferenceResolver`].
    ///
    /// # Errors
    ///
    /// Fails with the adapter error when the create fails, with
    /// [`Error::ReferencePending`] while the reference is unresolved, and with
    /// [`Error::Persistence`] when the status cannot be written.
    pub async fn reconcile_creation(&mut self) -> SubroutineResult {
        if let Some(outcome) = self.resolve_reference().await {
            return outcome;
        }
        if self.resource.has_external_id() {
            debug!("Upstream record exists, skipping creation");
            return Ok(OperationResult::continue_processing());
        }

        info!("No upstream record, creating");
        match self.adapter.create(&self.resource).await {
            Ok(external_id) => {
                info!(%external_id, "Upstream record created");
                self.resource.status.set_external_id(external_id);
                self.mark_ready(S::CREATED_MESSAGE).await
            }
            Err(e) => {
                error!(error = %e, "Failed to create upstream record");
                self.mark_failed(e.into()).await
            }
        }
    }

    /// Push the desired state upstream when the live record differs.
    ///
    /// # Errors
    ///
    /// Fails with the adapter error when the comparison or the update fails,
    /// and with [`Error::Persistence`] when the status cannot be written.
    pub async fn reconcile_update(&mut self) -> SubroutineResult {
        if !self.resource.has_external_id() {
            debug!("No upstream record yet, skipping update");
            return Ok(OperationResult::continue_processing());
        }

        let equal = match self.adapter.equal_to_upstream(&self.resource).await {
            Ok(equal) => equal,
            Err(e) => {
                error!(error = %e, "Failed to compare with upstream record");
                return self.mark_failed(e.into()).await;
            }
        };
        if equal {
            debug!("Upstream record matches");
            return Ok(OperationResult::continue_processing());
        }

        info!(external_id = self.resource.external_id(), "Upstream record differs, updating");
        match self.adapter.update(&self.resource).await {
            Ok(()) => self.mark_ready(S::MATCHES_MESSAGE).await,
            Err(e) => {
                error!(error = %e, "Failed to update upstream record");
                self.mark_failed(e.into()).await
            }
        }
    }

    /// `None` means "carry on with creation".
    async fn resolve_reference(&mut self) -> Option<SubroutineResult> {
        let name = self.resource.spec.reference()?.to_string();
        let resolver = self.resolver.clone()?;
        let namespace = self.resource.metadata.namespace.clone();

        match resolver.resolve(&namespace, &name).await {
            Err(e) => {
                let failure = Error::reference_lookup(resolver.kind(), name, e);
                Some(self.mark_failed(failure).await)
            }
            Ok(None) => {
                info!(reference = %name, kind = resolver.kind(), "Reference not created upstream yet");
                self.resource.status.set_resolved_reference(String::new());
                Some(
                    self.mark_failed(Error::reference_pending(resolver.kind(), name))
                        .await,
                )
            }
            Ok(Some(id)) if id == self.resource.status.resolved_reference() => None,
            Ok(Some(id)) => {
                info!(reference = %name, resolved = %id, "Reference resolved");
                self.resource.status.set_resolved_reference(id);
                Some(match self.persist_status().await {
                    Ok(()) => Ok(OperationResult::stop_processing()),
                    Err(e) => Err(self.backoff(e)),
                })
            }
        }
    }

    /// Clear the external id of a deleted upstream record. A retried
    /// deletion then releases the guard without another delete call.
    async fn forget_external_id(&mut self) -> Result<(), SubroutineError> {
        self.resource.status.set_external_id(String::new());
        self.persist_status().await.map_err(|e| self.backoff(e))
    }

    async fn release_guard(&mut self, evidence: ReleaseEvidence) -> Result<(), SubroutineError> {
        if !self.guard.release(&mut self.resource.metadata, evidence) {
            debug!("No deletion guard present");
            return Ok(());
        }

        info!(evidence = %evidence.evidence(), "Releasing deletion guard");
        match self.store.update(&self.resource).await {
            Ok(stored) => {
                self.resource = stored;
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Failed to release deletion guard");
                Err(self.backoff(Error::guard_removal(self.resource.key(), e)))
            }
        }
    }

    /// Ready=False with the error text, persisted; retry after the backoff.
    async fn mark_failed(&mut self, failure: Error) -> SubroutineResult {
        self.set_ready(ConditionStatus::False, &failure.to_string());
        if let Err(e) = self.persist_status().await {
            error!(error = %e, "Failed to record the failure on the status");
        }
        Err(self.backoff(failure))
    }

    /// Ready=True with `message`, persisted; the cycle ends.
    async fn mark_ready(&mut self, message: &str) -> SubroutineResult {
        self.set_ready(ConditionStatus::True, message);
        self.persist_status().await.map_err(|e| self.backoff(e))?;
        Ok(OperationResult::stop_processing())
    }

    fn set_ready(&mut self, status: ConditionStatus, message: &str) {
        let conditions = self
            .resource
            .status
            .conditions_mut()
            .get_or_insert_with(Conditions::new);
        self.conditions.set_condition(
            conditions,
            ConditionType::Ready,
            status,
            S::READY_REASON,
            message,
        );
    }

    async fn persist_status(&mut self) -> Result<(), Error> {
        match self.store.update_status(&self.resource).await {
            Ok(stored) => {
                self.resource = stored;
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Failed to persist status");
                Err(Error::persistence(self.resource.key(), e))
            }
        }
    }

    async fn persist(&mut self) -> Result<(), Error> {
        match self.store.update(&self.resource).await {
            Ok(stored) => {
                self.resource = stored;
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Failed to persist object");
                Err(Error::persistence(self.resource.key(), e))
            }
        }
    }

    fn backoff(&self, error: Error) -> SubroutineError {
        SubroutineError::after(self.config.requeue_backoff, error)
    }
}

#[async_trait]
impl<S: ResourceSpec> Subroutines for SubroutineHandler<S> {
    async fn run(&mut self, step: Step) -> SubroutineResult {
        match step {
            Step::Initialization => self.initialization().await,
            Step::RegisterGuard => self.register_guard().await,
            Step::ReconcileDeletion => self.reconcile_deletion().await,
            Step::ReconcileCreation => self.reconcile_creation().await,
            Step::ReconcileUpdate => self.reconcile_update().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error as StdError;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::error::{StoreError, UpstreamError};
    use crate::fake::{FakeUpstream, Operation};
    use crate::reference::StoreReferenceResolver;
    use crate::store::{InMemoryStateStore, StoreResult};
    use crate::types::DEFAULT_REQUEUE_BACKOFF;
    use pd_operator_core::{
        EscalationPolicy, EscalationPolicySpec, EscalationRule, ObjectKey, ObjectMeta,
        PagerdutyService, PagerdutyServiceSpec, UserId,
    };

    type TestResult = Result<(), Box<dyn StdError>>;

    struct Fixture<S: ResourceSpec> {
        store: Arc<InMemoryStateStore<S>>,
        upstream: Arc<FakeUpstream<S>>,
    }

    impl<S: ResourceSpec> Fixture<S> {
        fn new() -> Self {
            Self {
                store: InMemoryStateStore::new_arc(),
                upstream: Arc::new(FakeUpstream::default()),
            }
        }

        fn with_upstream(upstream: FakeUpstream<S>) -> Self {
            Self {
                store: InMemoryStateStore::new_arc(),
                upstream: Arc::new(upstream),
            }
        }

        async fn handler(&self, resource: ManagedResource<S>) -> Result<SubroutineHandler<S>, StoreError> {
            let stored = self.seed(resource).await?;
            Ok(self.handler_for(stored))
        }

        /// Store `resource` with its finalizers and status, as earlier
        /// cycles would have written them.
        async fn seed(&self, resource: ManagedResource<S>) -> StoreResult<ManagedResource<S>> {
            let mut stored = self.store.apply(resource.clone()).await?;
            stored.metadata.finalizers = resource.metadata.finalizers;
            let mut stored = self.store.update(&stored).await?;
            stored.status = resource.status;
            self.store.update_status(&stored).await
        }

        fn handler_for(&self, resource: ManagedResource<S>) -> SubroutineHandler<S> {
            SubroutineHandler::new(resource, self.upstream.clone(), self.store.clone())
        }
    }

    fn policy() -> EscalationPolicy {
        let mut policy = ManagedResource::new(
            ObjectMeta::new("default", "ops"),
            EscalationPolicySpec::new("Ops")
                .with_rule(EscalationRule::new(5, [UserId::new("PUSER1")])),
        );
        policy.status.conditions = Some(Conditions::new());
        policy
            .metadata
            .add_finalizer(DeletionGuard::of::<EscalationPolicySpec>().token());
        policy
    }

    fn service() -> PagerdutyService {
        let mut spec = PagerdutyServiceSpec::new("svc-a", "ops");
        spec.auto_resolve_timeout = Some(30);
        let mut service = ManagedResource::new(ObjectMeta::new("default", "svc-a"), spec);
        service.status.conditions = Some(Conditions::new());
        service
    }

    fn ready_condition(resource: &ManagedResource<impl ResourceSpec>) -> Option<pd_operator_core::Condition> {
        resource
            .status
            .conditions()
            .and_then(|c| c.get(ConditionType::Ready.as_str()))
            .cloned()
    }

    /// Given a spec with no upstream record
    /// When Reconcile Creation runs
    /// Then the record is created, its id stored and Ready set True
    #[tokio::test]
    async fn creation_stores_external_id_and_ready_condition() -> TestResult {
        let fixture = Fixture::with_upstream(FakeUpstream::default().with_ids(["ext-123"]));
        let mut handler: SubroutineHandler<PagerdutyServiceSpec> =
            fixture.handler(service()).await?;

        let result = handler.reconcile_creation().await?;

        assert_eq!(result, OperationResult::stop_processing());
        assert_eq!(handler.resource().status.service_id, "ext-123");
        let ready = ready_condition(handler.resource()).ok_or("missing Ready condition")?;
        assert_eq!(ready.status, ConditionStatus::True);
        assert_eq!(ready.reason, "PDServiceReady");
        assert_eq!(ready.message, "PagerDuty Service created");
        assert!(ready.last_transition_time.is_some());

        let stored = fixture.store.get(&handler.resource().key()).await?;
        assert_eq!(stored.status.service_id, "ext-123");
        let record = fixture.upstream.record("ext-123").await.ok_or("record missing")?;
        assert_eq!(record.auto_resolve_timeout, Some(30));
        Ok(())
    }

    /// Given Reconcile Creation already succeeded
    /// When it runs a second time
    /// Then no second create call is made and the id is unchanged
    #[tokio::test]
    async fn creation_is_idempotent() -> TestResult {
        let fixture = Fixture::<EscalationPolicySpec>::new();
        let mut handler = fixture.handler(policy()).await?;

        handler.reconcile_creation().await?;
        let first_id = handler.resource().status.policy_id.clone();
        let second = handler.reconcile_creation().await?;

        assert!(second.should_continue());
        assert_eq!(handler.resource().status.policy_id, first_id);
        assert_eq!(fixture.upstream.calls().await.create, 1);
        Ok(())
    }

    /// Given an upstream record matching the spec
    /// When Reconcile Update runs
    /// Then no update call is made and the condition is untouched
    #[tokio::test]
    async fn matching_record_is_a_no_op() -> TestResult {
        let fixture = Fixture::<EscalationPolicySpec>::new();
        let mut handler = fixture.handler(policy()).await?;
        handler.reconcile_creation().await?;
        let before = ready_condition(handler.resource());

        let result = handler.reconcile_update().await?;

        assert!(result.should_continue());
        assert_eq!(fixture.upstream.calls().await.update, 0);
        assert_eq!(ready_condition(handler.resource()), before);
        Ok(())
    }

    /// Given a drifted upstream record
    /// When the update call fails with "rate limited"
    /// Then Ready is False with that message and a 10s retry is requested
    #[tokio::test]
    async fn failed_update_sets_ready_false_and_backs_off() -> TestResult {
        let fixture = Fixture::<EscalationPolicySpec>::new();
        let mut handler = fixture.handler(policy()).await?;
        handler.reconcile_creation().await?;

        let mut drifted = handler.into_resource();
        drifted.spec.description = "changed".to_string();
        let mut handler = fixture.handler_for(drifted);
        fixture
            .upstream
            .fail_next(Operation::Update, UpstreamError::RateLimited)
            .await;

        let Err(failure) = handler.reconcile_update().await else {
            return Err("update should fail".into());
        };

        assert_eq!(failure.requeue_delay, Duration::from_secs(10));
        assert_eq!(failure.source, Error::Upstream(UpstreamError::RateLimited));
        let ready = ready_condition(handler.resource()).ok_or("missing Ready condition")?;
        assert_eq!(ready.status, ConditionStatus::False);
        assert_eq!(ready.reason, "PDEscalationPolicyReady");
        assert_eq!(ready.message, "rate limited");

        let stored = fixture.store.get(&handler.resource().key()).await?;
        assert_eq!(ready_condition(&stored), Some(ready));
        Ok(())
    }

    #[tokio::test]
    async fn successful_update_reports_match() -> TestResult {
        let fixture = Fixture::<EscalationPolicySpec>::new();
        let mut handler = fixture.handler(policy()).await?;
        handler.reconcile_creation().await?;

        let mut drifted = handler.into_resource();
        drifted.spec.num_loops = 3;
        let mut handler = fixture.handler_for(drifted);

        let result = handler.reconcile_update().await?;

        assert_eq!(result, OperationResult::stop_processing());
        let ready = ready_condition(handler.resource()).ok_or("missing Ready condition")?;
        assert_eq!(
            ready.message,
            "PagerDuty Escalation Policy matches upstream service"
        );
        let record = fixture
            .upstream
            .record(handler.resource().external_id())
            .await
            .ok_or("record missing")?;
        assert_eq!(record.num_loops, 3);
        Ok(())
    }

    async fn deleting_policy(
        fixture: &Fixture<EscalationPolicySpec>,
        external_id: &str,
    ) -> Result<SubroutineHandler<EscalationPolicySpec>, Box<dyn StdError>> {
        let mut resource = policy();
        resource.status.policy_id = external_id.to_string();
        let stored = fixture.seed(resource).await?;
        if !external_id.is_empty() {
            fixture
                .upstream
                .seed(external_id, stored.to_record())
                .await;
        }
        fixture.store.delete(&stored.key()).await?;
        let deleting = fixture.store.get(&stored.key()).await?;
        Ok(fixture.handler_for(deleting))
    }

    /// Given a deletion marker and an upstream record
    /// When the delete call succeeds
    /// Then the guard is released, the object leaves the store and the cycle stops
    #[tokio::test]
    async fn deletion_releases_guard_after_upstream_delete() -> TestResult {
        let fixture = Fixture::<EscalationPolicySpec>::new();
        let mut handler = deleting_policy(&fixture, "ext-123").await?;

        let result = handler.reconcile_deletion().await?;

        assert_eq!(result, OperationResult::stop_processing());
        assert!(handler.resource().metadata.finalizers.is_empty());
        assert!(fixture.upstream.record("ext-123").await.is_none());
        let gone = fixture.store.get(&handler.resource().key()).await;
        assert!(gone.is_err_and(|e| e.is_not_found()));
        Ok(())
    }

    /// Given a deletion marker
    /// When the delete call fails
    /// Then the guard stays and a retry is requested
    #[tokio::test]
    async fn failed_delete_keeps_guard() -> TestResult {
        let fixture = Fixture::<EscalationPolicySpec>::new();
        let mut handler = deleting_policy(&fixture, "ext-123").await?;
        fixture
            .upstream
            .fail_next(Operation::Delete, UpstreamError::rejected(500, "boom"))
            .await;

        let Err(failure) = handler.reconcile_deletion().await else {
            return Err("delete should fail".into());
        };

        assert_eq!(failure.requeue_delay, DEFAULT_REQUEUE_BACKOFF);
        let stored = fixture.store.get(&handler.resource().key()).await?;
        assert!(DeletionGuard::of::<EscalationPolicySpec>().is_registered(&stored.metadata));
        assert!(fixture.upstream.record("ext-123").await.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn deletion_without_upstream_record_skips_delete_call() -> TestResult {
        let fixture = Fixture::<EscalationPolicySpec>::new();
        let mut handler = deleting_policy(&fixture, "").await?;

        let result = handler.reconcile_deletion().await?;

        assert_eq!(result, OperationResult::stop_processing());
        assert_eq!(fixture.upstream.calls().await.delete, 0);
        assert!(fixture.store.list().await.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn not_found_on_delete_treated_as_deleted_by_default() -> TestResult {
        let fixture = Fixture::<EscalationPolicySpec>::new();
        let mut handler = deleting_policy(&fixture, "ext-404").await?;
        fixture.upstream.repository().remove("ext-404").await;

        let result = handler.reconcile_deletion().await?;

        assert_eq!(result, OperationResult::stop_processing());
        assert!(fixture.store.list().await.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn not_found_on_delete_retries_under_retry_policy() -> TestResult {
        let fixture = Fixture::<EscalationPolicySpec>::new();
        let handler = deleting_policy(&fixture, "ext-404").await?;
        fixture.upstream.repository().remove("ext-404").await;
        let mut handler = handler.with_config(ReconcilerConfig {
            delete_not_found: DeleteNotFoundPolicy::Retry,
            ..ReconcilerConfig::default()
        });

        let result = handler.reconcile_deletion().await;

        assert!(result.is_err_and(|e| matches!(
            e.source,
            Error::Upstream(UpstreamError::NotFound { .. })
        )));
        assert_eq!(fixture.store.list().await.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn guard_removal_failure_is_surfaced() -> TestResult {
        let fixture = Fixture::<EscalationPolicySpec>::new();
        let mut handler = deleting_policy(&fixture, "").await?;
        fixture.store.fail_next_write(StoreError::Closed).await;

        let result = handler.reconcile_deletion().await;

        assert!(result.is_err_and(|e| matches!(e.source, Error::GuardRemoval { .. })));
        assert_eq!(fixture.store.list().await.len(), 1);
        Ok(())
    }

    /// Fails the first metadata write; everything else reaches the store.
    struct FailFirstUpdate<S: ResourceSpec> {
        inner: Arc<InMemoryStateStore<S>>,
        failed: AtomicBool,
    }

    #[async_trait]
    impl<S: ResourceSpec> StateStore<S> for FailFirstUpdate<S> {
        async fn get(&self, key: &ObjectKey) -> StoreResult<ManagedResource<S>> {
            self.inner.get(key).await
        }

        async fn update(&self, resource: &ManagedResource<S>) -> StoreResult<ManagedResource<S>> {
            if !self.failed.swap(true, Ordering::SeqCst) {
                return Err(StoreError::Closed);
            }
            self.inner.update(resource).await
        }

        async fn update_status(
            &self,
            resource: &ManagedResource<S>,
        ) -> StoreResult<ManagedResource<S>> {
            self.inner.update_status(resource).await
        }
    }

    /// Given the Retry policy and a deletion whose guard release write fails
    /// When the next cycle runs
    /// Then no second delete call is made and the object leaves the store
    #[tokio::test]
    async fn deletion_completes_after_guard_release_failure_under_retry() -> TestResult {
        let fixture = Fixture::<EscalationPolicySpec>::new();
        let retry = ReconcilerConfig {
            delete_not_found: DeleteNotFoundPolicy::Retry,
            ..ReconcilerConfig::default()
        };
        let deleting = deleting_policy(&fixture, "ext-123").await?.into_resource();
        let key = deleting.key();
        let flaky = Arc::new(FailFirstUpdate {
            inner: fixture.store.clone(),
            failed: AtomicBool::new(false),
        });
        let mut handler = SubroutineHandler::new(deleting, fixture.upstream.clone(), flaky)
            .with_config(retry.clone());

        let first = handler.reconcile_deletion().await;
        assert!(first.is_err_and(|e| matches!(e.source, Error::GuardRemoval { .. })));
        let stored = fixture.store.get(&key).await?;
        assert!(stored.status.policy_id.is_empty());
        assert!(fixture.upstream.record("ext-123").await.is_none());

        let mut handler = fixture.handler_for(stored).with_config(retry);
        let second = handler.reconcile_deletion().await?;

        assert_eq!(second, OperationResult::stop_processing());
        assert!(fixture.store.list().await.is_empty());
        assert_eq!(fixture.upstream.calls().await.delete, 1);
        Ok(())
    }

    #[tokio::test]
    async fn initialization_persists_empty_conditions_once() -> TestResult {
        let fixture = Fixture::<EscalationPolicySpec>::new();
        let mut resource = policy();
        resource.status.conditions = None;
        let mut handler = fixture.handler(resource).await?;

        let first = handler.initialization().await?;
        assert_eq!(first, OperationResult::requeue());
        let stored = fixture.store.get(&handler.resource().key()).await?;
        assert_eq!(stored.status.conditions, Some(Conditions::new()));

        let second = handler.initialization().await?;
        assert!(second.should_continue());
        Ok(())
    }

    #[tokio::test]
    async fn guard_registration_persists_and_requeues() -> TestResult {
        let fixture = Fixture::<EscalationPolicySpec>::new();
        let mut resource = policy();
        resource.metadata.finalizers.clear();
        let mut handler = fixture.handler(resource).await?;

        let first = handler.register_guard().await?;
        assert_eq!(first, OperationResult::requeue());
        let stored = fixture.store.get(&handler.resource().key()).await?;
        assert!(DeletionGuard::of::<EscalationPolicySpec>().is_registered(&stored.metadata));

        let second = handler.register_guard().await?;
        assert!(second.should_continue());
        Ok(())
    }

    #[tokio::test]
    async fn status_persist_failure_after_create_backs_off() -> TestResult {
        let fixture = Fixture::<EscalationPolicySpec>::new();
        let mut handler = fixture.handler(policy()).await?;
        fixture.store.fail_next_write(StoreError::Closed).await;

        let Err(failure) = handler.reconcile_creation().await else {
            return Err("persist should fail".into());
        };

        assert!(matches!(failure.source, Error::Persistence { .. }));
        assert_eq!(failure.requeue_delay, DEFAULT_REQUEUE_BACKOFF);
        assert_eq!(fixture.upstream.calls().await.create, 1);
        Ok(())
    }

    /// Given a service whose escalation policy has no upstream id yet
    /// When Reconcile Creation runs
    /// Then nothing is created and Ready reports the wait
    #[tokio::test]
    async fn service_waits_for_escalation_policy() -> TestResult {
        let policies = InMemoryStateStore::<EscalationPolicySpec>::new_arc();
        let mut pending_policy = policy();
        pending_policy.status.policy_id.clear();
        policies.apply(pending_policy).await?;
        let resolver = Arc::new(StoreReferenceResolver::<EscalationPolicySpec>::new(policies.clone()));

        let fixture = Fixture::<PagerdutyServiceSpec>::new();
        let mut handler = fixture.handler(service()).await?.with_resolver(resolver.clone());

        let Err(failure) = handler.reconcile_creation().await else {
            return Err("creation should wait".into());
        };
        assert!(matches!(failure.source, Error::ReferencePending { .. }));
        assert_eq!(fixture.upstream.calls().await.create, 0);
        let ready = ready_condition(handler.resource()).ok_or("missing Ready condition")?;
        assert_eq!(ready.status, ConditionStatus::False);
        assert!(ready.message.contains("EscalationPolicy 'ops'"));

        // The policy gets created upstream.
        let mut created = policies.get(&pd_operator_core::ObjectKey::new("default", "ops")).await?;
        created.status.policy_id = "PPOL".to_string();
        policies.update_status(&created).await?;

        let resolved = handler.reconcile_creation().await?;
        assert_eq!(resolved, OperationResult::stop_processing());
        assert_eq!(handler.resource().status.escalation_policy_id, "PPOL");

        let stored = fixture.store.get(&handler.resource().key()).await?;
        let mut handler = fixture.handler_for(stored).with_resolver(resolver);
        handler.reconcile_creation().await?;
        let record = fixture
            .upstream
            .record(handler.resource().external_id())
            .await
            .ok_or("record missing")?;
        assert_eq!(record.escalation_policy.id, "PPOL");
        Ok(())
    }
}
