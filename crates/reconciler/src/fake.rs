//! In-memory stand-in for the upstream service.
//!
//! [`FakeUpstream`] implements [`UpstreamAdapter`] for any kind over an
//! injected [`Repository`]. The repository is owned by whoever constructs the
//! fake, so two fakes never share records unless handed the same repository.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use pd_operator_core::{ManagedResource, ResourceSpec, ResourceStatus};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::adapter::{UpstreamAdapter, UpstreamResult};
use crate::error::UpstreamError;

/// Key-value storage of upstream records.
#[async_trait]
pub trait Repository<R>: Send + Sync {
    /// Store a record under `id`, replacing any previous one.
    async fn insert(&self, id: &str, record: R);

    /// The record stored under `id`.
    async fn get(&self, id: &str) -> Option<R>;

    /// Remove and return the record stored under `id`.
    async fn remove(&self, id: &str) -> Option<R>;

    /// Number of stored records.
    async fn len(&self) -> usize;
}

/// Repository backed by an ordered map.
#[derive(Debug)]
pub struct InMemoryRepository<R> {
    records: RwLock<BTreeMap<String, R>>,
}

impl<R> Default for InMemoryRepository<R> {
    fn default() -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
        }
    }
}

impl<R> InMemoryRepository<R> {
    /// Create an empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty repository wrapped in an Arc.
    pub fn new_arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl<R: Clone + Send + Sync> Repository<R> for InMemoryRepository<R> {
    async fn insert(&self, id: &str, record: R) {
        self.records.write().await.insert(id.to_string(), record);
    }

    async fn get(&self, id: &str) -> Option<R> {
        self.records.read().await.get(id).cloned()
    }

    async fn remove(&self, id: &str) -> Option<R> {
        self.records.write().await.remove(id)
    }

    async fn len(&self) -> usize {
        self.records.read().await.len()
    }
}

/// Adapter operations, for call counting and failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    Get,
    Update,
    Delete,
}

/// Calls received per operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub create: usize,
    pub get: usize,
    pub update: usize,
    pub delete: usize,
}

impl CallCounts {
    fn record(&mut self, operation: Operation) {
        let counter = match operation {
            Operation::Create => &mut self.create,
            Operation::Get => &mut self.get,
            Operation::Update => &mut self.update,
            Operation::Delete => &mut self.delete,
        };
        *counter = counter.saturating_add(1);
    }
}

#[derive(Debug)]
struct IdSource {
    fixed: VecDeque<String>,
    next: u64,
}

impl IdSource {
    fn next_id(&mut self) -> String {
        if let Some(id) = self.fixed.pop_front() {
            return id;
        }
        self.next = self.next.saturating_add(1);
        format!("ext-{}", self.next)
    }
}

#[derive(Debug)]
struct FakeState {
    ids: IdSource,
    calls: CallCounts,
    failures: HashMap<Operation, UpstreamError>,
}

/// In-memory upstream for any kind.
pub struct FakeUpstream<S: ResourceSpec> {
    repository: Arc<dyn Repository<S::Record>>,
    state: Mutex<FakeState>,
}

impl<S: ResourceSpec> Default for FakeUpstream<S> {
    fn default() -> Self {
        Self::new(Arc::new(InMemoryRepository::<S::Record>::new()))
    }
}

impl<S: ResourceSpec> FakeUpstream<S> {
    /// Create a fake over `repository`. Ids are `ext-1`, `ext-2`, ...
    pub fn new(repository: Arc<dyn Repository<S::Record>>) -> Self {
        Self {
            repository,
            state: Mutex::new(FakeState {
                ids: IdSource {
                    fixed: VecDeque::new(),
                    next: 0,
                },
                calls: CallCounts::default(),
                failures: HashMap::new(),
            }),
        }
    }

    /// Hand out `ids` first, then fall back to sequential ids.
    #[must_use]
    pub fn with_ids<I, T>(self, ids: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let mut state = self.state.into_inner();
        state.ids.fixed = ids.into_iter().map(Into::into).collect();
        Self {
            repository: self.repository,
            state: Mutex::new(state),
        }
    }

    /// Make the next call to `operation` fail with `error`.
    pub async fn fail_next(&self, operation: Operation, error: UpstreamError) {
        self.state.lock().await.failures.insert(operation, error);
    }

    /// Calls received so far.
    pub async fn calls(&self) -> CallCounts {
        self.state.lock().await.calls
    }

    /// The repository backing this fake.
    pub fn repository(&self) -> &Arc<dyn Repository<S::Record>> {
        &self.repository
    }

    /// Store a record directly, bypassing call counting.
    pub async fn seed(&self, id: &str, record: S::Record) {
        self.repository.insert(id, record).await;
    }

    /// The record stored under `id`.
    pub async fn record(&self, id: &str) -> Option<S::Record> {
        self.repository.get(id).await
    }

    async fn begin(&self, operation: Operation) -> UpstreamResult<()> {
        let mut state = self.state.lock().await;
        state.calls.record(operation);
        match state.failures.remove(&operation) {
            Some(error) => {
                debug!(kind = S::KIND, ?operation, %error, "Injected upstream failure");
                Err(error)
            }
            None => Ok(()),
        }
    }

    fn record_for(resource: &ManagedResource<S>, id: &str) -> S::Record {
        let mut status = resource.status.clone();
        status.set_external_id(id.to_string());
        resource.spec.to_record(&status)
    }
}

#[async_trait]
impl<S: ResourceSpec> UpstreamAdapter<S> for FakeUpstream<S> {
    async fn create(&self, resource: &ManagedResource<S>) -> UpstreamResult<String> {
        self.begin(Operation::Create).await?;
        let id = self.state.lock().await.ids.next_id();
        self.repository
            .insert(&id, Self::record_for(resource, &id))
            .await;
        debug!(kind = S::KIND, external_id = %id, "Fake upstream record created");
        Ok(id)
    }

    async fn get(&self, external_id: &str) -> UpstreamResult<S::Record> {
        self.begin(Operation::Get).await?;
        self.repository
            .get(external_id)
            .await
            .ok_or_else(|| UpstreamError::not_found(S::KIND, external_id))
    }

    async fn update(&self, resource: &ManagedResource<S>) -> UpstreamResult<()> {
        self.begin(Operation::Update).await?;
        let id = resource.external_id();
        if self.repository.get(id).await.is_none() {
            return Err(UpstreamError::not_found(S::KIND, id));
        }
        self.repository.insert(id, Self::record_for(resource, id)).await;
        Ok(())
    }

    async fn delete(&self, external_id: &str) -> UpstreamResult<()> {
        self.begin(Operation::Delete).await?;
        self.repository
            .remove(external_id)
            .await
            .map(|_| ())
            .ok_or_else(|| UpstreamError::not_found(S::KIND, external_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pd_operator_core::{
        EscalationPolicy, EscalationPolicyRecord, EscalationPolicySpec, EscalationRule,
        ObjectMeta, UserId,
    };

    fn policy() -> EscalationPolicy {
        ManagedResource::new(
            ObjectMeta::new("default", "ops"),
            EscalationPolicySpec::new("Ops")
                .with_rule(EscalationRule::new(5, [UserId::new("PUSER1")])),
        )
    }

    #[tokio::test]
    async fn test_create_assigns_sequential_ids() -> Result<(), UpstreamError> {
        let fake = FakeUpstream::<EscalationPolicySpec>::default();

        assert_eq!(fake.create(&policy()).await?, "ext-1");
        assert_eq!(fake.create(&policy()).await?, "ext-2");
        assert_eq!(fake.repository().len().await, 2);
        assert_eq!(fake.calls().await.create, 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_fixed_ids_come_first() -> Result<(), UpstreamError> {
        let fake = FakeUpstream::<EscalationPolicySpec>::default().with_ids(["ext-123"]);

        assert_eq!(fake.create(&policy()).await?, "ext-123");
        assert_eq!(fake.create(&policy()).await?, "ext-1");
        Ok(())
    }

    /// Given a record created from a spec
    /// When the same spec is compared against it
    /// Then the adapter reports equality
    #[tokio::test]
    async fn created_record_equals_its_spec() -> Result<(), UpstreamError> {
        let fake = FakeUpstream::<EscalationPolicySpec>::default();
        let mut resource = policy();
        let id = fake.create(&resource).await?;
        resource.status.policy_id = id;

        assert!(fake.equal_to_upstream(&resource).await?);
        assert_eq!(fake.calls().await.get, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_injected_failure_fires_once() -> Result<(), UpstreamError> {
        let fake = FakeUpstream::<EscalationPolicySpec>::default();
        fake.fail_next(Operation::Create, UpstreamError::RateLimited)
            .await;

        assert_eq!(
            fake.create(&policy()).await,
            Err(UpstreamError::RateLimited)
        );
        assert_eq!(fake.create(&policy()).await?, "ext-1");
        assert_eq!(fake.calls().await.create, 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_record_is_not_found() {
        let fake = FakeUpstream::<EscalationPolicySpec>::default();

        let get = fake.get("ext-9").await;
        assert!(get.is_err_and(|e| e.is_not_found()));

        let delete = fake.delete("ext-9").await;
        assert!(delete.is_err_and(|e| e.is_not_found()));

        let mut resource = policy();
        resource.status.policy_id = "ext-9".to_string();
        let update = fake.update(&resource).await;
        assert!(update.is_err_and(|e| e.is_not_found()));
    }

    #[tokio::test]
    async fn test_shared_repository_is_visible_to_both_fakes() -> Result<(), UpstreamError> {
        let repository: Arc<InMemoryRepository<EscalationPolicyRecord>> =
            InMemoryRepository::new_arc();
        let first = FakeUpstream::<EscalationPolicySpec>::new(repository.clone());
        let second = FakeUpstream::<EscalationPolicySpec>::new(repository);

        let id = first.create(&policy()).await?;
        assert!(second.record(&id).await.is_some());
        Ok(())
    }
}
