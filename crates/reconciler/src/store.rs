//! State store traits and the in-memory store.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use pd_operator_core::{ManagedResource, ObjectKey, ResourceSpec};
use tokio::sync::{Mutex, RwLock, broadcast};
use tracing::debug;

use crate::error::StoreError;

/// Result type for state store calls.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

const EVENT_CAPACITY: usize = 1024;

/// What changed about a stored object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    /// Created, or spec or metadata changed.
    Applied,
    /// Only the status changed.
    StatusChanged,
    /// The deletion marker was set.
    DeletionRequested,
    /// The object left the store.
    Removed,
}

/// A change notification for one object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub kind: &'static str,
    pub key: ObjectKey,
    pub change: WatchEventKind,
}

/// Reads and writes of one kind's objects.
#[async_trait]
pub trait StateStore<S: ResourceSpec>: Send + Sync {
    /// Fetch the object under `key`.
    async fn get(&self, key: &ObjectKey) -> StoreResult<ManagedResource<S>>;

    /// Write metadata and spec. The resource version must match the stored
    /// one. Once the deletion marker is set and the finalizer set is empty,
    /// the object is removed; the last stored state is returned.
    async fn update(&self, resource: &ManagedResource<S>) -> StoreResult<ManagedResource<S>>;

    /// Write the status sub-document only.
    async fn update_status(&self, resource: &ManagedResource<S>)
    -> StoreResult<ManagedResource<S>>;
}

/// Change notifications for one kind.
#[async_trait]
pub trait ResourceWatcher<S: ResourceSpec>: Send + Sync {
    /// Keys of every stored object.
    async fn list_keys(&self) -> Vec<ObjectKey>;

    /// Subscribe to changes made after this call.
    fn subscribe(&self) -> broadcast::Receiver<WatchEvent>;
}

/// In-memory state store for one kind.
pub struct InMemoryStateStore<S: ResourceSpec> {
    objects: RwLock<BTreeMap<ObjectKey, ManagedResource<S>>>,
    events: broadcast::Sender<WatchEvent>,
    versions: AtomicU64,
    next_write_failure: Mutex<Option<StoreError>>,
}

impl<S: ResourceSpec> Default for InMemoryStateStore<S> {
    fn default() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            objects: RwLock::new(BTreeMap::new()),
            events,
            versions: AtomicU64::new(0),
            next_write_failure: Mutex::new(None),
        }
    }
}

impl<S: ResourceSpec> InMemoryStateStore<S> {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store wrapped in an Arc.
    pub fn new_arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Create or replace an object's spec, as the external actor does.
    ///
    /// The spec is validated first. Only metadata identity and spec are taken
    /// from `resource`: a new object starts with an empty status and no
    /// finalizers, an existing one keeps its status and metadata.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Invalid`] when validation fails.
    pub async fn apply(&self, resource: ManagedResource<S>) -> StoreResult<ManagedResource<S>> {
        resource.validate()?;
        let key = resource.key();
        let mut objects = self.objects.write().await;

        let stored = match objects.get_mut(&key) {
            Some(existing) => {
                if existing.spec == resource.spec {
                    return Ok(existing.clone());
                }
                existing.spec = resource.spec;
                existing.metadata.generation = existing.metadata.generation.saturating_add(1);
                existing.metadata.resource_version = self.next_version();
                existing.clone()
            }
            None => {
                let mut created = resource;
                created.status = S::Status::default();
                created.metadata.finalizers.clear();
                created.metadata.generation = 1;
                created.metadata.resource_version = self.next_version();
                created.metadata.deletion_timestamp = None;
                objects.insert(key.clone(), created.clone());
                created
            }
        };
        drop(objects);

        debug!(kind = S::KIND, %key, "Object applied");
        self.notify(key, WatchEventKind::Applied);
        Ok(stored)
    }

    /// Request deletion, as the external actor does.
    ///
    /// Objects without finalizers leave the store at once; others get the
    /// deletion marker and stay until their finalizers are released.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when nothing is stored under `key`.
    pub async fn delete(&self, key: &ObjectKey) -> StoreResult<()> {
        let mut objects = self.objects.write().await;
        let Some(existing) = objects.get_mut(key) else {
            return Err(StoreError::not_found(S::KIND, key));
        };

        if existing.metadata.finalizers.is_empty() {
            objects.remove(key);
            drop(objects);
            self.notify(key.clone(), WatchEventKind::Removed);
            return Ok(());
        }
        if existing.metadata.is_deleting() {
            return Ok(());
        }

        existing.metadata.deletion_timestamp = Some(Utc::now());
        existing.metadata.resource_version = self.next_version();
        drop(objects);

        debug!(kind = S::KIND, %key, "Deletion requested");
        self.notify(key.clone(), WatchEventKind::DeletionRequested);
        Ok(())
    }

    /// Every stored object, ordered by key.
    pub async fn list(&self) -> Vec<ManagedResource<S>> {
        self.objects.read().await.values().cloned().collect()
    }

    /// Make the next `update` or `update_status` call fail with `error`.
    pub async fn fail_next_write(&self, error: StoreError) {
        *self.next_write_failure.lock().await = Some(error);
    }

    async fn take_write_failure(&self) -> StoreResult<()> {
        self.next_write_failure.lock().await.take().map_or(Ok(()), Err)
    }

    fn next_version(&self) -> u64 {
        self.versions.fetch_add(1, Ordering::Relaxed).saturating_add(1)
    }

    fn notify(&self, key: ObjectKey, change: WatchEventKind) {
        // No subscribers is fine.
        let _ = self.events.send(WatchEvent {
            kind: S::KIND,
            key,
            change,
        });
    }

    fn check_version(
        key: &ObjectKey,
        stored: &ManagedResource<S>,
        incoming: &ManagedResource<S>,
    ) -> StoreResult<()> {
        let expected = incoming.metadata.resource_version;
        let actual = stored.metadata.resource_version;
        if expected == actual {
            Ok(())
        } else {
            Err(StoreError::conflict(S::KIND, key, expected, actual))
        }
    }
}

#[async_trait]
impl<S: ResourceSpec> StateStore<S> for InMemoryStateStore<S> {
    async fn get(&self, key: &ObjectKey) -> StoreResult<ManagedResource<S>> {
        self.objects
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::not_found(S::KIND, key))
    }

    async fn update(&self, resource: &ManagedResource<S>) -> StoreResult<ManagedResource<S>> {
        self.take_write_failure().await?;
        let key = resource.key();
        let mut objects = self.objects.write().await;
        let Some(stored) = objects.get_mut(&key) else {
            return Err(StoreError::not_found(S::KIND, &key));
        };
        Self::check_version(&key, stored, resource)?;

        if stored.metadata.finalizers == resource.metadata.finalizers
            && stored.spec == resource.spec
        {
            return Ok(stored.clone());
        }
        if stored.spec != resource.spec {
            stored.spec = resource.spec.clone();
            stored.metadata.generation = stored.metadata.generation.saturating_add(1);
        }
        stored.metadata.finalizers.clone_from(&resource.metadata.finalizers);
        stored.metadata.resource_version = self.next_version();
        let updated = stored.clone();

        if updated.metadata.is_deleting() && updated.metadata.finalizers.is_empty() {
            objects.remove(&key);
            drop(objects);
            debug!(kind = S::KIND, %key, "Finalizers released, object removed");
            self.notify(key, WatchEventKind::Removed);
        } else {
            drop(objects);
            self.notify(key, WatchEventKind::Applied);
        }
        Ok(updated)
    }

    async fn update_status(
        &self,
        resource: &ManagedResource<S>,
    ) -> StoreResult<ManagedResource<S>> {
        self.take_write_failure().await?;
        let key = resource.key();
        let mut objects = self.objects.write().await;
        let Some(stored) = objects.get_mut(&key) else {
            return Err(StoreError::not_found(S::KIND, &key));
        };
        Self::check_version(&key, stored, resource)?;

        if stored.status == resource.status {
            return Ok(stored.clone());
        }
        stored.status = resource.status.clone();
        stored.metadata.resource_version = self.next_version();
        let updated = stored.clone();
        drop(objects);

        self.notify(key, WatchEventKind::StatusChanged);
        Ok(updated)
    }
}

#[async_trait]
impl<S: ResourceSpec> ResourceWatcher<S> for InMemoryStateStore<S> {
    async fn list_keys(&self) -> Vec<ObjectKey> {
        self.objects.read().await.keys().cloned().collect()
    }

    fn subscribe(&self) -> broadcast::Receiver<WatchEvent> {
        self.events.subscribe()
    }
}
