//! Continuous reconciliation loop.
//!
//! The loop is the delivering framework around [`Reconciler`]: it turns
//! store notifications into keys, runs at most one reconcile per key at a
//! time, and schedules redelivery after the delay each cycle asks for.

use std::collections::{HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use pd_operator_core::{ObjectKey, ResourceSpec};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::reconciler::Reconciler;
use crate::store::{ResourceWatcher, WatchEvent};
use crate::types::{Action, ReconcileResult};

/// Configuration for the reconciliation loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopConfig {
    /// Maximum number of keys reconciled concurrently.
    pub workers: usize,
    /// Interval between full resyncs of every key; `None` disables them.
    pub resync_interval: Option<Duration>,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            resync_interval: Some(Duration::from_secs(300)),
        }
    }
}

/// Pending keys, de-duplicated, with per-key exclusion.
///
/// A key is in at most one of `pending` and `in_flight`. A key added while
/// in flight is marked dirty and queued again once its cycle finishes.
#[derive(Debug, Default)]
struct WorkQueue {
    pending: VecDeque<ObjectKey>,
    queued: HashSet<ObjectKey>,
    in_flight: HashSet<ObjectKey>,
    dirty: HashSet<ObjectKey>,
}

impl WorkQueue {
    fn add(&mut self, key: ObjectKey) {
        if self.in_flight.contains(&key) {
            self.dirty.insert(key);
        } else if self.queued.insert(key.clone()) {
            self.pending.push_back(key);
        }
    }

    fn next(&mut self) -> Option<ObjectKey> {
        let key = self.pending.pop_front()?;
        self.queued.remove(&key);
        self.in_flight.insert(key.clone());
        Some(key)
    }

    fn done(&mut self, key: &ObjectKey) {
        self.in_flight.remove(key);
        if self.dirty.remove(key) {
            self.add(key.clone());
        }
    }

    fn in_flight(&self) -> usize {
        self.in_flight.len()
    }
}

/// Why keys should be queued.
#[derive(Debug)]
enum Trigger {
    /// One object of this kind changed, or its retry delay elapsed.
    Key(ObjectKey),
    /// An object this kind depends on changed in the namespace.
    Namespace(String),
    /// Notifications were lost; queue everything.
    Resync,
}

/// Continuous reconciliation loop for kind `S`.
pub struct ReconciliationLoop<S: ResourceSpec> {
    reconciler: Arc<Reconciler<S>>,
    watcher: Arc<dyn ResourceWatcher<S>>,
    dependencies: Vec<broadcast::Receiver<WatchEvent>>,
    config: LoopConfig,
    stop_rx: watch::Receiver<bool>,
    stop_tx: watch::Sender<bool>,
}

impl<S: ResourceSpec> ReconciliationLoop<S> {
    /// Create a new reconciliation loop.
    pub fn new(
        reconciler: Arc<Reconciler<S>>,
        watcher: Arc<dyn ResourceWatcher<S>>,
        config: LoopConfig,
    ) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        Self {
            reconciler,
            watcher,
            dependencies: Vec::new(),
            config,
            stop_rx,
            stop_tx,
        }
    }

    /// Re-queue every key in a namespace whenever an object of kind `T`
    /// changes there.
    #[must_use]
    pub fn with_dependency<T: ResourceSpec>(mut self, watcher: &dyn ResourceWatcher<T>) -> Self {
        self.dependencies.push(watcher.subscribe());
        self
    }

    /// Run until stopped.
    ///
    /// Every stored key is queued once at start. In-flight reconciles are
    /// allowed to finish before this returns.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] when `workers` is zero.
    pub async fn run(&mut self) -> Result<()> {
        if self.config.workers == 0 {
            return Err(Error::invalid_config("loop needs at least one worker"));
        }
        info!(
            kind = S::KIND,
            workers = self.config.workers,
            resync_secs = self.config.resync_interval.map(|d| d.as_secs()),
            "Starting reconciliation loop"
        );

        let (trigger_tx, mut trigger_rx) = mpsc::unbounded_channel();
        let mut background = JoinSet::new();
        background.spawn(forward(self.watcher.subscribe(), trigger_tx.clone(), |event| {
            Trigger::Key(event.key)
        }));
        for dependency in std::mem::take(&mut self.dependencies) {
            background.spawn(forward(dependency, trigger_tx.clone(), |event| {
                Trigger::Namespace(event.key.namespace)
            }));
        }

        let mut queue = WorkQueue::default();
        self.queue_all(&mut queue, None).await;

        let mut workers: JoinSet<(ObjectKey, Option<ReconcileResult>)> = JoinSet::new();
        let mut resync = self.config.resync_interval.map(|period| {
            let first = Instant::now().checked_add(period).unwrap_or_else(Instant::now);
            let mut interval = tokio::time::interval_at(first, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval
        });
        let mut stop_rx = self.stop_rx.clone();

        loop {
            self.dispatch(&mut queue, &mut workers);

            tokio::select! {
                changed = stop_rx.changed() => {
                    if changed.is_err() || *stop_rx.borrow() {
                        break;
                    }
                }
                Some(joined) = workers.join_next() => match joined {
                    Ok((key, outcome)) => {
                        queue.done(&key);
                        self.schedule(key, outcome, &mut queue, &mut background, &trigger_tx);
                    }
                    Err(e) => error!(kind = S::KIND, error = %e, "Reconcile task aborted"),
                },
                Some(trigger) = trigger_rx.recv() => match trigger {
                    Trigger::Key(key) => queue.add(key),
                    Trigger::Namespace(namespace) => {
                        self.queue_all(&mut queue, Some(&namespace)).await;
                    }
                    Trigger::Resync => self.queue_all(&mut queue, None).await,
                },
                Some(_) = background.join_next(), if !background.is_empty() => {}
                () = tick(resync.as_mut()) => {
                    debug!(kind = S::KIND, "Periodic resync");
                    self.queue_all(&mut queue, None).await;
                }
            }
        }

        info!(
            kind = S::KIND,
            in_flight = queue.in_flight(),
            "Stopping reconciliation loop"
        );
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!(kind = S::KIND, error = %e, "Reconcile task aborted");
            }
        }
        background.abort_all();
        info!(kind = S::KIND, "Reconciliation loop stopped");
        Ok(())
    }

    fn dispatch(
        &self,
        queue: &mut WorkQueue,
        workers: &mut JoinSet<(ObjectKey, Option<ReconcileResult>)>,
    ) {
        while workers.len() < self.config.workers {
            let Some(key) = queue.next() else {
                break;
            };
            let reconciler = self.reconciler.clone();
            workers.spawn(async move {
                let outcome = AssertUnwindSafe(reconciler.reconcile(&key))
                    .catch_unwind()
                    .await
                    .ok();
                (key, outcome)
            });
        }
    }

    fn schedule(
        &self,
        key: ObjectKey,
        outcome: Option<ReconcileResult>,
        queue: &mut WorkQueue,
        background: &mut JoinSet<()>,
        triggers: &mpsc::UnboundedSender<Trigger>,
    ) {
        let delay = match outcome {
            Some(Ok(Action::AwaitChange)) => return,
            Some(Ok(Action::Requeue(delay))) => delay,
            Some(Err(e)) => {
                warn!(kind = S::KIND, %key, error = %e, retry_in = ?e.requeue_after, "Reconcile failed");
                e.requeue_after
            }
            None => {
                error!(kind = S::KIND, %key, "Reconcile panicked");
                self.reconciler.config().requeue_backoff
            }
        };

        if delay.is_zero() {
            queue.add(key);
            return;
        }
        let triggers = triggers.clone();
        background.spawn(async move {
            tokio::time::sleep(delay).await;
            // The loop is gone when sending fails.
            let _ = triggers.send(Trigger::Key(key));
        });
    }

    async fn queue_all(&self, queue: &mut WorkQueue, namespace: Option<&str>) {
        self.watcher
            .list_keys()
            .await
            .into_iter()
            .filter(|key| namespace.is_none_or(|ns| key.namespace == ns))
            .for_each(|key| queue.add(key));
    }

    /// Stop the loop.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    /// Get a stopper handle.
    pub fn stopper(&self) -> LoopStopper {
        LoopStopper {
            stop_tx: self.stop_tx.clone(),
        }
    }
}

async fn forward(
    mut events: broadcast::Receiver<WatchEvent>,
    triggers: mpsc::UnboundedSender<Trigger>,
    map: impl Fn(WatchEvent) -> Trigger + Send,
) {
    loop {
        let trigger = match events.recv().await {
            Ok(event) => map(event),
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!(missed, "Change notifications lost, resyncing");
                Trigger::Resync
            }
            Err(broadcast::error::RecvError::Closed) => return,
        };
        if triggers.send(trigger).is_err() {
            return;
        }
    }
}

async fn tick(interval: Option<&mut Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Handle to stop a reconciliation loop.
#[derive(Clone)]
pub struct LoopStopper {
    stop_tx: watch::Sender<bool>,
}

impl LoopStopper {
    /// Stop the loop.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::UpstreamError;
    use crate::fake::{FakeUpstream, Operation};
    use crate::reconciler::ReconcilerConfig;
    use crate::store::{InMemoryStateStore, StateStore};
    use pd_operator_core::{
        ConditionType, EscalationPolicy, EscalationPolicySpec, EscalationRule, ManagedResource,
        ObjectMeta, UserId,
    };
    use tokio::task::JoinHandle;

    type Store = InMemoryStateStore<EscalationPolicySpec>;
    type Upstream = FakeUpstream<EscalationPolicySpec>;
    type TestResult = std::result::Result<(), Box<dyn std::error::Error>>;

    fn key(name: &str) -> ObjectKey {
        ObjectKey::new("default", name)
    }

    fn policy(name: &str) -> EscalationPolicy {
        ManagedResource::new(
            ObjectMeta::new("default", name),
            EscalationPolicySpec::new(name)
                .with_rule(EscalationRule::new(5, [UserId::new("PUSER1")])),
        )
    }

    fn start(
        store: &Arc<Store>,
        upstream: &Arc<Upstream>,
        config: ReconcilerConfig,
    ) -> Result<(LoopStopper, JoinHandle<Result<()>>)> {
        let reconciler = Reconciler::<EscalationPolicySpec>::builder()
            .with_store(store.clone())
            .with_adapter(upstream.clone())
            .with_config(config)
            .build()?;
        let mut reconciliation = ReconciliationLoop::new(
            Arc::new(reconciler),
            store.clone(),
            LoopConfig {
                workers: 2,
                resync_interval: None,
            },
        );
        let stopper = reconciliation.stopper();
        let handle = tokio::spawn(async move { reconciliation.run().await });
        Ok((stopper, handle))
    }

    async fn is_ready(store: &Store, key: ObjectKey) -> bool {
        store.get(&key).await.is_ok_and(|p| {
            p.status
                .conditions
                .as_ref()
                .and_then(|c| c.get(ConditionType::Ready.as_str()))
                .is_some_and(|c| c.is_true())
        })
    }

    async fn eventually<F, Fut>(mut check: F) -> bool
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        let poll = async {
            while !check().await {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        };
        tokio::time::timeout(Duration::from_secs(5), poll).await.is_ok()
    }

    #[test]
    fn test_work_queue_dedupes_pending_keys() {
        let mut queue = WorkQueue::default();
        queue.add(key("a"));
        queue.add(key("b"));
        queue.add(key("a"));

        assert_eq!(queue.next(), Some(key("a")));
        assert_eq!(queue.next(), Some(key("b")));
        assert_eq!(queue.next(), None);
    }

    /// Given a key that is being reconciled
    /// When it changes again
    /// Then it is not handed out twice, and runs again after the first cycle
    #[test]
    fn in_flight_key_is_rerun_after_completion() {
        let mut queue = WorkQueue::default();
        queue.add(key("a"));
        let first = queue.next();
        assert_eq!(first, Some(key("a")));

        queue.add(key("a"));
        assert_eq!(queue.next(), None);

        queue.done(&key("a"));
        assert_eq!(queue.next(), Some(key("a")));
        queue.done(&key("a"));
        assert_eq!(queue.next(), None);
    }

    /// Given policies applied before and after the loop starts
    /// When the loop runs
    /// Then both converge to Ready with one create each
    #[tokio::test]
    async fn loop_converges_existing_and_new_objects() -> TestResult {
        let store = Store::new_arc();
        let upstream = Arc::new(Upstream::default());
        store.apply(policy("first")).await?;
        let (stopper, handle) = start(&store, &upstream, ReconcilerConfig::default())?;

        store.apply(policy("second")).await?;

        assert!(eventually(|| is_ready(&store, key("first"))).await);
        assert!(eventually(|| is_ready(&store, key("second"))).await);
        assert_eq!(upstream.calls().await.create, 2);

        stopper.stop();
        handle.await??;
        Ok(())
    }

    #[tokio::test]
    async fn test_spec_edit_is_pushed_upstream() -> TestResult {
        let store = Store::new_arc();
        let upstream = Arc::new(Upstream::default());
        store.apply(policy("ops")).await?;
        let (stopper, handle) = start(&store, &upstream, ReconcilerConfig::default())?;
        assert!(eventually(|| is_ready(&store, key("ops"))).await);

        let mut edited = policy("ops");
        edited.spec.description = "edited".to_string();
        store.apply(edited).await?;

        let pushed = eventually(|| async {
            upstream
                .record("ext-1")
                .await
                .is_some_and(|r| r.description == "edited")
        })
        .await;
        assert!(pushed);

        stopper.stop();
        handle.await??;
        Ok(())
    }

    /// Given a converged policy
    /// When deletion is requested
    /// Then the upstream record is deleted and the object leaves the store
    #[tokio::test]
    async fn deletion_completes_through_the_loop() -> TestResult {
        let store = Store::new_arc();
        let upstream = Arc::new(Upstream::default());
        store.apply(policy("ops")).await?;
        let (stopper, handle) = start(&store, &upstream, ReconcilerConfig::default())?;
        assert!(eventually(|| is_ready(&store, key("ops"))).await);

        store.delete(&key("ops")).await?;

        assert!(eventually(|| async { store.list().await.is_empty() }).await);
        assert_eq!(upstream.repository().len().await, 0);

        stopper.stop();
        handle.await??;
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_cycle_is_retried_after_backoff() -> TestResult {
        let store = Store::new_arc();
        let upstream = Arc::new(Upstream::default());
        upstream
            .fail_next(Operation::Create, UpstreamError::RateLimited)
            .await;
        store.apply(policy("ops")).await?;
        let config = ReconcilerConfig {
            requeue_backoff: Duration::from_millis(50),
            ..ReconcilerConfig::default()
        };
        let (stopper, handle) = start(&store, &upstream, config)?;

        assert!(eventually(|| is_ready(&store, key("ops"))).await);
        assert_eq!(upstream.calls().await.create, 2);

        stopper.stop();
        handle.await??;
        Ok(())
    }

    #[tokio::test]
    async fn test_zero_workers_is_rejected() -> Result<()> {
        let store = Store::new_arc();
        let reconciler = Reconciler::<EscalationPolicySpec>::builder()
            .with_store(store.clone())
            .with_adapter(Arc::new(Upstream::default()))
            .build()?;
        let mut reconciliation = ReconciliationLoop::new(
            Arc::new(reconciler),
            store,
            LoopConfig {
                workers: 0,
                resync_interval: None,
            },
        );

        let result = reconciliation.run().await;
        assert!(matches!(result, Err(Error::InvalidConfig { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_stop_before_any_work() -> TestResult {
        let store = Store::new_arc();
        let upstream = Arc::new(Upstream::default());
        let (stopper, handle) = start(&store, &upstream, ReconcilerConfig::default())?;

        stopper.stop();
        let stopped = tokio::time::timeout(Duration::from_secs(5), handle).await;

        assert!(matches!(stopped, Ok(Ok(Ok(())))));
        Ok(())
    }
}
