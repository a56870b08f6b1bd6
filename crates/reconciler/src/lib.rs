//! Reconciliation engine for PagerDuty resources.
//!
//! Every resource is driven towards its upstream record by five ordered
//! subroutines:
//!
//! 1. **Initialization** - make sure the status condition list exists
//! 2. **Register guard** - add the deletion guard before any upstream call
//! 3. **Reconcile deletion** - delete upstream, then release the guard
//! 4. **Reconcile creation** - create the upstream record if missing
//! 5. **Reconcile update** - push the spec when the record has drifted
//!
//! Each subroutine returns an [`OperationResult`]: continue, stop the cycle,
//! or retry after a delay. Failures never loop in-process; they become a
//! `Ready=False` condition and a requeue delay handed back to the caller.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use pd_operator_core::EscalationPolicySpec;
//! use pd_operator_reconciler::{
//!     FakeUpstream, InMemoryStateStore, LoopConfig, Reconciler, ReconciliationLoop,
//! };
//!
//! #[tokio::main]
//! async fn main() -> pd_operator_reconciler::Result<()> {
//!     let store = InMemoryStateStore::<EscalationPolicySpec>::new_arc();
//!     let reconciler = Reconciler::<EscalationPolicySpec>::builder()
//!         .with_store(store.clone())
//!         .with_adapter(Arc::new(FakeUpstream::default()))
//!         .build()?;
//!
//!     let mut reconciliation =
//!         ReconciliationLoop::new(Arc::new(reconciler), store, LoopConfig::default());
//!     reconciliation.run().await
//! }
//! ```

#![forbid(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod adapter;
pub mod condition;
pub mod error;
pub mod fake;
pub mod guard;
pub mod r#loop;
pub mod pipeline;
pub mod reconciler;
pub mod reference;
pub mod store;
pub mod subroutines;
pub mod types;

// Re-export main types
pub use adapter::{UpstreamAdapter, UpstreamResult};
pub use condition::{Clock, ConditionManager, ManualClock, SystemClock};
pub use error::{Error, Result, StoreError, UpstreamError};
pub use fake::{CallCounts, FakeUpstream, InMemoryRepository, Operation, Repository};
pub use guard::{DeletionGuard, Evidence, ReleaseEvidence};
pub use r#loop::{LoopConfig, LoopStopper, ReconciliationLoop};
pub use pipeline::{Pipeline, Subroutines};
pub use reconciler::{DeleteNotFoundPolicy, Reconciler, ReconcilerBuilder, ReconcilerConfig};
pub use reference::{ReferenceResolver, StoreReferenceResolver};
pub use store::{
    InMemoryStateStore, ResourceWatcher, StateStore, StoreResult, WatchEvent, WatchEventKind,
};
pub use subroutines::SubroutineHandler;
pub use types::{
    Action, DEFAULT_REQUEUE_BACKOFF, OperationResult, ReconcileError, ReconcileResult, Stage,
    Step, SubroutineError, SubroutineResult,
};
