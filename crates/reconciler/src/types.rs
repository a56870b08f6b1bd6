//! Core types for the reconciler.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::error::Error;

/// Backoff applied after a failed upstream or persistence call.
pub const DEFAULT_REQUEUE_BACKOFF: Duration = Duration::from_secs(10);

/// Control-flow signal returned by every subroutine.
///
/// Consumed only by the pipeline: `requeue_requested` aborts the cycle and
/// asks for redelivery after `requeue_delay`, `cancel_requested` ends the
/// cycle cleanly, and neither flag means "run the next step".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OperationResult {
    pub requeue_requested: bool,
    pub requeue_delay: Duration,
    pub cancel_requested: bool,
}

impl OperationResult {
    /// Proceed to the next step.
    pub const fn continue_processing() -> Self {
        Self {
            requeue_requested: false,
            requeue_delay: Duration::ZERO,
            cancel_requested: false,
        }
    }

    /// End the cycle without a retry.
    pub const fn stop_processing() -> Self {
        Self {
            requeue_requested: false,
            requeue_delay: Duration::ZERO,
            cancel_requested: true,
        }
    }

    /// End the cycle and redeliver immediately.
    pub const fn requeue() -> Self {
        Self::requeue_after(Duration::ZERO)
    }

    /// End the cycle and redeliver after `delay`.
    pub const fn requeue_after(delay: Duration) -> Self {
        Self {
            requeue_requested: true,
            requeue_delay: delay,
            cancel_requested: false,
        }
    }

    /// Whether neither flag is set.
    pub const fn should_continue(&self) -> bool {
        !self.requeue_requested && !self.cancel_requested
    }
}

/// A failed subroutine: the error plus the delay before redelivery.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{source}")]
pub struct SubroutineError {
    pub requeue_delay: Duration,
    #[source]
    pub source: Error,
}

impl SubroutineError {
    /// Retry after `delay`.
    pub fn after(delay: Duration, source: impl Into<Error>) -> Self {
        Self {
            requeue_delay: delay,
            source: source.into(),
        }
    }
}

/// Outcome of a single subroutine.
pub type SubroutineResult = std::result::Result<OperationResult, SubroutineError>;

/// The five subroutines, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    Initialization,
    RegisterGuard,
    ReconcileDeletion,
    ReconcileCreation,
    ReconcileUpdate,
}

impl Step {
    /// Fixed execution order. Guard registration precedes every upstream
    /// mutation, and deletion is evaluated before creation and update.
    pub const ORDER: [Self; 5] = [
        Self::Initialization,
        Self::RegisterGuard,
        Self::ReconcileDeletion,
        Self::ReconcileCreation,
        Self::ReconcileUpdate,
    ];

    /// Name used in logs.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Initialization => "initialization",
            Self::RegisterGuard => "register_guard",
            Self::ReconcileDeletion => "reconcile_deletion",
            Self::ReconcileCreation => "reconcile_creation",
            Self::ReconcileUpdate => "reconcile_update",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the delivering framework should do once a cycle ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Redeliver the key after the delay (zero means immediately).
    Requeue(Duration),
    /// Nothing scheduled; wait for the next change notification.
    AwaitChange,
}

impl Action {
    /// The requeue delay, if a retry was requested.
    pub const fn requeue_after(&self) -> Option<Duration> {
        match self {
            Self::Requeue(delay) => Some(*delay),
            Self::AwaitChange => None,
        }
    }
}

/// Where a failed cycle stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Loading the object from the state store.
    Load,
    /// Running a subroutine.
    Step(Step),
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Load => f.write_str("load"),
            Self::Step(step) => write!(f, "{step}"),
        }
    }
}

/// A failed reconcile cycle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{stage} failed: {source}")]
pub struct ReconcileError {
    pub stage: Stage,
    pub requeue_after: Duration,
    #[source]
    pub source: Error,
}

impl ReconcileError {
    /// Wrap a subroutine failure.
    pub fn at_step(step: Step, error: SubroutineError) -> Self {
        Self {
            stage: Stage::Step(step),
            requeue_after: error.requeue_delay,
            source: error.source,
        }
    }

    /// Wrap a load failure.
    pub const fn at_load(requeue_after: Duration, source: Error) -> Self {
        Self {
            stage: Stage::Load,
            requeue_after,
            source,
        }
    }
}

/// Outcome of one reconcile cycle.
pub type ReconcileResult = std::result::Result<Action, ReconcileError>;
