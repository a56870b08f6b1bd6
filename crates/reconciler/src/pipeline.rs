//! Ordered execution of the subroutines for one cycle.

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::types::{Action, ReconcileError, ReconcileResult, Step, SubroutineResult};

/// Something that can run each [`Step`].
#[async_trait]
pub trait Subroutines: Send {
    /// Run one step.
    async fn run(&mut self, step: Step) -> SubroutineResult;
}

/// Runs [`Step::ORDER`] and interprets each step's result.
#[derive(Debug, Clone, Copy, Default)]
pub struct Pipeline;

impl Pipeline {
    /// Run the steps in order until one fails, requeues or cancels.
    ///
    /// # Errors
    ///
    /// Returns the first failing step wrapped in [`ReconcileError`]; its
    /// requeue delay is the step's.
    pub async fn run<H: Subroutines + ?Sized>(handler: &mut H) -> ReconcileResult {
        for step in Step::ORDER {
            let outcome = handler.run(step).await.map_err(|e| {
                warn!(%step, error = %e.source, "Subroutine failed");
                ReconcileError::at_step(step, e)
            })?;

            if outcome.requeue_requested {
                debug!(%step, delay = ?outcome.requeue_delay, "Requeue requested");
                return Ok(Action::Requeue(outcome.requeue_delay));
            }
            if outcome.cancel_requested {
                debug!(%step, "Cycle finished");
                return Ok(Action::AwaitChange);
            }
        }
        Ok(Action::AwaitChange)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use super::*;
    use crate::error::{Error, UpstreamError};
    use crate::types::{OperationResult, Stage, SubroutineError};

    /// Replays scripted results and records which steps ran.
    #[derive(Default)]
    struct Scripted {
        results: HashMap<Step, SubroutineResult>,
        ran: Vec<Step>,
    }

    impl Scripted {
        fn on(mut self, step: Step, result: SubroutineResult) -> Self {
            self.results.insert(step, result);
            self
        }
    }

    #[async_trait]
    impl Subroutines for Scripted {
        async fn run(&mut self, step: Step) -> SubroutineResult {
            self.ran.push(step);
            self.results
                .remove(&step)
                .unwrap_or(Ok(OperationResult::continue_processing()))
        }
    }

    #[tokio::test]
    async fn test_all_steps_continue() {
        let mut handler = Scripted::default();

        let result = Pipeline::run(&mut handler).await;

        assert_eq!(result, Ok(Action::AwaitChange));
        assert_eq!(handler.ran, Step::ORDER.to_vec());
    }

    /// Given initialization requests an immediate requeue
    /// When the pipeline runs
    /// Then no later step runs and a zero-delay requeue is returned
    #[tokio::test]
    async fn requeue_stops_the_cycle() {
        let mut handler =
            Scripted::default().on(Step::Initialization, Ok(OperationResult::requeue()));

        let result = Pipeline::run(&mut handler).await;

        assert_eq!(result, Ok(Action::Requeue(Duration::ZERO)));
        assert_eq!(handler.ran, vec![Step::Initialization]);
    }

    #[tokio::test]
    async fn test_cancel_ends_without_requeue() {
        let mut handler = Scripted::default().on(
            Step::ReconcileCreation,
            Ok(OperationResult::stop_processing()),
        );

        let result = Pipeline::run(&mut handler).await;

        assert_eq!(result, Ok(Action::AwaitChange));
        assert!(!handler.ran.contains(&Step::ReconcileUpdate));
    }

    /// Given reconcile_update fails with a 10s backoff
    /// When the pipeline runs
    /// Then the error names the step and carries the delay
    #[tokio::test]
    async fn failure_is_wrapped_with_step_and_delay() -> Result<(), &'static str> {
        let failure =
            SubroutineError::after(Duration::from_secs(10), UpstreamError::RateLimited);
        let mut handler = Scripted::default().on(Step::ReconcileUpdate, Err(failure));

        let result = Pipeline::run(&mut handler).await;

        let Err(error) = result else {
            return Err("pipeline should fail");
        };
        assert_eq!(error.stage, Stage::Step(Step::ReconcileUpdate));
        assert_eq!(error.requeue_after, Duration::from_secs(10));
        assert_eq!(error.source, Error::Upstream(UpstreamError::RateLimited));
        assert_eq!(error.to_string(), "reconcile_update failed: rate limited");
        Ok(())
    }

    #[tokio::test]
    async fn test_requeue_delay_is_passed_through() {
        let mut handler = Scripted::default().on(
            Step::RegisterGuard,
            Ok(OperationResult::requeue_after(Duration::from_secs(3))),
        );

        let result = Pipeline::run(&mut handler).await;

        assert_eq!(result.ok().and_then(|a| a.requeue_after()), Some(Duration::from_secs(3)));
    }
}
