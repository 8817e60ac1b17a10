//! Boundary observers: cancellation and soft budgets as a side channel.
//!
//! Cancellation is deliberately kept out of the scheduler's critical path.
//! An observer watches step, iteration, and tool-call boundaries and may
//! force early suspension by synthesizing an [`ExecutionStatus`]; the
//! conversation suspends exactly as if a step had yielded it, and resumes
//! normally once the status's requirement is met.
//!
//! Observers are not part of the serialized conversation state; re-attach
//! them after restoring a persisted conversation.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::runtimes::status::ExecutionStatus;
use crate::tools::ToolRequest;

/// A boundary the executor exposes to observers.
#[derive(Debug)]
pub enum ExecutionBoundary<'a> {
    /// A step is about to be invoked. Suspending here leaves the cursor on
    /// that step; nothing has run yet.
    StepStarted { step_id: &'a str },
    /// A loop flow finished one iteration and is about to restart.
    IterationCompleted { iterations: u64 },
    /// A fresh tool request was minted, before any confirmation or
    /// execution. Suspending here keeps the minted request in flight.
    ToolRequested {
        step_id: &'a str,
        request: &'a ToolRequest,
    },
}

/// Watches execution boundaries; returning `Some(status)` forces early
/// suspension with that status.
pub trait ExecutionObserver: Send + Sync {
    fn on_boundary(&self, boundary: &ExecutionBoundary<'_>) -> Option<ExecutionStatus>;
}

/// Soft step budget: after `max_steps` step starts, suspends the
/// conversation with `AwaitingUserMessage` so the caller can decide
/// whether to continue.
///
/// # Examples
///
/// ```rust
/// use weftflow::runtimes::StepBudgetObserver;
///
/// let budget = StepBudgetObserver::new(100);
/// // conversation.add_observer(Arc::new(budget));
/// ```
pub struct StepBudgetObserver {
    max_steps: u64,
    seen: AtomicU64,
    message: String,
}

impl StepBudgetObserver {
    pub fn new(max_steps: u64) -> Self {
        Self {
            max_steps,
            seen: AtomicU64::new(0),
            message: format!("step budget of {max_steps} reached; reply to continue"),
        }
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Steps observed so far.
    #[must_use]
    pub fn steps_seen(&self) -> u64 {
        self.seen.load(Ordering::Relaxed)
    }

    /// Reset the counter, granting a fresh budget.
    pub fn reset(&self) {
        self.seen.store(0, Ordering::Relaxed);
    }
}

impl ExecutionObserver for StepBudgetObserver {
    fn on_boundary(&self, boundary: &ExecutionBoundary<'_>) -> Option<ExecutionStatus> {
        if let ExecutionBoundary::StepStarted { .. } = boundary {
            let seen = self.seen.fetch_add(1, Ordering::Relaxed) + 1;
            if seen > self.max_steps {
                return Some(ExecutionStatus::AwaitingUserMessage {
                    message: Some(self.message.clone()),
                });
            }
        }
        None
    }
}
