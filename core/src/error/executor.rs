use thiserror::Error;

use super::budget::BudgetError;

/// Errors surfaced by the work queue and the parallel executor.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecutorError {
    /// The item was removed from the queue (or the executor was cancelled)
    /// before it started. Not a failure of the task itself.
    #[error("task cancelled before it started")]
    Cancelled,

    #[error("Task execution failed: {0}")]
    TaskExecutionFailed(String),

    #[error("Task panicked: {0}")]
    TaskPanicked(String),

    #[error("{0}")]
    Budget(#[from] BudgetError),

    #[error("Runner error: {0}")]
    Runner(String),
}

impl ExecutorError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
