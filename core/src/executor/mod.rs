//! Concurrent execution of migration tasks.
//!
//! ```text
//! Plan.tasks
//!   ↓ sorted by (priority, source)
//! ParallelExecutor::execute()
//!   ↓ enqueue while paused, then resume
//! WorkQueue (priority heap, semaphore-capped slots)
//!   ↓ per dispatched item
//! AdmissionLimiter::acquire(estimated_tokens)
//!   ↓
//! TaskRunner::execute() → BudgetLedger::record_usage()
//!   ↓
//! ExecutionSummary
//! ```

mod engine;
mod limiter;
mod progress;
mod queue;
pub mod traits;
pub mod types;

pub use engine::{ExecutorState, ParallelExecutor, ParallelExecutorBuilder};
pub use limiter::{AdmissionLimiter, LimiterStats};
pub use progress::ProgressMonitor;
pub use queue::{QueueStats, WorkQueue};
pub use traits::{ExecutionObserver, RetryStrategyPlugin, TaskRunner};
pub use types::{ExecutionSummary, MigrationTask, TaskOutcome, TaskReport, TaskStatus};
