use crate::executor::types::{MigrationTask, TaskReport};

/// Callbacks fired by the executor as tasks move through their lifecycle.
///
/// Called from worker tasks; implementations must be cheap and must not block.
pub trait ExecutionObserver: Send + Sync {
    fn on_task_start(&self, _task: &MigrationTask) {}

    fn on_task_complete(&self, _report: &TaskReport) {}

    fn on_task_error(&self, _report: &TaskReport) {}

    fn on_progress(&self, _done: usize, _total: usize) {}
}
