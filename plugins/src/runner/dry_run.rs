use anyhow::Result;
use async_trait::async_trait;

use docmigrate_core::api::{MigrationTask, OutputSink, TaskOutcome, TaskRunner};

/// Pretends every document migrated. No calls, no usage.
#[derive(Debug, Default, Clone, Copy)]
pub struct DryRunTaskRunner;

#[async_trait]
impl TaskRunner for DryRunTaskRunner {
    fn name(&self) -> &str {
        "dry-run"
    }

    async fn execute(&self, task: &MigrationTask, sink: &dyn OutputSink) -> Result<TaskOutcome> {
        sink.on_chunk(
            &task.source_ref,
            &format!("would migrate {} -> {}", task.source_ref, task.target_ref),
        );
        Ok(TaskOutcome::succeeded(task.target_ref.clone()))
    }
}
