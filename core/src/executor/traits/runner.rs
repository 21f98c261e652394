use async_trait::async_trait;

use crate::context::OutputSink;
use crate::executor::types::{MigrationTask, TaskOutcome};

/// The collaborator that performs the remote work for one task.
///
/// `Err` means the attempt never produced an outcome (transport failure,
/// timeout) and is subject to the retry strategy, as is an outcome with
/// `success == false`.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(
        &self,
        task: &MigrationTask,
        sink: &dyn OutputSink,
    ) -> anyhow::Result<TaskOutcome>;
}
