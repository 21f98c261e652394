use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle of one migration task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One document to migrate.
///
/// `source_ref` doubles as the task identity; a plan never contains the same
/// source twice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationTask {
    pub source_ref: String,
    pub target_ref: String,
    pub category: String,
    /// 0 is the most urgent.
    pub priority: u32,
    pub estimated_tokens: u64,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MigrationTask {
    pub fn new(
        source_ref: impl Into<String>,
        target_ref: impl Into<String>,
        category: impl Into<String>,
        priority: u32,
        estimated_tokens: u64,
    ) -> Self {
        Self {
            source_ref: source_ref.into(),
            target_ref: target_ref.into(),
            category: category.into(),
            priority,
            estimated_tokens,
            status: TaskStatus::Pending,
            error: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.source_ref
    }
}
