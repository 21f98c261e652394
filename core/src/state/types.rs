use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::migration::CURRENT_SCHEMA_VERSION;

/// Pipeline stages in their fixed order. `Failed` sits outside the order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    #[default]
    NotStarted,
    Analyzing,
    Designing,
    Implementing,
    Migrating,
    Completed,
    Failed,
}

impl Stage {
    /// Working stages in execution order.
    pub const PIPELINE: [Stage; 4] = [
        Stage::Analyzing,
        Stage::Designing,
        Stage::Implementing,
        Stage::Migrating,
    ];

    /// Position in the forward order. `None` for `Failed`.
    pub fn rank(self) -> Option<u8> {
        match self {
            Stage::NotStarted => Some(0),
            Stage::Analyzing => Some(1),
            Stage::Designing => Some(2),
            Stage::Implementing => Some(3),
            Stage::Migrating => Some(4),
            Stage::Completed => Some(5),
            Stage::Failed => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::NotStarted => "not-started",
            Stage::Analyzing => "analyzing",
            Stage::Designing => "designing",
            Stage::Implementing => "implementing",
            Stage::Migrating => "migrating",
            Stage::Completed => "completed",
            Stage::Failed => "failed",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable progress record appended on every stage transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub stage: Stage,
    pub timestamp: DateTime<Utc>,
    pub description: String,
    #[serde(default)]
    pub payload: Value,
}

/// Durable pipeline progress for one project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowState {
    pub schema_version: u32,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub current_stage: Stage,
    #[serde(default)]
    pub checkpoints: Vec<Checkpoint>,
    #[serde(default)]
    pub api_call_count: u64,
    #[serde(default)]
    pub total_cost: f64,
    #[serde(default)]
    pub total_tokens: u64,
    #[serde(default)]
    pub max_cost: Option<f64>,
}

impl WorkflowState {
    pub fn new(max_cost: Option<f64>) -> Self {
        let now = Utc::now();
        Self {
            schema_version: CURRENT_SCHEMA_VERSION,
            started_at: now,
            updated_at: now,
            current_stage: Stage::NotStarted,
            checkpoints: Vec::new(),
            api_call_count: 0,
            total_cost: 0.0,
            total_tokens: 0,
            max_cost,
        }
    }

    /// Most recent checkpoint recorded for `stage`.
    pub fn latest_checkpoint(&self, stage: Stage) -> Option<&Checkpoint> {
        self.checkpoints.iter().rev().find(|c| c.stage == stage)
    }

    pub fn has_checkpoint(&self, stage: Stage) -> bool {
        self.latest_checkpoint(stage).is_some()
    }

    /// Furthest stage reached before any failure.
    pub fn last_good_stage(&self) -> Stage {
        self.checkpoints
            .iter()
            .rev()
            .map(|c| c.stage)
            .find(|s| *s != Stage::Failed)
            .unwrap_or(Stage::NotStarted)
    }

    pub fn is_failed(&self) -> bool {
        self.current_stage == Stage::Failed
    }
}
