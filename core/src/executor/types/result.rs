use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::budget::TokenUsage;
use crate::error::BudgetError;

use super::task::TaskStatus;

/// What a collaborator reports back for one task attempt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    /// Model that produced `usage`; the configured default model otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Cost reported by the service. Wins over the local price table.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// The failure will repeat on every attempt; skip the retry strategy.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub permanent: bool,
}

impl TaskOutcome {
    pub fn succeeded(output_ref: impl Into<String>) -> Self {
        Self {
            success: true,
            output_ref: Some(output_ref.into()),
            ..Self::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }

    pub fn with_usage(mut self, model: impl Into<String>, usage: TokenUsage) -> Self {
        self.model = Some(model.into());
        self.usage = Some(usage);
        self
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = Some(cost);
        self
    }

    pub fn permanent(mut self) -> Self {
        self.permanent = true;
        self
    }
}

/// Final record for one task after the executor is done with it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskReport {
    pub source_ref: String,
    pub target_ref: String,
    pub status: TaskStatus,
    pub attempts: u32,
    pub duration_ms: u64,
    pub cost: f64,
    pub tokens: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Never reached the collaborator because the run was cancelled.
    #[serde(default)]
    pub cancelled: bool,
}

impl TaskReport {
    pub fn is_success(&self) -> bool {
        self.status == TaskStatus::Completed
    }
}

/// Aggregate of one `execute` call.
#[derive(Debug, Clone, Default)]
pub struct ExecutionSummary {
    pub completed: usize,
    pub failed: usize,
    /// Subset of `failed` that was cancelled before starting.
    pub cancelled: usize,
    pub total_time: Duration,
    pub total_cost: f64,
    pub total_tokens: u64,
    pub budget_error: Option<BudgetError>,
    pub reports: Vec<TaskReport>,
}

impl ExecutionSummary {
    pub fn total(&self) -> usize {
        self.reports.len()
    }

    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.budget_error.is_none()
    }

    pub fn completed_refs(&self) -> Vec<String> {
        self.reports
            .iter()
            .filter(|r| r.is_success())
            .map(|r| r.source_ref.clone())
            .collect()
    }

    pub fn failures(&self) -> impl Iterator<Item = &TaskReport> {
        self.reports.iter().filter(|r| !r.is_success())
    }
}
