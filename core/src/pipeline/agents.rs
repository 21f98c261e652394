use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::budget::TokenUsage;
use crate::context::OutputSink;

/// A stage result plus whatever the remote call cost.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentOutput<T> {
    pub value: T,
    pub usage: Option<TokenUsage>,
    pub model: Option<String>,
    pub cost: Option<f64>,
}

impl<T> AgentOutput<T> {
    /// Output produced without a billable call.
    pub fn free(value: T) -> Self {
        Self {
            value,
            usage: None,
            model: None,
            cost: None,
        }
    }

    pub fn with_usage(mut self, model: impl Into<String>, usage: TokenUsage) -> Self {
        self.model = Some(model.into());
        self.usage = Some(usage);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaCollection {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub fields: Vec<String>,
}

/// Content collections designed for the target site.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaDesign {
    #[serde(default)]
    pub collections: Vec<SchemaCollection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl SchemaDesign {
    pub fn collection_names(&self) -> Vec<String> {
        self.collections.iter().map(|c| c.name.clone()).collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScaffoldReport {
    pub content_root: String,
    #[serde(default)]
    pub created: Vec<String>,
}

/// Collaborators for the three stages that precede migration.
#[async_trait]
pub trait PipelineAgents: Send + Sync {
    fn name(&self) -> &str;

    /// Produce a discovery report for `root` in any of the accepted shapes.
    async fn analyze(&self, root: &Path, sink: &dyn OutputSink) -> anyhow::Result<AgentOutput<Value>>;

    async fn design_schemas(
        &self,
        report: &Value,
        sink: &dyn OutputSink,
    ) -> anyhow::Result<AgentOutput<SchemaDesign>>;

    async fn scaffold(
        &self,
        root: &Path,
        design: &SchemaDesign,
        sink: &dyn OutputSink,
    ) -> anyhow::Result<AgentOutput<ScaffoldReport>>;
}
