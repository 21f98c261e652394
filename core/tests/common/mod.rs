#![allow(dead_code)]

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use docmigrate_core::api::{
    AgentOutput, AppConfig, AppContext, MigrationTask, OutputSink, PipelineAgents, PipelineRunner,
    ScaffoldReport, SchemaCollection, SchemaDesign, Services, TaskOutcome, TaskRunner, TokenUsage,
};
use serde_json::{json, Value};

/// Agents that report a fixed list of documents and never cost anything.
pub struct StubAgents {
    pub documents: Vec<String>,
    pub analyze_calls: AtomicUsize,
    pub design_calls: AtomicUsize,
    pub scaffold_calls: AtomicUsize,
}

impl StubAgents {
    pub fn new(documents: &[&str]) -> Self {
        Self {
            documents: documents.iter().map(|d| d.to_string()).collect(),
            analyze_calls: AtomicUsize::new(0),
            design_calls: AtomicUsize::new(0),
            scaffold_calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> (usize, usize, usize) {
        (
            self.analyze_calls.load(Ordering::SeqCst),
            self.design_calls.load(Ordering::SeqCst),
            self.scaffold_calls.load(Ordering::SeqCst),
        )
    }
}

#[async_trait]
impl PipelineAgents for StubAgents {
    fn name(&self) -> &str {
        "stub"
    }

    async fn analyze(&self, _root: &Path, _sink: &dyn OutputSink) -> anyhow::Result<AgentOutput<Value>> {
        self.analyze_calls.fetch_add(1, Ordering::SeqCst);
        Ok(AgentOutput::free(json!({ "files": self.documents })))
    }

    async fn design_schemas(
        &self,
        _report: &Value,
        _sink: &dyn OutputSink,
    ) -> anyhow::Result<AgentOutput<SchemaDesign>> {
        self.design_calls.fetch_add(1, Ordering::SeqCst);
        Ok(AgentOutput::free(SchemaDesign {
            collections: vec![SchemaCollection {
                name: "docs".into(),
                description: "All documentation".into(),
                fields: vec!["title".into()],
            }],
            notes: None,
        }))
    }

    async fn scaffold(
        &self,
        _root: &Path,
        _design: &SchemaDesign,
        _sink: &dyn OutputSink,
    ) -> anyhow::Result<AgentOutput<ScaffoldReport>> {
        self.scaffold_calls.fetch_add(1, Ordering::SeqCst);
        Ok(AgentOutput::free(ScaffoldReport {
            content_root: "src/content/docs".into(),
            created: vec![],
        }))
    }
}

/// Runner that fails listed sources until told otherwise and charges a
/// fixed cost per successful document.
#[derive(Default)]
pub struct RecordingRunner {
    pub failing: Mutex<HashSet<String>>,
    pub cost_per_doc: Option<f64>,
    pub executed: Mutex<Vec<String>>,
    pub delay: Option<Duration>,
}

impl RecordingRunner {
    pub fn failing(sources: &[&str]) -> Self {
        Self {
            failing: Mutex::new(sources.iter().map(|s| s.to_string()).collect()),
            ..Self::default()
        }
    }

    pub fn costing(cost: f64) -> Self {
        Self {
            cost_per_doc: Some(cost),
            ..Self::default()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn heal(&self) {
        self.failing.lock().unwrap().clear();
    }

    pub fn executed(&self) -> Vec<String> {
        let mut seen = self.executed.lock().unwrap().clone();
        seen.sort();
        seen
    }
}

#[async_trait]
impl TaskRunner for RecordingRunner {
    fn name(&self) -> &str {
        "recording"
    }

    async fn execute(&self, task: &MigrationTask, _sink: &dyn OutputSink) -> anyhow::Result<TaskOutcome> {
        self.executed.lock().unwrap().push(task.source_ref.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.lock().unwrap().contains(&task.source_ref) {
            return Ok(TaskOutcome::failed(format!("could not convert {}", task.source_ref)));
        }
        let outcome = TaskOutcome::succeeded(task.target_ref.clone());
        Ok(match self.cost_per_doc {
            Some(cost) => outcome
                .with_usage("claude-sonnet-4", TokenUsage::new(1_000, 500))
                .with_cost(cost),
            None => outcome,
        })
    }
}

/// Route logs through the test harness; safe to call from every test.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("docmigrate_core=debug")
        .try_init();
}

pub fn test_config() -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.executor.max_concurrency = 1;
    cfg.executor.progress_bar = false;
    cfg.logging.enabled = false;
    cfg
}

pub fn runner_for(
    root: &Path,
    cfg: AppConfig,
    agents: Arc<StubAgents>,
    runner: Arc<RecordingRunner>,
) -> PipelineRunner {
    init_test_logging();
    let services = Services {
        runner,
        agents,
        retry: None,
    };
    PipelineRunner::new(AppContext::new(cfg, None), services, root)
}
