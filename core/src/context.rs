use std::sync::Arc;

use crate::config::AppConfig;
use crate::error::PipelineError;
use crate::executor::{RetryStrategyPlugin, TaskRunner};
use crate::pipeline::PipelineAgents;

/// Receives streamed collaborator output.
pub trait OutputSink: Send + Sync {
    fn on_chunk(&self, source: &str, text: &str);
}

/// Forwards chunks to `tracing` at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl OutputSink for TracingSink {
    fn on_chunk(&self, source: &str, text: &str) {
        let text = text.trim_end();
        if !text.is_empty() {
            tracing::debug!(target: "docmigrate::output", source, "{}", text);
        }
    }
}

/// Drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl OutputSink for NullSink {
    fn on_chunk(&self, _source: &str, _text: &str) {}
}

#[derive(Clone)]
pub struct Services {
    pub runner: Arc<dyn TaskRunner>,
    pub agents: Arc<dyn PipelineAgents>,
    pub retry: Option<Arc<dyn RetryStrategyPlugin>>,
}

#[async_trait::async_trait]
pub trait ServicesFactory: Send + Sync {
    async fn build_services(&self, cfg: &AppConfig) -> Result<Services, PipelineError>;
}

/// Configuration, output sink and service wiring handed to every component
/// that needs them.
#[derive(Clone)]
pub struct AppContext {
    cfg: AppConfig,
    sink: Arc<dyn OutputSink>,
    services_factory: Option<Arc<dyn ServicesFactory>>,
}

impl AppContext {
    pub fn new(cfg: AppConfig, services_factory: Option<Arc<dyn ServicesFactory>>) -> Self {
        Self {
            cfg,
            sink: Arc::new(TracingSink),
            services_factory,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn OutputSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn cfg(&self) -> &AppConfig {
        &self.cfg
    }

    pub fn sink(&self) -> Arc<dyn OutputSink> {
        self.sink.clone()
    }

    pub fn with_config(&self, cfg: AppConfig) -> Self {
        Self {
            cfg,
            sink: self.sink.clone(),
            services_factory: self.services_factory.clone(),
        }
    }

    pub async fn build_services(&self) -> Result<Services, PipelineError> {
        let Some(factory) = self.services_factory.as_ref() else {
            return Err(PipelineError::Config(
                "services_factory missing (cannot build runner/agents)".into(),
            ));
        };
        factory.build_services(&self.cfg).await
    }
}
