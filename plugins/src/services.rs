//! `ServicesFactory` implementation: builds the runner, stage agents and retry
//! strategy from configuration so the CLI can reuse them.
use async_trait::async_trait;
use docmigrate_core::api::{AppConfig, PipelineError, Services, ServicesFactory};

use crate::factory;

#[derive(Debug, Default, Clone, Copy)]
pub struct PluginServicesFactory {
    dry_run: bool,
}

impl PluginServicesFactory {
    pub fn new(dry_run: bool) -> Self {
        Self { dry_run }
    }
}

#[async_trait]
impl ServicesFactory for PluginServicesFactory {
    async fn build_services(&self, cfg: &AppConfig) -> Result<Services, PipelineError> {
        let runner = factory::build_runner(cfg, self.dry_run)?;
        let agents = factory::build_agents(cfg, self.dry_run)?;
        let retry = factory::build_retry(cfg)?;
        tracing::debug!(
            runner = runner.name(),
            agents = agents.name(),
            retry = retry.as_ref().map(|r| r.name()).unwrap_or("none"),
            "services built"
        );
        Ok(Services {
            runner,
            agents,
            retry,
        })
    }
}
