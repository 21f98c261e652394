use std::sync::Arc;

use anyhow::{bail, Result};

use docmigrate_core::api::{AppConfig, PipelineAgents, RetryStrategyPlugin, TaskRunner};

use crate::discovery::LocalDiscoveryAgents;
use crate::executor::{ExponentialBackoffPlugin, LinearRetryPlugin};
use crate::runner::{AiServiceAgents, AiServiceTaskRunner, DryRunTaskRunner};

fn has_endpoint(cfg: &AppConfig) -> bool {
    !cfg.service.endpoint.trim().is_empty()
}

pub fn build_runner(cfg: &AppConfig, dry_run: bool) -> Result<Arc<dyn TaskRunner>> {
    if dry_run {
        return Ok(Arc::new(DryRunTaskRunner));
    }
    if !has_endpoint(cfg) {
        bail!("service.endpoint is not configured; set it or pass --dry-run");
    }
    Ok(Arc::new(AiServiceTaskRunner::from_config(&cfg.service)?))
}

/// Local discovery unless a service endpoint is configured and this is a real run.
pub fn build_agents(cfg: &AppConfig, dry_run: bool) -> Result<Arc<dyn PipelineAgents>> {
    if dry_run || !has_endpoint(cfg) {
        return Ok(Arc::new(LocalDiscoveryAgents::new(
            cfg.planner.content_root.clone(),
            cfg.state.directory.clone(),
        )));
    }
    Ok(Arc::new(AiServiceAgents::from_config(&cfg.service)?))
}

pub fn build_retry(cfg: &AppConfig) -> Result<Option<Arc<dyn RetryStrategyPlugin>>> {
    let retry = &cfg.retry;
    match retry.strategy.as_str() {
        "none" | "off" => Ok(None),
        "exponential-backoff" | "exponential" => {
            Ok(Some(Arc::new(ExponentialBackoffPlugin::new(retry.clone()))))
        }
        "linear" => Ok(Some(Arc::new(LinearRetryPlugin::new(retry.clone())))),
        other => bail!("unknown retry strategy: {other}"),
    }
}
