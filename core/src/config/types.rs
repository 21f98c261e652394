use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub budget: BudgetConfig,

    #[serde(default)]
    pub limiter: LimiterConfig,

    #[serde(default)]
    pub executor: ExecutorConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub pricing: PricingConfig,

    #[serde(default)]
    pub planner: PlannerConfig,

    #[serde(default)]
    pub state: StateConfig,

    #[serde(default)]
    pub service: ServiceConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            budget: BudgetConfig::default(),
            limiter: LimiterConfig::default(),
            executor: ExecutorConfig::default(),
            retry: RetryConfig::default(),
            pricing: PricingConfig::default(),
            planner: PlannerConfig::default(),
            state: StateConfig::default(),
            service: ServiceConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_enabled")]
    pub enabled: bool,

    /// If true, log to stderr.
    #[serde(default = "default_logging_console")]
    pub console: bool,

    /// If true, log to a file under `directory` (or OS temp dir if unset).
    #[serde(default)]
    pub file: bool,

    /// EnvFilter string, e.g. "info" or "docmigrate_core=debug".
    #[serde(default = "default_logging_level")]
    pub level: String,

    /// Optional directory for log files. If empty or unset, uses OS temp dir.
    #[serde(default)]
    pub directory: Option<String>,
}

fn default_logging_enabled() -> bool {
    true
}

fn default_logging_console() -> bool {
    true
}

fn default_logging_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: default_logging_enabled(),
            console: default_logging_console(),
            file: false,
            level: default_logging_level(),
            directory: None,
        }
    }
}

/// Hard spend ceiling for a run. `None` means unlimited.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BudgetConfig {
    #[serde(default)]
    pub max_cost: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierQuota {
    pub requests_per_minute: u32,
    pub tokens_per_minute: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Selected service tier; must be a key of `tiers`.
    #[serde(default = "default_tier")]
    pub tier: String,

    #[serde(default = "default_tiers")]
    pub tiers: BTreeMap<String, TierQuota>,

    /// Length of the rolling window in seconds.
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

fn default_tier() -> String {
    "tier1".to_string()
}

fn default_tiers() -> BTreeMap<String, TierQuota> {
    let mut tiers = BTreeMap::new();
    tiers.insert(
        "tier1".to_string(),
        TierQuota {
            requests_per_minute: 50,
            tokens_per_minute: 40_000,
        },
    );
    tiers.insert(
        "tier2".to_string(),
        TierQuota {
            requests_per_minute: 1_000,
            tokens_per_minute: 80_000,
        },
    );
    tiers.insert(
        "tier3".to_string(),
        TierQuota {
            requests_per_minute: 2_000,
            tokens_per_minute: 160_000,
        },
    );
    tiers.insert(
        "tier4".to_string(),
        TierQuota {
            requests_per_minute: 4_000,
            tokens_per_minute: 400_000,
        },
    );
    tiers
}

fn default_window_secs() -> u64 {
    60
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            tier: default_tier(),
            tiers: default_tiers(),
            window_secs: default_window_secs(),
        }
    }
}

impl LimiterConfig {
    pub fn selected_quota(&self) -> Option<TierQuota> {
        self.tiers.get(&self.tier).copied()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Rough wall-clock seconds one migration task takes; used for plan estimates.
    #[serde(default = "default_seconds_per_task")]
    pub seconds_per_task: u64,

    /// Show an interactive progress bar while executing.
    #[serde(default = "default_progress_bar")]
    pub progress_bar: bool,
}

fn default_max_concurrency() -> usize {
    num_cpus::get().clamp(2, 8)
}

fn default_seconds_per_task() -> u64 {
    30
}

fn default_progress_bar() -> bool {
    true
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            seconds_per_task: default_seconds_per_task(),
            progress_bar: default_progress_bar(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_retry_strategy")]
    pub strategy: String,
    #[serde(default)]
    pub base_delay_ms: u64,
    #[serde(default)]
    pub max_delay_ms: u64,
    #[serde(default)]
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            strategy: default_retry_strategy(),
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            max_attempts: 3,
        }
    }
}

fn default_retry_strategy() -> String {
    "exponential-backoff".to_string()
}

/// Per-million-token rates for one model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelRates {
    pub input_per_mtok: f64,
    pub output_per_mtok: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingConfig {
    /// Model whose rates apply to unknown model names.
    #[serde(default = "default_pricing_model")]
    pub default_model: String,

    #[serde(default = "default_models")]
    pub models: BTreeMap<String, ModelRates>,
}

fn default_pricing_model() -> String {
    "claude-sonnet-4".to_string()
}

fn default_models() -> BTreeMap<String, ModelRates> {
    let mut models = BTreeMap::new();
    models.insert(
        "claude-opus-4".to_string(),
        ModelRates {
            input_per_mtok: 15.0,
            output_per_mtok: 75.0,
        },
    );
    models.insert(
        "claude-sonnet-4".to_string(),
        ModelRates {
            input_per_mtok: 3.0,
            output_per_mtok: 15.0,
        },
    );
    models.insert(
        "claude-haiku-3-5".to_string(),
        ModelRates {
            input_per_mtok: 0.8,
            output_per_mtok: 4.0,
        },
    );
    models
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            default_model: default_pricing_model(),
            models: default_models(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerConfig {
    /// Destination root for migrated documents, relative to the project.
    #[serde(default = "default_content_root")]
    pub content_root: String,

    /// Input-token estimate for a document whose size is unknown.
    #[serde(default = "default_base_tokens")]
    pub base_tokens: u64,

    /// Output tokens assumed per migrated document.
    #[serde(default = "default_output_tokens")]
    pub output_tokens: u64,
}

fn default_content_root() -> String {
    "src/content/docs".to_string()
}

fn default_base_tokens() -> u64 {
    2_000
}

fn default_output_tokens() -> u64 {
    1_500
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            content_root: default_content_root(),
            base_tokens: default_base_tokens(),
            output_tokens: default_output_tokens(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    /// Directory (relative to the project root) holding state and lock files.
    #[serde(default = "default_state_dir")]
    pub directory: String,

    /// Age after which a lock record is considered abandoned.
    #[serde(default = "default_stale_lock_secs")]
    pub stale_lock_secs: u64,
}

fn default_state_dir() -> String {
    ".docmigrate".to_string()
}

fn default_stale_lock_secs() -> u64 {
    60 * 60
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            directory: default_state_dir(),
            stale_lock_secs: default_stale_lock_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Base URL of the AI service. Empty means no remote collaborator is configured.
    #[serde(default)]
    pub endpoint: String,

    #[serde(default = "default_pricing_model")]
    pub model: String,

    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_service_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_service_timeout_ms() -> u64 {
    300_000
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            model: default_pricing_model(),
            api_key: String::new(),
            timeout_ms: default_service_timeout_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_uses_defaults() {
        let cfg: AppConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.limiter.tier, "tier1");
        assert!(cfg.limiter.selected_quota().is_some());
        assert_eq!(cfg.budget.max_cost, None);
        assert_eq!(cfg.state.stale_lock_secs, 3600);
        assert!(cfg.executor.max_concurrency >= 2);
    }

    #[test]
    fn test_partial_sections_override() {
        let cfg: AppConfig = toml::from_str(
            r#"
            [budget]
            max_cost = 12.5

            [limiter]
            tier = "custom"

            [limiter.tiers.custom]
            requests_per_minute = 5
            tokens_per_minute = 1000
            "#,
        )
        .unwrap();

        assert_eq!(cfg.budget.max_cost, Some(12.5));
        assert_eq!(
            cfg.limiter.selected_quota(),
            Some(TierQuota {
                requests_per_minute: 5,
                tokens_per_minute: 1000,
            })
        );
    }
}
