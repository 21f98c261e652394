mod load;
mod types;

pub use load::{apply_env_overrides, get_data_dir, load_default, load_from_file};
pub use types::{
    AppConfig, BudgetConfig, ExecutorConfig, LimiterConfig, LoggingConfig, ModelRates,
    PlannerConfig, PricingConfig, RetryConfig, ServiceConfig, StateConfig, TierQuota,
};
