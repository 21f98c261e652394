//! Stable re-exports for consumers (`cli`, `plugins`, and external crates).
//!
//! Prefer importing from `docmigrate_core::api` instead of reaching into internal modules.

pub use crate::budget::{BudgetLedger, LedgerSnapshot, PriceTable, TokenUsage};
pub use crate::config::{
    load_default, load_from_file, AppConfig, ExecutorConfig, LimiterConfig, LoggingConfig,
    RetryConfig, ServiceConfig, StateConfig, TierQuota,
};
pub use crate::context::{
    AppContext, NullSink, OutputSink, Services, ServicesFactory, TracingSink,
};
pub use crate::error::{
    BudgetError, CheckpointError, CliError, ExecutorError, LockError, MigrationError,
    PipelineError,
};
pub use crate::executor::{
    AdmissionLimiter, ExecutionObserver, ExecutionSummary, MigrationTask, ParallelExecutor,
    ProgressMonitor, RetryStrategyPlugin, TaskOutcome, TaskReport, TaskRunner, TaskStatus,
    WorkQueue,
};
pub use crate::lock::{release_on_signal, wait_for_shutdown_signal, ExclusivityLock, LockRecord};
pub use crate::pipeline::{
    AgentOutput, PipelineAgents, PipelineRunner, RunOptions, RunReport, ScaffoldReport,
    SchemaCollection, SchemaDesign,
};
pub use crate::planner::{classify, DiscoveryReport, DocCategory, Plan, TaskPlanner};
pub use crate::state::{CheckpointStore, Stage, WorkflowState};
