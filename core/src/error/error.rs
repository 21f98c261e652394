use thiserror::Error;

use super::budget::BudgetError;
use super::executor::ExecutorError;
use super::state::{CheckpointError, LockError};
use crate::state::Stage;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("pipeline failed: {0}")]
    Pipeline(#[from] PipelineError),
    #[error("command failed: {0}")]
    Command(String),
    #[error("config error: {0}")]
    Config(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
}

/// Errors that stop the pipeline runner. Everything here is persisted as a
/// `failed` checkpoint (when state is loadable) before it is returned.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Budget(#[from] BudgetError),
    #[error(transparent)]
    Lock(#[from] LockError),
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
    #[error(transparent)]
    Executor(#[from] ExecutorError),
    #[error("stage {stage} failed: {message}")]
    Stage { stage: Stage, message: String },
    #[error("a previous run stopped at stage {stage}; pass --resume to continue it")]
    ResumeRequired { stage: Stage },
    #[error("run cancelled")]
    Cancelled,
    #[error("config error: {0}")]
    Config(String),
    #[error("plugin error: {0}")]
    Plugin(#[from] anyhow::Error),
}
