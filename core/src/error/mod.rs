pub mod budget;
#[allow(clippy::module_inception)]
pub mod error;
pub mod executor;
pub mod state;

pub use budget::BudgetError;
pub use error::{CliError, PipelineError};
pub use executor::ExecutorError;
pub use state::{CheckpointError, LockError, MigrationError};
