//! Durable workflow state.
//!
//! - `types`: the persisted `WorkflowState` and its stage/checkpoint records
//! - `transitions`: which stage moves are legal
//! - `migration`: upgrading older state files to the current schema
//! - `store`: atomic load/save of the state file

pub mod migration;
mod store;
pub mod transitions;
pub mod types;

pub use migration::CURRENT_SCHEMA_VERSION;
pub use store::{CheckpointStore, STATE_FILE_NAME};
pub use transitions::{StateTransition, TransitionError};
pub use types::{Checkpoint, Stage, WorkflowState};
