use std::path::PathBuf;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::state::TransitionError;

/// Failures of the schema-version migration subsystem. All of them are fatal
/// on load and require manual intervention.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MigrationError {
    #[error("refusing to downgrade state from schema v{from} to v{to}")]
    Downgrade { from: u32, to: u32 },

    #[error("no migration path from schema v{from} to v{to} (stopped at v{reached})")]
    PathNotFound { from: u32, to: u32, reached: u32 },

    #[error("invalid schemaVersion field: {0}")]
    InvalidVersion(String),

    #[error("migration v{from} -> v{to} failed: {reason}")]
    Step { from: u32, to: u32, reason: String },

    #[error("state failed validation, missing or mistyped fields: {}", missing.join(", "))]
    Invalid { missing: Vec<String> },
}

#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("checkpoint io error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("checkpoint file {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("failed to serialize workflow state: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error(transparent)]
    Migration(#[from] MigrationError),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("no workflow state loaded; call load() or start() first")]
    NotLoaded,
}

#[derive(Error, Debug)]
pub enum LockError {
    #[error(
        "another run (pid {owner_pid}) holds the lock since {acquired_at} ({age_secs}s ago); wait for it to finish or run `docmigrate unlock --force`"
    )]
    Conflict {
        owner_pid: u32,
        acquired_at: DateTime<Utc>,
        age_secs: i64,
    },

    #[error("lock file {path} appeared while acquiring; another run raced us")]
    RaceDetected { path: PathBuf },

    #[error("lock io error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}
