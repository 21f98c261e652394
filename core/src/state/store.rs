use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use serde_json::Value;

use crate::config::StateConfig;
use crate::error::{CheckpointError, MigrationError};
use crate::util::lock_unpoisoned;

use super::migration::{self, CURRENT_SCHEMA_VERSION};
use super::transitions::StateTransition;
use super::types::{Checkpoint, Stage, WorkflowState};

pub const STATE_FILE_NAME: &str = "state.json";

/// Durable workflow state backed by one JSON file.
///
/// The in-memory copy is a cache of the last successful load or save; the
/// file wins after either. Writes go to `<file>.tmp` first and are renamed
/// into place, so a crash mid-write leaves the previous file intact.
#[derive(Debug)]
pub struct CheckpointStore {
    path: PathBuf,
    cache: Mutex<Option<WorkflowState>>,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cache: Mutex::new(None),
        }
    }

    /// `<project>/<state dir>/state.json`
    pub fn for_project(project_root: &Path, cfg: &StateConfig) -> Self {
        Self::new(project_root.join(&cfg.directory).join(STATE_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn current(&self) -> Option<WorkflowState> {
        lock_unpoisoned(&self.cache).clone()
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| STATE_FILE_NAME.into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn io_err(&self, source: std::io::Error) -> CheckpointError {
        CheckpointError::Io {
            path: self.path.clone(),
            source,
        }
    }

    /// Read, migrate and validate the state file. `Ok(None)` if there is none.
    pub fn load(&self) -> Result<Option<WorkflowState>, CheckpointError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                *lock_unpoisoned(&self.cache) = None;
                return Ok(None);
            }
            Err(e) => return Err(self.io_err(e)),
        };

        let value: Value = serde_json::from_str(&raw).map_err(|e| CheckpointError::Corrupt {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;

        let found = migration::schema_version(&value)?;
        let value = migration::migrate(value, CURRENT_SCHEMA_VERSION)?;
        let missing = migration::missing_fields(&value);
        if !missing.is_empty() {
            return Err(MigrationError::Invalid { missing }.into());
        }
        let state: WorkflowState =
            serde_json::from_value(value).map_err(|e| CheckpointError::Corrupt {
                path: self.path.clone(),
                reason: e.to_string(),
            })?;

        if migration::needs_migration(found, CURRENT_SCHEMA_VERSION) {
            tracing::info!(
                path = %self.path.display(),
                from = found,
                to = CURRENT_SCHEMA_VERSION,
                "migrated workflow state"
            );
        }
        tracing::debug!(
            path = %self.path.display(),
            stage = %state.current_stage,
            checkpoints = state.checkpoints.len(),
            "loaded workflow state"
        );

        *lock_unpoisoned(&self.cache) = Some(state.clone());
        Ok(Some(state))
    }

    /// Persist `state` atomically and make it the cached copy.
    pub fn save(&self, state: &WorkflowState) -> Result<(), CheckpointError> {
        let json = serde_json::to_vec_pretty(state)?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| self.io_err(e))?;
        }

        let tmp = self.tmp_path();
        let write_tmp = || -> std::io::Result<()> {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&json)?;
            file.sync_all()
        };
        write_tmp().map_err(|e| self.io_err(e))?;
        fs::rename(&tmp, &self.path).map_err(|e| self.io_err(e))?;

        *lock_unpoisoned(&self.cache) = Some(state.clone());
        Ok(())
    }

    /// Create and persist a fresh state, replacing anything cached.
    pub fn start(&self, max_cost: Option<f64>) -> Result<WorkflowState, CheckpointError> {
        let state = WorkflowState::new(max_cost);
        self.save(&state)?;
        Ok(state)
    }

    /// Append a checkpoint, move to `stage` and save.
    ///
    /// Nothing changes, in memory or on disk, if the transition is invalid or
    /// the write fails.
    pub fn checkpoint(
        &self,
        stage: Stage,
        description: impl Into<String>,
        payload: Value,
    ) -> Result<WorkflowState, CheckpointError> {
        let mut next = self.current().ok_or(CheckpointError::NotLoaded)?;
        StateTransition::validate(next.current_stage, stage, next.last_good_stage())?;

        let now = Utc::now();
        next.checkpoints.push(Checkpoint {
            stage,
            timestamp: now,
            description: description.into(),
            payload,
        });
        next.current_stage = stage;
        next.updated_at = now;

        self.save(&next)?;
        tracing::info!(stage = %stage, checkpoints = next.checkpoints.len(), "checkpoint saved");
        Ok(next)
    }

    pub fn fail(
        &self,
        description: impl Into<String>,
        payload: Value,
    ) -> Result<WorkflowState, CheckpointError> {
        self.checkpoint(Stage::Failed, description, payload)
    }

    /// Mirror the ledger totals into the state and save.
    pub fn record_usage_totals(
        &self,
        total_cost: f64,
        total_tokens: u64,
        api_calls: u64,
    ) -> Result<WorkflowState, CheckpointError> {
        let mut next = self.current().ok_or(CheckpointError::NotLoaded)?;
        next.total_cost = total_cost;
        next.total_tokens = total_tokens;
        next.api_call_count = api_calls;
        next.updated_at = Utc::now();
        self.save(&next)?;
        Ok(next)
    }

    /// Delete the state file (and any leftover temp file) and drop the cache.
    pub fn clear(&self) -> Result<(), CheckpointError> {
        for path in [self.path.clone(), self.tmp_path()] {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(CheckpointError::Io { path, source: e }),
            }
        }
        *lock_unpoisoned(&self.cache) = None;
        Ok(())
    }
}
