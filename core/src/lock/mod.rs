//! One pipeline run per project, enforced through a lock file.
//!
//! The lock file holds a JSON [`LockRecord`]. It is created with
//! `create_new`, so two processes can never both create it; a record older
//! than the stale threshold is assumed abandoned and removed, but only while
//! the file still carries that same record.

mod signals;

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::StateConfig;
use crate::error::LockError;
use crate::util::lock_unpoisoned;

pub use signals::{release_on_signal, wait_for_shutdown_signal};

pub const LOCK_FILE_NAME: &str = "run.lock";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockRecord {
    pub owner_pid: u32,
    pub acquired_at: DateTime<Utc>,
    pub tool_version: String,
}

impl LockRecord {
    pub fn current() -> Self {
        Self {
            owner_pid: std::process::id(),
            acquired_at: Utc::now(),
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn age(&self) -> chrono::Duration {
        Utc::now() - self.acquired_at
    }
}

enum OnDisk {
    Missing,
    Valid(LockRecord),
    /// Present but not parseable; `modified_age` is the file's mtime age.
    Unreadable {
        reason: String,
        modified_age: Option<Duration>,
    },
}

#[derive(Debug)]
pub struct ExclusivityLock {
    path: PathBuf,
    stale_after: Duration,
    held: Mutex<Option<LockRecord>>,
}

impl ExclusivityLock {
    pub fn new(path: impl Into<PathBuf>, stale_after: Duration) -> Self {
        Self {
            path: path.into(),
            stale_after,
            held: Mutex::new(None),
        }
    }

    /// `<project>/<state dir>/run.lock`
    pub fn for_project(project_root: &Path, cfg: &StateConfig) -> Self {
        Self::new(
            project_root.join(&cfg.directory).join(LOCK_FILE_NAME),
            Duration::from_secs(cfg.stale_lock_secs),
        )
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether this instance currently owns the lock.
    pub fn is_held(&self) -> bool {
        lock_unpoisoned(&self.held).is_some()
    }

    fn io_err(&self, source: std::io::Error) -> LockError {
        LockError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn read_disk(&self) -> Result<OnDisk, LockError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(OnDisk::Missing),
            Err(e) => return Err(self.io_err(e)),
        };
        match serde_json::from_str::<LockRecord>(&raw) {
            Ok(record) => Ok(OnDisk::Valid(record)),
            Err(e) => {
                let modified_age = fs::metadata(&self.path)
                    .and_then(|m| m.modified())
                    .ok()
                    .and_then(|t| SystemTime::now().duration_since(t).ok());
                Ok(OnDisk::Unreadable {
                    reason: e.to_string(),
                    modified_age,
                })
            }
        }
    }

    fn is_stale(&self, record: &LockRecord) -> bool {
        record
            .age()
            .to_std()
            .map(|age| age >= self.stale_after)
            .unwrap_or(false)
    }

    /// Current owner, if the lock file holds a readable record.
    pub fn owner(&self) -> Result<Option<LockRecord>, LockError> {
        match self.read_disk()? {
            OnDisk::Valid(record) => Ok(Some(record)),
            OnDisk::Missing | OnDisk::Unreadable { .. } => Ok(None),
        }
    }

    /// Whether a live (non-stale) lock exists, held by anyone.
    pub fn is_locked(&self) -> bool {
        match self.read_disk() {
            Ok(OnDisk::Missing) => false,
            Ok(OnDisk::Valid(record)) => !self.is_stale(&record),
            Ok(OnDisk::Unreadable { modified_age, .. }) => {
                modified_age.is_some_and(|age| age < self.stale_after)
            }
            Err(_) => true,
        }
    }

    fn remove_file(&self) -> Result<bool, LockError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(self.io_err(e)),
        }
    }

    /// Move the lock file aside and discard it only if it still holds
    /// `expected` (`None`: still unparseable). A file some other run wrote in
    /// the meantime is put back and `false` returned. A file that vanished
    /// counts as removed; `create_new` arbitrates from there.
    fn remove_if_unchanged(&self, expected: Option<&LockRecord>) -> Result<bool, LockError> {
        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| LOCK_FILE_NAME.to_string());
        let tombstone = self
            .path
            .with_file_name(format!("{file_name}.{}.stale", Uuid::new_v4()));

        match fs::rename(&self.path, &tombstone) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(true),
            Err(e) => return Err(self.io_err(e)),
        }

        let moved = fs::read_to_string(&tombstone)
            .ok()
            .map(|raw| serde_json::from_str::<LockRecord>(&raw).ok());
        let unchanged = match (moved, expected) {
            (Some(Some(record)), Some(expected)) => &record == expected,
            (Some(None), None) => true,
            _ => false,
        };

        if !unchanged {
            // No-clobber restore: if a newer file already took the path, ours is dropped.
            if let Err(e) = fs::hard_link(&tombstone, &self.path) {
                tracing::warn!(error = %e, path = %self.path.display(), "could not restore replaced lock");
            }
        }
        if let Err(e) = fs::remove_file(&tombstone) {
            tracing::warn!(error = %e, path = %tombstone.display(), "could not remove lock tombstone");
        }
        Ok(unchanged)
    }

    /// Take the lock for this process.
    pub fn acquire(&self) -> Result<LockRecord, LockError> {
        if let Some(record) = lock_unpoisoned(&self.held).clone() {
            return Ok(record);
        }

        match self.read_disk()? {
            OnDisk::Missing => {}
            OnDisk::Valid(existing) if !self.is_stale(&existing) => {
                return Err(LockError::Conflict {
                    owner_pid: existing.owner_pid,
                    acquired_at: existing.acquired_at,
                    age_secs: existing.age().num_seconds(),
                });
            }
            OnDisk::Valid(existing) => {
                tracing::warn!(
                    path = %self.path.display(),
                    owner_pid = existing.owner_pid,
                    age_secs = existing.age().num_seconds(),
                    "removing stale lock"
                );
                if !self.remove_if_unchanged(Some(&existing))? {
                    return Err(LockError::RaceDetected {
                        path: self.path.clone(),
                    });
                }
            }
            OnDisk::Unreadable {
                reason,
                modified_age,
            } => {
                // A just-created file may still be mid-write by a competing run.
                if modified_age.is_some_and(|age| age < self.stale_after) {
                    return Err(LockError::RaceDetected {
                        path: self.path.clone(),
                    });
                }
                tracing::warn!(path = %self.path.display(), reason = %reason, "removing unreadable lock");
                if !self.remove_if_unchanged(None)? {
                    return Err(LockError::RaceDetected {
                        path: self.path.clone(),
                    });
                }
            }
        }

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| self.io_err(e))?;
        }

        let mut file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(LockError::RaceDetected {
                    path: self.path.clone(),
                });
            }
            Err(e) => return Err(self.io_err(e)),
        };

        let record = LockRecord::current();
        let written = serde_json::to_vec_pretty(&record)
            .map_err(std::io::Error::other)
            .and_then(|bytes| {
                file.write_all(&bytes)?;
                file.sync_all()
            });
        if let Err(e) = written {
            let _ = fs::remove_file(&self.path);
            return Err(self.io_err(e));
        }

        tracing::info!(path = %self.path.display(), pid = record.owner_pid, "lock acquired");
        *lock_unpoisoned(&self.held) = Some(record.clone());
        Ok(record)
    }

    /// Release the lock if this instance holds it. Returns whether a file was
    /// removed. A lock file that no longer carries our record is left alone.
    pub fn release(&self) -> Result<bool, LockError> {
        let Some(ours) = lock_unpoisoned(&self.held).take() else {
            return Ok(false);
        };

        match self.read_disk()? {
            OnDisk::Valid(record) if record == ours => {
                let removed = self.remove_file()?;
                tracing::info!(path = %self.path.display(), "lock released");
                Ok(removed)
            }
            OnDisk::Missing => Ok(false),
            _ => {
                tracing::warn!(
                    path = %self.path.display(),
                    "lock file was replaced by another run; leaving it in place"
                );
                Ok(false)
            }
        }
    }

    /// Remove the lock file whoever owns it.
    pub fn force_release(&self) -> Result<bool, LockError> {
        lock_unpoisoned(&self.held).take();
        let removed = self.remove_file()?;
        if removed {
            tracing::warn!(path = %self.path.display(), "lock force-released");
        }
        Ok(removed)
    }
}

impl Drop for ExclusivityLock {
    fn drop(&mut self) {
        if self.is_held() {
            if let Err(e) = self.release() {
                tracing::warn!(error = %e, "failed to release lock on drop");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};
    use tempfile::TempDir;

    const HOUR: Duration = Duration::from_secs(60 * 60);

    fn lock_in(dir: &TempDir) -> ExclusivityLock {
        ExclusivityLock::new(dir.path().join(".docmigrate").join(LOCK_FILE_NAME), HOUR)
    }

    fn write_record(lock: &ExclusivityLock, record: &LockRecord) {
        fs::create_dir_all(lock.path().parent().unwrap()).unwrap();
        fs::write(lock.path(), serde_json::to_vec(record).unwrap()).unwrap();
    }

    #[test]
    fn test_acquire_and_release() {
        let dir = TempDir::new().unwrap();
        let lock = lock_in(&dir);

        let record = lock.acquire().unwrap();
        assert_eq!(record.owner_pid, std::process::id());
        assert!(lock.is_held());
        assert!(lock.is_locked());

        let raw = fs::read_to_string(lock.path()).unwrap();
        assert!(raw.contains("ownerPid") && raw.contains("toolVersion"));

        assert!(lock.release().unwrap());
        assert!(!lock.path().exists());
        assert!(!lock.release().unwrap());
    }

    #[test]
    fn test_second_instance_conflicts() {
        let dir = TempDir::new().unwrap();
        let first = lock_in(&dir);
        let second = lock_in(&dir);
        first.acquire().unwrap();

        match second.acquire() {
            Err(LockError::Conflict { owner_pid, .. }) => {
                assert_eq!(owner_pid, std::process::id())
            }
            other => panic!("expected conflict, got {other:?}"),
        }
        // A non-owner release never removes someone else's lock.
        assert!(!second.release().unwrap());
        assert!(first.path().exists());
    }

    #[test]
    fn test_stale_lock_is_replaced() {
        let dir = TempDir::new().unwrap();
        let lock = lock_in(&dir);
        write_record(
            &lock,
            &LockRecord {
                owner_pid: 999_999,
                acquired_at: Utc::now() - chrono::Duration::hours(2),
                tool_version: "0.1.0".to_string(),
            },
        );
        assert!(!lock.is_locked());

        let record = lock.acquire().unwrap();
        assert_eq!(record.owner_pid, std::process::id());
        assert_eq!(lock.owner().unwrap(), Some(record));
    }

    #[test]
    fn test_racing_instances_exactly_one_wins() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".docmigrate").join(LOCK_FILE_NAME);

        for _ in 0..20 {
            let barrier = Arc::new(Barrier::new(2));
            let handles: Vec<_> = (0..2)
                .map(|_| {
                    let barrier = barrier.clone();
                    let path = path.clone();
                    std::thread::spawn(move || {
                        let lock = ExclusivityLock::new(path, HOUR);
                        barrier.wait();
                        let won = lock.acquire().is_ok();
                        // Keep the winner alive until both have tried.
                        (won, lock)
                    })
                })
                .collect();
            let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
            assert_eq!(results.iter().filter(|(won, _)| *won).count(), 1);
            drop(results);
            assert!(!path.exists());
        }
    }

    #[test]
    fn test_force_release_removes_foreign_lock() {
        let dir = TempDir::new().unwrap();
        let owner = lock_in(&dir);
        owner.acquire().unwrap();

        let admin = lock_in(&dir);
        assert!(admin.force_release().unwrap());
        assert!(!admin.is_locked());
        admin.acquire().unwrap();
    }

    #[test]
    fn test_drop_releases_held_lock() {
        let dir = TempDir::new().unwrap();
        let path = {
            let lock = lock_in(&dir);
            lock.acquire().unwrap();
            lock.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn test_fresh_unreadable_file_is_treated_as_race() {
        let dir = TempDir::new().unwrap();
        let lock = lock_in(&dir);
        fs::create_dir_all(lock.path().parent().unwrap()).unwrap();
        fs::write(lock.path(), "").unwrap();

        assert!(matches!(lock.acquire(), Err(LockError::RaceDetected { .. })));
        assert!(lock.is_locked());
    }

    #[test]
    fn test_old_unreadable_file_is_removed() {
        let dir = TempDir::new().unwrap();
        let lock = ExclusivityLock::new(
            dir.path().join(LOCK_FILE_NAME),
            Duration::from_millis(0),
        );
        fs::write(lock.path(), "garbage").unwrap();
        lock.acquire().unwrap();
        assert!(lock.owner().unwrap().is_some());
    }

    #[test]
    fn test_stale_removal_spares_a_lock_taken_in_between() {
        let dir = TempDir::new().unwrap();
        let first = lock_in(&dir);
        let second = lock_in(&dir);
        let stale = LockRecord {
            owner_pid: 999_999,
            acquired_at: Utc::now() - chrono::Duration::hours(2),
            tool_version: "0.1.0".to_string(),
        };
        write_record(&first, &stale);

        // Both saw the stale record; the first one replaced it already.
        let winner = first.acquire().unwrap();
        assert!(!second.remove_if_unchanged(Some(&stale)).unwrap());

        assert_eq!(first.owner().unwrap(), Some(winner));
        let leftovers: Vec<_> = fs::read_dir(first.path().parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(leftovers, vec![std::ffi::OsString::from(LOCK_FILE_NAME)]);
        assert!(matches!(second.acquire(), Err(LockError::Conflict { .. })));
    }

    #[test]
    fn test_stale_removal_discards_the_record_it_saw() {
        let dir = TempDir::new().unwrap();
        let lock = lock_in(&dir);
        let stale = LockRecord {
            owner_pid: 999_999,
            acquired_at: Utc::now() - chrono::Duration::hours(2),
            tool_version: "0.1.0".to_string(),
        };
        write_record(&lock, &stale);

        assert!(lock.remove_if_unchanged(Some(&stale)).unwrap());
        assert!(!lock.path().exists());
        assert!(lock.remove_if_unchanged(Some(&stale)).unwrap());
    }
}
