//! Per-tree session lock.
//!
//! Exactly one sync session may run at a time against a given personal
//! tree. The lock is a file holding the owning process id and start
//! timestamp, created with `create_new` so acquisition is atomic. A second
//! invocation fails immediately rather than queuing. Locks older than a
//! configured threshold are treated as stale (left behind by a crashed
//! process) and taken over.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::LockError;

/// Contents of the lock file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
    /// Process id of the lock holder.
    pub pid: u32,
    /// When the holding session started.
    pub started_at: DateTime<Utc>,
}

/// RAII guard for a held session lock. Dropping it releases the lock.
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
}

impl LockGuard {
    /// Path of the lock file this guard owns.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "failed to release lock");
        } else {
            debug!(path = %self.path.display(), "lock released");
        }
    }
}

/// Acquisition of the per-tree session lock.
pub struct SessionLock;

impl SessionLock {
    /// Try to acquire the lock at `path`.
    ///
    /// Fails immediately with [`LockError::SyncInProgress`] if a live lock
    /// exists. A lock older than `stale_after` is removed and acquisition
    /// retried once.
    pub fn acquire(path: &Path, stale_after: Duration) -> Result<LockGuard, LockError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        match Self::try_create(path) {
            Ok(guard) => Ok(guard),
            Err(LockError::SyncInProgress { pid, started_at }) => {
                let held = Self::read_info(path)?;
                let age = Utc::now() - held.started_at;
                if age.to_std().unwrap_or_default() > stale_after {
                    warn!(
                        pid = held.pid,
                        started_at = %held.started_at,
                        "taking over stale lock"
                    );
                    return Self::claim_stale(path);
                }
                Err(LockError::SyncInProgress { pid, started_at })
            }
            Err(e) => Err(e),
        }
    }

    /// Take over a stale lock by renaming it to a claim file first. The
    /// rename succeeds for exactly one contender, so two processes that
    /// both observed the same stale lock cannot each remove a fresh one.
    fn claim_stale(path: &Path) -> Result<LockGuard, LockError> {
        let claim = path.with_extension(format!("stale.{}", std::process::id()));
        match std::fs::rename(path, &claim) {
            Ok(()) => {
                let _ = std::fs::remove_file(&claim);
                Self::try_create(path)
            }
            // Another contender claimed it; race their re-acquisition.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::try_create(path),
            Err(e) => Err(LockError::Io(e)),
        }
    }

    fn try_create(path: &Path) -> Result<LockGuard, LockError> {
        let info = LockInfo {
            pid: std::process::id(),
            started_at: Utc::now(),
        };

        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
        {
            Ok(file) => {
                serde_json::to_writer(&file, &info)
                    .map_err(|e| LockError::Corrupt(e.to_string()))?;
                info!(path = %path.display(), pid = info.pid, "lock acquired");
                Ok(LockGuard {
                    path: path.to_path_buf(),
                })
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let held = Self::read_info(path)?;
                Err(LockError::SyncInProgress {
                    pid: held.pid,
                    started_at: held.started_at.to_rfc3339(),
                })
            }
            Err(e) => Err(LockError::Io(e)),
        }
    }

    fn read_info(path: &Path) -> Result<LockInfo, LockError> {
        let contents = std::fs::read_to_string(path)?;
        serde_json::from_str(&contents).map_err(|e| LockError::Corrupt(e.to_string()))
    }
}
