//! Per-output-root run lock.
//!
//! A single marker file whose modification time is the only staleness
//! signal. It is created when a run starts, rewritten at every stage
//! transition and removed on clean completion. A crashed or interrupted run
//! leaves it behind; a later run reclaims it once it is stale, or
//! immediately when resuming.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

use super::Stage;

/// File name of the lock inside the output root.
pub const LOCK_FILE_NAME: &str = ".mediadupe.lock";

/// Errors from run locking.
#[derive(thiserror::Error, Debug)]
pub enum LockError {
    /// Another run holds a fresh lock.
    #[error("Another run is already in progress ({path} updated {age_secs}s ago); pass --resume to take over")]
    AlreadyRunning {
        /// The lock file
        path: PathBuf,
        /// Seconds since the lock was last touched
        age_secs: u64,
    },

    /// The lock file could not be read or written.
    #[error("Lock I/O error for {path}: {source}")]
    Io {
        /// The lock file
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: io::Error,
    },
}

/// What the marker file says about the run holding it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    /// Process id of the holder
    pub pid: u32,
    /// When the run started (ms since epoch)
    pub started_ms: i64,
    /// Last stage the holder entered
    pub stage: Option<Stage>,
}

/// A held run lock.
///
/// Dropping the lock does not remove the marker; only [`RunLock::release`]
/// does, so an aborted run stays visible.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
    info: LockInfo,
}

impl RunLock {
    /// Take the lock for `output_root`.
    ///
    /// # Arguments
    ///
    /// * `output_root` - Directory holding the marker (created if missing)
    /// * `stale_after` - Age after which an existing marker is reclaimed
    /// * `resume` - Reclaim an existing marker regardless of age
    ///
    /// # Errors
    ///
    /// Returns [`LockError::AlreadyRunning`] if a fresh marker exists and
    /// `resume` is false, or [`LockError::Io`] if the marker cannot be
    /// written.
    pub fn acquire(output_root: &Path, stale_after: Duration, resume: bool) -> Result<Self, LockError> {
        let path = output_root.join(LOCK_FILE_NAME);
        fs::create_dir_all(output_root).map_err(|source| LockError::Io {
            path: path.clone(),
            source,
        })?;

        let lock = Self {
            path,
            info: LockInfo {
                pid: std::process::id(),
                started_ms: chrono::Utc::now().timestamp_millis(),
                stage: None,
            },
        };

        match lock_age(&lock.path) {
            None => match lock.create() {
                Ok(()) => {}
                // Another run created the marker since we looked
                Err(LockError::Io { source, .. })
                    if source.kind() == io::ErrorKind::AlreadyExists =>
                {
                    if !resume {
                        return Err(LockError::AlreadyRunning {
                            path: lock.path,
                            age_secs: 0,
                        });
                    }
                    log::info!("Resuming: reclaiming run lock {}", lock.path.display());
                    lock.write()?;
                }
                Err(e) => return Err(e),
            },
            Some(age) if age < stale_after && !resume => {
                return Err(LockError::AlreadyRunning {
                    path: lock.path,
                    age_secs: age.as_secs(),
                });
            }
            Some(age) => {
                if resume {
                    log::info!("Resuming: reclaiming run lock {}", lock.path.display());
                } else {
                    log::warn!(
                        "Reclaiming stale run lock {} (last updated {}s ago)",
                        lock.path.display(),
                        age.as_secs()
                    );
                }
                lock.write()?;
            }
        }

        log::debug!("Acquired run lock {}", lock.path.display());
        Ok(lock)
    }

    /// Path of the marker file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current marker contents.
    #[must_use]
    pub fn info(&self) -> &LockInfo {
        &self.info
    }

    /// Record a stage transition, refreshing the marker's timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Io`] if the marker cannot be rewritten.
    pub fn heartbeat(&mut self, stage: Stage) -> Result<(), LockError> {
        self.info.stage = Some(stage);
        self.write()
    }

    /// Remove the marker after a clean run.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Io`] if the marker exists but cannot be removed.
    pub fn release(self) -> Result<(), LockError> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                log::debug!("Released run lock {}", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(LockError::Io {
                path: self.path,
                source,
            }),
        }
    }

    /// Read the marker at `output_root`, if any.
    #[must_use]
    pub fn inspect(output_root: &Path) -> Option<LockInfo> {
        let bytes = fs::read(output_root.join(LOCK_FILE_NAME)).ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    /// Create the marker, failing if it already exists.
    fn create(&self) -> Result<(), LockError> {
        let io_err = |source| LockError::Io {
            path: self.path.clone(),
            source,
        };
        let json = serde_json::to_vec(&self.info).map_err(|e| io_err(io::Error::other(e)))?;
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
            .map_err(io_err)?;
        file.write_all(&json).map_err(io_err)
    }

    fn write(&self) -> Result<(), LockError> {
        let io_err = |source| LockError::Io {
            path: self.path.clone(),
            source,
        };
        let json = serde_json::to_vec(&self.info).map_err(|e| io_err(io::Error::other(e)))?;
        fs::write(&self.path, json).map_err(io_err)
    }
}

/// Age of the marker from its modification time; a future mtime is age 0.
fn lock_age(path: &Path) -> Option<Duration> {
    let modified = fs::metadata(path).and_then(|m| m.modified()).ok()?;
    Some(
        SystemTime::now()
            .duration_since(modified)
            .unwrap_or(Duration::ZERO),
    )
}
