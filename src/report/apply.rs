//! Applying a report: delete or archive losers.
//!
//! # Safety
//!
//! - Dry-run only tallies what would happen.
//! - A loser is never touched when its group's keeper is missing, so the
//!   last copy of a file is never removed.
//! - A loser that is the keeper itself is refused.
//! - Losers that are already gone are skipped without error, which makes
//!   applying the same report twice harmless.
//! - Failures are collected per file; the remaining losers are still
//!   processed.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use bytesize::ByteSize;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::ReportDocument;
use crate::scanner::relative_to_root;

/// Per-file failure while applying a report.
#[derive(Debug, Error)]
pub enum ApplyError {
    /// The group's keeper no longer exists.
    #[error("keeper missing, refusing to remove {loser}: {keeper}")]
    KeeperMissing {
        /// The missing keeper
        keeper: PathBuf,
        /// The loser left untouched
        loser: PathBuf,
    },

    /// The loser is the keeper.
    #[error("loser is the keeper: {0}")]
    LoserIsKeeper(PathBuf),

    /// Permission denied.
    #[error("permission denied: {0}")]
    PermissionDenied(PathBuf),

    /// Other I/O failure.
    #[error("I/O error for {path}: {source}")]
    Io {
        /// Path where the error occurred
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: io::Error,
    },
}

impl ApplyError {
    fn from_io(path: &Path, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::PermissionDenied {
            Self::PermissionDenied(path.to_path_buf())
        } else {
            Self::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    }
}

/// How a report is applied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplyConfig {
    /// Only tally, never touch files
    pub dry_run: bool,
    /// Move losers here instead of deleting them
    pub backup_root: Option<PathBuf>,
    /// Roots the report was scanned from; backup paths are relative to them
    pub scan_roots: Vec<PathBuf>,
}

/// What applying a report did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ApplyOutcome {
    /// Losers removed or archived (or that would be, in dry-run)
    pub processed: usize,
    /// Losers already gone
    pub skipped_missing: usize,
    /// Bytes removed from their original location
    pub bytes_freed: u64,
    /// Losers that could not be resolved, with the reason
    pub failures: Vec<(PathBuf, String)>,
    /// Whether this was a dry run
    pub dry_run: bool,
}

impl ApplyOutcome {
    /// Number of failed losers.
    #[must_use]
    pub fn failure_count(&self) -> usize {
        self.failures.len()
    }

    /// Whether some losers failed.
    #[must_use]
    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty()
    }

    /// One-line human-readable summary.
    #[must_use]
    pub fn summary(&self) -> String {
        let verb = if self.dry_run { "Would free" } else { "Freed" };
        let mut line = format!(
            "{} {} across {} file(s)",
            verb,
            ByteSize::b(self.bytes_freed),
            self.processed
        );
        if self.skipped_missing > 0 {
            line.push_str(&format!(", {} already gone", self.skipped_missing));
        }
        if !self.failures.is_empty() {
            line.push_str(&format!(", {} failed", self.failures.len()));
        }
        line
    }
}

/// Resolves the losers of a report.
#[derive(Debug, Clone)]
pub struct ApplyEngine {
    config: ApplyConfig,
    roots: Vec<PathBuf>,
}

impl ApplyEngine {
    /// Create an engine. Scan roots are resolved when they exist.
    #[must_use]
    pub fn new(config: ApplyConfig) -> Self {
        let roots = config
            .scan_roots
            .iter()
            .map(|r| fs::canonicalize(r).unwrap_or_else(|_| r.clone()))
            .collect();
        Self { config, roots }
    }

    /// Apply every group in `report`.
    #[must_use]
    pub fn apply(&self, report: &ReportDocument) -> ApplyOutcome {
        let mut outcome = ApplyOutcome {
            dry_run: self.config.dry_run,
            ..Default::default()
        };

        for (id, group) in &report.groups {
            let keeper_present = group.keep.exists();
            if !keeper_present {
                log::warn!("Group {}: keeper {} is missing", id, group.keep.display());
            }

            for loser in &group.losers {
                let size = match fs::symlink_metadata(loser) {
                    Ok(meta) => meta.len(),
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {
                        log::debug!("Already resolved: {}", loser.display());
                        outcome.skipped_missing += 1;
                        continue;
                    }
                    Err(e) => {
                        self.fail(&mut outcome, loser, &ApplyError::from_io(loser, e));
                        continue;
                    }
                };

                let checked = if loser == &group.keep {
                    Err(ApplyError::LoserIsKeeper(loser.clone()))
                } else if !keeper_present {
                    Err(ApplyError::KeeperMissing {
                        keeper: group.keep.clone(),
                        loser: loser.clone(),
                    })
                } else {
                    Ok(())
                };
                if let Err(e) = checked.and_then(|()| self.resolve(loser)) {
                    self.fail(&mut outcome, loser, &e);
                    continue;
                }

                outcome.processed += 1;
                outcome.bytes_freed += size;
            }
        }

        log::info!("{}", outcome.summary());
        outcome
    }

    fn fail(&self, outcome: &mut ApplyOutcome, loser: &Path, error: &ApplyError) {
        log::warn!("Failed to resolve {}: {}", loser.display(), error);
        outcome.failures.push((loser.to_path_buf(), error.to_string()));
    }

    fn resolve(&self, loser: &Path) -> Result<(), ApplyError> {
        if self.config.dry_run {
            log::info!("[dry-run] would remove {}", loser.display());
            return Ok(());
        }
        match &self.config.backup_root {
            Some(backup_root) => {
                let dest = unique_destination(
                    &backup_root.join(relative_to_root(loser, &self.roots)),
                );
                move_file(loser, &dest)?;
                log::info!("Moved {} -> {}", loser.display(), dest.display());
                Ok(())
            }
            None => {
                fs::remove_file(loser).map_err(|e| ApplyError::from_io(loser, e))?;
                log::info!("Deleted {}", loser.display());
                Ok(())
            }
        }
    }
}

/// `dest`, or `dest.N` for the first N that does not exist yet.
fn unique_destination(dest: &Path) -> PathBuf {
    if !dest.exists() {
        return dest.to_path_buf();
    }
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    (1u32..)
        .map(|n| dest.with_file_name(format!("{name}.{n}")))
        .find(|candidate| !candidate.exists())
        .unwrap_or_else(|| dest.to_path_buf())
}

/// Rename, falling back to copy + remove across filesystems.
fn move_file(from: &Path, to: &Path) -> Result<(), ApplyError> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent).map_err(|e| ApplyError::from_io(parent, e))?;
    }
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(e) if matches!(
            e.kind(),
            io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied
        ) =>
        {
            Err(ApplyError::from_io(from, e))
        }
        Err(e) => {
            log::debug!(
                "Rename {} failed ({}), copying instead",
                from.display(),
                e
            );
            fs::copy(from, to).map_err(|e| ApplyError::from_io(to, e))?;
            fs::remove_file(from).map_err(|e| ApplyError::from_io(from, e))
        }
    }
}
