//! Multi-stage pipeline orchestration.
//!
//! This module provides functionality for:
//! - Running a selected, ordered subset of stages over a bounded worker pool
//! - Run locking so two runs never share an output root
//! - Stall detection that warns once per stall episode
//!
//! # Architecture
//!
//! - [`lock`]: the per-output-root run marker
//! - [`watchdog`]: liveness tracking for the current stage
//! - [`orchestrator`]: the [`Pipeline`] itself

pub mod lock;
pub mod orchestrator;
pub mod watchdog;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::CacheError;
use crate::duplicates::{DuplicateGroup, GroupingStats, UnknownCriterion};
use crate::report::{ReportDocument, ReportError};
use crate::scanner::{FileRecord, ScanError};

pub use lock::{LockError, RunLock, LOCK_FILE_NAME};
pub use orchestrator::{Pipeline, REPORT_FILE_NAME};
pub use watchdog::StallWatchdog;

/// A pipeline stage, in execution order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    /// Enumerate files under the scan roots
    Discover,
    /// Size, partial hash and full hash funnel
    QuickHash,
    /// Metadata and fingerprint extraction
    Probe,
    /// Scoring, clustering and keeper selection
    Group,
}

impl Stage {
    /// Every stage, in execution order.
    pub const ALL: [Stage; 4] = [Self::Discover, Self::QuickHash, Self::Probe, Self::Group];

    /// Name used in configuration and logs.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Discover => "discover",
            Self::QuickHash => "quick-hash",
            Self::Probe => "probe",
            Self::Group => "group",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        Self::ALL
            .into_iter()
            .find(|stage| stage.label() == normalized)
            .ok_or_else(|| {
                format!(
                    "unknown stage '{s}' (expected one of: discover, quick-hash, probe, group)"
                )
            })
    }
}

/// Orchestrator configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Stages to run; discovery always runs
    pub stages: Vec<Stage>,
    /// Worker threads (None = CPU count minus `reserved_cores`, at least 1)
    pub workers: Option<usize>,
    /// Cores left free when sizing the pool automatically
    pub reserved_cores: usize,
    /// Reclaim an existing run lock even if it is fresh
    pub resume: bool,
    /// Directory holding the run lock and the report
    pub output_root: PathBuf,
    /// Age after which an existing run lock is considered abandoned
    pub stale_lock_secs: u64,
    /// Idle time in one stage before a stall warning
    pub stall_timeout_secs: u64,
    /// Watchdog polling interval
    pub watchdog_tick_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stages: Stage::ALL.to_vec(),
            workers: None,
            reserved_cores: 1,
            resume: false,
            output_root: PathBuf::from("."),
            stale_lock_secs: 6 * 60 * 60,
            stall_timeout_secs: 300,
            watchdog_tick_ms: 1000,
        }
    }
}

impl PipelineConfig {
    /// Whether `stage` is selected. Discovery is always selected.
    #[must_use]
    pub fn runs(&self, stage: Stage) -> bool {
        stage == Stage::Discover || self.stages.contains(&stage)
    }

    /// Worker pool size.
    ///
    /// Uses the configured count when set, otherwise
    /// `max(1, cpu_count - reserved_cores)`.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        if let Some(n) = self.workers {
            return n.max(1);
        }
        let mut system = sysinfo::System::new();
        system.refresh_cpu();
        let cpus = match system.cpus().len() {
            0 => std::thread::available_parallelism().map_or(1, |n| n.get()),
            n => n,
        };
        cpus.saturating_sub(self.reserved_cores).max(1)
    }

    /// Stale-lock threshold.
    #[must_use]
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_lock_secs)
    }

    /// Stall timeout.
    #[must_use]
    pub fn stall_timeout(&self) -> Duration {
        Duration::from_secs(self.stall_timeout_secs)
    }

    /// Watchdog tick.
    #[must_use]
    pub fn watchdog_tick(&self) -> Duration {
        Duration::from_millis(self.watchdog_tick_ms.max(1))
    }
}

/// Errors that abort a pipeline run.
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    /// Discovery failed.
    #[error(transparent)]
    Scan(#[from] ScanError),

    /// The run lock could not be taken.
    #[error(transparent)]
    Lock(#[from] LockError),

    /// The cache root could not be opened.
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// The report could not be written.
    #[error(transparent)]
    Report(#[from] ReportError),

    /// A keeper criterion is not recognized.
    #[error(transparent)]
    Criterion(#[from] UnknownCriterion),

    /// The output directory could not be prepared.
    #[error("I/O error for {path}: {source}")]
    Io {
        /// Path where the error occurred
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// A shutdown was requested; the run lock is left in place.
    #[error("Pipeline interrupted")]
    Interrupted,
}

/// Everything a completed run produced.
#[derive(Debug)]
pub struct RunOutcome {
    /// Every processed record, in discovery order
    pub records: Vec<FileRecord>,
    /// Groups with their keepers (empty when grouping did not run)
    pub groups: Vec<DuplicateGroup>,
    /// The report, when grouping ran
    pub report: Option<ReportDocument>,
    /// Where the report was written
    pub report_path: Option<PathBuf>,
    /// Grouping observability counters
    pub stats: GroupingStats,
    /// Files found before sampling
    pub total_discovered: usize,
    /// Non-fatal discovery and hashing errors
    pub errors: usize,
}

impl RunOutcome {
    /// Whether any duplicate group was found.
    #[must_use]
    pub fn has_duplicates(&self) -> bool {
        !self.groups.is_empty()
    }
}
