//! Durable reports and their application.
//!
//! - [`document`]: the JSON report of groups and keepers, merging and exclusions
//! - [`apply`]: dry-run, delete or archive the losers of a report

pub mod apply;
pub mod document;

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

pub use apply::{ApplyConfig, ApplyEngine, ApplyError, ApplyOutcome};
pub use document::{GroupRecord, ReportDocument, Summary};

/// Errors from loading or saving reports.
#[derive(thiserror::Error, Debug)]
pub enum ReportError {
    /// The report file could not be read or written.
    #[error("Report I/O error for {path}: {source}")]
    Io {
        /// The report file
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: io::Error,
    },

    /// The report file is not a valid report.
    #[error("Invalid report {path}: {source}")]
    Parse {
        /// The report file
        path: PathBuf,
        /// The JSON error
        #[source]
        source: serde_json::Error,
    },
}

/// Write `bytes` to `path` through a synced temporary file and a rename.
///
/// Readers see either the previous content or the new content, never a
/// partial write. The temporary file is removed if any step fails.
///
/// # Errors
///
/// Returns the underlying I/O error.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{}.tmp.{}", file_name, std::process::id()));

    let result = (|| {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    })();
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}
