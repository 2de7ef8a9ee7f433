//! Structured error handling and exit codes.

use serde::Serialize;

use crate::pipeline::{LockError, PipelineError};

/// Process exit codes.
///
/// - 0: Success (groups found, or apply finished cleanly)
/// - 1: General error
/// - 2: No duplicates found
/// - 3: Partial success (some losers could not be resolved)
/// - 4: Another run holds the run lock
/// - 130: Interrupted (Ctrl+C)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExitCode {
    /// Completed and found duplicates.
    Success = 0,
    /// An unexpected error occurred.
    GeneralError = 1,
    /// Completed but found no duplicates.
    NoDuplicates = 2,
    /// Completed with per-file failures.
    PartialSuccess = 3,
    /// A fresh run lock exists for the output root.
    AlreadyRunning = 4,
    /// Interrupted by the user.
    Interrupted = 130,
}

impl ExitCode {
    /// Get the numeric exit code.
    #[must_use]
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Get the machine-readable code prefix.
    #[must_use]
    pub fn code_prefix(self) -> &'static str {
        match self {
            Self::Success => "MD000",
            Self::GeneralError => "MD001",
            Self::NoDuplicates => "MD002",
            Self::PartialSuccess => "MD003",
            Self::AlreadyRunning => "MD004",
            Self::Interrupted => "MD130",
        }
    }

    /// Exit code for an error that ended the run.
    #[must_use]
    pub fn for_error(err: &anyhow::Error) -> Self {
        for cause in err.chain() {
            if let Some(e) = cause.downcast_ref::<PipelineError>() {
                match e {
                    PipelineError::Interrupted => return Self::Interrupted,
                    PipelineError::Lock(LockError::AlreadyRunning { .. }) => {
                        return Self::AlreadyRunning
                    }
                    _ => {}
                }
            }
            if matches!(
                cause.downcast_ref::<LockError>(),
                Some(LockError::AlreadyRunning { .. })
            ) {
                return Self::AlreadyRunning;
            }
        }
        Self::GeneralError
    }
}

/// Structured error information for JSON output.
#[derive(Debug, Serialize)]
pub struct StructuredError {
    /// The error code (e.g., "MD001")
    pub code: String,
    /// The exit code number
    pub exit_code: i32,
    /// Human-readable error message, including its causes
    pub message: String,
    /// Whether the operation was interrupted
    pub interrupted: bool,
}

impl StructuredError {
    /// Create a new structured error from an anyhow error and an exit code.
    #[must_use]
    pub fn new(err: &anyhow::Error, exit_code: ExitCode) -> Self {
        Self {
            code: exit_code.code_prefix().to_string(),
            exit_code: exit_code.as_i32(),
            message: format!("{err:#}"),
            interrupted: exit_code == ExitCode::Interrupted,
        }
    }
}
