//! Run outcomes and exit codes.

use std::path::PathBuf;

use serde::Serialize;

use crate::cache::CacheError;
use crate::handler::ArchiveError;
use crate::scanner::{Interrupted, ScanError};

/// Exit codes of the scan-tool binary.
///
/// - 0: Success
/// - 1: Invalid parameter or unexpected failure
/// - 2: A file could not be read, hashed or extracted
/// - 3: The service failed or answered in an unexpected way
/// - 130: Interrupted by user (Ctrl+C)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExitCode {
    /// Success: every file was processed.
    Success = 0,
    /// General error: invalid parameters or an unexpected failure.
    GeneralError = 1,
    /// File error: a file or archive could not be processed.
    FileError = 2,
    /// Scan error: the service could not be used.
    ScanError = 3,
    /// Interrupted: the run was stopped by the user (Ctrl+C).
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
            Self::Success => "ST000",
            Self::GeneralError => "ST001",
            Self::FileError => "ST002",
            Self::ScanError => "ST003",
            Self::Interrupted => "ST130",
        }
    }
}

/// Conditions that end a scan run early.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// A file could not be read or hashed, or a temporary file not written.
    #[error("Cannot process {path}: {source}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An archive could not be extracted.
    #[error("Cannot extract {archive}: {source}")]
    Extraction {
        archive: PathBuf,
        #[source]
        source: ArchiveError,
    },

    /// The service rejected a request the run depends on.
    #[error(transparent)]
    Scan(#[from] ScanError),

    /// The service answered with a response code outside the documented set.
    #[error("Unexpected response code {0} from the scanning service")]
    UnexpectedResponse(i64),

    /// The user asked the run to stop.
    #[error("Interrupted by user")]
    Interrupted,
}

impl From<Interrupted> for RunError {
    fn from(_: Interrupted) -> Self {
        Self::Interrupted
    }
}

impl RunError {
    /// Exit code that reports this error to the shell.
    #[must_use]
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::File { .. } | Self::Extraction { .. } => ExitCode::FileError,
            Self::Scan(ScanError::Interrupted(_)) | Self::Interrupted => ExitCode::Interrupted,
            Self::Scan(_) | Self::UnexpectedResponse(_) => ExitCode::ScanError,
        }
    }
}

/// Structured error information for JSON output.
#[derive(Debug, Serialize)]
pub struct StructuredError {
    /// The error code (e.g., "ST002")
    pub code: String,
    /// The exit code number
    pub exit_code: i32,
    /// Human-readable error message
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

/// Exit code for an error that escaped `run_app`.
#[must_use]
pub fn exit_code_for(err: &anyhow::Error) -> ExitCode {
    if let Some(run) = err.downcast_ref::<RunError>() {
        run.exit_code()
    } else if err.downcast_ref::<CacheError>().is_some() {
        ExitCode::FileError
    } else {
        ExitCode::GeneralError
    }
}
