//! Error types for Telebuf.
//!
//! The storage engine never surfaces these across its public write/read
//! boundary; they are produced by internal helpers and converted into a
//! `false`/`None`/empty result plus a log event at that boundary. Callers that
//! do see them (configuration loading, consent state persistence, the CLI) get:
//! - Stable error codes for machine parsing
//! - Category classification for error grouping
//! - Recoverability hints for automation

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for Telebuf operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Configuration file errors.
    Config,
    /// File I/O and serialization errors.
    Io,
    /// Batch directory structure errors.
    Storage,
    /// Consent state errors.
    Consent,
    /// Work queue errors.
    Queue,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Config => write!(f, "config"),
            ErrorCategory::Io => write!(f, "io"),
            ErrorCategory::Storage => write!(f, "storage"),
            ErrorCategory::Consent => write!(f, "consent"),
            ErrorCategory::Queue => write!(f, "queue"),
        }
    }
}

/// Unified error type for Telebuf.
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors (10-19)
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid storage configuration: {0}")]
    InvalidConfig(String),

    // I/O errors (20-29)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Storage errors (30-39)
    #[error("not a directory: {}", path.display())]
    NotADirectory { path: PathBuf },

    #[error("directory is not writable: {}", path.display())]
    NotWritable { path: PathBuf },

    #[error("not a batch file: {}", path.display())]
    NotABatchFile { path: PathBuf },

    // Consent errors (40-49)
    #[error("invalid consent state: {0}")]
    InvalidConsent(String),

    // Queue errors (50-59)
    #[error("work queue is shut down")]
    QueueShutdown,

    #[error("work queue is saturated ({capacity} pending tasks)")]
    QueueSaturated { capacity: usize },
}

impl Error {
    /// Returns the error code for this error type.
    ///
    /// Error codes are stable and grouped by category:
    /// - 10-19: Configuration errors
    /// - 20-29: I/O errors
    /// - 30-39: Storage errors
    /// - 40-49: Consent errors
    /// - 50-59: Queue errors
    pub fn code(&self) -> u32 {
        match self {
            Error::Config(_) => 10,
            Error::InvalidConfig(_) => 11,
            Error::Io(_) => 20,
            Error::Json(_) => 21,
            Error::NotADirectory { .. } => 30,
            Error::NotWritable { .. } => 31,
            Error::NotABatchFile { .. } => 32,
            Error::InvalidConsent(_) => 40,
            Error::QueueShutdown => 50,
            Error::QueueSaturated { .. } => 51,
        }
    }

    /// Returns the error category for grouping and filtering.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Config(_) | Error::InvalidConfig(_) => ErrorCategory::Config,
            Error::Io(_) | Error::Json(_) => ErrorCategory::Io,
            Error::NotADirectory { .. }
            | Error::NotWritable { .. }
            | Error::NotABatchFile { .. } => ErrorCategory::Storage,
            Error::InvalidConsent(_) => ErrorCategory::Consent,
            Error::QueueShutdown | Error::QueueSaturated { .. } => ErrorCategory::Queue,
        }
    }

    /// Returns whether this error is potentially recoverable.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::Config(_) => true,
            Error::InvalidConfig(_) => true,

            // I/O: often transient (lock contention, slow disk)
            Error::Io(_) => true,
            Error::Json(_) => false,

            Error::NotADirectory { .. } => false,
            Error::NotWritable { .. } => true,
            Error::NotABatchFile { .. } => false,

            Error::InvalidConsent(_) => true,

            Error::QueueShutdown => false,
            Error::QueueSaturated { .. } => true,
        }
    }
}
