//! Directory-level migration operations.
//!
//! Each operation is a plain value: running it twice leaves the same end
//! state as running it once.

use std::path::{Path, PathBuf};
use std::thread;

use tb_common::WipeRetryConfig;

use crate::file::FileHandler;
use crate::logging::{event_names, MAINTAINER, MAINTAINER_TELEMETRY};

/// What to do with buffered data on a consent transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataMigrationOperation {
    /// Keep everything where it is.
    NoOp,
    /// Delete a batch directory. `None` when the directory never existed.
    Wipe { dir: Option<PathBuf> },
    /// Move every file of `from` into `to`.
    Move {
        from: Option<PathBuf>,
        to: Option<PathBuf>,
    },
}

/// Result of [`DataMigrationOperation::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// Nothing needed doing.
    Skipped,
    /// The operation reached its end state.
    Completed,
    /// Gave up; the directory may still hold data.
    Failed,
}

impl DataMigrationOperation {
    pub fn wipe(dir: impl Into<PathBuf>) -> Self {
        DataMigrationOperation::Wipe {
            dir: Some(dir.into()),
        }
    }

    pub fn move_all(from: impl Into<PathBuf>, to: impl Into<PathBuf>) -> Self {
        DataMigrationOperation::Move {
            from: Some(from.into()),
            to: Some(to.into()),
        }
    }

    /// Short name used in logs and task names.
    pub fn name(&self) -> &'static str {
        match self {
            DataMigrationOperation::NoOp => "noop",
            DataMigrationOperation::Wipe { .. } => "wipe",
            DataMigrationOperation::Move { .. } => "move",
        }
    }

    /// Execute the operation. Never panics, never returns an error.
    pub fn run(&self, file_handler: &dyn FileHandler, retry: &WipeRetryConfig) -> MigrationOutcome {
        match self {
            DataMigrationOperation::NoOp => MigrationOutcome::Skipped,
            DataMigrationOperation::Wipe { dir: None } => {
                internal_log!(
                    WARN,
                    MAINTAINER,
                    event_names::MIGRATION_SKIPPED,
                    operation = "wipe",
                    "Can't wipe data from a null directory"
                );
                MigrationOutcome::Skipped
            }
            DataMigrationOperation::Wipe { dir: Some(dir) } => wipe(file_handler, dir, retry),
            DataMigrationOperation::Move {
                from: Some(from),
                to: Some(to),
            } => {
                if file_handler.move_all(from, to) {
                    MigrationOutcome::Completed
                } else {
                    internal_log!(
                        WARN,
                        MAINTAINER_TELEMETRY,
                        event_names::MIGRATION_FAILED,
                        operation = "move",
                        source = %from.display(),
                        destination = %to.display(),
                        "Some files could not be moved"
                    );
                    MigrationOutcome::Failed
                }
            }
            DataMigrationOperation::Move { from, to } => {
                internal_log!(
                    WARN,
                    MAINTAINER,
                    event_names::MIGRATION_SKIPPED,
                    operation = "move",
                    source_missing = from.is_none(),
                    destination_missing = to.is_none(),
                    "Can't move data from or to a null directory"
                );
                MigrationOutcome::Skipped
            }
        }
    }
}

fn wipe(file_handler: &dyn FileHandler, dir: &Path, retry: &WipeRetryConfig) -> MigrationOutcome {
    let attempts = retry.attempts.max(1);
    for attempt in 1..=attempts {
        if !dir.exists() || file_handler.delete(dir) {
            return MigrationOutcome::Completed;
        }
        if attempt < attempts {
            internal_log!(
                DEBUG,
                MAINTAINER,
                event_names::MIGRATION_RETRY,
                path = %dir.display(),
                attempt,
                "Wipe failed, retrying"
            );
            thread::sleep(retry.delay());
        }
    }

    internal_log!(
        ERROR,
        MAINTAINER_TELEMETRY,
        event_names::MIGRATION_FAILED,
        operation = "wipe",
        path = %dir.display(),
        attempts,
        "Unable to wipe directory, data is left in place"
    );
    MigrationOutcome::Failed
}
