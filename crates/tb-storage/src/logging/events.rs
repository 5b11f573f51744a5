//! Audiences and stable event names for storage log events.

use serde::{Deserialize, Serialize};

/// Who a log event is meant for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    /// Visible to the host application's developer.
    User,
    /// Diagnostics for the people maintaining this library.
    Maintainer,
    /// Forwarded to the library's own telemetry.
    Telemetry,
}

impl Target {
    pub fn as_str(&self) -> &'static str {
        match self {
            Target::User => "user",
            Target::Maintainer => "maintainer",
            Target::Telemetry => "telemetry",
        }
    }
}

pub const USER: &[Target] = &[Target::User];
pub const MAINTAINER: &[Target] = &[Target::Maintainer];
pub const MAINTAINER_TELEMETRY: &[Target] = &[Target::Maintainer, Target::Telemetry];

/// Display adapter rendering a target list as `maintainer,telemetry`.
pub struct TargetList<'a>(pub &'a [Target]);

impl std::fmt::Display for TargetList<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, target) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            f.write_str(target.as_str())?;
        }
        Ok(())
    }
}

/// Standard event names used in logging.
pub mod event_names {
    // File handler
    pub const FILE_APPEND_FAILED: &str = "file.append_failed";
    pub const FILE_READ_FAILED: &str = "file.read_failed";
    pub const FILE_WRITE_FAILED: &str = "file.write_failed";
    pub const FILE_DELETE_FAILED: &str = "file.delete_failed";
    pub const FILE_MOVE_FAILED: &str = "file.move_failed";
    pub const FILE_MOVE_SKIPPED: &str = "file.move_skipped";
    pub const FILE_MOVE_RENAMED: &str = "file.move_renamed";

    // Batch directory orchestrator
    pub const ROOT_INVALID: &str = "batch.root_invalid";
    pub const DISK_FULL: &str = "batch.disk_full";
    pub const OBSOLETE_DELETED: &str = "batch.obsolete_deleted";
    pub const NOT_BATCH_FILE: &str = "batch.not_batch_file";
    pub const FOREIGN_BATCH_FILE: &str = "batch.foreign_file";

    // Migration
    pub const MIGRATION_SKIPPED: &str = "migration.skipped";
    pub const MIGRATION_FAILED: &str = "migration.failed";
    pub const MIGRATION_RETRY: &str = "migration.retry";
    pub const MIGRATION_UNMAPPED: &str = "migration.unmapped_transition";
    pub const CONSENT_CHANGED: &str = "consent.changed";
    pub const CONSENT_STATE_ERROR: &str = "consent.state_error";

    // Write path
    pub const WRITE_DROPPED: &str = "write.dropped";
    pub const WRITE_FAILED: &str = "write.failed";
    pub const METADATA_WRITE_FAILED: &str = "write.metadata_failed";
    pub const TASK_REJECTED: &str = "queue.task_rejected";
    pub const TASK_PANICKED: &str = "queue.task_panicked";

    // Read path
    pub const BATCH_DELETE_FAILED: &str = "read.batch_delete_failed";
    pub const BATCH_UNKNOWN: &str = "read.unknown_batch";
}
