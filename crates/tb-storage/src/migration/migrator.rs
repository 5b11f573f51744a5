//! Consent transition table.
//!
//! Maps `(previous, next)` consent to the migration that must run before
//! writes switch to the next directory. Pending data is provisional: it is
//! promoted when consent is granted and discarded when consent is refused or
//! reset back to pending. Settled data (granted) is never touched here.

use std::path::PathBuf;

use tb_common::TrackingConsent;

use super::operation::DataMigrationOperation;
use crate::logging::{event_names, MAINTAINER_TELEMETRY};

use TrackingConsent::{Granted, NotGranted, Pending};

/// Shape of the migration for one transition, before directories are known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationKind {
    /// Leave every directory as is.
    Keep,
    /// Wipe the directory of the previous consent.
    WipePrevious,
    /// Wipe the directory of the next consent.
    WipeNext,
    /// Move the previous directory's files into the next directory.
    Promote,
    /// A transition missing from the table.
    Unmapped,
}

/// Every reachable transition. `None` is "no previous state" (startup); its
/// directory is the pending one.
pub const TRANSITIONS: [(Option<TrackingConsent>, TrackingConsent, MigrationKind); 12] = [
    (None, Pending, MigrationKind::WipePrevious),
    (None, Granted, MigrationKind::WipePrevious),
    (None, NotGranted, MigrationKind::WipePrevious),
    (Some(Pending), Pending, MigrationKind::Keep),
    (Some(Pending), Granted, MigrationKind::Promote),
    (Some(Pending), NotGranted, MigrationKind::WipePrevious),
    (Some(Granted), Pending, MigrationKind::WipeNext),
    (Some(Granted), Granted, MigrationKind::Keep),
    (Some(Granted), NotGranted, MigrationKind::Keep),
    (Some(NotGranted), Pending, MigrationKind::WipeNext),
    (Some(NotGranted), Granted, MigrationKind::Keep),
    (Some(NotGranted), NotGranted, MigrationKind::Keep),
];

/// Look up the migration kind of a transition.
pub fn transition_kind(previous: Option<TrackingConsent>, next: TrackingConsent) -> MigrationKind {
    TRANSITIONS
        .iter()
        .find(|(p, n, _)| *p == previous && *n == next)
        .map(|(_, _, kind)| *kind)
        .unwrap_or(MigrationKind::Unmapped)
}

/// Decide the migration for a transition given the directories of the
/// previous and next delegates (`None` for the discard delegate).
pub fn decide(
    previous: Option<TrackingConsent>,
    previous_dir: Option<PathBuf>,
    next: TrackingConsent,
    next_dir: Option<PathBuf>,
) -> DataMigrationOperation {
    match transition_kind(previous, next) {
        MigrationKind::Keep => DataMigrationOperation::NoOp,
        MigrationKind::WipePrevious => DataMigrationOperation::Wipe { dir: previous_dir },
        MigrationKind::WipeNext => DataMigrationOperation::Wipe { dir: next_dir },
        MigrationKind::Promote => DataMigrationOperation::Move {
            from: previous_dir,
            to: next_dir,
        },
        MigrationKind::Unmapped => {
            internal_log!(
                WARN,
                MAINTAINER_TELEMETRY,
                event_names::MIGRATION_UNMAPPED,
                previous = ?previous,
                next = %next,
                "Unexpected consent migration"
            );
            DataMigrationOperation::NoOp
        }
    }
}
