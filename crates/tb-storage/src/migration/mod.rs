//! Data migrations run when tracking consent changes.

pub mod migrator;
pub mod operation;

pub use migrator::{decide, transition_kind, MigrationKind, TRANSITIONS};
pub use operation::{DataMigrationOperation, MigrationOutcome};
