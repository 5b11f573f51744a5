//! Telebuf storage engine.
//!
//! Buffers telemetry events in batch files on the local disk and keeps them
//! consistent with the user's tracking consent:
//! - while consent is pending, events go to a provisional directory
//! - granting consent promotes that directory's batches to the uploadable one
//! - refusing consent (or resetting it to pending) discards provisional data
//!
//! All mutations of a storage root run on one serial work queue; the upload
//! pipeline reads from its own thread through [`ConsentAwareStorage`].

#[macro_use]
pub mod logging;

pub mod consent;
pub mod executor;
pub mod file;
pub mod layout;
pub mod migration;
pub mod orchestrator;
pub mod storage;
pub mod writer;

pub use consent::{ConsentListener, ConsentProvider, PersistedConsent, TrackingConsentProvider};
pub use executor::{SerialExecutor, SubmitError, TaskExecutor};
pub use file::{FileHandler, PlainFileHandler};
pub use layout::StorageLayout;
pub use migration::{DataMigrationOperation, MigrationOutcome};
pub use orchestrator::{
    BatchFileOrchestrator, ConsentAwareFileOrchestrator, FileOrchestrator, NoOpFileOrchestrator,
};
pub use storage::{Batch, ConsentAwareStorage, DirectoryStats, StorageStats};
pub use writer::{
    BatchFileDataWriter, DataWriter, EventSerializer, JsonEventSerializer, ScheduledWriter,
    SerializedEvent,
};
