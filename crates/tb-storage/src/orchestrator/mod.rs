//! File orchestrators decide which batch file a write goes to and which
//! batch file is read next.
//!
//! - [`BatchFileOrchestrator`] owns one batch directory.
//! - [`NoOpFileOrchestrator`] discards everything (consent not granted).
//! - [`ConsentAwareFileOrchestrator`] routes between the two above based on
//!   the current tracking consent.

pub mod batch;
pub mod consent_aware;
pub mod noop;

pub use batch::BatchFileOrchestrator;
pub use consent_aware::ConsentAwareFileOrchestrator;
pub use noop::NoOpFileOrchestrator;

use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Selection of write and read targets inside batch storage.
///
/// All methods are infallible at the type level: "nothing available" is
/// `None` or an empty list and is never an error.
pub trait FileOrchestrator: Send + Sync {
    /// File the next item of `requested_size` bytes should be appended to.
    /// `None` means the write must be dropped.
    fn writable_file(&self, requested_size: u64, force_new_file: bool) -> Option<PathBuf>;

    /// Oldest readable file not contained in `excluded`.
    fn readable_file(&self, excluded: &HashSet<PathBuf>) -> Option<PathBuf>;

    /// Every batch file, oldest first.
    fn all_files(&self) -> Vec<PathBuf>;

    /// Files that may be uploaded right away, excluding the open file.
    fn flushable_files(&self) -> Vec<PathBuf>;

    /// Sidecar metadata path of `batch_file`.
    fn metadata_file(&self, batch_file: &Path) -> Option<PathBuf>;

    /// Directory owned by this orchestrator, `None` for composites.
    fn root_dir(&self) -> Option<PathBuf>;
}
