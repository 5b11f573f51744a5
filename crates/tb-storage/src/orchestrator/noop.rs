use std::collections::HashSet;
use std::path::{Path, PathBuf};

use super::FileOrchestrator;

/// Orchestrator used while consent is not granted: nothing is writable,
/// nothing is readable, there is no directory.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpFileOrchestrator;

impl FileOrchestrator for NoOpFileOrchestrator {
    fn writable_file(&self, _requested_size: u64, _force_new_file: bool) -> Option<PathBuf> {
        None
    }

    fn readable_file(&self, _excluded: &HashSet<PathBuf>) -> Option<PathBuf> {
        None
    }

    fn all_files(&self) -> Vec<PathBuf> {
        Vec::new()
    }

    fn flushable_files(&self) -> Vec<PathBuf> {
        Vec::new()
    }

    fn metadata_file(&self, _batch_file: &Path) -> Option<PathBuf> {
        None
    }

    fn root_dir(&self) -> Option<PathBuf> {
        None
    }
}
