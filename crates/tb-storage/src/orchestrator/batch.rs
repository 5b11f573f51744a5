//! Orchestrator for a single batch directory.
//!
//! Batch files are named after their creation time in milliseconds, so
//! ordering by name is ordering by age. A file is:
//! - reused for writes while it is the file this instance created last, is
//!   younger than 95% of the recent delay, and has room and item slots left
//! - readable once it is older than 105% of the recent delay
//! - deleted unread once it is older than the obsolete threshold
//!
//! The gap between the two recent thresholds keeps a reader from picking a
//! file another writer may still append to.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tb_common::{FilePersistenceConfig, TimeProvider};

use super::FileOrchestrator;
use crate::file::FileHandler;
use crate::logging::{event_names, MAINTAINER_TELEMETRY};

const READ_DELAY_FACTOR: f64 = 1.05;
const WRITE_DELAY_FACTOR: f64 = 0.95;

/// Suffix of the sidecar metadata file next to each batch file.
pub const METADATA_SUFFIX: &str = "_metadata";

/// Batch files checked out by a reader; cleanup never deletes them.
pub type LockedFiles = Arc<Mutex<HashSet<PathBuf>>>;

/// The last file handed out for writing.
#[derive(Debug, Default)]
struct OpenFile {
    path: Option<PathBuf>,
    item_count: u64,
}

/// Rotation, readability and cleanup policy for one directory.
pub struct BatchFileOrchestrator {
    root_dir: PathBuf,
    config: FilePersistenceConfig,
    file_handler: Arc<dyn FileHandler>,
    time: Arc<dyn TimeProvider>,
    recent_read_delay_ms: i64,
    recent_write_delay_ms: i64,
    open_file: Mutex<OpenFile>,
    locked_files: LockedFiles,
    last_cleanup_millis: AtomicI64,
}

impl BatchFileOrchestrator {
    pub fn new(
        root_dir: impl Into<PathBuf>,
        config: FilePersistenceConfig,
        file_handler: Arc<dyn FileHandler>,
        time: Arc<dyn TimeProvider>,
    ) -> Self {
        let recent_delay = config.recent_delay_ms as f64;
        BatchFileOrchestrator {
            root_dir: root_dir.into(),
            recent_read_delay_ms: (recent_delay * READ_DELAY_FACTOR).round() as i64,
            recent_write_delay_ms: (recent_delay * WRITE_DELAY_FACTOR).round() as i64,
            config,
            file_handler,
            time,
            open_file: Mutex::new(OpenFile::default()),
            locked_files: LockedFiles::default(),
            last_cleanup_millis: AtomicI64::new(0),
        }
    }

    /// Share the reader's locked set so write-path cleanup skips those files.
    pub fn with_locked_files(mut self, locked_files: LockedFiles) -> Self {
        self.locked_files = locked_files;
        self
    }

    pub fn config(&self) -> &FilePersistenceConfig {
        &self.config
    }

    /// Check the root directory, creating it when `create` is set.
    fn is_root_valid(&self, create: bool) -> bool {
        match fs::metadata(&self.root_dir) {
            Ok(metadata) if !metadata.is_dir() => {
                internal_log!(
                    ERROR,
                    MAINTAINER_TELEMETRY,
                    event_names::ROOT_INVALID,
                    path = %self.root_dir.display(),
                    "The provided root file is not a directory"
                );
                false
            }
            Ok(metadata) if metadata.permissions().readonly() => {
                internal_log!(
                    ERROR,
                    MAINTAINER_TELEMETRY,
                    event_names::ROOT_INVALID,
                    path = %self.root_dir.display(),
                    "The provided root dir is not writable"
                );
                false
            }
            Ok(_) => true,
            Err(_) if !create => false,
            Err(_) => match fs::create_dir_all(&self.root_dir) {
                Ok(()) => true,
                Err(e) => {
                    internal_log!(
                        ERROR,
                        MAINTAINER_TELEMETRY,
                        event_names::ROOT_INVALID,
                        path = %self.root_dir.display(),
                        error = %e,
                        "The provided root dir can't be created"
                    );
                    false
                }
            },
        }
    }

    /// Batch files with their timestamps, oldest first.
    fn list_batch_files(&self) -> Vec<(i64, PathBuf)> {
        let entries = match fs::read_dir(&self.root_dir) {
            Ok(entries) => entries,
            Err(_) => return Vec::new(),
        };
        let mut files: Vec<(i64, PathBuf)> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
            .filter_map(|entry| {
                let path = entry.path();
                batch_timestamp(&path).map(|ts| (ts, path))
            })
            .collect();
        files.sort_by_key(|(ts, _)| *ts);
        files
    }

    fn is_recent(&self, timestamp: i64, delay_ms: i64) -> bool {
        timestamp >= self.time.now_millis().saturating_sub(delay_ms)
    }

    fn is_open(&self, path: &Path, timestamp: i64) -> bool {
        let open_file = self.open_file.lock().unwrap_or_else(PoisonError::into_inner);
        open_file.path.as_deref() == Some(path)
            && self.is_recent(timestamp, self.recent_write_delay_ms)
    }

    fn can_do_cleanup(&self) -> bool {
        let elapsed = self.time.now_millis() - self.last_cleanup_millis.load(Ordering::SeqCst);
        elapsed > clamp_millis(self.config.cleanup_frequency_ms)
    }

    fn mark_cleanup(&self) {
        self.last_cleanup_millis
            .store(self.time.now_millis(), Ordering::SeqCst);
    }

    fn delete_obsolete_files(
        &self,
        files: Vec<(i64, PathBuf)>,
        locked: &HashSet<PathBuf>,
    ) -> Vec<(i64, PathBuf)> {
        let threshold = self
            .time
            .now_millis()
            .saturating_sub(clamp_millis(self.config.old_file_threshold_ms));
        files
            .into_iter()
            .filter(|(ts, path)| {
                if *ts >= threshold || locked.contains(path) {
                    return true;
                }
                if self.file_handler.delete(path) {
                    internal_log!(
                        DEBUG,
                        MAINTAINER_TELEMETRY,
                        event_names::OBSOLETE_DELETED,
                        path = %path.display(),
                        "Deleted obsolete batch file"
                    );
                }
                self.delete_metadata_of(path);
                false
            })
            .collect()
    }

    fn free_space_if_needed(&self, files: &[(i64, PathBuf)], locked: &HashSet<PathBuf>) {
        let size_on_disk: u64 = files.iter().map(|(_, path)| file_len(path)).sum();
        let max_disk_space = self.config.max_disk_space;
        if size_on_disk <= max_disk_space {
            return;
        }

        let mut to_free = size_on_disk - max_disk_space;
        internal_log!(
            ERROR,
            MAINTAINER_TELEMETRY,
            event_names::DISK_FULL,
            used_bytes = size_on_disk,
            max_bytes = max_disk_space,
            to_free_bytes = to_free,
            "Too much disk space used, deleting oldest batch files"
        );

        for (_, path) in files.iter().filter(|(_, path)| !locked.contains(path)) {
            if to_free == 0 {
                break;
            }
            let freed = self.delete_counting(path) + self.delete_metadata_of(path);
            to_free = to_free.saturating_sub(freed);
        }
    }

    /// Delete a file and return how many bytes it held.
    fn delete_counting(&self, path: &Path) -> u64 {
        if !path.exists() {
            return 0;
        }
        let size = file_len(path);
        if self.file_handler.delete(path) {
            size
        } else {
            0
        }
    }

    fn delete_metadata_of(&self, batch_file: &Path) -> u64 {
        self.delete_counting(&metadata_path(batch_file))
    }

    fn reusable_file(&self, open_file: &mut OpenFile, requested_size: u64) -> Option<PathBuf> {
        let (timestamp, last_file) = self.list_batch_files().pop()?;
        if open_file.path.as_deref() != Some(last_file.as_path()) {
            // Written by a previous session or another process; its item
            // count is unknown.
            return None;
        }

        let recent_enough = self.is_recent(timestamp, self.recent_write_delay_ms);
        let has_room = file_len(&last_file).saturating_add(requested_size) <= self.config.max_batch_size;
        let has_slot = open_file.item_count < self.config.max_items_per_batch;

        if recent_enough && has_room && has_slot {
            open_file.item_count += 1;
            Some(last_file)
        } else {
            None
        }
    }

    fn create_new_file(&self, open_file: &mut OpenFile) -> PathBuf {
        let newest_on_disk = self.list_batch_files().last().map(|(ts, _)| *ts);
        let newest_handed_out = open_file.path.as_deref().and_then(batch_timestamp);
        let newest = newest_on_disk.max(newest_handed_out);

        let now = self.time.now_millis();
        let name = match newest {
            Some(newest) if newest >= now => newest + 1,
            _ => now,
        };

        let path = self.root_dir.join(name.to_string());
        open_file.path = Some(path.clone());
        open_file.item_count = 1;
        path
    }
}

impl FileOrchestrator for BatchFileOrchestrator {
    fn writable_file(&self, requested_size: u64, force_new_file: bool) -> Option<PathBuf> {
        if requested_size > self.config.max_batch_size {
            internal_log!(
                DEBUG,
                MAINTAINER_TELEMETRY,
                event_names::WRITE_DROPPED,
                requested_bytes = requested_size,
                max_bytes = self.config.max_batch_size,
                "Requested size does not fit in any batch file"
            );
            return None;
        }
        if !self.is_root_valid(true) {
            return None;
        }

        if self.can_do_cleanup() {
            let locked = self
                .locked_files
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            let files = self.delete_obsolete_files(self.list_batch_files(), &locked);
            self.free_space_if_needed(&files, &locked);
            self.mark_cleanup();
        }

        let mut open_file = self.open_file.lock().unwrap_or_else(PoisonError::into_inner);
        if !force_new_file {
            if let Some(file) = self.reusable_file(&mut open_file, requested_size) {
                return Some(file);
            }
        }
        Some(self.create_new_file(&mut open_file))
    }

    // `excluded` may be the shared locked set with its lock held by the caller.
    fn readable_file(&self, excluded: &HashSet<PathBuf>) -> Option<PathBuf> {
        if !self.is_root_valid(false) {
            return None;
        }

        let files = self.delete_obsolete_files(self.list_batch_files(), excluded);
        self.mark_cleanup();

        files
            .into_iter()
            .find(|(ts, path)| {
                !excluded.contains(path)
                    && !self.is_recent(*ts, self.recent_read_delay_ms)
                    && !self.is_open(path, *ts)
            })
            .map(|(_, path)| path)
    }

    fn all_files(&self) -> Vec<PathBuf> {
        if !self.is_root_valid(false) {
            return Vec::new();
        }
        self.list_batch_files()
            .into_iter()
            .map(|(_, path)| path)
            .collect()
    }

    fn flushable_files(&self) -> Vec<PathBuf> {
        if !self.is_root_valid(false) {
            return Vec::new();
        }
        self.list_batch_files()
            .into_iter()
            .filter(|(ts, path)| !self.is_open(path, *ts))
            .map(|(_, path)| path)
            .collect()
    }

    fn metadata_file(&self, batch_file: &Path) -> Option<PathBuf> {
        if batch_file.parent() != Some(self.root_dir.as_path()) {
            // Expected right after a migration moved the batch elsewhere.
            internal_log!(
                DEBUG,
                MAINTAINER_TELEMETRY,
                event_names::FOREIGN_BATCH_FILE,
                path = %batch_file.display(),
                root = %self.root_dir.display(),
                "The file provided doesn't belong to the current folder"
            );
        }

        if batch_timestamp(batch_file).is_some() {
            Some(metadata_path(batch_file))
        } else {
            internal_log!(
                ERROR,
                MAINTAINER_TELEMETRY,
                event_names::NOT_BATCH_FILE,
                path = %batch_file.display(),
                "The file provided is not a batch file"
            );
            None
        }
    }

    fn root_dir(&self) -> Option<PathBuf> {
        if self.root_dir.exists() && !self.is_root_valid(false) {
            return None;
        }
        Some(self.root_dir.clone())
    }
}

/// Creation timestamp encoded in a batch file name.
pub fn batch_timestamp(path: &Path) -> Option<i64> {
    path.file_name()?
        .to_str()?
        .parse::<u64>()
        .ok()
        .and_then(|ts| i64::try_from(ts).ok())
}

/// `<batch file>_metadata`.
pub fn metadata_path(batch_file: &Path) -> PathBuf {
    let mut name = batch_file
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(METADATA_SUFFIX);
    batch_file.with_file_name(name)
}

/// Config durations are unsigned; anything past `i64::MAX` means "never".
fn clamp_millis(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn file_len(path: &Path) -> u64 {
    fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}
