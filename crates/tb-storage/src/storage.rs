//! Consent-aware batch storage for one feature.
//!
//! Wires the pending and granted directory orchestrators, the consent-aware
//! router and the serial queue together, and exposes:
//! - a writer for producers ([`ConsentAwareStorage::writer`])
//! - the reader contract for the upload pipeline (lock, release, drop)
//!
//! Reads run on the caller's thread. The locked-file set is guarded so that
//! picking a batch and marking it locked is one atomic step.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tb_common::{
    Result, StorageConfig, SystemTimeProvider, TimeProvider, TrackingConsent,
};

use crate::consent::ConsentProvider;
use crate::executor::{SerialExecutor, TaskExecutor};
use crate::file::{FileHandler, PlainFileHandler};
use crate::layout::StorageLayout;
use crate::logging::{event_names, MAINTAINER};
use crate::orchestrator::batch::{metadata_path, LockedFiles};
use crate::orchestrator::{BatchFileOrchestrator, ConsentAwareFileOrchestrator, FileOrchestrator};
use crate::writer::{BatchFileDataWriter, EventSerializer, ScheduledWriter};

/// One batch checked out for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    /// Name of the backing file.
    pub id: String,
    /// File content framed by the configured read prefix and suffix.
    pub data: Vec<u8>,
    pub metadata: Option<Vec<u8>>,
    file: PathBuf,
}

impl Batch {
    pub fn file(&self) -> &Path {
        &self.file
    }
}

/// File count and size of one batch directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DirectoryStats {
    pub path: PathBuf,
    pub files: usize,
    pub bytes: u64,
}

/// Snapshot reported by `tb status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StorageStats {
    pub feature: String,
    pub active_consent: TrackingConsent,
    pub pending: DirectoryStats,
    pub granted: DirectoryStats,
    pub locked_batches: usize,
}

pub struct ConsentAwareStorage {
    layout: StorageLayout,
    config: StorageConfig,
    executor: Arc<SerialExecutor>,
    file_handler: Arc<dyn FileHandler>,
    pending: Arc<BatchFileOrchestrator>,
    granted: Arc<BatchFileOrchestrator>,
    orchestrator: Arc<ConsentAwareFileOrchestrator>,
    locked_files: LockedFiles,
}

impl ConsentAwareStorage {
    /// Open storage for `feature` under `config.root_dir`.
    pub fn open(
        config: StorageConfig,
        feature: &str,
        consent_provider: &dyn ConsentProvider,
    ) -> Result<Self> {
        Self::open_with(
            config,
            feature,
            consent_provider,
            Arc::new(PlainFileHandler::new()),
            Arc::new(SystemTimeProvider),
        )
    }

    /// Open storage with a custom file handler and clock.
    pub fn open_with(
        config: StorageConfig,
        feature: &str,
        consent_provider: &dyn ConsentProvider,
        file_handler: Arc<dyn FileHandler>,
        time: Arc<dyn TimeProvider>,
    ) -> Result<Self> {
        config.validate()?;
        let layout = StorageLayout::new(&config.root_dir, feature, config.schema_version)?;
        let executor = Arc::new(SerialExecutor::new(
            &format!("tb-storage-{}", feature),
            config.queue_capacity,
        )?);

        let pending = Arc::new(BatchFileOrchestrator::new(
            layout.pending_dir(),
            config.persistence.clone(),
            file_handler.clone(),
            time.clone(),
        ));
        let locked_files = LockedFiles::default();
        let granted = Arc::new(
            BatchFileOrchestrator::new(
                layout.granted_dir(),
                config.persistence.clone(),
                file_handler.clone(),
                time,
            )
            .with_locked_files(locked_files.clone()),
        );
        let orchestrator = ConsentAwareFileOrchestrator::new(
            pending.clone(),
            granted.clone(),
            executor.clone(),
            file_handler.clone(),
            config.wipe_retry.clone(),
            consent_provider,
        );

        Ok(ConsentAwareStorage {
            layout,
            config,
            executor,
            file_handler,
            pending,
            granted,
            orchestrator,
            locked_files,
        })
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn active_consent(&self) -> TrackingConsent {
        self.orchestrator.active_consent()
    }

    /// Non-blocking writer for events of type `T`.
    pub fn writer<T, S>(&self, serializer: S) -> ScheduledWriter<BatchFileDataWriter<T, S>>
    where
        S: EventSerializer<T>,
    {
        let inner = BatchFileDataWriter::new(
            self.orchestrator.clone(),
            serializer,
            self.file_handler.clone(),
            &self.config.persistence,
            self.config.separator.as_bytes(),
        );
        ScheduledWriter::new(inner, self.executor.clone())
    }

    /// Lock the oldest readable granted batch and read it.
    pub fn lock_and_read_next(&self) -> Option<Batch> {
        let file = {
            let mut locked = self.locked();
            let file = self.orchestrator.readable_file(&locked)?;
            locked.insert(file.clone());
            file
        };

        let data = self.file_handler.read(
            &file,
            self.config.read_prefix.as_bytes(),
            self.config.read_suffix.as_bytes(),
        );
        let metadata = self
            .granted
            .metadata_file(&file)
            .filter(|meta| meta.exists())
            .map(|meta| self.file_handler.read(&meta, &[], &[]));
        let id = file
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        Some(Batch {
            id,
            data,
            metadata,
            file,
        })
    }

    /// Give a batch back without deleting it; it will be delivered again.
    pub fn release(&self, batch: &Batch) {
        if !self.locked().remove(&batch.file) {
            internal_log!(
                WARN,
                MAINTAINER,
                event_names::BATCH_UNKNOWN,
                batch = %batch.id,
                "Released a batch that was not locked"
            );
        }
    }

    /// Delete a batch and its metadata, then unlock it.
    pub fn drop_batch(&self, batch: &Batch) {
        if !self.file_handler.delete(&batch.file) {
            internal_log!(
                WARN,
                MAINTAINER,
                event_names::BATCH_DELETE_FAILED,
                batch = %batch.id,
                "Unable to delete batch file"
            );
        }
        let meta = metadata_path(&batch.file);
        if meta.exists() && !self.file_handler.delete(&meta) {
            internal_log!(
                WARN,
                MAINTAINER,
                event_names::BATCH_DELETE_FAILED,
                batch = %batch.id,
                "Unable to delete batch metadata"
            );
        }
        self.locked().remove(&batch.file);
    }

    /// Queue deletion of every pending and granted batch.
    pub fn drop_all(&self) {
        let locked_files = Arc::clone(&self.locked_files);
        let orchestrator = Arc::clone(&self.orchestrator);
        let file_handler = Arc::clone(&self.file_handler);

        let task = Box::new(move || {
            locked_files
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clear();
            for file in orchestrator.all_files() {
                file_handler.delete(&file);
                let meta = metadata_path(&file);
                if meta.exists() {
                    file_handler.delete(&meta);
                }
            }
        });

        if let Err(e) = self.executor.submit("drop_all", task) {
            internal_log!(
                ERROR,
                MAINTAINER,
                event_names::TASK_REJECTED,
                task = "drop_all",
                error = %e,
                "Unable to schedule deletion of all batches"
            );
        }
    }

    /// Granted batches that may be uploaded right away.
    pub fn flushable_files(&self) -> Vec<PathBuf> {
        self.orchestrator.flushable_files()
    }

    pub fn stats(&self) -> StorageStats {
        StorageStats {
            feature: self.layout.feature().to_string(),
            active_consent: self.active_consent(),
            pending: directory_stats(self.layout.pending_dir(), self.pending.all_files()),
            granted: directory_stats(self.layout.granted_dir(), self.granted.all_files()),
            locked_batches: self.locked().len(),
        }
    }

    /// Wait for every queued write and migration to finish.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        self.executor.wait_idle(timeout)
    }

    /// Drain the queue and stop its worker.
    pub fn shutdown(&self) {
        self.executor.shutdown();
    }

    fn locked(&self) -> MutexGuard<'_, HashSet<PathBuf>> {
        self.locked_files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

fn directory_stats(path: PathBuf, files: Vec<PathBuf>) -> DirectoryStats {
    let bytes = files
        .iter()
        .filter_map(|file| std::fs::metadata(file).ok())
        .map(|metadata| metadata.len())
        .sum();
    DirectoryStats {
        path,
        files: files.len(),
        bytes,
    }
}
