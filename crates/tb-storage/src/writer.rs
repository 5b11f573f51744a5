//! Event writers.
//!
//! [`BatchFileDataWriter`] does the actual serialization and file I/O on the
//! calling thread. [`ScheduledWriter`] moves that work onto the serial queue
//! so producers never wait on disk.

use std::marker::PhantomData;
use std::sync::Arc;

use serde::Serialize;
use tb_common::FilePersistenceConfig;

use crate::executor::TaskExecutor;
use crate::file::FileHandler;
use crate::logging::{event_names, MAINTAINER, USER};
use crate::orchestrator::FileOrchestrator;

/// One serialized event plus optional batch metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerializedEvent {
    pub data: Vec<u8>,
    /// Replaces the batch file's sidecar when present.
    pub metadata: Option<Vec<u8>>,
}

impl SerializedEvent {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        SerializedEvent {
            data: data.into(),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: impl Into<Vec<u8>>) -> Self {
        self.metadata = Some(metadata.into());
        self
    }
}

/// Turns an event into bytes. `None` drops the event.
pub trait EventSerializer<T>: Send + Sync {
    fn serialize(&self, item: &T) -> Option<SerializedEvent>;
}

/// Compact JSON, one event per record.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonEventSerializer;

impl<T: Serialize> EventSerializer<T> for JsonEventSerializer {
    fn serialize(&self, item: &T) -> Option<SerializedEvent> {
        match serde_json::to_vec(item) {
            Ok(data) => Some(SerializedEvent::new(data)),
            Err(e) => {
                internal_log!(
                    ERROR,
                    MAINTAINER,
                    event_names::WRITE_FAILED,
                    error = %e,
                    "Unable to serialize event"
                );
                None
            }
        }
    }
}

/// Write contract offered to event producers. Failures are logged, never
/// returned.
pub trait DataWriter<T>: Send + Sync {
    fn write(&self, item: T);

    fn write_all(&self, items: Vec<T>) {
        for item in items {
            self.write(item);
        }
    }
}

/// Synchronous writer appending serialized events to batch files.
pub struct BatchFileDataWriter<T, S> {
    orchestrator: Arc<dyn FileOrchestrator>,
    serializer: S,
    file_handler: Arc<dyn FileHandler>,
    max_item_size: u64,
    separator: Vec<u8>,
    _item: PhantomData<fn(T)>,
}

impl<T, S: EventSerializer<T>> BatchFileDataWriter<T, S> {
    pub fn new(
        orchestrator: Arc<dyn FileOrchestrator>,
        serializer: S,
        file_handler: Arc<dyn FileHandler>,
        config: &FilePersistenceConfig,
        separator: impl Into<Vec<u8>>,
    ) -> Self {
        BatchFileDataWriter {
            orchestrator,
            serializer,
            file_handler,
            max_item_size: config.max_item_size,
            separator: separator.into(),
            _item: PhantomData,
        }
    }

    fn write_event(&self, event: SerializedEvent) {
        let size = event.data.len() as u64;
        if size > self.max_item_size {
            internal_log!(
                WARN,
                USER,
                event_names::WRITE_DROPPED,
                item_bytes = size,
                max_bytes = self.max_item_size,
                "Event is too big to be stored and was dropped"
            );
            return;
        }

        // No writable file (discarded consent, disk cap) drops the event.
        let Some(file) = self.orchestrator.writable_file(size, false) else {
            return;
        };

        let separator = (!self.separator.is_empty()).then_some(self.separator.as_slice());
        if !self.file_handler.append(&file, &event.data, separator) {
            internal_log!(
                ERROR,
                USER,
                event_names::WRITE_FAILED,
                path = %file.display(),
                "Unable to write event to batch file"
            );
            return;
        }

        if let Some(metadata) = event.metadata {
            let written = self
                .orchestrator
                .metadata_file(&file)
                .map(|meta| self.file_handler.overwrite(&meta, &metadata))
                .unwrap_or(false);
            if !written {
                internal_log!(
                    WARN,
                    MAINTAINER,
                    event_names::METADATA_WRITE_FAILED,
                    path = %file.display(),
                    "Unable to write batch metadata"
                );
            }
        }
    }
}

impl<T, S: EventSerializer<T>> DataWriter<T> for BatchFileDataWriter<T, S> {
    fn write(&self, item: T) {
        if let Some(event) = self.serializer.serialize(&item) {
            self.write_event(event);
        }
    }
}

/// Runs another writer's writes on a [`TaskExecutor`].
pub struct ScheduledWriter<W> {
    inner: Arc<W>,
    executor: Arc<dyn TaskExecutor>,
}

impl<W> ScheduledWriter<W> {
    pub fn new(inner: W, executor: Arc<dyn TaskExecutor>) -> Self {
        ScheduledWriter {
            inner: Arc::new(inner),
            executor,
        }
    }

    fn schedule(&self, name: &str, task: crate::executor::Task) {
        if let Err(e) = self.executor.submit(name, task) {
            internal_log!(
                ERROR,
                MAINTAINER,
                event_names::TASK_REJECTED,
                task = %name,
                error = %e,
                "Unable to schedule write, event dropped"
            );
        }
    }
}

impl<T, W> DataWriter<T> for ScheduledWriter<W>
where
    T: Send + 'static,
    W: DataWriter<T> + 'static,
{
    fn write(&self, item: T) {
        let inner = Arc::clone(&self.inner);
        self.schedule("write", Box::new(move || inner.write(item)));
    }

    fn write_all(&self, items: Vec<T>) {
        let inner = Arc::clone(&self.inner);
        self.schedule("write_all", Box::new(move || inner.write_all(items)));
    }
}
