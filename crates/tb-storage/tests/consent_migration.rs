//! End-to-end consent transitions against real directories.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tb_common::{FilePersistenceConfig, ManualTimeProvider, StorageConfig, TrackingConsent};
use tb_storage::migration::{decide, transition_kind, MigrationKind};
use tb_storage::{
    ConsentAwareStorage, DataMigrationOperation, DataWriter, EventSerializer, FileHandler,
    PlainFileHandler, SerializedEvent, TrackingConsentProvider,
};
use tempfile::{tempdir, TempDir};

const START: i64 = 1_700_000_000_000;
const IDLE: Duration = Duration::from_secs(10);

struct Raw;

impl EventSerializer<Vec<u8>> for Raw {
    fn serialize(&self, item: &Vec<u8>) -> Option<SerializedEvent> {
        Some(SerializedEvent::new(item.clone()))
    }
}

/// Appends slowly, as a congested disk would.
struct SlowFileHandler {
    inner: PlainFileHandler,
    delay: Duration,
}

impl FileHandler for SlowFileHandler {
    fn append(&self, file: &Path, data: &[u8], separator: Option<&[u8]>) -> bool {
        thread::sleep(self.delay);
        self.inner.append(file, data, separator)
    }

    fn overwrite(&self, file: &Path, data: &[u8]) -> bool {
        self.inner.overwrite(file, data)
    }

    fn read(&self, file: &Path, prefix: &[u8], suffix: &[u8]) -> Vec<u8> {
        self.inner.read(file, prefix, suffix)
    }

    fn delete(&self, target: &Path) -> bool {
        self.inner.delete(target)
    }

    fn move_all(&self, source_dir: &Path, dest_dir: &Path) -> bool {
        self.inner.move_all(source_dir, dest_dir)
    }
}

struct Harness {
    _dir: TempDir,
    clock: Arc<ManualTimeProvider>,
    provider: TrackingConsentProvider,
    storage: ConsentAwareStorage,
}

impl Harness {
    fn new(initial: TrackingConsent, persistence: FilePersistenceConfig) -> Self {
        Self::with_handler(initial, persistence, Arc::new(PlainFileHandler::new()))
    }

    fn with_handler(
        initial: TrackingConsent,
        persistence: FilePersistenceConfig,
        file_handler: Arc<dyn FileHandler>,
    ) -> Self {
        let dir = tempdir().unwrap();
        let config = StorageConfig::default()
            .with_root_dir(dir.path())
            .with_persistence(persistence);
        let clock = Arc::new(ManualTimeProvider::new(START));
        let provider = TrackingConsentProvider::new(initial);
        let storage =
            ConsentAwareStorage::open_with(config, "rum", &provider, file_handler, clock.clone())
                .unwrap();
        assert!(storage.wait_idle(IDLE));
        Harness {
            _dir: dir,
            clock,
            provider,
            storage,
        }
    }

    fn write(&self, data: &[u8]) {
        self.storage.writer::<Vec<u8>, _>(Raw).write(data.to_vec());
        assert!(self.storage.wait_idle(IDLE));
    }

    fn set_consent(&self, consent: TrackingConsent) {
        self.provider.set_consent(consent);
        assert!(self.storage.wait_idle(IDLE));
    }

    fn pending_dir(&self) -> PathBuf {
        self.storage.layout().pending_dir()
    }

    fn granted_dir(&self) -> PathBuf {
        self.storage.layout().granted_dir()
    }
}

/// One item per batch file so N writes give N files.
fn one_item_per_file() -> FilePersistenceConfig {
    FilePersistenceConfig {
        max_items_per_batch: 1,
        ..Default::default()
    }
}

fn contents(dir: &Path) -> BTreeSet<Vec<u8>> {
    match fs::read_dir(dir) {
        Ok(entries) => entries
            .map(|entry| fs::read(entry.unwrap().path()).unwrap())
            .collect(),
        Err(_) => BTreeSet::new(),
    }
}

fn file_count(dir: &Path) -> usize {
    fs::read_dir(dir).map(|entries| entries.count()).unwrap_or(0)
}

#[test]
fn migration_table_covers_every_transition() {
    let pending = Some(PathBuf::from("/root/rum-pending-v2"));
    let granted = Some(PathBuf::from("/root/rum-v2"));
    let dir_of = |consent: Option<TrackingConsent>| match consent {
        None | Some(TrackingConsent::Pending) => pending.clone(),
        Some(TrackingConsent::Granted) => granted.clone(),
        Some(TrackingConsent::NotGranted) => None,
    };

    let expected = |previous: Option<TrackingConsent>, next: TrackingConsent| {
        use TrackingConsent::*;
        match (previous, next) {
            (None, _) | (Some(Pending), NotGranted) => {
                DataMigrationOperation::Wipe { dir: pending.clone() }
            }
            (Some(Granted), Pending) | (Some(NotGranted), Pending) => {
                DataMigrationOperation::Wipe { dir: pending.clone() }
            }
            (Some(Pending), Granted) => DataMigrationOperation::Move {
                from: pending.clone(),
                to: granted.clone(),
            },
            _ => DataMigrationOperation::NoOp,
        }
    };

    let previous_states = [
        None,
        Some(TrackingConsent::Pending),
        Some(TrackingConsent::Granted),
        Some(TrackingConsent::NotGranted),
    ];
    for previous in previous_states {
        for next in TrackingConsent::ALL {
            assert_ne!(transition_kind(previous, next), MigrationKind::Unmapped);
            assert_eq!(
                decide(previous, dir_of(previous), next, dir_of(Some(next))),
                expected(previous, next),
                "{:?} -> {:?}",
                previous,
                next
            );
        }
    }
}

#[test]
fn pending_to_granted_promotes_every_file() {
    let harness = Harness::new(TrackingConsent::Pending, one_item_per_file());
    let payloads = [&b"first"[..], b"second", b"third"];
    for payload in &payloads {
        harness.write(payload);
    }
    assert_eq!(file_count(&harness.pending_dir()), 3);

    harness.set_consent(TrackingConsent::Granted);

    let expected: BTreeSet<Vec<u8>> = payloads.iter().map(|p| p.to_vec()).collect();
    assert_eq!(contents(&harness.granted_dir()), expected);
    assert_eq!(file_count(&harness.pending_dir()), 0);
    assert_eq!(harness.storage.active_consent(), TrackingConsent::Granted);
}

#[test]
fn pending_to_not_granted_discards_pending_data() {
    let harness = Harness::new(TrackingConsent::Pending, one_item_per_file());
    for payload in [&b"one"[..], b"two", b"three"] {
        harness.write(payload);
    }

    harness.set_consent(TrackingConsent::NotGranted);

    assert_eq!(file_count(&harness.pending_dir()), 0);
    assert!(contents(&harness.granted_dir()).is_empty());

    // Writes are discarded while consent is refused.
    harness.write(b"dropped");
    assert_eq!(file_count(&harness.pending_dir()), 0);
    assert_eq!(file_count(&harness.granted_dir()), 0);
}

#[test]
fn back_to_pending_starts_fresh_and_keeps_granted() {
    let harness = Harness::new(TrackingConsent::Pending, one_item_per_file());
    harness.write(b"provisional");
    harness.set_consent(TrackingConsent::Granted);
    harness.write(b"settled");

    harness.set_consent(TrackingConsent::Pending);
    harness.write(b"undecided");
    harness.set_consent(TrackingConsent::NotGranted);

    let expected: BTreeSet<Vec<u8>> = [b"provisional".to_vec(), b"settled".to_vec()]
        .into_iter()
        .collect();
    assert_eq!(contents(&harness.granted_dir()), expected);
    assert_eq!(file_count(&harness.pending_dir()), 0);
}

#[test]
fn granted_pending_granted_scenario_reads_both_batches_in_order() {
    let harness = Harness::new(TrackingConsent::Granted, FilePersistenceConfig::default());
    let batch_a = b"AAAAAAAAAA";
    harness.write(batch_a);

    harness.set_consent(TrackingConsent::Pending);
    assert_eq!(file_count(&harness.granted_dir()), 1);

    harness.clock.advance(100);
    let batch_b = b"BBBBBBBBBB";
    harness.write(batch_b);
    assert_eq!(file_count(&harness.pending_dir()), 1);

    harness.set_consent(TrackingConsent::Granted);
    assert_eq!(file_count(&harness.pending_dir()), 0);

    harness.clock.advance(10_000);
    let first = harness.storage.lock_and_read_next().unwrap();
    let second = harness.storage.lock_and_read_next().unwrap();
    assert!(harness.storage.lock_and_read_next().is_none());

    assert_eq!(first.id, START.to_string());
    assert_eq!(first.data, batch_a);
    assert_eq!(second.id, (START + 100).to_string());
    assert_eq!(second.data, batch_b);
}

#[test]
fn promotion_within_one_millisecond_keeps_both_batches() {
    let harness = Harness::new(TrackingConsent::Granted, FilePersistenceConfig::default());
    harness.write(b"AAAAAAAAAA");
    harness.set_consent(TrackingConsent::Pending);
    harness.write(b"BBBBBBBBBB");

    // Both directories now hold a batch with the same name.
    assert!(harness.pending_dir().join(START.to_string()).exists());
    assert!(harness.granted_dir().join(START.to_string()).exists());

    harness.set_consent(TrackingConsent::Granted);
    harness.clock.advance(10_000);

    let first = harness.storage.lock_and_read_next().unwrap();
    let second = harness.storage.lock_and_read_next().unwrap();
    assert!(harness.storage.lock_and_read_next().is_none());
    assert_eq!(first.id, START.to_string());
    assert_eq!(first.data, b"AAAAAAAAAA");
    assert_eq!(second.id, (START + 1).to_string());
    assert_eq!(second.data, b"BBBBBBBBBB");
}

#[test]
fn write_returns_before_disk_io_completes() {
    let handler = Arc::new(SlowFileHandler {
        inner: PlainFileHandler::new(),
        delay: Duration::from_millis(300),
    });
    let harness = Harness::with_handler(
        TrackingConsent::Granted,
        FilePersistenceConfig::default(),
        handler,
    );
    let writer = harness.storage.writer::<Vec<u8>, _>(Raw);

    let started = Instant::now();
    writer.write(b"slow".to_vec());
    writer.write_all(vec![b"slower".to_vec(), b"slowest".to_vec()]);
    assert!(started.elapsed() < Duration::from_millis(150));

    assert!(harness.storage.wait_idle(IDLE));
    let stored = fs::read(harness.granted_dir().join(START.to_string())).unwrap();
    assert_eq!(stored, b"slow\nslower\nslowest");
}

#[test]
fn migration_runs_before_writes_submitted_after_consent_change() {
    let harness = Harness::new(TrackingConsent::Pending, FilePersistenceConfig::default());
    let writer = harness.storage.writer::<Vec<u8>, _>(Raw);

    // No waiting between the change and the write: ordering comes from the queue.
    writer.write(b"before".to_vec());
    harness.provider.set_consent(TrackingConsent::Granted);
    writer.write(b"after".to_vec());
    assert!(harness.storage.wait_idle(IDLE));

    assert_eq!(file_count(&harness.pending_dir()), 0);
    let granted = contents(&harness.granted_dir());
    assert!(granted.contains(&b"before".to_vec()));
    assert!(granted.contains(&b"after".to_vec()));
}
