//! Property-based tests for wipe and move migrations on real directories.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use proptest::prelude::*;
use tb_common::WipeRetryConfig;
use tb_storage::{DataMigrationOperation, MigrationOutcome, PlainFileHandler};
use tempfile::tempdir;

const START: i64 = 1_700_000_000_000;

fn retry() -> WipeRetryConfig {
    WipeRetryConfig {
        attempts: 2,
        delay_ms: 1,
    }
}

fn snapshot(dir: &Path) -> BTreeMap<String, Vec<u8>> {
    match fs::read_dir(dir) {
        Ok(entries) => entries
            .map(|entry| {
                let path = entry.unwrap().path();
                let name = path.file_name().unwrap().to_string_lossy().into_owned();
                (name, fs::read(&path).unwrap())
            })
            .collect(),
        Err(_) => BTreeMap::new(),
    }
}

fn populate(dir: &Path, offsets: &[u16], tag: &str) {
    fs::create_dir_all(dir).unwrap();
    for offset in offsets {
        let name = START + *offset as i64;
        fs::write(dir.join(name.to_string()), format!("{}-{}", tag, offset)).unwrap();
        if offset % 2 == 0 {
            fs::write(dir.join(format!("{}_metadata", name)), tag).unwrap();
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn move_twice_equals_move_once(
        pending in prop::collection::btree_set(0u16..1000, 0..8),
        granted in prop::collection::btree_set(1000u16..2000, 0..8),
    ) {
        let dir = tempdir().unwrap();
        let from = dir.path().join("logs-pending-v2");
        let to = dir.path().join("logs-v2");
        let pending: Vec<u16> = pending.into_iter().collect();
        let granted: Vec<u16> = granted.into_iter().collect();
        populate(&from, &pending, "pending");
        populate(&to, &granted, "granted");

        let mut expected = snapshot(&to);
        expected.extend(snapshot(&from));

        let handler = PlainFileHandler::new();
        let operation = DataMigrationOperation::move_all(&from, &to);
        prop_assert_eq!(operation.run(&handler, &retry()), MigrationOutcome::Completed);
        let once = snapshot(&to);
        prop_assert_eq!(operation.run(&handler, &retry()), MigrationOutcome::Completed);

        prop_assert_eq!(&once, &expected);
        prop_assert_eq!(snapshot(&to), once);
        prop_assert!(snapshot(&from).is_empty());
    }

    #[test]
    fn move_into_overlapping_names_loses_nothing(
        pending in prop::collection::btree_set(0u16..20, 0..8),
        granted in prop::collection::btree_set(0u16..20, 0..8),
    ) {
        let dir = tempdir().unwrap();
        let from = dir.path().join("logs-pending-v2");
        let to = dir.path().join("logs-v2");
        let pending: Vec<u16> = pending.into_iter().collect();
        let granted: Vec<u16> = granted.into_iter().collect();
        populate(&from, &pending, "pending");
        populate(&to, &granted, "granted");

        let mut expected: Vec<Vec<u8>> = snapshot(&to)
            .into_values()
            .chain(snapshot(&from).into_values())
            .collect();
        expected.sort();
        let granted_before = snapshot(&to);

        let handler = PlainFileHandler::new();
        let operation = DataMigrationOperation::move_all(&from, &to);
        prop_assert_eq!(operation.run(&handler, &retry()), MigrationOutcome::Completed);

        let after = snapshot(&to);
        let mut contents: Vec<Vec<u8>> = after.values().cloned().collect();
        contents.sort();
        prop_assert_eq!(contents, expected);
        for (name, content) in &granted_before {
            prop_assert_eq!(after.get(name), Some(content));
        }
        prop_assert!(snapshot(&from).is_empty());
    }

    #[test]
    fn wipe_twice_equals_wipe_once(
        offsets in prop::collection::btree_set(0u16..1000, 0..8),
    ) {
        let dir = tempdir().unwrap();
        let target = dir.path().join("logs-pending-v2");
        let offsets: Vec<u16> = offsets.into_iter().collect();
        populate(&target, &offsets, "pending");

        let handler = PlainFileHandler::new();
        let operation = DataMigrationOperation::wipe(&target);
        prop_assert_eq!(operation.run(&handler, &retry()), MigrationOutcome::Completed);
        prop_assert!(!target.exists());
        prop_assert_eq!(operation.run(&handler, &retry()), MigrationOutcome::Completed);
        prop_assert!(!target.exists());
    }
}

#[test]
fn operations_without_a_directory_are_skipped() {
    let handler = PlainFileHandler::new();
    let operations = [
        DataMigrationOperation::NoOp,
        DataMigrationOperation::Wipe { dir: None },
        DataMigrationOperation::Move {
            from: None,
            to: Some("/tmp/unused".into()),
        },
        DataMigrationOperation::Move {
            from: Some("/tmp/unused".into()),
            to: None,
        },
    ];
    for operation in &operations {
        assert_eq!(operation.run(&handler, &retry()), MigrationOutcome::Skipped);
    }
}
