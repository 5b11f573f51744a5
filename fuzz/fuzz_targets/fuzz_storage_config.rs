//! Fuzz target for storage.json parsing and validation.

#![no_main]

use libfuzzer_sys::fuzz_target;
use tb_common::StorageConfig;

fuzz_target!(|data: &[u8]| {
    if let Ok(config) = serde_json::from_slice::<StorageConfig>(data) {
        let _ = config.validate();
    }
});
