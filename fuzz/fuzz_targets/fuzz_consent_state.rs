//! Fuzz target for the persisted consent state file.
//!
//! A corrupt state file must surface as an error, never a panic.

#![no_main]

use libfuzzer_sys::fuzz_target;
use tb_storage::PersistedConsent;

fuzz_target!(|data: &[u8]| {
    if let Ok(content) = std::str::from_utf8(data) {
        let _ = PersistedConsent::from_json(content);
    }
});
