//! Fuzz target for settings.json parsing and validation.

#![no_main]

use libfuzzer_sys::fuzz_target;
use snapagg_config::{validate_settings, Settings};

fuzz_target!(|data: &[u8]| {
    // Should never panic, only return an error
    if let Ok(settings) = serde_json::from_slice::<Settings>(data) {
        let _ = validate_settings(&settings);
    }
});
