//! Fuzz target for metric value parsing.
//!
//! Parsed values must be finite; anything else must be an error, never a panic.

#![no_main]

use libfuzzer_sys::fuzz_target;
use snapagg_common::{format_metric_value, parse_metric_value};

fuzz_target!(|data: &str| {
    if let Ok(value) = parse_metric_value(data) {
        assert!(value.is_finite());
        let _ = format_metric_value(value);
    }
});
