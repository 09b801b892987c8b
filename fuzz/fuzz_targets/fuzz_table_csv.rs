//! Fuzz target for persisted table parsing.
//!
//! Arbitrary file content must load or report corruption. Whatever loads
//! must encode and parse back to the same rows.

#![no_main]

use libfuzzer_sys::fuzz_target;
use snapagg_store::csv_io::{encode_csv, parse_rows};
use std::path::Path;

fuzz_target!(|data: &str| {
    let path = Path::new("fuzz.csv");
    let Ok(rows) = parse_rows(path, data) else {
        return;
    };
    let refs: Vec<_> = rows.iter().collect();
    let Ok(bytes) = encode_csv(&refs) else {
        return;
    };
    let text = String::from_utf8_lossy(&bytes);
    let again = parse_rows(path, &text).expect("encoded table must parse");
    assert_eq!(again.len(), rows.len());
});
