//! Fuzz target for data dictionary parsing.
//!
//! A hand-edited dictionary document must never panic the parser, and
//! rendering what was parsed must not invent entries.

#![no_main]

use libfuzzer_sys::fuzz_target;
use snapagg_store::DataDictionary;

fuzz_target!(|data: &str| {
    let dictionary = DataDictionary::parse(data);
    let reparsed = DataDictionary::parse(&dictionary.render());
    assert!(reparsed.len() <= dictionary.len());
});
