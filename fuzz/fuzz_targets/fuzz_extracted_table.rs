//! Fuzz target for table-shaped worker output.
//!
//! Tests that mapping arbitrary tables onto tuples never panics, whatever
//! the row widths.

#![no_main]

use libfuzzer_sys::fuzz_target;
use snapagg_core::worker::{map_table, ExtractedTable};

fuzz_target!(|data: &[u8]| {
    let Ok(table) = serde_json::from_slice::<ExtractedTable>(data) else {
        return;
    };
    let result = map_table(&table.title, &table.headers, &table.rows, table.total.as_ref());
    for tuple in result.iter() {
        assert_eq!(tuple.metric_title, table.title);
        let _ = tuple.value.to_number();
    }
});
