//! Arrow schema for the persisted snapshot table.
//!
//! Every column is stored as text. Values are formatted by
//! [`snapagg_common::format_metric_value`] and dates/timestamps by the record
//! model's format constants, so the file reads the same in a spreadsheet as
//! it does here. Columns are nullable because the CSV reader turns empty
//! fields into nulls; nulls read back as empty strings.

use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use std::sync::Arc;

/// Column names in file order.
pub const COLUMNS: [&str; 7] = [
    "date",
    "timestamp",
    "source",
    "metric_title",
    "category",
    "sub_category",
    "value",
];

pub const COL_DATE: usize = 0;
pub const COL_TIMESTAMP: usize = 1;
pub const COL_SOURCE: usize = 2;
pub const COL_METRIC_TITLE: usize = 3;
pub const COL_CATEGORY: usize = 4;
pub const COL_SUB_CATEGORY: usize = 5;
pub const COL_VALUE: usize = 6;

fn string_field(name: &str, nullable: bool) -> Field {
    Field::new(name, DataType::Utf8, nullable)
}

/// Schema of the snapshot table.
pub fn snapshot_schema() -> SchemaRef {
    Arc::new(Schema::new(
        COLUMNS
            .iter()
            .map(|name| string_field(name, true))
            .collect::<Vec<_>>(),
    ))
}

/// The exact header line written to the file.
pub fn header_line() -> String {
    COLUMNS.join(",")
}
