//! CSV persistence of the snapshot table via Arrow.
//!
//! The file is read in full and written in full. Anything that does not
//! parse back into well-formed rows is reported as corruption; the file
//! itself is never modified on a failed load.

use arrow::array::{Array, ArrayRef, AsArray, StringArray};
use arrow::csv::{ReaderBuilder, WriterBuilder};
use arrow::record_batch::RecordBatch;
use chrono::{NaiveDate, NaiveDateTime};
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use snapagg_common::{format_metric_value, MetricRow, DATE_FORMAT, TIMESTAMP_FORMAT};

use crate::error::StoreError;
use crate::fsutil::write_atomic;
use crate::schema::{
    header_line, snapshot_schema, COL_CATEGORY, COL_DATE, COL_METRIC_TITLE, COL_SOURCE,
    COL_SUB_CATEGORY, COL_TIMESTAMP, COL_VALUE, COLUMNS,
};
use crate::table::MetricTable;

const BATCH_SIZE: usize = 8192;

/// Load the table at `path`. A missing or empty file is an empty table.
pub fn load_table(path: &Path) -> Result<MetricTable, StoreError> {
    let content = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "no persisted table yet");
            return Ok(MetricTable::new());
        }
        Err(e) => return Err(StoreError::io(path, e)),
    };
    let text = String::from_utf8(content)
        .map_err(|e| StoreError::corrupt(path, format!("not valid UTF-8: {}", e)))?;

    let rows = parse_rows(path, &text)?;
    let count = rows.len();
    let table = MetricTable::from_rows(rows).map_err(|key| {
        StoreError::corrupt(
            path,
            format!(
                "duplicate row for ({}, {}, {}, {}, {})",
                key.date.format(DATE_FORMAT),
                key.source,
                key.metric_title,
                key.category,
                key.sub_category
            ),
        )
    })?;
    tracing::debug!(path = %path.display(), rows = count, "loaded persisted table");
    Ok(table)
}

/// Parse CSV text into rows. `path` is only used for error reporting.
pub fn parse_rows(path: &Path, text: &str) -> Result<Vec<MetricRow>, StoreError> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }

    let first_line = text.lines().next().unwrap_or("").trim_end_matches('\r');
    if first_line != header_line() {
        return Err(StoreError::corrupt(
            path,
            format!("unexpected header {:?}", first_line),
        ));
    }

    let reader = ReaderBuilder::new(snapshot_schema())
        .with_header(true)
        .with_batch_size(BATCH_SIZE)
        .build(Cursor::new(text.as_bytes()))
        .map_err(|e| StoreError::corrupt(path, e.to_string()))?;

    let mut rows = Vec::new();
    // Line 1 is the header.
    let mut line = 1usize;
    for batch in reader {
        let batch = batch.map_err(|e| StoreError::corrupt(path, e.to_string()))?;
        let columns = StringColumns::new(path, &batch)?;
        for idx in 0..batch.num_rows() {
            line += 1;
            rows.push(columns.row(path, idx, line)?);
        }
    }
    Ok(rows)
}

struct StringColumns<'a> {
    columns: Vec<&'a StringArray>,
}

impl<'a> StringColumns<'a> {
    fn new(path: &Path, batch: &'a RecordBatch) -> Result<Self, StoreError> {
        let columns = (0..COLUMNS.len())
            .map(|idx| {
                batch.column(idx).as_string_opt::<i32>().ok_or_else(|| {
                    StoreError::corrupt(path, format!("column {} is not text", COLUMNS[idx]))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(StringColumns { columns })
    }

    fn cell(&self, col: usize, row: usize) -> &'a str {
        let array = self.columns[col];
        if array.is_null(row) {
            ""
        } else {
            array.value(row)
        }
    }

    fn row(&self, path: &Path, idx: usize, line: usize) -> Result<MetricRow, StoreError> {
        let bad = |what: &str, text: &str| {
            StoreError::corrupt(path, format!("line {}: invalid {} {:?}", line, what, text))
        };

        let date_text = self.cell(COL_DATE, idx);
        let date = NaiveDate::parse_from_str(date_text, DATE_FORMAT)
            .map_err(|_| bad("date", date_text))?;

        let ts_text = self.cell(COL_TIMESTAMP, idx);
        let timestamp = NaiveDateTime::parse_from_str(ts_text, TIMESTAMP_FORMAT)
            .map_err(|_| bad("timestamp", ts_text))?;

        let source = self.cell(COL_SOURCE, idx);
        if source.is_empty() {
            return Err(bad("source", source));
        }
        let metric_title = self.cell(COL_METRIC_TITLE, idx);
        if metric_title.is_empty() {
            return Err(bad("metric_title", metric_title));
        }

        let value_text = self.cell(COL_VALUE, idx);
        let value: f64 = value_text
            .trim()
            .parse()
            .ok()
            .filter(|v: &f64| v.is_finite())
            .ok_or_else(|| bad("value", value_text))?;

        Ok(MetricRow {
            date,
            timestamp,
            source: source.to_string(),
            metric_title: metric_title.to_string(),
            category: self.cell(COL_CATEGORY, idx).to_string(),
            sub_category: self.cell(COL_SUB_CATEGORY, idx).to_string(),
            value,
        })
    }
}

fn text_column<F>(rows: &[&MetricRow], f: F) -> ArrayRef
where
    F: Fn(&MetricRow) -> String,
{
    Arc::new(StringArray::from_iter_values(rows.iter().map(|r| f(*r))))
}

/// Build a record batch from rows in the given order.
pub fn rows_to_batch(rows: &[&MetricRow]) -> Result<RecordBatch, StoreError> {
    let columns: Vec<ArrayRef> = vec![
        text_column(rows, |r| r.date.format(DATE_FORMAT).to_string()),
        text_column(rows, |r| r.timestamp.format(TIMESTAMP_FORMAT).to_string()),
        text_column(rows, |r| r.source.clone()),
        text_column(rows, |r| r.metric_title.clone()),
        text_column(rows, |r| r.category.clone()),
        text_column(rows, |r| r.sub_category.clone()),
        text_column(rows, |r| format_metric_value(r.value)),
    ];
    Ok(RecordBatch::try_new(snapshot_schema(), columns)?)
}

/// Encode rows as CSV bytes, header included even when there are no rows.
pub fn encode_csv(rows: &[&MetricRow]) -> Result<Vec<u8>, StoreError> {
    let batch = rows_to_batch(rows)?;
    let mut buffer = Vec::new();
    {
        let mut writer = WriterBuilder::new().with_header(true).build(&mut buffer);
        writer.write(&batch)?;
    }
    Ok(buffer)
}

/// Write the whole table to `path` atomically, in output order.
pub fn save_table(path: &Path, table: &MetricTable) -> Result<(), StoreError> {
    let bytes = encode_csv(&table.sorted_rows())?;
    write_atomic(path, &bytes)?;
    tracing::debug!(path = %path.display(), rows = table.len(), "table written");
    Ok(())
}

/// Render rows as an aligned text table for terminal display.
pub fn render_pretty(rows: &[&MetricRow]) -> Result<String, StoreError> {
    let batch = rows_to_batch(rows)?;
    Ok(arrow::util::pretty::pretty_format_batches(&[batch])?.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn row(title: &str, category: &str, sub: &str, value: f64) -> MetricRow {
        MetricRow {
            date: NaiveDate::from_ymd_opt(2026, 2, 8).unwrap(),
            timestamp: NaiveDate::from_ymd_opt(2026, 2, 8)
                .unwrap()
                .and_hms_opt(14, 5, 9)
                .unwrap(),
            source: "smax".into(),
            metric_title: title.into(),
            category: category.into(),
            sub_category: sub.into(),
            value,
        }
    }

    #[test]
    fn missing_and_empty_files_are_empty_tables() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("kpi_snapshots.csv");
        assert!(load_table(&path).unwrap().is_empty());

        std::fs::write(&path, "").unwrap();
        assert!(load_table(&path).unwrap().is_empty());

        std::fs::write(&path, format!("{}\n", header_line())).unwrap();
        assert!(load_table(&path).unwrap().is_empty());
    }

    #[test]
    fn encodes_integral_values_without_fraction() {
        let r = row("BIA Requests", "total", "", 47.0);
        let text = String::from_utf8(encode_csv(&[&r]).unwrap()).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some(header_line().as_str()));
        assert_eq!(
            lines.next(),
            Some("2026-02-08,2026-02-08 14:05:09,smax,BIA Requests,total,,47")
        );
    }

    #[test]
    fn header_written_for_empty_table() {
        let text = String::from_utf8(encode_csv(&[]).unwrap()).unwrap();
        assert_eq!(text.trim_end(), header_line());
    }

    #[test]
    fn save_then_load_preserves_rows() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("kpi_snapshots.csv");
        let table = MetricTable::from_rows(vec![
            row("Tickets, by status", "open", "P1 | EMEA", 9.51),
            row("Wait \"time\"", "total", "", 5025.0),
        ])
        .unwrap();
        save_table(&path, &table).unwrap();

        let loaded = load_table(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        for original in table.rows() {
            assert_eq!(loaded.get(&original.key()), Some(original));
        }
    }

    #[test]
    fn wrong_header_is_corruption() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("kpi_snapshots.csv");
        std::fs::write(&path, "date,source,value\n2026-02-08,smax,1\n").unwrap();
        let err = load_table(&path).unwrap_err();
        assert!(err.is_corruption());
        // Left untouched.
        assert!(std::fs::read_to_string(&path).unwrap().starts_with("date,source"));
    }

    #[test]
    fn bad_cells_are_corruption() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("kpi_snapshots.csv");
        let header = header_line();

        for body in [
            "not-a-date,2026-02-08 10:00:00,smax,A,total,,1",
            "2026-02-08,yesterday,smax,A,total,,1",
            "2026-02-08,2026-02-08 10:00:00,smax,A,total,,lots",
            "2026-02-08,2026-02-08 10:00:00,,A,total,,1",
            "2026-02-08,2026-02-08 10:00:00,smax,A,total",
        ] {
            std::fs::write(&path, format!("{}\n{}\n", header, body)).unwrap();
            assert!(load_table(&path).unwrap_err().is_corruption(), "{}", body);
        }
    }

    #[test]
    fn duplicate_keys_are_corruption() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("kpi_snapshots.csv");
        let line = "2026-02-08,2026-02-08 10:00:00,smax,A,total,,1";
        std::fs::write(&path, format!("{}\n{}\n{}\n", header_line(), line, line)).unwrap();
        let err = load_table(&path).unwrap_err();
        assert!(err.to_string().contains("duplicate row"));
    }

    #[test]
    fn pretty_rendering_includes_values() {
        let r = row("BIA Requests", "total", "", 42.0);
        let out = render_pretty(&[&r]).unwrap();
        assert!(out.contains("BIA Requests"));
        assert!(out.contains("| 42"));
    }
}
