//! Mapping of extracted report tables onto metric tuples.

use serde::{Deserialize, Serialize};

use snapagg_common::{MetricTuple, RawValue, WorkerResult};

/// Separator used when several label columns collapse into `sub_category`.
pub const SUB_CATEGORY_SEPARATOR: &str = " | ";

/// A report table as read from a page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedTable {
    /// Report title; becomes `metric_title` for every row.
    pub title: String,
    #[serde(default)]
    pub headers: Vec<String>,
    #[serde(default)]
    pub rows: Vec<Vec<String>>,
    /// Report-level total, emitted as category `total`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<RawValue>,
}

/// Convert one table into tuples.
///
/// - `total`, when present, becomes `(title, "total", "", total)`.
/// - One column: category is the header, value is the cell.
/// - Two columns: `[label, value]`.
/// - Three or more: `[label, sub labels.., value]` with the middle labels
///   joined by `" | "` into `sub_category`.
///
/// With two or more header columns, rows shorter than two cells are skipped.
/// Values stay raw; unparseable ones are rejected at merge time.
pub fn map_table(
    title: &str,
    headers: &[String],
    rows: &[Vec<String>],
    total: Option<&RawValue>,
) -> WorkerResult {
    let mut result = WorkerResult::new();

    if let Some(total) = total {
        result.push(MetricTuple::new(title, "total", total.clone()));
    }

    let width = if headers.is_empty() {
        rows.iter().map(Vec::len).max().unwrap_or(0)
    } else {
        headers.len()
    };

    for row in rows {
        if width <= 1 {
            let Some(cell) = row.first() else { continue };
            let category = headers.first().map(String::as_str).unwrap_or(title);
            result.push(MetricTuple::new(title, category, cell.trim()));
            continue;
        }

        let (label, value) = match (row.first(), row.last()) {
            (Some(label), Some(value)) if row.len() >= 2 => (label, value),
            _ => continue,
        };

        let sub_category = if width >= 3 && row.len() > 2 {
            row[1..row.len() - 1]
                .iter()
                .map(|c| c.trim())
                .collect::<Vec<_>>()
                .join(SUB_CATEGORY_SEPARATOR)
        } else {
            String::new()
        };

        result.push(
            MetricTuple::new(title, label.trim(), value.trim()).with_sub_category(sub_category),
        );
    }

    result
}
