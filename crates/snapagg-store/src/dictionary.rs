//! The data dictionary: one documented entry per `(metric_title, source)`.
//!
//! The document is Markdown meant for humans. Descriptions start as a
//! placeholder and are expected to be edited by hand, so loading parses the
//! existing document and entries already present are never rewritten.

use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use std::collections::HashSet;
use std::path::Path;

use snapagg_common::{NewMetric, TIMESTAMP_FORMAT};

use crate::error::StoreError;
use crate::fsutil::write_atomic;

/// Marker heading that precedes the metrics table.
pub const TRACKED_METRICS_HEADING: &str = "### Tracked Metrics";

const DOCUMENT_HEADER: &str = "# Data Dictionary
## KPI Snapshots Schema Documentation

This file is **automatically generated** by the snapshot aggregator.
New metrics are documented here as they are detected. Descriptions may be
edited by hand; existing entries are never rewritten.

### CSV Structure
| Column | Description |
| :--- | :--- |
| date | The date of the snapshot (YYYY-MM-DD) |
| timestamp | Last update timestamp for the row |
| source | Identifier of the data source/worker |
| metric_title | Name of the report/metric being tracked |
| category | Primary grouping (e.g., 'Feb 2026', 'Close', 'true', 'total') |
| sub_category | Secondary grouping when a table has 3+ columns |
| value | The numeric value (count, percentage, or duration in seconds) |

---

";

const TABLE_HEADER: &str = "| Metric Title | Source | Description | First Detected |
| :--- | :--- | :--- | :--- |
";

/// One documented metric.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataDictionaryEntry {
    pub metric_title: String,
    pub source: String,
    pub description: String,
    pub first_detected: NaiveDateTime,
}

impl DataDictionaryEntry {
    pub fn metric(&self) -> NewMetric {
        NewMetric::new(self.metric_title.clone(), self.source.clone())
    }
}

/// Placeholder description for a newly detected metric.
pub fn placeholder_description(source: &str) -> String {
    format!("Report from {}. [Add description]", source)
}

/// Entries in first-seen order plus a membership index.
#[derive(Debug, Clone, Default)]
pub struct DataDictionary {
    entries: Vec<DataDictionaryEntry>,
    known: HashSet<NewMetric>,
}

impl DataDictionary {
    pub fn new() -> Self {
        DataDictionary::default()
    }

    /// Load the document at `path`. A missing file is an empty dictionary.
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        match std::fs::read_to_string(path) {
            Ok(text) => Ok(DataDictionary::parse(&text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(DataDictionary::new()),
            Err(e) => Err(StoreError::io(path, e)),
        }
    }

    /// Parse a rendered document. Rows that do not parse are skipped.
    pub fn parse(text: &str) -> Self {
        let mut dictionary = DataDictionary::new();
        let mut in_table = false;

        for (idx, line) in text.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.starts_with("### ") {
                in_table = trimmed == TRACKED_METRICS_HEADING;
                continue;
            }
            if !in_table || !trimmed.starts_with('|') {
                continue;
            }

            let cells = split_row(trimmed);
            if is_header_row(&cells) || is_separator_row(&cells) {
                continue;
            }
            match parse_entry(&cells) {
                Some(entry) => {
                    if !dictionary.insert(entry) {
                        tracing::warn!(line = idx + 1, "duplicate data dictionary row skipped");
                    }
                }
                None => {
                    tracing::warn!(line = idx + 1, row = %trimmed, "unparseable data dictionary row skipped");
                }
            }
        }

        dictionary
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[DataDictionaryEntry] {
        &self.entries
    }

    pub fn contains(&self, metric: &NewMetric) -> bool {
        self.known.contains(metric)
    }

    pub fn metrics(&self) -> impl Iterator<Item = NewMetric> + '_ {
        self.entries.iter().map(DataDictionaryEntry::metric)
    }

    /// Add an entry for each metric not already documented.
    ///
    /// Returns how many entries were added.
    pub fn record_new_metrics(&mut self, metrics: &[NewMetric], now: NaiveDateTime) -> usize {
        let mut added = 0;
        for metric in metrics {
            if metric.metric_title.is_empty() || self.contains(metric) {
                continue;
            }
            self.insert(DataDictionaryEntry {
                metric_title: metric.metric_title.clone(),
                source: metric.source.clone(),
                description: placeholder_description(&metric.source),
                first_detected: now,
            });
            added += 1;
        }
        added
    }

    /// Render the full document.
    ///
    /// Entries are grouped by source in lexicographic order and keep their
    /// first-seen order within a source.
    pub fn render(&self) -> String {
        let mut ordered: Vec<&DataDictionaryEntry> = self.entries.iter().collect();
        ordered.sort_by(|a, b| a.source.cmp(&b.source));

        let mut out = String::with_capacity(DOCUMENT_HEADER.len() + 128 * ordered.len());
        out.push_str(DOCUMENT_HEADER);
        out.push_str(TRACKED_METRICS_HEADING);
        out.push_str("\n\n");
        out.push_str(TABLE_HEADER);
        for entry in ordered {
            out.push_str(&format!(
                "| {} | {} | {} | {} |\n",
                escape_cell(&entry.metric_title),
                escape_cell(&entry.source),
                escape_cell(&entry.description),
                entry.first_detected.format(TIMESTAMP_FORMAT)
            ));
        }
        out
    }

    /// Render and write atomically.
    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        write_atomic(path, self.render().as_bytes()).map_err(|e| StoreError::Dictionary {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })
    }

    fn insert(&mut self, entry: DataDictionaryEntry) -> bool {
        if !self.known.insert(entry.metric()) {
            return false;
        }
        self.entries.push(entry);
        true
    }
}

/// Escape a value for one table cell so that parsing gives it back exactly.
///
/// `\`, `|` and line breaks are backslash-escaped; whitespace at either end
/// is escaped so cell padding can be trimmed on load.
fn escape_cell(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    let last = text.chars().count().saturating_sub(1);
    for (i, c) in text.chars().enumerate() {
        let edge = i == 0 || i == last;
        match c {
            '\\' => out.push_str("\\\\"),
            '|' => out.push_str("\\|"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            ' ' if edge => out.push_str("\\s"),
            c if edge && c.is_whitespace() => out.push_str(&format!("\\u{{{:x}}}", c as u32)),
            c => out.push(c),
        }
    }
    out
}

/// Inverse of [`escape_cell`]. Unknown escapes are kept verbatim.
fn unescape_cell(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('|') => out.push('|'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('s') => out.push(' '),
            Some('u') => {
                let rest = chars.as_str();
                let decoded = rest
                    .strip_prefix('{')
                    .and_then(|r| r.split_once('}'))
                    .and_then(|(hex, tail)| {
                        let ch = u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)?;
                        Some((ch, tail))
                    });
                match decoded {
                    Some((ch, tail)) => {
                        out.push(ch);
                        chars = tail.chars();
                    }
                    None => out.push_str("\\u"),
                }
            }
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// Split a Markdown table row on unescaped pipes, then unescape each cell.
fn split_row(line: &str) -> Vec<String> {
    let body = line.strip_prefix('|').unwrap_or(line);
    let mut cells = Vec::new();
    let mut current = String::new();
    let mut chars = body.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                current.push(c);
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            '|' => cells.push(unescape_cell(std::mem::take(&mut current).trim())),
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        cells.push(unescape_cell(current.trim()));
    }
    cells
}

fn is_header_row(cells: &[String]) -> bool {
    cells.first().map(|c| c.as_str()) == Some("Metric Title")
}

fn is_separator_row(cells: &[String]) -> bool {
    !cells.is_empty()
        && cells.iter().all(|c| {
            let inner = c.trim_matches(':');
            !inner.is_empty() && inner.chars().all(|ch| ch == '-')
        })
}

fn parse_entry(cells: &[String]) -> Option<DataDictionaryEntry> {
    if cells.len() != 4 || cells[0].is_empty() || cells[1].is_empty() {
        return None;
    }
    Some(DataDictionaryEntry {
        metric_title: cells[0].clone(),
        source: cells[1].clone(),
        description: cells[2].clone(),
        first_detected: parse_first_detected(&cells[3])?,
    })
}

fn parse_first_detected(text: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(text, TIMESTAMP_FORMAT)
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}
