//! In-memory snapshot table with a natural-key index.

use chrono::NaiveDate;
use std::collections::{HashMap, HashSet};

use snapagg_common::{MetricKey, MetricRow, NewMetric};

/// Outcome of a single upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Inserted,
    Updated,
}

/// Rows keyed by `(date, source, metric_title, category, sub_category)`.
///
/// Insertion order is kept so that saving is deterministic; the index maps
/// each natural key to its position in `rows`.
#[derive(Debug, Clone, Default)]
pub struct MetricTable {
    rows: Vec<MetricRow>,
    index: HashMap<MetricKey, usize>,
    metrics: HashSet<NewMetric>,
}

impl MetricTable {
    pub fn new() -> Self {
        MetricTable::default()
    }

    /// Build a table from loaded rows.
    ///
    /// Returns the first repeated key as an error: a stored file with two
    /// rows for one key violates the natural-key invariant.
    pub fn from_rows(rows: Vec<MetricRow>) -> Result<Self, MetricKey> {
        let mut table = MetricTable::new();
        for row in rows {
            let key = row.key();
            if table.index.contains_key(&key) {
                return Err(key);
            }
            table.push(key, row);
        }
        Ok(table)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[MetricRow] {
        &self.rows
    }

    pub fn get(&self, key: &MetricKey) -> Option<&MetricRow> {
        self.index.get(key).map(|&idx| &self.rows[idx])
    }

    /// Whether any row carries this `(metric_title, source)` pair.
    pub fn contains_metric(&self, metric: &NewMetric) -> bool {
        self.metrics.contains(metric)
    }

    /// Distinct `(metric_title, source)` pairs in first-seen row order.
    pub fn metrics_in_order(&self) -> Vec<NewMetric> {
        let mut seen = HashSet::new();
        self.rows
            .iter()
            .map(MetricRow::metric)
            .filter(|m| seen.insert(m.clone()))
            .collect()
    }

    /// Replace the row with the same natural key, or append a new one.
    ///
    /// On replace only `value` and `timestamp` change.
    pub fn upsert(&mut self, row: MetricRow) -> Upsert {
        let key = row.key();
        match self.index.get(&key) {
            Some(&idx) => {
                let existing = &mut self.rows[idx];
                existing.value = row.value;
                existing.timestamp = row.timestamp;
                Upsert::Updated
            }
            None => {
                self.push(key, row);
                Upsert::Inserted
            }
        }
    }

    /// Drop rows dated before `cutoff` unless `keep` holds for their date.
    /// Returns how many were removed.
    pub fn prune_before(&mut self, cutoff: NaiveDate, keep: impl Fn(NaiveDate) -> bool) -> usize {
        let before = self.rows.len();
        self.rows.retain(|row| row.date >= cutoff || keep(row.date));
        let removed = before - self.rows.len();
        if removed > 0 {
            self.reindex();
        }
        removed
    }

    /// Rows ordered for output: by date, source, metric title, then insertion order.
    pub fn sorted_rows(&self) -> Vec<&MetricRow> {
        let mut rows: Vec<&MetricRow> = self.rows.iter().collect();
        rows.sort_by(|a, b| {
            (a.date, &a.source, &a.metric_title).cmp(&(b.date, &b.source, &b.metric_title))
        });
        rows
    }

    /// Rows matching optional date and source filters, in output order.
    pub fn select(&self, date: Option<NaiveDate>, source: Option<&str>) -> Vec<&MetricRow> {
        self.sorted_rows()
            .into_iter()
            .filter(|row| date.map_or(true, |d| row.date == d))
            .filter(|row| source.map_or(true, |s| row.source == s))
            .collect()
    }

    fn push(&mut self, key: MetricKey, row: MetricRow) {
        self.metrics.insert(row.metric());
        self.index.insert(key, self.rows.len());
        self.rows.push(row);
    }

    fn reindex(&mut self) {
        self.index = self
            .rows
            .iter()
            .enumerate()
            .map(|(idx, row)| (row.key(), idx))
            .collect();
        self.metrics = self.rows.iter().map(MetricRow::metric).collect();
    }
}
