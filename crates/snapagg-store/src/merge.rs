//! Idempotent merge of one worker result into the table.

use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use std::collections::HashSet;

use snapagg_common::{MetricRow, MetricTuple, NewMetric};

use crate::error::StoreError;
use crate::table::{MetricTable, Upsert};

/// Why a tuple was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectKind {
    MalformedValue,
    EmptyMetricTitle,
}

/// A tuple that did not make it into the table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RejectedTuple {
    pub metric_title: String,
    pub category: String,
    pub sub_category: String,
    pub kind: RejectKind,
    pub reason: String,
}

/// What one merge did.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergeReport {
    pub source: String,
    pub date: NaiveDate,
    pub inserted: usize,
    pub updated: usize,
    pub duplicates_collapsed: usize,
    pub rejected: Vec<RejectedTuple>,
    /// `(metric_title, source)` pairs never seen before this merge.
    pub new_metrics: Vec<NewMetric>,
}

impl MergeReport {
    fn empty(source: &str, date: NaiveDate) -> Self {
        MergeReport {
            source: source.to_string(),
            date,
            inserted: 0,
            updated: 0,
            duplicates_collapsed: 0,
            rejected: Vec::new(),
            new_metrics: Vec::new(),
        }
    }

    /// Rows written, counting both inserts and replacements.
    pub fn rows_merged(&self) -> usize {
        self.inserted + self.updated
    }
}

/// Merge `tuples` for `(source, date)` into `table`.
///
/// `seen` is the set of `(metric_title, source)` pairs known before this
/// merge; pairs observed for the first time are added to it and reported
/// in `new_metrics`. Rows of other dates and other sources are untouched.
pub fn merge_tuples(
    table: &mut MetricTable,
    seen: &mut HashSet<NewMetric>,
    source: &str,
    date: NaiveDate,
    now: NaiveDateTime,
    tuples: &[MetricTuple],
) -> Result<MergeReport, StoreError> {
    if source.trim().is_empty() {
        return Err(StoreError::InvalidSource(source.to_string()));
    }

    let mut report = MergeReport::empty(source, date);

    for tuple in tuples {
        if tuple.metric_title.trim().is_empty() {
            report.rejected.push(reject(
                tuple,
                RejectKind::EmptyMetricTitle,
                "metric_title is empty".to_string(),
            ));
            continue;
        }

        let value = match tuple.value.to_number() {
            Ok(v) => v,
            Err(err) => {
                tracing::warn!(
                    source = %source,
                    metric_title = %tuple.metric_title,
                    category = %tuple.category,
                    error = %err,
                    "rejecting malformed value"
                );
                report
                    .rejected
                    .push(reject(tuple, RejectKind::MalformedValue, err.to_string()));
                continue;
            }
        };

        let metric = NewMetric::new(tuple.metric_title.clone(), source);
        if seen.insert(metric.clone()) {
            report.new_metrics.push(metric);
        }

        let row = MetricRow {
            date,
            timestamp: now,
            source: source.to_string(),
            metric_title: tuple.metric_title.clone(),
            category: tuple.category.clone(),
            sub_category: tuple.sub_category_or_empty().to_string(),
            value,
        };
        match table.upsert(row) {
            Upsert::Inserted => report.inserted += 1,
            Upsert::Updated => report.updated += 1,
        }
    }

    Ok(report)
}

fn reject(tuple: &MetricTuple, kind: RejectKind, reason: String) -> RejectedTuple {
    RejectedTuple {
        metric_title: tuple.metric_title.clone(),
        category: tuple.category.clone(),
        sub_category: tuple.sub_category_or_empty().to_string(),
        kind,
        reason,
    }
}
