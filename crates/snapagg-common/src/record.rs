//! The normalized metric record model.
//!
//! A [`MetricRow`] is the atomic persisted unit. Its natural key is
//! `(date, source, metric_title, category, sub_category)`: the store keeps at
//! most one row per key, and a later write replaces value and timestamp.
//!
//! Workers do not produce rows. They produce a [`WorkerResult`], an ordered
//! list of [`MetricTuple`]s carrying raw values; the store stamps date,
//! source, and timestamp when merging.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::value::{parse_metric_value, ValueError};

/// Format of the `date` column.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Format of the `timestamp` column.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A value as emitted by a worker: already numeric, or display text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    Number(f64),
    Text(String),
}

impl RawValue {
    /// Resolve to a finite number.
    pub fn to_number(&self) -> Result<f64, ValueError> {
        match self {
            RawValue::Number(v) if v.is_finite() => Ok(*v),
            RawValue::Number(v) => Err(ValueError::NonFinite(v.to_string())),
            RawValue::Text(text) => parse_metric_value(text),
        }
    }
}

impl From<f64> for RawValue {
    fn from(v: f64) -> Self {
        RawValue::Number(v)
    }
}

impl From<i64> for RawValue {
    fn from(v: i64) -> Self {
        RawValue::Number(v as f64)
    }
}

impl From<&str> for RawValue {
    fn from(v: &str) -> Self {
        RawValue::Text(v.to_string())
    }
}

impl From<String> for RawValue {
    fn from(v: String) -> Self {
        RawValue::Text(v)
    }
}

/// One `(metric_title, category, sub_category?, value)` tuple of a worker result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricTuple {
    pub metric_title: String,
    #[serde(default)]
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_category: Option<String>,
    pub value: RawValue,
}

impl MetricTuple {
    pub fn new(
        metric_title: impl Into<String>,
        category: impl Into<String>,
        value: impl Into<RawValue>,
    ) -> Self {
        MetricTuple {
            metric_title: metric_title.into(),
            category: category.into(),
            sub_category: None,
            value: value.into(),
        }
    }

    pub fn with_sub_category(mut self, sub_category: impl Into<String>) -> Self {
        let sub = sub_category.into();
        self.sub_category = if sub.is_empty() { None } else { Some(sub) };
        self
    }

    /// The sub-category as stored: empty when absent.
    pub fn sub_category_or_empty(&self) -> &str {
        self.sub_category.as_deref().unwrap_or("")
    }

    fn result_key(&self) -> (&str, &str, &str) {
        (
            &self.metric_title,
            &self.category,
            self.sub_category_or_empty(),
        )
    }
}

/// Output of one worker invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerResult {
    tuples: Vec<MetricTuple>,
}

impl WorkerResult {
    pub fn new() -> Self {
        WorkerResult::default()
    }

    pub fn from_tuples(tuples: Vec<MetricTuple>) -> Self {
        WorkerResult { tuples }
    }

    pub fn push(&mut self, tuple: MetricTuple) {
        self.tuples.push(tuple);
    }

    pub fn extend(&mut self, other: WorkerResult) {
        self.tuples.extend(other.tuples);
    }

    pub fn len(&self) -> usize {
        self.tuples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tuples.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, MetricTuple> {
        self.tuples.iter()
    }

    pub fn tuples(&self) -> &[MetricTuple] {
        &self.tuples
    }

    /// Collapse tuples sharing `(metric_title, category, sub_category)`.
    ///
    /// The last value wins; the surviving tuple keeps the position of the
    /// first occurrence. Returns the collapsed tuples and how many were dropped.
    pub fn dedup_last_wins(&self) -> (Vec<MetricTuple>, usize) {
        let mut positions: HashMap<(&str, &str, &str), usize> = HashMap::new();
        let mut out: Vec<MetricTuple> = Vec::with_capacity(self.tuples.len());
        let mut collapsed = 0;

        for tuple in &self.tuples {
            match positions.get(&tuple.result_key()) {
                Some(&idx) => {
                    out[idx].value = tuple.value.clone();
                    collapsed += 1;
                }
                None => {
                    positions.insert(tuple.result_key(), out.len());
                    out.push(tuple.clone());
                }
            }
        }

        (out, collapsed)
    }
}

impl IntoIterator for WorkerResult {
    type Item = MetricTuple;
    type IntoIter = std::vec::IntoIter<MetricTuple>;

    fn into_iter(self) -> Self::IntoIter {
        self.tuples.into_iter()
    }
}

impl FromIterator<MetricTuple> for WorkerResult {
    fn from_iter<I: IntoIterator<Item = MetricTuple>>(iter: I) -> Self {
        WorkerResult {
            tuples: iter.into_iter().collect(),
        }
    }
}

/// Natural key of a [`MetricRow`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MetricKey {
    pub date: NaiveDate,
    pub source: String,
    pub metric_title: String,
    pub category: String,
    pub sub_category: String,
}

/// The atomic persisted unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRow {
    pub date: NaiveDate,
    pub timestamp: NaiveDateTime,
    pub source: String,
    pub metric_title: String,
    pub category: String,
    pub sub_category: String,
    pub value: f64,
}

impl MetricRow {
    pub fn key(&self) -> MetricKey {
        MetricKey {
            date: self.date,
            source: self.source.clone(),
            metric_title: self.metric_title.clone(),
            category: self.category.clone(),
            sub_category: self.sub_category.clone(),
        }
    }

    /// The `(metric_title, source)` pair used for drift detection.
    pub fn metric(&self) -> NewMetric {
        NewMetric {
            metric_title: self.metric_title.clone(),
            source: self.source.clone(),
        }
    }
}

/// A `(metric_title, source)` pair, the granularity of schema drift.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NewMetric {
    pub metric_title: String,
    pub source: String,
}

impl NewMetric {
    pub fn new(metric_title: impl Into<String>, source: impl Into<String>) -> Self {
        NewMetric {
            metric_title: metric_title.into(),
            source: source.into(),
        }
    }
}
