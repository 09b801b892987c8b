//! Age-based pruning of the table.

use chrono::{Days, NaiveDate};
use std::collections::BTreeSet;

use crate::table::MetricTable;

/// Oldest date kept when retaining `days` days back from `today`.
///
/// `None` when retention is disabled (`days == 0`).
pub fn retention_cutoff(today: NaiveDate, days: u32) -> Option<NaiveDate> {
    if days == 0 {
        return None;
    }
    today.checked_sub_days(Days::new(u64::from(days)))
}

/// What a retention pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Pruned {
    pub removed: usize,
    /// Rows older than the cutoff kept because their date was written this run.
    pub kept: usize,
}

/// Remove rows dated before the cutoff.
///
/// Dates in `protected` (the ones merged this run) are never pruned, so a
/// backfill of an old date persists what it merged.
pub fn apply_retention(
    table: &mut MetricTable,
    today: NaiveDate,
    days: u32,
    protected: &BTreeSet<NaiveDate>,
) -> Pruned {
    let Some(cutoff) = retention_cutoff(today, days) else {
        return Pruned::default();
    };
    let kept = table
        .rows()
        .iter()
        .filter(|row| row.date < cutoff && protected.contains(&row.date))
        .count();
    let removed = table.prune_before(cutoff, |date| protected.contains(&date));
    if removed > 0 {
        tracing::info!(
            removed,
            cutoff = %cutoff,
            retention_days = days,
            "pruned rows past retention"
        );
    }
    if kept > 0 {
        tracing::warn!(
            kept,
            cutoff = %cutoff,
            retention_days = days,
            "rows merged this run are older than retention; kept until the next run"
        );
    }
    Pruned { removed, kept }
}
