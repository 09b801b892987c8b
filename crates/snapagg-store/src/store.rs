//! The snapshot store: one loaded table, one data dictionary, one writer.

use chrono::NaiveDate;
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use snapagg_common::{MetricRow, NewMetric, WorkerResult};

use crate::clock::Clock;
use crate::csv_io::{load_table, save_table};
use crate::dictionary::DataDictionary;
use crate::error::StoreError;
use crate::merge::{merge_tuples, MergeReport};
use crate::retention::apply_retention;
use crate::table::MetricTable;

/// Where the store lives and how long it keeps rows.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub table_path: PathBuf,
    pub dictionary_path: PathBuf,
    pub mirror_path: Option<PathBuf>,
    /// 0 keeps everything.
    pub retention_days: u32,
}

impl StoreOptions {
    /// Default file names inside `output_dir`, no mirror, no retention.
    pub fn in_dir(output_dir: &Path) -> Self {
        StoreOptions {
            table_path: output_dir.join(crate::TABLE_FILENAME),
            dictionary_path: output_dir.join(crate::DICTIONARY_FILENAME),
            mirror_path: None,
            retention_days: 0,
        }
    }
}

/// What a save wrote.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SaveReport {
    pub rows: usize,
    pub pruned: usize,
    /// Rows merged this run that are already older than the retention window.
    pub kept_past_retention: usize,
    pub dictionary_added: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mirror_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dictionary_error: Option<String>,
}

/// Loaded table plus data dictionary.
///
/// Merges accumulate in memory; [`SnapshotStore::save`] writes the table,
/// the optional mirror, and the dictionary.
pub struct SnapshotStore {
    options: StoreOptions,
    clock: Arc<dyn Clock>,
    table: MetricTable,
    dictionary: DataDictionary,
    dictionary_writable: bool,
    seen: HashSet<NewMetric>,
    pending_new: Vec<NewMetric>,
    /// Pairs in the table with no dictionary entry, e.g. after a failed write.
    undocumented: Vec<NewMetric>,
    dictionary_dirty: bool,
    merged_dates: BTreeSet<NaiveDate>,
}

impl std::fmt::Debug for SnapshotStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotStore")
            .field("options", &self.options)
            .field("rows", &self.table.len())
            .field("dictionary_entries", &self.dictionary.len())
            .field("pending_new", &self.pending_new.len())
            .field("undocumented", &self.undocumented.len())
            .finish()
    }
}

impl SnapshotStore {
    /// Load the persisted table and dictionary.
    ///
    /// A corrupt table is an error. An unreadable dictionary is logged and
    /// left alone: the run continues but will not overwrite it.
    pub fn open(options: StoreOptions, clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        let table = load_table(&options.table_path)?;

        let (dictionary, dictionary_writable) = match DataDictionary::load(&options.dictionary_path)
        {
            Ok(dictionary) => (dictionary, true),
            Err(err) => {
                tracing::warn!(
                    path = %options.dictionary_path.display(),
                    error = %err,
                    "data dictionary unreadable; it will not be updated this run"
                );
                (DataDictionary::new(), false)
            }
        };

        let mut seen: HashSet<NewMetric> = dictionary.metrics().collect();
        let undocumented: Vec<NewMetric> = table
            .metrics_in_order()
            .into_iter()
            .filter(|m| !dictionary.contains(m))
            .collect();
        seen.extend(undocumented.iter().cloned());

        tracing::debug!(
            rows = table.len(),
            dictionary_entries = dictionary.len(),
            known_metrics = seen.len(),
            undocumented = undocumented.len(),
            "store opened"
        );

        Ok(SnapshotStore {
            options,
            clock,
            table,
            dictionary,
            dictionary_writable,
            seen,
            pending_new: Vec::new(),
            undocumented,
            dictionary_dirty: false,
            merged_dates: BTreeSet::new(),
        })
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    pub fn table(&self) -> &MetricTable {
        &self.table
    }

    pub fn dictionary(&self) -> &DataDictionary {
        &self.dictionary
    }

    /// Metrics detected since the last save.
    pub fn pending_new_metrics(&self) -> &[NewMetric] {
        &self.pending_new
    }

    /// Merge one worker result for `(source, date)`, stamping the current time.
    pub fn merge(
        &mut self,
        source: &str,
        date: NaiveDate,
        result: &WorkerResult,
    ) -> Result<MergeReport, StoreError> {
        let (tuples, collapsed) = result.dedup_last_wins();
        if collapsed > 0 {
            tracing::debug!(source = %source, collapsed, "duplicate keys collapsed, last value kept");
        }

        let now = self.clock.now();
        let mut report = merge_tuples(&mut self.table, &mut self.seen, source, date, now, &tuples)?;
        report.duplicates_collapsed = collapsed;
        self.merged_dates.insert(date);
        self.pending_new.extend(report.new_metrics.iter().cloned());
        Ok(report)
    }

    /// Rows matching optional filters, in output order.
    pub fn select(&self, date: Option<NaiveDate>, source: Option<&str>) -> Vec<&MetricRow> {
        self.table.select(date, source)
    }

    /// Prune, write the table, export the mirror, and update the dictionary.
    ///
    /// Only the primary table write can fail the save; mirror and dictionary
    /// failures are logged and reported. Dates merged through this store are
    /// never pruned by the same save.
    pub fn save(&mut self) -> Result<SaveReport, StoreError> {
        let pruned = apply_retention(
            &mut self.table,
            self.clock.today(),
            self.options.retention_days,
            &self.merged_dates,
        );
        save_table(&self.options.table_path, &self.table)?;

        let mut report = SaveReport {
            rows: self.table.len(),
            pruned: pruned.removed,
            kept_past_retention: pruned.kept,
            ..SaveReport::default()
        };

        if let Some(mirror) = &self.options.mirror_path {
            if let Err(err) = save_table(mirror, &self.table) {
                tracing::warn!(path = %mirror.display(), error = %err, "mirror export failed");
                report.mirror_error = Some(err.to_string());
            }
        }

        let mut metrics = std::mem::take(&mut self.undocumented);
        metrics.append(&mut self.pending_new);
        match self.record_and_write(&metrics) {
            Ok(added) => report.dictionary_added = added,
            Err(err) => {
                tracing::warn!(error = %err, "data dictionary update failed");
                report.dictionary_error = Some(err.to_string());
                self.undocumented = metrics;
            }
        }

        Ok(report)
    }

    /// Document every metric present in the table but missing from the
    /// dictionary, then rewrite the document. Returns entries added.
    pub fn rebuild_dictionary(&mut self) -> Result<usize, StoreError> {
        let metrics = self.table.metrics_in_order();
        let added = self.dictionary.record_new_metrics(&metrics, self.clock.now());
        self.ensure_dictionary_writable()?;
        self.dictionary.save(&self.options.dictionary_path)?;
        self.undocumented.clear();
        self.dictionary_dirty = false;
        Ok(added)
    }

    fn record_and_write(&mut self, metrics: &[NewMetric]) -> Result<usize, StoreError> {
        if metrics.is_empty() && !self.dictionary_dirty {
            return Ok(0);
        }
        self.ensure_dictionary_writable()?;
        let added = self.dictionary.record_new_metrics(metrics, self.clock.now());
        if added > 0 {
            self.dictionary_dirty = true;
        }
        if self.dictionary_dirty {
            self.dictionary.save(&self.options.dictionary_path)?;
            self.dictionary_dirty = false;
        }
        Ok(added)
    }

    fn ensure_dictionary_writable(&self) -> Result<(), StoreError> {
        if self.dictionary_writable {
            Ok(())
        } else {
            Err(StoreError::Dictionary {
                path: self.options.dictionary_path.clone(),
                detail: "existing document could not be read".to_string(),
            })
        }
    }
}
