//! One orchestration pass.
//!
//! `Init → Discover → for each worker: Invoke → (Merge | LogAndSkip) → Finalize`
//!
//! - Init takes the output directory lock and opens the store. A held lock
//!   aborts the run before any worker runs. A corrupt store is recorded and
//!   the run continues without merging or writing anything.
//! - Each worker runs on its own thread with a deadline. Panics and
//!   overruns become failed outcomes; merges happen on this thread only.
//! - Finalize always runs and always produces a [`RunSummary`].

use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{NaiveDate, Utc};
use serde::Serialize;
use thiserror::Error;

use snapagg_common::{NewMetric, RunId, WorkerResult, SCHEMA_VERSION};
use snapagg_config::Settings;
use snapagg_store::{
    Clock, MergeReport, RejectedTuple, SaveReport, SnapshotStore, StoreError, StoreLock,
    StoreOptions, SystemClock,
};

use crate::exit_codes::ExitCode;
use crate::log_event;
use crate::logging::{event_names, LogContext, Stage};
use crate::registry::{worker_kit, WorkerDescriptor, WorkerRegistry};
use crate::worker::{CancelToken, FailureKind, Worker, WorkerContext, WorkerError};

/// How often a waiting orchestrator re-checks the run-level cancel token.
const WAIT_SLICE: Duration = Duration::from_millis(100);

/// Errors that stop a run before any worker is invoked.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("output directory is locked by another run: {0}")]
    Locked(String),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for OrchestratorError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Locked { path } => OrchestratorError::Locked(path.display().to_string()),
            other => OrchestratorError::Store(other),
        }
    }
}

impl From<OrchestratorError> for snapagg_common::Error {
    fn from(err: OrchestratorError) -> Self {
        match err {
            OrchestratorError::Locked(path) => snapagg_common::Error::LockUnavailable { path },
            OrchestratorError::Store(e) => e.into(),
        }
    }
}

/// Per-run overrides.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Date bucket for this run; defaults to the clock's today.
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Succeeded,
    Failed,
}

/// What happened to one worker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerOutcome {
    pub source: String,
    pub status: OutcomeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_kind: Option<FailureKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Tuples returned by the worker.
    pub tuples: usize,
    pub rows_inserted: usize,
    pub rows_updated: usize,
    pub rows_rejected: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub rejected: Vec<RejectedTuple>,
    pub new_metrics: usize,
    pub duration_ms: u64,
    /// The worker overran its deadline and grace period; its thread was left behind.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub abandoned: bool,
}

impl WorkerOutcome {
    fn failed(source: &str, err: &WorkerError, duration: Duration) -> Self {
        WorkerOutcome {
            source: source.to_string(),
            status: OutcomeStatus::Failed,
            failure_kind: Some(err.kind()),
            detail: Some(err.to_string()),
            tuples: 0,
            rows_inserted: 0,
            rows_updated: 0,
            rows_rejected: 0,
            rejected: Vec::new(),
            new_metrics: 0,
            duration_ms: duration.as_millis() as u64,
            abandoned: false,
        }
    }

    fn succeeded(source: &str, tuples: usize, merge: Option<MergeReport>, duration: Duration) -> Self {
        let mut outcome = WorkerOutcome {
            source: source.to_string(),
            status: OutcomeStatus::Succeeded,
            failure_kind: None,
            detail: None,
            tuples,
            rows_inserted: 0,
            rows_updated: 0,
            rows_rejected: 0,
            rejected: Vec::new(),
            new_metrics: 0,
            duration_ms: duration.as_millis() as u64,
            abandoned: false,
        };
        if let Some(merge) = merge {
            outcome.rows_inserted = merge.inserted;
            outcome.rows_updated = merge.updated;
            outcome.rows_rejected = merge.rejected.len();
            outcome.new_metrics = merge.new_metrics.len();
            outcome.rejected = merge.rejected;
        }
        outcome
    }

    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Succeeded
    }
}

/// A store problem recorded in the summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoreFailure {
    /// The table could not be trusted; nothing was written.
    pub corrupt: bool,
    pub message: String,
}

/// Result of one orchestration pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub schema_version: String,
    pub run_id: String,
    pub date: NaiveDate,
    pub started_at: String,
    pub finished_at: String,
    pub duration_ms: u64,
    pub workers_discovered: usize,
    pub workers_succeeded: usize,
    pub workers_failed: usize,
    pub rows_inserted: usize,
    pub rows_updated: usize,
    pub rows_merged: usize,
    pub rows_rejected: usize,
    pub new_metrics: Vec<NewMetric>,
    pub outcomes: Vec<WorkerOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub save: Option<SaveReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_error: Option<StoreFailure>,
}

impl RunSummary {
    pub fn exit_code(&self) -> ExitCode {
        if let Some(err) = &self.store_error {
            return if err.corrupt {
                ExitCode::StoreCorrupt
            } else {
                ExitCode::IoError
            };
        }
        if self.workers_failed == 0 {
            ExitCode::Clean
        } else if self.workers_succeeded == 0 {
            ExitCode::AllFailed
        } else {
            ExitCode::PartialFail
        }
    }

    /// One-line human summary.
    pub fn summary_line(&self) -> String {
        let mut line = format!(
            "{} {}: {}/{} workers succeeded, {} rows merged ({} new, {} replaced), {} rejected, {} new metrics",
            self.run_id,
            self.date,
            self.workers_succeeded,
            self.workers_discovered,
            self.rows_merged,
            self.rows_inserted,
            self.rows_updated,
            self.rows_rejected,
            self.new_metrics.len()
        );
        let failed: Vec<String> = self
            .outcomes
            .iter()
            .filter(|o| !o.is_success())
            .map(|o| match o.failure_kind {
                Some(kind) => format!("{} ({})", o.source, kind),
                None => o.source.clone(),
            })
            .collect();
        if !failed.is_empty() {
            line.push_str(&format!("; failed: {}", failed.join(", ")));
        }
        if let Some(save) = self.save.as_ref().filter(|s| s.kept_past_retention > 0) {
            line.push_str(&format!(
                "; warning: {} rows are older than retention and will be pruned by the next run",
                save.kept_past_retention
            ));
        }
        if let Some(err) = &self.store_error {
            line.push_str(&format!("; store error: {}", err.message));
        }
        line
    }
}

/// How one invocation ended.
enum Invocation {
    Returned(Result<WorkerResult, WorkerError>),
    /// Deadline or cancel; `abandoned` when the worker did not stop within the grace period.
    Stopped { error: WorkerError, abandoned: bool },
}

/// Drives one pass over the registered workers.
pub struct Orchestrator {
    settings: Settings,
    registry: WorkerRegistry,
    clock: Arc<dyn Clock>,
    cancel: CancelToken,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("registry", &self.registry)
            .field("output_dir", &self.settings.global.output_dir)
            .finish()
    }
}

impl Orchestrator {
    pub fn new(settings: Settings, registry: WorkerRegistry) -> Self {
        Orchestrator {
            settings,
            registry,
            clock: Arc::new(SystemClock),
            cancel: CancelToken::new(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn registry(&self) -> &WorkerRegistry {
        &self.registry
    }

    /// Token that stops the current invocation and skips remaining workers.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn discover(&self) -> Vec<WorkerDescriptor> {
        self.registry.discover(&self.settings)
    }

    pub fn store_options(&self) -> StoreOptions {
        store_options_for(&self.settings)
    }

    /// Run every enabled worker once and persist the merged result.
    pub fn run_once(&self, options: &RunOptions) -> Result<RunSummary, OrchestratorError> {
        let run_id = RunId::generate();
        let log = LogContext::new(run_id.as_str());
        let _run_span = log.run_span().entered();
        let started = Instant::now();
        let started_at = Utc::now();
        let date = options.date.unwrap_or_else(|| self.clock.today());

        log_event!(log, INFO, event_names::RUN_STARTED, Stage::Init, "run started",
            date = tracing::field::display(date));

        let _lock = StoreLock::acquire(&self.settings.global.output_dir)?;

        let mut store_error = None;
        let mut store = match SnapshotStore::open(self.store_options(), self.clock.clone()) {
            Ok(store) => {
                log_event!(log, INFO, event_names::STORE_LOADED, Stage::Init, "store loaded",
                    rows = store.table().len(),
                    dictionary_entries = store.dictionary().len());
                Some(store)
            }
            Err(err) => {
                log_event!(log, ERROR, event_names::STORE_ERROR, Stage::Init,
                    "store unusable; workers will run but nothing will be written",
                    error = tracing::field::display(&err),
                    corrupt = err.is_corruption());
                store_error = Some(StoreFailure {
                    corrupt: err.is_corruption(),
                    message: err.to_string(),
                });
                None
            }
        };

        let descriptors = self.discover();
        log_event!(log, INFO, event_names::WORKERS_DISCOVERED, Stage::Discover, "workers discovered",
            count = descriptors.len(),
            registered = self.registry.len());

        let mut outcomes = Vec::with_capacity(descriptors.len());
        let mut new_metrics: Vec<NewMetric> = Vec::new();
        for descriptor in &descriptors {
            if self.cancel.is_cancelled() {
                log_event!(log, WARN, event_names::WORKER_SKIPPED, Stage::Invoke, "run cancelled; worker skipped",
                    source = descriptor.source.as_str());
                let err = WorkerError::Navigation("run cancelled before invocation".to_string());
                outcomes.push(WorkerOutcome::failed(&descriptor.source, &err, Duration::ZERO));
                continue;
            }
            outcomes.push(self.process_worker(&log, descriptor, date, store.as_mut(), &mut new_metrics));
        }

        let save = match store.as_mut() {
            Some(store) => match store.save() {
                Ok(report) => {
                    log_event!(log, INFO, event_names::STORE_SAVED, Stage::Finalize, "store saved",
                        rows = report.rows,
                        pruned = report.pruned,
                        kept_past_retention = report.kept_past_retention);
                    if report.dictionary_added > 0 {
                        log_event!(log, INFO, event_names::DICTIONARY_UPDATED, Stage::Finalize,
                            "data dictionary updated",
                            added = report.dictionary_added);
                    }
                    Some(report)
                }
                Err(err) => {
                    log_event!(log, ERROR, event_names::STORE_ERROR, Stage::Finalize, "store save failed",
                        error = tracing::field::display(&err));
                    store_error = Some(StoreFailure {
                        corrupt: err.is_corruption(),
                        message: err.to_string(),
                    });
                    None
                }
            },
            None => None,
        };

        let summary = RunSummary {
            schema_version: SCHEMA_VERSION.to_string(),
            run_id: run_id.to_string(),
            date,
            started_at: started_at.to_rfc3339(),
            finished_at: Utc::now().to_rfc3339(),
            duration_ms: started.elapsed().as_millis() as u64,
            workers_discovered: descriptors.len(),
            workers_succeeded: outcomes.iter().filter(|o| o.is_success()).count(),
            workers_failed: outcomes.iter().filter(|o| !o.is_success()).count(),
            rows_inserted: outcomes.iter().map(|o| o.rows_inserted).sum(),
            rows_updated: outcomes.iter().map(|o| o.rows_updated).sum(),
            rows_merged: outcomes.iter().map(|o| o.rows_inserted + o.rows_updated).sum(),
            rows_rejected: outcomes.iter().map(|o| o.rows_rejected).sum(),
            new_metrics,
            outcomes,
            save,
            store_error,
        };

        let line = summary.summary_line();
        log_event!(log, INFO, event_names::RUN_FINISHED, Stage::Finalize, "run finished",
            summary = line.as_str(),
            exit_code = summary.exit_code().as_i32(),
            duration_ms = summary.duration_ms);

        Ok(summary)
    }

    /// Build, invoke, and merge one worker.
    fn process_worker(
        &self,
        log: &LogContext,
        descriptor: &WorkerDescriptor,
        date: NaiveDate,
        store: Option<&mut SnapshotStore>,
        new_metrics: &mut Vec<NewMetric>,
    ) -> WorkerOutcome {
        let source = descriptor.source.as_str();
        let started = Instant::now();

        let worker = match self.registry.build(source, &self.settings) {
            Ok(worker) => worker,
            Err(err) => {
                let err = WorkerError::Unexpected(err.to_string());
                log_failure(log, source, &err, started.elapsed());
                return WorkerOutcome::failed(source, &err, started.elapsed());
            }
        };

        // Rows are filed under the source; a worker must report its own.
        if worker.name() != source {
            let err = WorkerError::Unexpected(format!(
                "worker registered as {:?} reports source {:?}",
                source,
                worker.name()
            ));
            log_failure(log, source, &err, started.elapsed());
            return WorkerOutcome::failed(source, &err, started.elapsed());
        }

        log_event!(log, INFO, event_names::WORKER_STARTED, Stage::Invoke, "worker started",
            source = source,
            timeout_ms = descriptor.timeout.as_millis() as u64);

        let result = match self.invoke(log, descriptor, date, worker) {
            Invocation::Returned(Ok(result)) => result,
            Invocation::Returned(Err(err)) => {
                log_failure(log, source, &err, started.elapsed());
                return WorkerOutcome::failed(source, &err, started.elapsed());
            }
            Invocation::Stopped { error, abandoned } => {
                log_failure(log, source, &error, started.elapsed());
                let mut outcome = WorkerOutcome::failed(source, &error, started.elapsed());
                outcome.abandoned = abandoned;
                return outcome;
            }
        };

        let merge = match store {
            Some(store) => match store.merge(source, date, &result) {
                Ok(report) => {
                    log_event!(log, DEBUG, event_names::STORE_MERGED, Stage::Merge, "result merged",
                        source = source,
                        inserted = report.inserted,
                        updated = report.updated,
                        collapsed = report.duplicates_collapsed);
                    new_metrics.extend(report.new_metrics.iter().cloned());
                    Some(report)
                }
                Err(err) => {
                    let err = WorkerError::Unexpected(format!("merge rejected result: {}", err));
                    log_failure(log, source, &err, started.elapsed());
                    return WorkerOutcome::failed(source, &err, started.elapsed());
                }
            },
            None => None,
        };

        let outcome = WorkerOutcome::succeeded(source, result.len(), merge, started.elapsed());
        log_event!(log, INFO, event_names::WORKER_SUCCEEDED, Stage::Merge, "worker succeeded",
            source = source,
            tuples = outcome.tuples,
            inserted = outcome.rows_inserted,
            updated = outcome.rows_updated,
            rejected = outcome.rows_rejected,
            new_metrics = outcome.new_metrics,
            duration_ms = outcome.duration_ms);
        outcome
    }

    /// Run the worker on its own thread and wait for it within its deadline.
    fn invoke(
        &self,
        log: &LogContext,
        descriptor: &WorkerDescriptor,
        date: NaiveDate,
        mut worker: Box<dyn Worker>,
    ) -> Invocation {
        let ctx = WorkerContext::new(descriptor.source.clone(), date, descriptor.timeout)
            .with_params(descriptor.params.clone())
            .with_kit(worker_kit(&self.settings));
        let deadline = ctx.deadline;
        let token = ctx.cancel.clone();
        let span = log.worker_span(&descriptor.source);

        let (tx, rx) = mpsc::channel();
        let spawned = std::thread::Builder::new()
            .name(format!("worker-{}", descriptor.source))
            .spawn(move || {
                let _entered = span.enter();
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| worker.run(&ctx)))
                    .unwrap_or_else(|payload| {
                        Err(WorkerError::Unexpected(format!(
                            "worker panicked: {}",
                            panic_message(payload.as_ref())
                        )))
                    });
                let _ = tx.send(outcome);
            });
        if let Err(e) = spawned {
            return Invocation::Returned(Err(WorkerError::Unexpected(format!(
                "could not start worker thread: {}",
                e
            ))));
        }

        let stop_reason = loop {
            let now = Instant::now();
            if now >= deadline {
                break format!("timed out after {}ms", descriptor.timeout.as_millis());
            }
            if self.cancel.is_cancelled() {
                break "cancelled".to_string();
            }
            let wait = deadline.saturating_duration_since(now).min(WAIT_SLICE);
            match rx.recv_timeout(wait) {
                Ok(outcome) => return Invocation::Returned(outcome),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    return Invocation::Returned(Err(WorkerError::Unexpected(
                        "worker thread exited without a result".to_string(),
                    )))
                }
            }
        };

        token.cancel();
        let grace = self.settings.cancel_grace();
        let abandoned = match rx.recv_timeout(grace) {
            Ok(_) | Err(RecvTimeoutError::Disconnected) => false,
            Err(RecvTimeoutError::Timeout) => {
                log_event!(log, WARN, event_names::WORKER_ABANDONED, Stage::Invoke,
                    "worker did not stop within grace period; abandoned",
                    source = descriptor.source.as_str(),
                    grace_ms = grace.as_millis() as u64);
                true
            }
        };

        Invocation::Stopped {
            error: WorkerError::Navigation(stop_reason),
            abandoned,
        }
    }
}

/// Store locations and retention taken from settings.
pub fn store_options_for(settings: &Settings) -> StoreOptions {
    StoreOptions {
        table_path: settings.table_path(),
        dictionary_path: settings.dictionary_path(),
        mirror_path: settings.global.mirror_csv.clone(),
        retention_days: settings.global.data_retention_days,
    }
}

fn log_failure(log: &LogContext, source: &str, err: &WorkerError, elapsed: Duration) {
    log_event!(log, WARN, event_names::WORKER_FAILED, Stage::Invoke, "worker failed",
        source = source,
        failure_kind = tracing::field::display(err.kind()),
        detail = tracing::field::display(err),
        duration_ms = elapsed.as_millis() as u64);
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;
    use crate::worker::Extraction;
    use snapagg_common::MetricTuple;
    use snapagg_config::WorkerSettings;
    use snapagg_store::csv_io::load_table;
    use snapagg_store::FixedClock;
    use tempfile::TempDir;

    fn tuples(title: &str, n: usize) -> Vec<MetricTuple> {
        (0..n)
            .map(|i| MetricTuple::new(title, format!("c{}", i), i as i64))
            .collect()
    }

    fn orchestrator(settings: Settings, workers: Vec<FakeWorker>) -> (Orchestrator, Arc<FixedClock>) {
        let clock = fixed_clock(at(day(2026, 2, 8), 9, 0, 0));
        let orch = Orchestrator::new(settings, fake_registry(workers)).with_clock(clock.clone());
        (orch, clock)
    }

    #[test]
    fn one_failing_worker_does_not_stop_the_others() {
        let dir = TempDir::new().unwrap();
        let settings = temp_settings(&dir);
        let (orch, _) = orchestrator(
            settings.clone(),
            vec![
                FakeWorker::succeeding("smax", tuples("Tickets", 2)),
                FakeWorker::failing("cuic", WorkerError::no_data("grid empty")),
                FakeWorker::succeeding("bia", tuples("BIA Requests", 3)),
            ],
        );

        let summary = orch.run_once(&RunOptions::default()).unwrap();
        assert_eq!(summary.workers_discovered, 3);
        assert_eq!(summary.workers_succeeded, 2);
        assert_eq!(summary.workers_failed, 1);
        assert_eq!(summary.rows_merged, 5);
        assert_eq!(summary.exit_code(), ExitCode::PartialFail);

        let failed = &summary.outcomes[1];
        assert_eq!(failed.source, "cuic");
        assert_eq!(failed.failure_kind, Some(FailureKind::Extraction));

        let table = load_table(&settings.table_path()).unwrap();
        assert_eq!(table.len(), 5);
        assert!(table.rows().iter().all(|r| r.source != "cuic"));
    }

    #[test]
    fn malformed_values_are_rejected_individually() {
        let dir = TempDir::new().unwrap();
        let mut values = tuples("Calls", 5);
        values.push(MetricTuple::new("Calls", "broken", "n/a"));
        let (orch, _) = orchestrator(temp_settings(&dir), vec![FakeWorker::succeeding("cuic", values)]);

        let summary = orch.run_once(&RunOptions::default()).unwrap();
        assert_eq!(summary.rows_merged, 5);
        assert_eq!(summary.rows_rejected, 1);
        assert_eq!(summary.outcomes[0].rejected[0].category, "broken");
        assert_eq!(summary.exit_code(), ExitCode::Clean);
    }

    #[test]
    fn rerun_replaces_value_and_timestamp() {
        let dir = TempDir::new().unwrap();
        let settings = temp_settings(&dir);
        let date = day(2026, 2, 8);

        let (first, clock) = orchestrator(
            settings.clone(),
            vec![FakeWorker::succeeding("smax", vec![MetricTuple::new("BIA Requests", "total", 42i64)])],
        );
        let summary = first.run_once(&RunOptions { date: Some(date) }).unwrap();
        assert_eq!(summary.rows_inserted, 1);
        assert_eq!(summary.new_metrics.len(), 1);

        clock.set(at(date, 17, 30, 0));
        let second = Orchestrator::new(
            settings.clone(),
            fake_registry(vec![FakeWorker::succeeding(
                "smax",
                vec![MetricTuple::new("BIA Requests", "total", 47i64)],
            )]),
        )
        .with_clock(clock.clone());
        let summary = second.run_once(&RunOptions { date: Some(date) }).unwrap();
        assert_eq!(summary.rows_inserted, 0);
        assert_eq!(summary.rows_updated, 1);
        assert!(summary.new_metrics.is_empty());

        let table = load_table(&settings.table_path()).unwrap();
        assert_eq!(table.len(), 1);
        let row = &table.rows()[0];
        assert_eq!(row.value, 47.0);
        assert_eq!(row.timestamp, at(date, 17, 30, 0));
        assert_eq!(row.sub_category, "");
    }

    #[test]
    fn worker_reporting_another_source_is_not_merged() {
        let dir = TempDir::new().unwrap();
        let settings = temp_settings(&dir);
        let sessions = SessionCounter::default();
        let impostor = FakeWorker::succeeding("cuic", tuples("Calls", 2)).with_sessions(sessions.clone());
        let mut registry = WorkerRegistry::new();
        registry
            .register("smax", move |_: &Settings| Ok(Box::new(impostor.clone()) as Box<dyn Worker>))
            .unwrap();
        register_fake(&mut registry, FakeWorker::succeeding("bia", tuples("Requests", 1))).unwrap();

        let orch = Orchestrator::new(settings.clone(), registry)
            .with_clock(fixed_clock(at(day(2026, 2, 8), 9, 0, 0)));
        let summary = orch.run_once(&RunOptions::default()).unwrap();

        let smax = &summary.outcomes[0];
        assert_eq!(smax.source, "smax");
        assert_eq!(smax.failure_kind, Some(FailureKind::Unexpected));
        assert!(smax.detail.as_deref().unwrap().contains("\"cuic\""));
        assert_eq!(sessions.opened(), 0);
        assert!(summary.outcomes[1].is_success());
        assert_eq!(summary.exit_code(), ExitCode::PartialFail);

        let table = load_table(&settings.table_path()).unwrap();
        assert!(table.rows().iter().all(|r| r.source == "bia"));
    }

    #[test]
    fn backfill_older_than_retention_is_kept_and_flagged() {
        let dir = TempDir::new().unwrap();
        let mut settings = temp_settings(&dir);
        settings.global.data_retention_days = 30;
        let (orch, _) = orchestrator(settings.clone(), vec![FakeWorker::succeeding("smax", tuples("Tickets", 2))]);

        let summary = orch.run_once(&RunOptions { date: Some(day(2025, 6, 1)) }).unwrap();
        let save = summary.save.as_ref().unwrap();
        assert_eq!(save.pruned, 0);
        assert_eq!(save.kept_past_retention, 2);
        assert!(summary.summary_line().contains("older than retention"));

        let table = load_table(&settings.table_path()).unwrap();
        assert_eq!(table.select(Some(day(2025, 6, 1)), None).len(), 2);
    }

    #[test]
    fn separate_days_keep_separate_rows() {
        let dir = TempDir::new().unwrap();
        let settings = temp_settings(&dir);
        let (orch, _) = orchestrator(settings.clone(), vec![FakeWorker::succeeding("smax", tuples("Tickets", 2))]);

        orch.run_once(&RunOptions { date: Some(day(2026, 2, 7)) }).unwrap();
        orch.run_once(&RunOptions { date: Some(day(2026, 2, 8)) }).unwrap();
        orch.run_once(&RunOptions { date: Some(day(2026, 2, 8)) }).unwrap();

        let table = load_table(&settings.table_path()).unwrap();
        assert_eq!(table.len(), 4);
        assert_eq!(table.select(Some(day(2026, 2, 7)), None).len(), 2);
    }

    #[test]
    fn panic_is_contained_and_session_released() {
        let dir = TempDir::new().unwrap();
        let sessions = SessionCounter::default();
        let (orch, _) = orchestrator(
            temp_settings(&dir),
            vec![
                FakeWorker::new("smax", Behavior::Panic("selector vanished".into()))
                    .with_sessions(sessions.clone()),
                FakeWorker::succeeding("bia", tuples("BIA Requests", 1)),
            ],
        );

        let summary = orch.run_once(&RunOptions::default()).unwrap();
        let failed = &summary.outcomes[0];
        assert_eq!(failed.failure_kind, Some(FailureKind::Unexpected));
        assert!(failed.detail.as_deref().unwrap_or("").contains("selector vanished"));
        assert!(summary.outcomes[1].is_success());
        assert_eq!(sessions.opened(), 1);
        assert_eq!(sessions.released(), 1);
    }

    #[test]
    fn deadline_cancels_cooperative_worker() {
        let dir = TempDir::new().unwrap();
        let mut settings = temp_settings(&dir);
        settings.workers.insert(
            "slow".to_string(),
            WorkerSettings {
                timeout_ms: Some(100),
                ..WorkerSettings::default()
            },
        );
        let sessions = SessionCounter::default();
        let (orch, _) = orchestrator(
            settings,
            vec![
                FakeWorker::new("slow", Behavior::Sleep(Duration::from_secs(30)))
                    .with_sessions(sessions.clone()),
                FakeWorker::succeeding("bia", tuples("BIA Requests", 1)),
            ],
        );

        let summary = orch.run_once(&RunOptions::default()).unwrap();
        let slow = &summary.outcomes[0];
        assert_eq!(slow.failure_kind, Some(FailureKind::Navigation));
        assert!(slow.detail.as_deref().unwrap_or("").contains("timed out"));
        assert!(!slow.abandoned);
        assert_eq!(sessions.released(), 1);
        assert!(summary.outcomes[1].is_success());
    }

    #[test]
    fn unresponsive_worker_is_abandoned() {
        let dir = TempDir::new().unwrap();
        let mut settings = temp_settings(&dir);
        settings.global.worker_timeout_ms = 50;
        settings.global.cancel_grace_ms = 20;
        let (orch, _) = orchestrator(
            settings.clone(),
            vec![FakeWorker::new("stuck", Behavior::Hang(Duration::from_secs(2)))],
        );

        let summary = orch.run_once(&RunOptions::default()).unwrap();
        assert!(summary.outcomes[0].abandoned);
        assert_eq!(summary.exit_code(), ExitCode::AllFailed);
        assert!(settings.table_path().exists());
    }

    #[test]
    fn corrupt_store_is_never_overwritten() {
        let dir = TempDir::new().unwrap();
        let settings = temp_settings(&dir);
        std::fs::create_dir_all(&settings.global.output_dir).unwrap();
        let garbage = "not,a,snapshot\n1,2,3\n";
        std::fs::write(settings.table_path(), garbage).unwrap();

        let (orch, _) = orchestrator(settings.clone(), vec![FakeWorker::succeeding("smax", tuples("Tickets", 2))]);
        let summary = orch.run_once(&RunOptions::default()).unwrap();

        assert_eq!(summary.exit_code(), ExitCode::StoreCorrupt);
        assert!(summary.store_error.as_ref().map(|e| e.corrupt).unwrap_or(false));
        assert!(summary.save.is_none());
        assert_eq!(summary.outcomes.len(), 1);
        assert_eq!(std::fs::read_to_string(settings.table_path()).unwrap(), garbage);
        assert!(!settings.dictionary_path().exists());
    }

    #[test]
    fn held_lock_fails_before_any_worker() {
        let dir = TempDir::new().unwrap();
        let settings = temp_settings(&dir);
        let _held = StoreLock::acquire(&settings.global.output_dir).unwrap();
        let sessions = SessionCounter::default();
        let (orch, _) = orchestrator(
            settings,
            vec![FakeWorker::succeeding("smax", vec![]).with_sessions(sessions.clone())],
        );

        let err = orch.run_once(&RunOptions::default()).unwrap_err();
        assert!(matches!(err, OrchestratorError::Locked(_)));
        assert_eq!(sessions.opened(), 0);
        let common: snapagg_common::Error = err.into();
        assert_eq!(ExitCode::for_error(&common), ExitCode::LockError);
    }

    #[test]
    fn disabled_and_template_workers_are_not_run() {
        let dir = TempDir::new().unwrap();
        let mut settings = temp_settings(&dir);
        settings.workers.insert(
            "cuic".to_string(),
            WorkerSettings {
                enabled: false,
                ..WorkerSettings::default()
            },
        );
        let (orch, _) = orchestrator(
            settings,
            vec![
                FakeWorker::failing("cuic", WorkerError::Authentication("sso".into())),
                FakeWorker::failing("_example", WorkerError::unparseable("template")),
                FakeWorker::succeeding("smax", vec![]),
            ],
        );

        let summary = orch.run_once(&RunOptions::default()).unwrap();
        assert_eq!(summary.workers_discovered, 1);
        assert_eq!(summary.exit_code(), ExitCode::Clean);
    }

    #[test]
    fn empty_registry_still_finalizes() {
        let dir = TempDir::new().unwrap();
        let settings = temp_settings(&dir);
        let (orch, _) = orchestrator(settings.clone(), vec![]);
        let summary = orch.run_once(&RunOptions::default()).unwrap();
        assert_eq!(summary.workers_discovered, 0);
        assert_eq!(summary.exit_code(), ExitCode::Clean);
        assert_eq!(summary.save.as_ref().map(|s| s.rows), Some(0));
        assert!(settings.table_path().exists());
    }

    #[test]
    fn new_metrics_reach_summary_and_dictionary() {
        let dir = TempDir::new().unwrap();
        let settings = temp_settings(&dir);
        let (orch, _) = orchestrator(
            settings.clone(),
            vec![
                FakeWorker::succeeding("smax", tuples("Tickets", 2)),
                FakeWorker::succeeding("bia", tuples("BIA Requests", 1)),
            ],
        );
        let summary = orch.run_once(&RunOptions::default()).unwrap();
        assert_eq!(
            summary.new_metrics,
            vec![
                NewMetric::new("Tickets", "smax"),
                NewMetric::new("BIA Requests", "bia"),
            ]
        );
        assert_eq!(summary.save.as_ref().map(|s| s.dictionary_added), Some(2));
        let doc = std::fs::read_to_string(settings.dictionary_path()).unwrap();
        assert!(doc.contains("BIA Requests"));

        let again = orch.run_once(&RunOptions::default()).unwrap();
        assert!(again.new_metrics.is_empty());
    }

    #[test]
    fn cancelled_run_skips_remaining_workers() {
        let dir = TempDir::new().unwrap();
        let (orch, _) = orchestrator(temp_settings(&dir), vec![FakeWorker::succeeding("smax", vec![])]);
        orch.cancel_token().cancel();
        let summary = orch.run_once(&RunOptions::default()).unwrap();
        assert_eq!(summary.outcomes[0].failure_kind, Some(FailureKind::Navigation));
    }

    #[test]
    fn summary_line_names_failures() {
        let dir = TempDir::new().unwrap();
        let (orch, _) = orchestrator(
            temp_settings(&dir),
            vec![FakeWorker::failing(
                "cuic",
                WorkerError::Extraction(Extraction::Unparseable("x".into())),
            )],
        );
        let summary = orch.run_once(&RunOptions::default()).unwrap();
        let line = summary.summary_line();
        assert!(line.contains("0/1 workers succeeded"));
        assert!(line.contains("failed: cuic (extraction)"));

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["outcomes"][0]["failure_kind"], "extraction");
        assert_eq!(json["outcomes"][0]["status"], "failed");
    }
}
