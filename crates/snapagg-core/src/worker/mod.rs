//! The worker contract.
//!
//! A worker is an isolated extraction unit for one external source. It
//! exposes a stable lowercase `name()` (the store's `source`) and a `run()`
//! that returns a [`WorkerResult`] or one of three typed failures. The
//! orchestrator invokes each worker on its own thread and contains every
//! failure at that boundary.

pub mod command;
pub mod session;
pub mod table_map;
pub mod tiers;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

use snapagg_common::{parse_metric_value, ValueError, WorkerResult};

pub use command::{CommandSpec, CommandWorker};
pub use session::{ScopedSession, Session};
pub use table_map::{map_table, ExtractedTable};
pub use tiers::{ExtractionTier, FnTier, TieredExtractor};

/// Why an extraction attempt produced nothing usable.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Extraction {
    /// The page or report was reachable but carried no data.
    #[error("no data present: {0}")]
    NoData(String),

    /// Data was present but could not be read.
    #[error("could not parse: {0}")]
    Unparseable(String),
}

/// A failed worker invocation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkerError {
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Includes deadline expiry and cancellation.
    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("extraction failed: {0}")]
    Extraction(Extraction),

    /// Contract violation (bad exit status, malformed protocol output).
    #[error("unexpected failure: {0}")]
    Unexpected(String),
}

impl WorkerError {
    pub fn kind(&self) -> FailureKind {
        match self {
            WorkerError::Authentication(_) => FailureKind::Authentication,
            WorkerError::Navigation(_) => FailureKind::Navigation,
            WorkerError::Extraction(_) => FailureKind::Extraction,
            WorkerError::Unexpected(_) => FailureKind::Unexpected,
        }
    }

    pub fn no_data(detail: impl Into<String>) -> Self {
        WorkerError::Extraction(Extraction::NoData(detail.into()))
    }

    pub fn unparseable(detail: impl Into<String>) -> Self {
        WorkerError::Extraction(Extraction::Unparseable(detail.into()))
    }
}

/// Failure classification reported in the run summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Authentication,
    Navigation,
    Extraction,
    /// Panics and contract violations.
    Unexpected,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Authentication => write!(f, "authentication"),
            FailureKind::Navigation => write!(f, "navigation"),
            FailureKind::Extraction => write!(f, "extraction"),
            FailureKind::Unexpected => write!(f, "unexpected"),
        }
    }
}

/// Cooperative cancellation flag shared between the orchestrator and a worker.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Shared helpers handed to every worker.
#[derive(Debug, Clone)]
pub struct WorkerKit {
    /// Cap on raw output a worker should buffer (command workers use it for stdout).
    pub max_output_bytes: usize,
}

impl Default for WorkerKit {
    fn default() -> Self {
        WorkerKit {
            max_output_bytes: 10 * 1024 * 1024,
        }
    }
}

impl WorkerKit {
    pub fn parse_value(&self, text: &str) -> Result<f64, ValueError> {
        parse_metric_value(text)
    }

    pub fn map_table(&self, table: &ExtractedTable) -> WorkerResult {
        map_table(
            &table.title,
            &table.headers,
            &table.rows,
            table.total.as_ref(),
        )
    }

    pub fn scoped<S: Session>(&self, session: S) -> ScopedSession<S> {
        ScopedSession::new(session)
    }
}

/// Everything a worker receives for one invocation.
#[derive(Debug, Clone)]
pub struct WorkerContext {
    pub source: String,
    pub date: NaiveDate,
    /// Worker-specific settings, opaque to the engine.
    pub params: serde_json::Value,
    pub deadline: Instant,
    pub cancel: CancelToken,
    pub kit: WorkerKit,
}

impl WorkerContext {
    pub fn new(source: impl Into<String>, date: NaiveDate, timeout: Duration) -> Self {
        WorkerContext {
            source: source.into(),
            date,
            params: serde_json::Value::Object(serde_json::Map::new()),
            deadline: Instant::now() + timeout,
            cancel: CancelToken::new(),
            kit: WorkerKit::default(),
        }
    }

    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        self.params = params;
        self
    }

    pub fn with_kit(mut self, kit: WorkerKit) -> Self {
        self.kit = kit;
        self
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Fail with a navigation error once cancelled or past the deadline.
    ///
    /// Workers call this between steps so that a cancelled invocation unwinds
    /// promptly and releases its session.
    pub fn check_cancelled(&self) -> Result<(), WorkerError> {
        if self.cancel.is_cancelled() {
            return Err(WorkerError::Navigation("cancelled".to_string()));
        }
        if Instant::now() >= self.deadline {
            return Err(WorkerError::Navigation("deadline exceeded".to_string()));
        }
        Ok(())
    }
}

/// An extraction unit for one source.
pub trait Worker: Send {
    /// Stable lowercase identifier, used as the store's `source`.
    fn name(&self) -> &str;

    /// Produce the current snapshot. An empty result is a success.
    fn run(&mut self, ctx: &WorkerContext) -> Result<WorkerResult, WorkerError>;
}
