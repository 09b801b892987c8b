//! Structured event vocabulary for the run log.
//!
//! Every line of the run log carries an event name from [`event_names`], the
//! run ID, and the pipeline [`Stage`] it was emitted from.

use serde::{Deserialize, Serialize};

/// Log levels as written to JSONL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<tracing::Level> for Level {
    fn from(level: tracing::Level) -> Self {
        match level {
            tracing::Level::TRACE => Level::Trace,
            tracing::Level::DEBUG => Level::Debug,
            tracing::Level::INFO => Level::Info,
            tracing::Level::WARN => Level::Warn,
            tracing::Level::ERROR => Level::Error,
        }
    }
}

/// Stages of one aggregation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Settings, logging, lock, and store load.
    Init,
    /// Worker discovery.
    Discover,
    /// A worker invocation.
    Invoke,
    /// Merging a worker result into the table.
    Merge,
    /// Store write, dictionary update, and summary.
    Finalize,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Stage::Init => "init",
            Stage::Discover => "discover",
            Stage::Invoke => "invoke",
            Stage::Merge => "merge",
            Stage::Finalize => "finalize",
        };
        write!(f, "{}", s)
    }
}

/// Standard event names used in logging.
pub mod event_names {
    // Run lifecycle
    pub const RUN_STARTED: &str = "run.started";
    pub const RUN_FINISHED: &str = "run.finished";

    // Discovery
    pub const WORKERS_DISCOVERED: &str = "workers.discovered";
    pub const WORKER_SKIPPED: &str = "worker.skipped";

    // Invocation
    pub const WORKER_STARTED: &str = "worker.started";
    pub const WORKER_SUCCEEDED: &str = "worker.succeeded";
    pub const WORKER_FAILED: &str = "worker.failed";
    pub const WORKER_ABANDONED: &str = "worker.abandoned";
    pub const TIER_FAILED: &str = "worker.tier_failed";

    // Store
    pub const STORE_LOADED: &str = "store.loaded";
    pub const STORE_MERGED: &str = "store.merged";
    pub const STORE_SAVED: &str = "store.saved";
    pub const STORE_ERROR: &str = "store.error";
    pub const DICTIONARY_UPDATED: &str = "dictionary.updated";

    // Config
    pub const CONFIG_LOADED: &str = "config.loaded";
    pub const CONFIG_ERROR: &str = "config.error";
}

/// Correlation fields shared by every event of one run.
#[derive(Debug, Clone)]
pub struct LogContext {
    pub run_id: String,
}

impl LogContext {
    pub fn new(run_id: impl Into<String>) -> Self {
        LogContext {
            run_id: run_id.into(),
        }
    }

    /// A span carrying the run ID; events inside inherit it in JSONL output.
    pub fn run_span(&self) -> tracing::Span {
        tracing::info_span!("run", run_id = %self.run_id)
    }

    /// A span for one worker invocation.
    pub fn worker_span(&self, source: &str) -> tracing::Span {
        tracing::info_span!("worker", run_id = %self.run_id, source = %source, stage = %Stage::Invoke)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_serialization() {
        assert_eq!(serde_json::to_string(&Stage::Invoke).unwrap(), "\"invoke\"");
        assert_eq!(Stage::Finalize.to_string(), "finalize");
    }

    #[test]
    fn test_level_from_tracing() {
        assert_eq!(Level::from(tracing::Level::WARN), Level::Warn);
        assert_eq!(serde_json::to_string(&Level::Error).unwrap(), "\"error\"");
    }

    #[test]
    fn test_event_names() {
        assert_eq!(event_names::WORKER_FAILED, "worker.failed");
        assert_eq!(event_names::RUN_FINISHED, "run.finished");
    }
}
