//! Snapshot aggregator common types, IDs, and errors.
//!
//! This crate provides the foundational types shared by the store, the
//! configuration layer, and the orchestrator:
//! - The normalized metric record model and its natural key
//! - Raw worker output (tuples) and metric value parsing
//! - Run identity
//! - The unified error taxonomy
//! - Output format selection for CLI payloads

pub mod error;
pub mod id;
pub mod output;
pub mod record;
pub mod value;

pub use error::{format_error_human, Error, ErrorCategory, Result, StructuredError};
pub use id::RunId;
pub use output::OutputFormat;
pub use record::{
    MetricKey, MetricRow, MetricTuple, NewMetric, RawValue, WorkerResult, DATE_FORMAT,
    TIMESTAMP_FORMAT,
};
pub use value::{format_metric_value, parse_metric_value, ValueError};

/// Schema version for JSON payloads emitted by the CLI.
pub const SCHEMA_VERSION: &str = "1.0.0";

#[cfg(test)]
mod tests {
    // Callers render errors through the crate root, not `error::`.
    use crate::{format_error_human, Error, StructuredError};

    #[test]
    fn error_rendering_is_reachable_from_the_root() {
        let err = Error::LockUnavailable {
            path: "out/.snapagg.lock".into(),
        };
        let structured = StructuredError::from(&err);
        assert_eq!(structured.code, err.code());
        assert!(format_error_human(&err, false).contains("Another run is in progress"));
    }
}
