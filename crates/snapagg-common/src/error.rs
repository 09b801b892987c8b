//! Error types for the snapshot aggregator.
//!
//! Every fallible operation outside a single worker invocation eventually
//! surfaces as an [`Error`]. Each variant carries:
//! - A stable numeric code for machine parsing
//! - A category for grouping
//! - A recoverability hint (can the next scheduled run succeed unchanged?)
//! - A remediation line for humans
//!
//! Worker-level failures (authentication, navigation, extraction) never
//! become an `Error`; they are contained at the invocation boundary and
//! reported as worker outcomes instead.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Result type alias for aggregator operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Settings file errors.
    Config,
    /// Persisted table errors.
    Store,
    /// Data dictionary errors.
    Registry,
    /// Worker construction errors (before invocation).
    Worker,
    /// File I/O and serialization errors.
    Io,
    /// Bugs.
    Internal,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Config => write!(f, "config"),
            ErrorCategory::Store => write!(f, "store"),
            ErrorCategory::Registry => write!(f, "registry"),
            ErrorCategory::Worker => write!(f, "worker"),
            ErrorCategory::Io => write!(f, "io"),
            ErrorCategory::Internal => write!(f, "internal"),
        }
    }
}

/// Unified error type for the aggregator.
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors (10-19)
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid settings value for {field}: {message}")]
    InvalidSettings { field: String, message: String },

    // Store errors (30-39)
    #[error("snapshot store at {path} is corrupt: {detail}")]
    StoreCorruption { path: String, detail: String },

    #[error("snapshot store is locked by another writer ({path})")]
    LockUnavailable { path: String },

    #[error("invalid source identifier: {0:?}")]
    InvalidSource(String),

    // Registry errors (40-49)
    #[error("data dictionary error: {0}")]
    Registry(String),

    // Worker construction errors (50-59)
    #[error("worker {worker} could not be constructed: {message}")]
    WorkerSetup { worker: String, message: String },

    // I/O errors (60-69)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Internal errors (90-99)
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Returns the error code for this error type.
    ///
    /// Error codes are stable and grouped by category:
    /// - 10-19: Configuration errors
    /// - 30-39: Store errors
    /// - 40-49: Registry errors
    /// - 50-59: Worker construction errors
    /// - 60-69: I/O errors
    /// - 90-99: Internal errors
    pub fn code(&self) -> u32 {
        match self {
            Error::Config(_) => 10,
            Error::InvalidSettings { .. } => 11,
            Error::StoreCorruption { .. } => 30,
            Error::LockUnavailable { .. } => 31,
            Error::InvalidSource(_) => 32,
            Error::Registry(_) => 40,
            Error::WorkerSetup { .. } => 50,
            Error::Io(_) => 60,
            Error::Json(_) => 61,
            Error::Internal(_) => 90,
        }
    }

    /// Returns the error category for grouping and filtering.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Config(_) | Error::InvalidSettings { .. } => ErrorCategory::Config,
            Error::StoreCorruption { .. }
            | Error::LockUnavailable { .. }
            | Error::InvalidSource(_) => ErrorCategory::Store,
            Error::Registry(_) => ErrorCategory::Registry,
            Error::WorkerSetup { .. } => ErrorCategory::Worker,
            Error::Io(_) | Error::Json(_) => ErrorCategory::Io,
            Error::Internal(_) => ErrorCategory::Internal,
        }
    }

    /// Returns whether the next scheduled run may succeed without operator action.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::Config(_) | Error::InvalidSettings { .. } => false,
            // Corruption needs a human to back up and repair the file.
            Error::StoreCorruption { .. } => false,
            Error::LockUnavailable { .. } => true,
            Error::InvalidSource(_) => false,
            Error::Registry(_) => true,
            Error::WorkerSetup { .. } => false,
            Error::Io(_) => true,
            Error::Json(_) => false,
            Error::Internal(_) => false,
        }
    }

    /// Returns a short headline for human-readable output.
    pub fn headline(&self) -> &'static str {
        match self {
            Error::Config(_) => "Configuration Error",
            Error::InvalidSettings { .. } => "Invalid Settings",
            Error::StoreCorruption { .. } => "Snapshot Store Corrupt",
            Error::LockUnavailable { .. } => "Snapshot Store Locked",
            Error::InvalidSource(_) => "Invalid Source",
            Error::Registry(_) => "Data Dictionary Error",
            Error::WorkerSetup { .. } => "Worker Setup Failed",
            Error::Io(_) => "I/O Error",
            Error::Json(_) => "JSON Error",
            Error::Internal(_) => "Internal Error",
        }
    }

    /// Returns a human-readable remediation hint.
    pub fn remediation(&self) -> &'static str {
        match self {
            Error::Config(_) | Error::InvalidSettings { .. } => {
                "Run 'snapagg check' to validate settings.json and fix the reported field."
            }
            Error::StoreCorruption { .. } => {
                "Back up the CSV, repair or remove the offending lines, then rerun. No data was written."
            }
            Error::LockUnavailable { .. } => {
                "Another run is in progress against this output directory. Wait for it to finish."
            }
            Error::InvalidSource(_) => "Worker names must be non-empty lowercase identifiers.",
            Error::Registry(_) => {
                "The data dictionary is regenerated on the next run that finds a new metric."
            }
            Error::WorkerSetup { .. } => {
                "Check the worker's entry in settings.json (command path, arguments)."
            }
            Error::Io(_) => "Check disk space and permissions on the output and log directories.",
            Error::Json(_) => "Invalid JSON. Check the file syntax or restore it from backup.",
            Error::Internal(_) => "This is a bug. Please report it with the run log attached.",
        }
    }
}

/// Machine-readable error representation for JSON payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredError {
    /// Stable error code.
    pub code: u32,

    /// Error category for grouping.
    pub category: ErrorCategory,

    /// Human-readable error message.
    pub message: String,

    /// Whether the error is potentially recoverable.
    pub recoverable: bool,

    /// Additional structured context (e.g., file path).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,
}

impl From<&Error> for StructuredError {
    fn from(err: &Error) -> Self {
        let mut context = HashMap::new();

        match err {
            Error::StoreCorruption { path, .. } | Error::LockUnavailable { path } => {
                context.insert("path".to_string(), serde_json::json!(path));
            }
            Error::InvalidSettings { field, .. } => {
                context.insert("field".to_string(), serde_json::json!(field));
            }
            Error::WorkerSetup { worker, .. } => {
                context.insert("worker".to_string(), serde_json::json!(worker));
            }
            _ => {}
        }

        StructuredError {
            code: err.code(),
            category: err.category(),
            message: err.to_string(),
            recoverable: err.is_recoverable(),
            context,
        }
    }
}

/// Format an error for human-readable stderr output.
///
/// ```text
/// ✗ [Headline]
///   Reason: [Error message]
///   Fix: [Remediation hint]
/// ```
pub fn format_error_human(err: &Error, use_color: bool) -> String {
    let (red, cyan, reset) = if use_color {
        ("\x1b[31m", "\x1b[36m", "\x1b[0m")
    } else {
        ("", "", "")
    };

    format!(
        "{red}✗{reset} {headline}\n  Reason: {message}\n  {cyan}Fix:{reset} {remediation}",
        headline = err.headline(),
        message = err,
        remediation = err.remediation()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code() {
        assert_eq!(Error::Config("x".into()).code(), 10);
        assert_eq!(
            Error::StoreCorruption {
                path: "a.csv".into(),
                detail: "bad".into()
            }
            .code(),
            30
        );
        assert_eq!(Error::Internal("x".into()).code(), 90);
    }

    #[test]
    fn test_error_category() {
        assert_eq!(
            Error::LockUnavailable {
                path: "x".into()
            }
            .category(),
            ErrorCategory::Store
        );
        assert_eq!(Error::Registry("x".into()).category(), ErrorCategory::Registry);
        let io = Error::from(std::io::Error::new(std::io::ErrorKind::Other, "disk"));
        assert_eq!(io.category(), ErrorCategory::Io);
    }

    #[test]
    fn test_corruption_is_not_recoverable() {
        let err = Error::StoreCorruption {
            path: "kpi_snapshots.csv".into(),
            detail: "line 3: bad value".into(),
        };
        assert!(!err.is_recoverable());
        assert!(Error::LockUnavailable { path: "x".into() }.is_recoverable());
    }

    #[test]
    fn test_structured_error_context() {
        let err = Error::StoreCorruption {
            path: "out/kpi_snapshots.csv".into(),
            detail: "header mismatch".into(),
        };
        let structured = StructuredError::from(&err);
        assert_eq!(structured.code, 30);
        assert_eq!(structured.category, ErrorCategory::Store);
        assert_eq!(structured.context["path"], "out/kpi_snapshots.csv");
        assert!(!structured.recoverable);
    }

    #[test]
    fn test_category_display() {
        assert_eq!(ErrorCategory::Store.to_string(), "store");
        assert_eq!(ErrorCategory::Io.to_string(), "io");
    }

    #[test]
    fn test_format_error_human_plain() {
        let err = Error::Config("missing workers".into());
        let text = format_error_human(&err, false);
        assert!(text.starts_with("✗ Configuration Error"));
        assert!(text.contains("Reason: configuration error: missing workers"));
        assert!(text.contains("Fix: Run 'snapagg check'"));
    }
}
