//! Exit codes for the `snapagg` CLI.
//!
//! Exit codes communicate the run outcome to the scheduler without output
//! parsing. They are a stable contract.
//!
//! Exit code ranges:
//! - 0-9: Operational outcomes (the run completed and wrote its summary)
//! - 10-19: User/environment errors (recoverable by operator action)
//! - 20-29: Internal and storage errors

/// Exit codes for `snapagg` operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    // ========================================================================
    // Operational Outcomes (0-9)
    // ========================================================================
    /// Every enabled worker succeeded (or none were enabled).
    Clean = 0,

    /// Some workers failed; the rest were merged and saved.
    PartialFail = 3,

    /// Every enabled worker failed.
    AllFailed = 4,

    // ========================================================================
    // User / Environment Errors (10-19)
    // ========================================================================
    /// Invalid arguments
    ArgsError = 10,

    /// Settings missing, unparseable, or invalid
    ConfigError = 11,

    /// Another run holds the output directory lock
    LockError = 14,

    // ========================================================================
    // Internal / Storage Errors (20-29)
    // ========================================================================
    /// Internal error (bug - please report)
    InternalError = 20,

    /// I/O error
    IoError = 21,

    /// The persisted table is corrupt; nothing was written
    StoreCorrupt = 23,
}

impl ExitCode {
    /// Convert to i32 for process exit.
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// The run completed; the summary describes what happened.
    pub fn is_operational(self) -> bool {
        (self as i32) < 10
    }

    /// Resolvable by operator action (codes 10-19).
    pub fn is_user_error(self) -> bool {
        (10..20).contains(&(self as i32))
    }

    pub fn is_error(self) -> bool {
        self != ExitCode::Clean
    }

    /// Get the code name as a string constant (for JSON output).
    pub fn code_name(&self) -> &'static str {
        match self {
            ExitCode::Clean => "OK_CLEAN",
            ExitCode::PartialFail => "ERR_PARTIAL",
            ExitCode::AllFailed => "ERR_ALL_FAILED",
            ExitCode::ArgsError => "ERR_ARGS",
            ExitCode::ConfigError => "ERR_CONFIG",
            ExitCode::LockError => "ERR_LOCK",
            ExitCode::InternalError => "ERR_INTERNAL",
            ExitCode::IoError => "ERR_IO",
            ExitCode::StoreCorrupt => "ERR_STORE_CORRUPT",
        }
    }

    /// Map a top-level error to its exit code.
    pub fn for_error(err: &snapagg_common::Error) -> Self {
        use snapagg_common::{Error, ErrorCategory};
        match err {
            Error::StoreCorruption { .. } => ExitCode::StoreCorrupt,
            Error::LockUnavailable { .. } => ExitCode::LockError,
            Error::Io(_) => ExitCode::IoError,
            _ => match err.category() {
                ErrorCategory::Config | ErrorCategory::Worker => ExitCode::ConfigError,
                ErrorCategory::Io => ExitCode::IoError,
                _ => ExitCode::InternalError,
            },
        }
    }
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as i32
    }
}

impl std::fmt::Display for ExitCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.code_name(), self.as_i32())
    }
}
