//! Store error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from snapshot store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The persisted table cannot be trusted. Fatal for merge and save.
    #[error("store {path} is corrupt: {detail}")]
    Corruption { path: PathBuf, detail: String },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("invalid source identifier: {0:?}")]
    InvalidSource(String),

    #[error("store is locked by another writer: {path}")]
    Locked { path: PathBuf },

    #[error("data dictionary {path} could not be written: {detail}")]
    Dictionary { path: PathBuf, detail: String },
}

impl StoreError {
    pub(crate) fn corrupt(path: &std::path::Path, detail: impl Into<String>) -> Self {
        StoreError::Corruption {
            path: path.to_path_buf(),
            detail: detail.into(),
        }
    }

    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Whether this error means stored history is at risk.
    pub fn is_corruption(&self) -> bool {
        matches!(self, StoreError::Corruption { .. })
    }
}

impl From<StoreError> for snapagg_common::Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Corruption { path, detail } => snapagg_common::Error::StoreCorruption {
                path: path.display().to_string(),
                detail,
            },
            StoreError::Io { source, .. } => snapagg_common::Error::Io(source),
            StoreError::Arrow(e) => snapagg_common::Error::Internal(e.to_string()),
            StoreError::InvalidSource(s) => snapagg_common::Error::InvalidSource(s),
            StoreError::Locked { path } => snapagg_common::Error::LockUnavailable {
                path: path.display().to_string(),
            },
            e @ StoreError::Dictionary { .. } => snapagg_common::Error::Registry(e.to_string()),
        }
    }
}
