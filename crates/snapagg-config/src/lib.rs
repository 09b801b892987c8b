//! Snapshot aggregator settings loading and validation.
//!
//! This crate provides:
//! - Typed Rust structs for settings.json
//! - Settings resolution (CLI → env → XDG → /etc → defaults)
//! - Semantic validation
//!
//! The loaded [`Settings`] value is passed explicitly to the orchestrator and
//! to every worker factory; nothing reads settings from global state.

pub mod resolve;
pub mod settings;
pub mod validate;

pub use resolve::{resolve_settings_path, ConfigSource};
pub use settings::{GlobalSettings, Settings, WorkerSettings};
pub use validate::{validate_settings, validate_worker_name, ValidationError, ValidationResult};

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Schema version for settings files.
pub const CONFIG_SCHEMA_VERSION: &str = "1.0.0";

/// File name of the persisted table inside `output_dir`.
pub const TABLE_FILENAME: &str = "kpi_snapshots.csv";

/// File name of the data dictionary inside `output_dir`.
pub const DICTIONARY_FILENAME: &str = "DATA_DICTIONARY.md";

/// Errors that can occur during settings loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Settings file not found: {path}")]
    NotFound { path: PathBuf },

    #[error("Invalid JSON in settings file {path}: {source}")]
    ParseError {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Semantic validation failed: {0}")]
    ValidationError(#[from] ValidationError),

    #[error("I/O error reading {path}: {source}")]
    IoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl From<ConfigError> for snapagg_common::Error {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::ValidationError(ValidationError::InvalidValue { field, message }) => {
                snapagg_common::Error::InvalidSettings { field, message }
            }
            other => snapagg_common::Error::Config(other.to_string()),
        }
    }
}

/// Settings resolution options.
#[derive(Debug, Default)]
pub struct ConfigOptions {
    /// Explicit settings file (highest priority).
    pub settings_path: Option<PathBuf>,
    /// Overrides `global.output_dir` after loading.
    pub output_dir: Option<PathBuf>,
}

/// Resolved settings with provenance information.
#[derive(Debug, Clone)]
pub struct ResolvedSettings {
    /// The loaded settings with absolute paths.
    pub settings: Settings,
    /// Path to the settings file (None if using defaults).
    pub path: Option<PathBuf>,
    /// Where the path came from.
    pub source: ConfigSource,
    /// SHA-256 of the settings file content (None if using defaults).
    pub hash: Option<String>,
}

/// Load settings with the standard resolution order.
///
/// Relative paths inside a settings file resolve against the file's
/// directory; built-in defaults resolve against the working directory.
pub fn load_settings(options: &ConfigOptions) -> Result<ResolvedSettings, ConfigError> {
    let (path, source) = resolve_settings_path(options.settings_path.as_deref());

    let (mut settings, hash, base_dir) = match &path {
        Some(path) => {
            let (settings, hash) = load_settings_from_file(path)?;
            let base_dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(Path::to_path_buf)
                .unwrap_or_else(current_dir);
            (settings, Some(hash), base_dir)
        }
        None => {
            debug!("no settings file found, using built-in defaults");
            (Settings::default(), None, current_dir())
        }
    };

    if let Some(dir) = &options.output_dir {
        settings.global.output_dir = dir.clone();
    }
    settings.resolve_paths(&base_dir);
    validate_settings(&settings)?;

    Ok(ResolvedSettings {
        settings,
        path,
        source,
        hash,
    })
}

/// Read and parse one settings file, returning it with its content hash.
pub fn load_settings_from_file(path: &Path) -> Result<(Settings, String), ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ConfigError::NotFound {
                path: path.to_path_buf(),
            }
        } else {
            ConfigError::IoError {
                path: path.to_path_buf(),
                source: e,
            }
        }
    })?;

    let hash = hex::encode(Sha256::digest(content.as_bytes()));
    let settings: Settings =
        serde_json::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;

    Ok((settings, hash))
}

fn current_dir() -> PathBuf {
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}
