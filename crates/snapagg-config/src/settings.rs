//! Typed structs for settings.json.
//!
//! ```json
//! {
//!   "schema_version": "1.0.0",
//!   "global": { "output_dir": "output", "data_retention_days": 90 },
//!   "workers": {
//!     "smax": { "enabled": true, "command": "workers/smax.sh", "report_ids": [12] }
//!   }
//! }
//! ```
//!
//! Worker entries may carry arbitrary extra keys. The engine reads only
//! `enabled` and the invocation fields; everything else is handed to the
//! worker untouched as `params`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::validate::ValidationError;

/// Full settings document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_schema_version")]
    pub schema_version: String,

    #[serde(default)]
    pub global: GlobalSettings,

    /// Per-worker settings keyed by source name.
    #[serde(default)]
    pub workers: BTreeMap<String, WorkerSettings>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            schema_version: default_schema_version(),
            global: GlobalSettings::default(),
            workers: BTreeMap::new(),
        }
    }
}

/// Settings shared by every run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalSettings {
    /// Default log level when neither CLI nor environment set one.
    pub log_level: String,

    /// Directory holding the persisted table, dictionary, and lock file.
    pub output_dir: PathBuf,

    /// Directory for the daily run log.
    pub log_dir: PathBuf,

    /// Rows older than this many days are pruned on save. 0 keeps everything.
    pub data_retention_days: u32,

    /// Optional second location the table is exported to after each save.
    pub mirror_csv: Option<PathBuf>,

    /// Deadline for one worker invocation unless the worker overrides it.
    pub worker_timeout_ms: u64,

    /// How long a cancelled worker may take to release its session.
    pub cancel_grace_ms: u64,

    /// Cap on captured stdout from command workers.
    pub max_output_bytes: usize,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        GlobalSettings {
            log_level: "info".to_string(),
            output_dir: PathBuf::from("output"),
            log_dir: PathBuf::from("logs"),
            data_retention_days: 90,
            mirror_csv: None,
            worker_timeout_ms: 300_000,
            cancel_grace_ms: 5_000,
            max_output_bytes: 10 * 1024 * 1024,
        }
    }
}

/// Settings for one worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Executable for config-driven workers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,

    /// Per-worker deadline override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,

    /// Worker-specific parameters, opaque to the engine.
    #[serde(flatten)]
    pub params: serde_json::Map<String, serde_json::Value>,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        WorkerSettings {
            enabled: true,
            command: None,
            args: Vec::new(),
            working_dir: None,
            timeout_ms: None,
            params: serde_json::Map::new(),
        }
    }
}

fn default_schema_version() -> String {
    crate::CONFIG_SCHEMA_VERSION.to_string()
}

fn default_true() -> bool {
    true
}

impl Settings {
    /// Load settings from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ValidationError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ValidationError::IoError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json(&content)
    }

    /// Parse settings from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, ValidationError> {
        serde_json::from_str(json)
            .map_err(|e| ValidationError::ParseError(format!("Invalid JSON: {}", e)))
    }

    /// Settings block for one worker, if configured.
    pub fn worker(&self, name: &str) -> Option<&WorkerSettings> {
        self.workers.get(name)
    }

    /// Whether a worker should run. Workers without an entry are enabled.
    pub fn is_enabled(&self, name: &str) -> bool {
        self.workers.get(name).map(|w| w.enabled).unwrap_or(true)
    }

    /// Invocation deadline for a worker.
    pub fn timeout_for(&self, name: &str) -> Duration {
        let ms = self
            .workers
            .get(name)
            .and_then(|w| w.timeout_ms)
            .unwrap_or(self.global.worker_timeout_ms);
        Duration::from_millis(ms)
    }

    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.global.cancel_grace_ms)
    }

    /// Opaque parameters for a worker (empty object when unconfigured).
    pub fn params_for(&self, name: &str) -> serde_json::Value {
        self.workers
            .get(name)
            .map(|w| serde_json::Value::Object(w.params.clone()))
            .unwrap_or_else(|| serde_json::Value::Object(serde_json::Map::new()))
    }

    /// Make relative paths absolute against `base_dir`.
    ///
    /// Paths in a settings file are relative to the file's directory.
    pub fn resolve_paths(&mut self, base_dir: &Path) {
        absolutize(&mut self.global.output_dir, base_dir);
        absolutize(&mut self.global.log_dir, base_dir);
        if let Some(mirror) = self.global.mirror_csv.as_mut() {
            absolutize(mirror, base_dir);
        }
        for worker in self.workers.values_mut() {
            if let Some(cmd) = worker.command.as_mut() {
                // Bare program names are looked up on PATH.
                if cmd.components().count() > 1 {
                    absolutize(cmd, base_dir);
                }
            }
            if let Some(dir) = worker.working_dir.as_mut() {
                absolutize(dir, base_dir);
            }
        }
    }

    /// Path of the persisted table.
    pub fn table_path(&self) -> PathBuf {
        self.global.output_dir.join(crate::TABLE_FILENAME)
    }

    /// Path of the data dictionary document.
    pub fn dictionary_path(&self) -> PathBuf {
        self.global.output_dir.join(crate::DICTIONARY_FILENAME)
    }
}

fn absolutize(path: &mut PathBuf, base_dir: &Path) {
    if path.is_relative() {
        *path = base_dir.join(&*path);
    }
}
