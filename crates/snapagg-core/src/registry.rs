//! Worker registry: the ordered map from source name to worker factory.
//!
//! Workers are registered at startup, either from code with
//! [`WorkerRegistry::register`] or from settings entries carrying a
//! `command`. Registration order is discovery order, and discovery order is
//! run order.

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use snapagg_config::{validate_worker_name, Settings};

use crate::worker::{CommandSpec, CommandWorker, Worker, WorkerKit};

/// Marker prefix for template entries that are never run.
pub const TEMPLATE_PREFIX: char = '_';

/// Errors from worker registration and construction.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("worker {name:?} is already registered")]
    Duplicate { name: String },

    #[error("invalid worker name {name:?}: {message}")]
    InvalidName { name: String, message: String },

    #[error("worker {name} could not be constructed: {message}")]
    Construction { name: String, message: String },
}

impl From<RegistryError> for snapagg_common::Error {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::Construction { name, message } => {
                snapagg_common::Error::WorkerSetup {
                    worker: name,
                    message,
                }
            }
            other => snapagg_common::Error::Config(other.to_string()),
        }
    }
}

/// Builds a fresh worker for one run from the loaded settings.
pub type WorkerFactory =
    Box<dyn Fn(&Settings) -> Result<Box<dyn Worker>, RegistryError> + Send + Sync>;

struct Registration {
    name: String,
    factory: WorkerFactory,
    from_settings: bool,
}

/// A worker selected to run, with its invocation parameters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerDescriptor {
    pub source: String,
    pub timeout: Duration,
    #[serde(skip)]
    pub params: serde_json::Value,
}

/// One registered worker as shown by `snapagg workers`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerListing {
    pub source: String,
    pub enabled: bool,
    pub template: bool,
    /// `command` for settings-driven workers, `builtin` otherwise.
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

#[derive(Default)]
pub struct WorkerRegistry {
    entries: Vec<Registration>,
}

impl std::fmt::Debug for WorkerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|e| &e.name))
            .finish()
    }
}

impl WorkerRegistry {
    pub fn new() -> Self {
        WorkerRegistry::default()
    }

    /// Register a worker under `name`.
    ///
    /// Template names (leading `_`) are accepted so they show up in listings;
    /// they are never discovered.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F) -> Result<(), RegistryError>
    where
        F: Fn(&Settings) -> Result<Box<dyn Worker>, RegistryError> + Send + Sync + 'static,
    {
        self.insert(name.into(), Box::new(factory), false)
    }

    /// Register every settings entry that names a `command`.
    pub fn register_commands(&mut self, settings: &Settings) -> Result<usize, RegistryError> {
        let mut added = 0;
        for (name, worker) in &settings.workers {
            if worker.command.is_none() {
                continue;
            }
            let source = name.clone();
            self.insert(
                name.clone(),
                Box::new(move |settings: &Settings| command_worker(&source, settings)),
                true,
            )?;
            added += 1;
        }
        debug!(added, "registered command workers from settings");
        Ok(added)
    }

    /// Registry holding the command workers of `settings`.
    pub fn from_settings(settings: &Settings) -> Result<Self, RegistryError> {
        let mut registry = WorkerRegistry::new();
        registry.register_commands(settings)?;
        Ok(registry)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e.name == name)
    }

    /// Enabled, non-template workers in registration order.
    pub fn discover(&self, settings: &Settings) -> Vec<WorkerDescriptor> {
        self.entries
            .iter()
            .filter(|e| !is_template(&e.name))
            .filter(|e| settings.is_enabled(&e.name))
            .map(|e| WorkerDescriptor {
                source: e.name.clone(),
                timeout: settings.timeout_for(&e.name),
                params: settings.params_for(&e.name),
            })
            .collect()
    }

    /// Every registered worker, including disabled ones and templates.
    pub fn list(&self, settings: &Settings) -> Vec<WorkerListing> {
        self.entries
            .iter()
            .map(|e| WorkerListing {
                source: e.name.clone(),
                enabled: settings.is_enabled(&e.name),
                template: is_template(&e.name),
                kind: if e.from_settings { "command" } else { "builtin" },
                command: settings
                    .worker(&e.name)
                    .and_then(|w| w.command.as_ref())
                    .map(|c| c.display().to_string()),
            })
            .collect()
    }

    /// Construct the worker registered under `name`.
    pub fn build(&self, name: &str, settings: &Settings) -> Result<Box<dyn Worker>, RegistryError> {
        let entry = self
            .entries
            .iter()
            .find(|e| e.name == name)
            .ok_or_else(|| RegistryError::Construction {
                name: name.to_string(),
                message: "not registered".to_string(),
            })?;
        (entry.factory)(settings)
    }

    fn insert(
        &mut self,
        name: String,
        factory: WorkerFactory,
        from_settings: bool,
    ) -> Result<(), RegistryError> {
        let checked = name.strip_prefix(TEMPLATE_PREFIX).unwrap_or(&name);
        validate_worker_name(checked).map_err(|e| RegistryError::InvalidName {
            name: name.clone(),
            message: e.to_string(),
        })?;
        if self.contains(&name) {
            return Err(RegistryError::Duplicate { name });
        }
        self.entries.push(Registration {
            name,
            factory,
            from_settings,
        });
        Ok(())
    }
}

pub fn is_template(name: &str) -> bool {
    name.starts_with(TEMPLATE_PREFIX)
}

/// Worker kit configured from global settings.
pub fn worker_kit(settings: &Settings) -> WorkerKit {
    WorkerKit {
        max_output_bytes: settings.global.max_output_bytes,
    }
}

fn command_worker(name: &str, settings: &Settings) -> Result<Box<dyn Worker>, RegistryError> {
    let entry = settings
        .worker(name)
        .ok_or_else(|| RegistryError::Construction {
            name: name.to_string(),
            message: "settings entry disappeared".to_string(),
        })?;
    let command = entry
        .command
        .clone()
        .ok_or_else(|| RegistryError::Construction {
            name: name.to_string(),
            message: "no command configured".to_string(),
        })?;

    let mut spec = CommandSpec::new(command).with_args(entry.args.clone());
    if let Some(dir) = &entry.working_dir {
        spec = spec.with_working_dir(dir);
    }
    Ok(Box::new(CommandWorker::new(name, spec)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::{WorkerContext, WorkerError};
    use snapagg_common::WorkerResult;

    struct Noop(String);

    impl Worker for Noop {
        fn name(&self) -> &str {
            &self.0
        }

        fn run(&mut self, _ctx: &WorkerContext) -> Result<WorkerResult, WorkerError> {
            Ok(WorkerResult::new())
        }
    }

    fn noop(name: &'static str) -> impl Fn(&Settings) -> Result<Box<dyn Worker>, RegistryError> {
        move |_: &Settings| Ok(Box::new(Noop(name.to_string())) as Box<dyn Worker>)
    }

    fn settings(json: &str) -> Settings {
        Settings::from_json(json).unwrap()
    }

    #[test]
    fn discover_keeps_order_and_filters() {
        let mut registry = WorkerRegistry::new();
        registry.register("smax", noop("smax")).unwrap();
        registry.register("_template", noop("_template")).unwrap();
        registry.register("cuic", noop("cuic")).unwrap();
        registry.register("bia", noop("bia")).unwrap();

        let s = settings(r#"{"workers": {"cuic": {"enabled": false}}}"#);
        let names: Vec<_> = registry.discover(&s).into_iter().map(|d| d.source).collect();
        assert_eq!(names, vec!["smax", "bia"]);

        let listing = registry.list(&s);
        assert_eq!(listing.len(), 4);
        assert!(listing[1].template);
        assert!(!listing[2].enabled);
        assert_eq!(listing[0].kind, "builtin");
    }

    #[test]
    fn duplicate_and_invalid_names_rejected() {
        let mut registry = WorkerRegistry::new();
        registry.register("smax", noop("smax")).unwrap();
        assert!(matches!(
            registry.register("smax", noop("smax")),
            Err(RegistryError::Duplicate { .. })
        ));
        assert!(matches!(
            registry.register("SMAX", noop("SMAX")),
            Err(RegistryError::InvalidName { .. })
        ));
    }

    #[test]
    fn command_workers_come_from_settings() {
        let s = settings(
            r#"{"global": {"worker_timeout_ms": 1000},
                "workers": {
                    "cuic": {"command": "/opt/cuic", "args": ["--fast"], "timeout_ms": 50},
                    "smax": {"report_ids": [1]}
                }}"#,
        );
        let registry = WorkerRegistry::from_settings(&s).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.contains("cuic"));

        let discovered = registry.discover(&s);
        assert_eq!(discovered[0].timeout, Duration::from_millis(50));

        let worker = registry.build("cuic", &s).unwrap();
        assert_eq!(worker.name(), "cuic");
        assert_eq!(registry.list(&s)[0].command.as_deref(), Some("/opt/cuic"));
    }

    #[test]
    fn params_reach_descriptor() {
        let mut registry = WorkerRegistry::new();
        registry.register("smax", noop("smax")).unwrap();
        let s = settings(r#"{"workers": {"smax": {"report_ids": [12]}}}"#);
        let d = &registry.discover(&s)[0];
        assert_eq!(d.params["report_ids"][0], 12);
        assert_eq!(d.timeout, s.timeout_for("smax"));
    }

    #[test]
    fn building_unknown_worker_fails() {
        let registry = WorkerRegistry::new();
        let err = match registry.build("ghost", &Settings::default()) {
            Ok(worker) => panic!("built unregistered worker {}", worker.name()),
            Err(err) => err,
        };
        assert!(matches!(err, RegistryError::Construction { .. }));
        let common: snapagg_common::Error = err.into();
        assert_eq!(common.code(), 50);
    }
}
