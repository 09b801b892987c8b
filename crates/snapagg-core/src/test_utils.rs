//! Fake workers and fixtures for orchestrator tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime};
use snapagg_common::{MetricTuple, WorkerResult};
use snapagg_config::Settings;
use snapagg_store::FixedClock;
use tempfile::TempDir;

use crate::registry::{RegistryError, WorkerRegistry};
use crate::worker::{Session, Worker, WorkerContext, WorkerError};

/// Scripted behaviour of a [`FakeWorker`].
#[derive(Debug, Clone)]
pub enum Behavior {
    Succeed(WorkerResult),
    Fail(WorkerError),
    Panic(String),
    /// Sleep in small steps, honouring cancellation.
    Sleep(Duration),
    /// Ignore cancellation entirely.
    Hang(Duration),
}

/// A worker that does what it is told and counts its sessions.
#[derive(Debug, Clone)]
pub struct FakeWorker {
    name: String,
    behavior: Behavior,
    sessions: SessionCounter,
}

impl FakeWorker {
    pub fn new(name: impl Into<String>, behavior: Behavior) -> Self {
        FakeWorker {
            name: name.into(),
            behavior,
            sessions: SessionCounter::default(),
        }
    }

    pub fn succeeding(name: impl Into<String>, tuples: Vec<MetricTuple>) -> Self {
        FakeWorker::new(name, Behavior::Succeed(WorkerResult::from_tuples(tuples)))
    }

    pub fn failing(name: impl Into<String>, err: WorkerError) -> Self {
        FakeWorker::new(name, Behavior::Fail(err))
    }

    pub fn with_sessions(mut self, sessions: SessionCounter) -> Self {
        self.sessions = sessions;
        self
    }
}

impl Worker for FakeWorker {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&mut self, ctx: &WorkerContext) -> Result<WorkerResult, WorkerError> {
        let _session = ctx.kit.scoped(self.sessions.open());
        match &self.behavior {
            Behavior::Succeed(result) => Ok(result.clone()),
            Behavior::Fail(err) => Err(err.clone()),
            Behavior::Panic(msg) => panic!("{}", msg),
            Behavior::Sleep(total) => {
                let step = Duration::from_millis(10);
                let mut slept = Duration::ZERO;
                while slept < *total {
                    ctx.check_cancelled()?;
                    std::thread::sleep(step);
                    slept += step;
                }
                Ok(WorkerResult::new())
            }
            Behavior::Hang(total) => {
                std::thread::sleep(*total);
                Ok(WorkerResult::new())
            }
        }
    }
}

/// Counts sessions opened and released across clones.
#[derive(Debug, Clone, Default)]
pub struct SessionCounter {
    opened: Arc<AtomicUsize>,
    released: Arc<AtomicUsize>,
}

impl SessionCounter {
    pub fn open(&self) -> CountedSession {
        self.opened.fetch_add(1, Ordering::SeqCst);
        CountedSession {
            released: self.released.clone(),
        }
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

pub struct CountedSession {
    released: Arc<AtomicUsize>,
}

impl Session for CountedSession {
    fn release(&mut self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// Register a fake under its own name.
pub fn register_fake(registry: &mut WorkerRegistry, worker: FakeWorker) -> Result<(), RegistryError> {
    let name = worker.name.clone();
    registry.register(name, move |_settings: &Settings| {
        Ok(Box::new(worker.clone()) as Box<dyn Worker>)
    })
}

/// A registry of fakes, in the given order.
pub fn fake_registry(workers: Vec<FakeWorker>) -> WorkerRegistry {
    let mut registry = WorkerRegistry::new();
    for worker in workers {
        if let Err(e) = register_fake(&mut registry, worker) {
            panic!("fake registration failed: {}", e);
        }
    }
    registry
}

/// Settings pointing output and logs into a temporary directory.
pub fn temp_settings(dir: &TempDir) -> Settings {
    let mut settings = Settings::default();
    settings.global.output_dir = dir.path().join("output");
    settings.global.log_dir = dir.path().join("logs");
    settings.global.worker_timeout_ms = 5_000;
    settings.global.cancel_grace_ms = 500;
    settings
}

pub fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

pub fn at(date: NaiveDate, h: u32, m: u32, s: u32) -> NaiveDateTime {
    date.and_hms_opt(h, m, s).expect("valid time")
}

pub fn fixed_clock(now: NaiveDateTime) -> Arc<FixedClock> {
    Arc::new(FixedClock::new(now))
}
