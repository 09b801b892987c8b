//! Snapshot Aggregator Core Library
//!
//! This library provides the orchestration side of the aggregator:
//! - The worker contract, tiered extraction, and scoped sessions
//! - Command workers driven by settings
//! - The worker registry and discovery
//! - The orchestrator that runs one pass and summarizes it
//! - Exit codes and structured logging for the CLI
//!
//! The binary entry point is in `main.rs`.

pub mod exit_codes;
pub mod logging;
pub mod orchestrator;
pub mod registry;
pub mod worker;

// Re-export test utilities for integration tests
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use orchestrator::{
    Orchestrator, OrchestratorError, OutcomeStatus, RunOptions, RunSummary, StoreFailure,
    WorkerOutcome,
};
pub use registry::{RegistryError, WorkerDescriptor, WorkerFactory, WorkerListing, WorkerRegistry};
pub use worker::{FailureKind, Worker, WorkerContext, WorkerError};
