//! Structured logging for the aggregator.
//!
//! Two sinks:
//! - stderr, human-readable by default or JSONL for machine consumers
//! - an optional daily JSONL run log (`snapagg_YYYYMMDD.log`) in `log_dir`
//!
//! stdout is reserved for command payloads (the run summary).
//!
//! ```ignore
//! use snapagg_core::logging::{init_logging, LogConfig, LogContext, LogLevel, Stage, event_names};
//!
//! init_logging(&LogConfig::from_env(LogLevel::Info, None, None));
//! let ctx = LogContext::new("run-0123456789ab");
//! log_event!(ctx, INFO, event_names::RUN_STARTED, Stage::Init, "run started");
//! ```

pub mod config;
pub mod events;
pub mod layer;

pub use config::{level_from_verbosity, LogConfig, LogFormat, LogLevel};
pub use events::{event_names, Level, LogContext, Stage};
pub use layer::{daily_log_path, JsonlLayer};

use std::io::IsTerminal;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber.
///
/// Safe to call more than once; later calls are ignored. A run log file that
/// cannot be opened is reported on stderr and skipped.
pub fn init_logging(config: &LogConfig) {
    let filter = EnvFilter::try_new(config.filter_directives())
        .unwrap_or_else(|_| EnvFilter::new(config.level.to_string()));

    let human_layer = (config.format == LogFormat::Human).then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_ansi(std::io::stderr().is_terminal())
    });
    let jsonl_layer = (config.format == LogFormat::Jsonl).then(JsonlLayer::stderr);

    let file_layer = config
        .log_dir
        .as_ref()
        .and_then(|dir| match JsonlLayer::daily_file(dir) {
            Ok(layer) => Some(layer),
            Err(e) => {
                eprintln!(
                    "warning: run log in {} unavailable: {}",
                    dir.display(),
                    e
                );
                None
            }
        });

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(human_layer)
        .with(jsonl_layer)
        .with(file_layer)
        .try_init();
}

/// Structured event logging with run context.
///
/// ```ignore
/// log_event!(ctx, INFO, event_names::WORKER_SUCCEEDED, Stage::Invoke, "worker succeeded",
///     source = "smax", rows = 12u64);
/// ```
#[macro_export]
macro_rules! log_event {
    ($ctx:expr, INFO, $event:expr, $stage:expr, $msg:expr $(, $key:ident = $val:expr)*) => {
        tracing::info!(
            target: $event,
            run_id = %$ctx.run_id,
            stage = %$stage,
            message = $msg,
            $($key = $val,)*
        )
    };
    ($ctx:expr, DEBUG, $event:expr, $stage:expr, $msg:expr $(, $key:ident = $val:expr)*) => {
        tracing::debug!(
            target: $event,
            run_id = %$ctx.run_id,
            stage = %$stage,
            message = $msg,
            $($key = $val,)*
        )
    };
    ($ctx:expr, WARN, $event:expr, $stage:expr, $msg:expr $(, $key:ident = $val:expr)*) => {
        tracing::warn!(
            target: $event,
            run_id = %$ctx.run_id,
            stage = %$stage,
            message = $msg,
            $($key = $val,)*
        )
    };
    ($ctx:expr, ERROR, $event:expr, $stage:expr, $msg:expr $(, $key:ident = $val:expr)*) => {
        tracing::error!(
            target: $event,
            run_id = %$ctx.run_id,
            stage = %$stage,
            message = $msg,
            $($key = $val,)*
        )
    };
}
