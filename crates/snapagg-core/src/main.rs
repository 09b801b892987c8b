//! Snapshot Aggregator - scheduled metric collection
//!
//! The main entry point for `snapagg`, handling:
//! - One orchestration pass over the configured workers (`run`)
//! - Worker listing, settings/store validation, dictionary rebuild
//! - Read-only inspection of stored snapshots

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use snapagg_common::{format_error_human, OutputFormat, StructuredError, DATE_FORMAT, SCHEMA_VERSION};
use snapagg_config::{load_settings, ConfigOptions, ResolvedSettings};
use snapagg_core::exit_codes::ExitCode;
use snapagg_core::logging::{init_logging, level_from_verbosity, LogConfig, LogLevel};
use snapagg_core::orchestrator::store_options_for;
use snapagg_core::{Orchestrator, RunOptions, RunSummary, WorkerRegistry};
use snapagg_store::{csv_io, SnapshotStore, StoreLock, SystemClock};
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;

/// Snapshot Aggregator - merge daily metric snapshots from many sources into one table
#[derive(Parser)]
#[command(name = "snapagg")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    global: GlobalOpts,
}

/// Global options available to all commands
#[derive(Args, Debug)]
struct GlobalOpts {
    /// Settings file (overrides SNAPAGG_CONFIG and the standard locations)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, short = 'f', global = true, default_value = "json")]
    format: OutputFormat,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Override global.output_dir
    #[arg(long, global = true)]
    output_dir: Option<PathBuf>,

    /// Date bucket to write or show (YYYY-MM-DD, default today)
    #[arg(long, global = true, value_parser = parse_date)]
    date: Option<NaiveDate>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every enabled worker once and merge the results (default)
    Run,

    /// List registered workers
    Workers,

    /// Validate settings and the persisted store without writing
    Check,

    /// Re-render the data dictionary from stored entries and table contents
    Dictionary,

    /// Print stored rows for one date
    Show(ShowArgs),
}

#[derive(Args, Debug)]
struct ShowArgs {
    /// Only rows from this source
    #[arg(long)]
    source: Option<String>,

    /// Every date, not just one
    #[arg(long)]
    all: bool,
}

fn parse_date(s: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s, DATE_FORMAT).map_err(|e| format!("expected YYYY-MM-DD: {}", e))
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            let code = if err.use_stderr() {
                ExitCode::ArgsError
            } else {
                ExitCode::Clean
            };
            std::process::exit(code.as_i32());
        }
    };

    let resolved = match load_settings(&ConfigOptions {
        settings_path: cli.global.config.clone(),
        output_dir: cli.global.output_dir.clone(),
    }) {
        Ok(resolved) => resolved,
        Err(err) => {
            let err: snapagg_common::Error = err.into();
            report_error(&cli.global, &err);
            std::process::exit(ExitCode::ConfigError.as_i32());
        }
    };

    let is_run = matches!(cli.command, None | Some(Commands::Run));
    init_cli_logging(&cli.global, &resolved, is_run);
    tracing::debug!(
        target: snapagg_core::logging::event_names::CONFIG_LOADED,
        path = ?resolved.path,
        source = ?resolved.source,
        "settings loaded"
    );

    let exit_code = match cli.command {
        None | Some(Commands::Run) => run_pass(&cli.global, &resolved),
        Some(Commands::Workers) => run_workers(&cli.global, &resolved),
        Some(Commands::Check) => run_check(&cli.global, &resolved),
        Some(Commands::Dictionary) => run_dictionary(&cli.global, &resolved),
        Some(Commands::Show(args)) => run_show(&cli.global, &resolved, &args),
    };

    std::process::exit(exit_code.as_i32());
}

fn init_cli_logging(global: &GlobalOpts, resolved: &ResolvedSettings, with_run_log: bool) {
    let default_level = resolved
        .settings
        .global
        .log_level
        .parse::<LogLevel>()
        .unwrap_or_default();
    let mut config = LogConfig::from_env(
        default_level,
        level_from_verbosity(global.verbose, global.quiet),
        None,
    );
    if with_run_log {
        config = config.with_log_dir(&resolved.settings.global.log_dir);
    }
    init_logging(&config);
}

fn report_error(global: &GlobalOpts, err: &snapagg_common::Error) {
    if global.format == OutputFormat::Json {
        let payload = serde_json::json!({
            "schema_version": SCHEMA_VERSION,
            "error": StructuredError::from(err),
        });
        println!("{}", payload);
    }
    eprintln!(
        "{}",
        format_error_human(err, std::io::stderr().is_terminal())
    );
}

fn fail(global: &GlobalOpts, err: snapagg_common::Error) -> ExitCode {
    report_error(global, &err);
    ExitCode::for_error(&err)
}

fn print_json(value: &impl serde::Serialize) -> ExitCode {
    match serde_json::to_string_pretty(value) {
        Ok(text) => {
            println!("{}", text);
            ExitCode::Clean
        }
        Err(e) => {
            eprintln!("failed to encode output: {}", e);
            ExitCode::InternalError
        }
    }
}

fn build_registry(global: &GlobalOpts, resolved: &ResolvedSettings) -> Result<WorkerRegistry, ExitCode> {
    WorkerRegistry::from_settings(&resolved.settings).map_err(|e| fail(global, e.into()))
}

// ============================================================================
// Commands
// ============================================================================

fn run_pass(global: &GlobalOpts, resolved: &ResolvedSettings) -> ExitCode {
    let registry = match build_registry(global, resolved) {
        Ok(registry) => registry,
        Err(code) => return code,
    };
    let orchestrator = Orchestrator::new(resolved.settings.clone(), registry);

    let summary = match orchestrator.run_once(&RunOptions { date: global.date }) {
        Ok(summary) => summary,
        Err(err) => return fail(global, err.into()),
    };

    let printed = match global.format {
        OutputFormat::Json => print_json(&summary),
        OutputFormat::Summary => {
            println!("{}", summary.summary_line());
            ExitCode::Clean
        }
        OutputFormat::Table => {
            print!("{}", outcome_table(&summary));
            ExitCode::Clean
        }
    };
    if printed != ExitCode::Clean {
        return printed;
    }
    summary.exit_code()
}

fn outcome_table(summary: &RunSummary) -> String {
    let width = summary
        .outcomes
        .iter()
        .map(|o| o.source.len())
        .max()
        .unwrap_or(0)
        .max("SOURCE".len());
    let mut out = format!(
        "{:<width$}  {:<9}  {:>8}  {:>8}  {:>8}  DETAIL\n",
        "SOURCE",
        "STATUS",
        "INSERTED",
        "UPDATED",
        "REJECTED",
        width = width
    );
    for o in &summary.outcomes {
        let status = match o.failure_kind {
            Some(kind) => kind.to_string(),
            None => "ok".to_string(),
        };
        out.push_str(&format!(
            "{:<width$}  {:<9}  {:>8}  {:>8}  {:>8}  {}\n",
            o.source,
            status,
            o.rows_inserted,
            o.rows_updated,
            o.rows_rejected,
            o.detail.as_deref().unwrap_or(""),
            width = width
        ));
    }
    out.push_str(&summary.summary_line());
    out.push('\n');
    out
}

fn run_workers(global: &GlobalOpts, resolved: &ResolvedSettings) -> ExitCode {
    let registry = match build_registry(global, resolved) {
        Ok(registry) => registry,
        Err(code) => return code,
    };
    let listing = registry.list(&resolved.settings);

    match global.format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "schema_version": SCHEMA_VERSION,
            "workers": listing,
        })),
        OutputFormat::Summary | OutputFormat::Table => {
            for w in &listing {
                let state = if w.template {
                    "template"
                } else if w.enabled {
                    "enabled"
                } else {
                    "disabled"
                };
                println!(
                    "{:<20} {:<9} {:<8} {}",
                    w.source,
                    state,
                    w.kind,
                    w.command.as_deref().unwrap_or("")
                );
            }
            ExitCode::Clean
        }
    }
}

fn run_check(global: &GlobalOpts, resolved: &ResolvedSettings) -> ExitCode {
    let settings = &resolved.settings;
    let registry = match build_registry(global, resolved) {
        Ok(registry) => registry,
        Err(code) => return code,
    };

    let table = match csv_io::load_table(&settings.table_path()) {
        Ok(table) => table,
        Err(err) => return fail(global, err.into()),
    };
    let dictionary = snapagg_store::DataDictionary::load(&settings.dictionary_path());

    let report = serde_json::json!({
        "schema_version": SCHEMA_VERSION,
        "status": "ok",
        "settings": {
            "path": resolved.path,
            "source": resolved.source.to_string(),
            "hash": resolved.hash,
        },
        "store": {
            "table": settings.table_path(),
            "rows": table.len(),
            "metrics": table.metrics_in_order().len(),
            "locked": StoreLock::is_held(&settings.global.output_dir),
        },
        "dictionary": match &dictionary {
            Ok(d) => serde_json::json!({"entries": d.len()}),
            Err(e) => serde_json::json!({"error": e.to_string()}),
        },
        "workers": registry.discover(settings).iter().map(|d| d.source.clone()).collect::<Vec<_>>(),
    });

    match global.format {
        OutputFormat::Json => print_json(&report),
        OutputFormat::Summary | OutputFormat::Table => {
            println!(
                "ok: {} rows, {} workers enabled, settings {}",
                table.len(),
                registry.discover(settings).len(),
                resolved
                    .path
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "built-in defaults".to_string())
            );
            ExitCode::Clean
        }
    }
}

fn run_dictionary(global: &GlobalOpts, resolved: &ResolvedSettings) -> ExitCode {
    let settings = &resolved.settings;
    let _lock = match StoreLock::acquire(&settings.global.output_dir) {
        Ok(lock) => lock,
        Err(err) => return fail(global, err.into()),
    };

    let mut store = match SnapshotStore::open(store_options_for(settings), Arc::new(SystemClock)) {
        Ok(store) => store,
        Err(err) => return fail(global, err.into()),
    };
    let added = match store.rebuild_dictionary() {
        Ok(added) => added,
        Err(err) => return fail(global, err.into()),
    };

    match global.format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "schema_version": SCHEMA_VERSION,
            "path": settings.dictionary_path(),
            "added": added,
            "entries": store.dictionary().len(),
        })),
        OutputFormat::Summary | OutputFormat::Table => {
            println!(
                "{}: {} entries ({} added)",
                settings.dictionary_path().display(),
                store.dictionary().len(),
                added
            );
            ExitCode::Clean
        }
    }
}

fn run_show(global: &GlobalOpts, resolved: &ResolvedSettings, args: &ShowArgs) -> ExitCode {
    let table = match csv_io::load_table(&resolved.settings.table_path()) {
        Ok(table) => table,
        Err(err) => return fail(global, err.into()),
    };
    let date = if args.all {
        None
    } else {
        Some(global.date.unwrap_or_else(|| chrono::Local::now().date_naive()))
    };
    let rows = table.select(date, args.source.as_deref());

    match global.format {
        OutputFormat::Json => print_json(&rows),
        OutputFormat::Summary => {
            println!("{} rows", rows.len());
            ExitCode::Clean
        }
        OutputFormat::Table => match csv_io::render_pretty(&rows) {
            Ok(text) => {
                println!("{}", text);
                ExitCode::Clean
            }
            Err(err) => fail(global, err.into()),
        },
    }
}
