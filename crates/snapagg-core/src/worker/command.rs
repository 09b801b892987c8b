//! Workers backed by an external program.
//!
//! Protocol:
//! - stdin: `{"source": .., "date": "YYYY-MM-DD", "params": {..}}`
//! - exit 0: stdout holds the result, read by a tiered extractor:
//!   1. `{"metrics": [{"metric_title", "category", "sub_category"?, "value"}]}`
//!   2. `{"tables": [{"title", "headers", "rows", "total"?}]}`
//!   3. tab-delimited lines `title<TAB>category[<TAB>sub_category]<TAB>value`
//! - exit 10/11/12: authentication/navigation/extraction failure, stderr is
//!   the detail
//!
//! An empty result must be reported explicitly as `{"metrics": []}`.
//!
//! The child process is the worker's session: it is killed when the
//! invocation ends for any reason other than a normal exit.

use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use serde::Deserialize;

use snapagg_common::{MetricTuple, WorkerResult, DATE_FORMAT};

use super::session::Session;
use super::table_map::ExtractedTable;
use super::tiers::{FnTier, TieredExtractor};
use super::{Worker, WorkerContext, WorkerError};

pub const EXIT_AUTHENTICATION: i32 = 10;
pub const EXIT_NAVIGATION: i32 = 11;
pub const EXIT_EXTRACTION: i32 = 12;

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const STDERR_TAIL_BYTES: usize = 4096;
const DETAIL_CHARS: usize = 500;

/// How to launch the program.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandSpec {
    pub command: PathBuf,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(command: impl Into<PathBuf>) -> Self {
        CommandSpec {
            command: command.into(),
            args: Vec::new(),
            working_dir: None,
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

/// A worker that runs one external program per invocation.
pub struct CommandWorker {
    name: String,
    spec: CommandSpec,
    extractor: TieredExtractor<str>,
}

impl CommandWorker {
    pub fn new(name: impl Into<String>, spec: CommandSpec) -> Self {
        CommandWorker {
            name: name.into(),
            spec,
            extractor: output_extractor(),
        }
    }

    pub fn spec(&self) -> &CommandSpec {
        &self.spec
    }

    fn spawn(&self) -> Result<Child, WorkerError> {
        let mut command = Command::new(&self.spec.command);
        command
            .args(&self.spec.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &self.spec.working_dir {
            command.current_dir(dir);
        }
        command.spawn().map_err(|e| {
            WorkerError::Unexpected(format!(
                "failed to spawn {}: {}",
                self.spec.command.display(),
                e
            ))
        })
    }
}

impl Worker for CommandWorker {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&mut self, ctx: &WorkerContext) -> Result<WorkerResult, WorkerError> {
        let request = serde_json::json!({
            "source": ctx.source,
            "date": ctx.date.format(DATE_FORMAT).to_string(),
            "params": ctx.params,
        });
        let stdin_data = serde_json::to_vec(&request)
            .map_err(|e| WorkerError::Unexpected(format!("failed to encode request: {}", e)))?;

        let started = Instant::now();
        let mut process = ctx.kit.scoped(ChildProcess::new(self.spawn()?));

        // Readers first and the request on its own thread: a program may
        // write a full pipe before reading stdin, or never read it at all.
        let stdout_reader = process
            .child
            .stdout
            .take()
            .map(|pipe| spawn_reader(pipe, ctx.kit.max_output_bytes, Keep::Head));
        let stderr_reader = process
            .child
            .stderr
            .take()
            .map(|pipe| spawn_reader(pipe, STDERR_TAIL_BYTES, Keep::Tail));
        let stdin_writer = process
            .child
            .stdin
            .take()
            .map(|pipe| spawn_writer(pipe, stdin_data));

        let status = loop {
            match process.child.try_wait() {
                Ok(Some(status)) => {
                    process.exited = true;
                    break status;
                }
                Ok(None) => {
                    if ctx.cancel.is_cancelled() {
                        return Err(WorkerError::Navigation("cancelled".to_string()));
                    }
                    if Instant::now() >= ctx.deadline {
                        return Err(WorkerError::Navigation(format!(
                            "timed out after {}ms",
                            started.elapsed().as_millis()
                        )));
                    }
                    std::thread::sleep(POLL_INTERVAL);
                }
                Err(e) => return Err(WorkerError::Unexpected(format!("wait failed: {}", e))),
            }
        };

        let stdout = join_reader(stdout_reader);
        let stderr = join_reader(stderr_reader);
        let detail = stderr_detail(&stderr.bytes);
        if let Some(Err(e)) = stdin_writer.and_then(|h| h.join().ok()) {
            return Err(WorkerError::Unexpected(format!("failed to write stdin: {}", e)));
        }

        tracing::debug!(
            worker = %self.name,
            code = ?status.code(),
            stdout_bytes = stdout.total,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "worker process exited"
        );

        match status.code() {
            Some(0) => {}
            Some(EXIT_AUTHENTICATION) => return Err(WorkerError::Authentication(detail)),
            Some(EXIT_NAVIGATION) => return Err(WorkerError::Navigation(detail)),
            Some(EXIT_EXTRACTION) => return Err(WorkerError::unparseable(detail)),
            Some(code) => {
                return Err(WorkerError::Unexpected(format!(
                    "exited with code {}: {}",
                    code, detail
                )))
            }
            None => {
                return Err(WorkerError::Unexpected(format!(
                    "terminated by signal: {}",
                    detail
                )))
            }
        }

        if stdout.total > stdout.bytes.len() {
            tracing::warn!(
                worker = %self.name,
                total = stdout.total,
                kept = stdout.bytes.len(),
                "worker output truncated"
            );
        }

        let text = String::from_utf8_lossy(&stdout.bytes);
        self.extractor.extract(&text)
    }
}

/// The running program, killed on release unless it already exited.
struct ChildProcess {
    child: Child,
    exited: bool,
}

impl ChildProcess {
    fn new(child: Child) -> Self {
        ChildProcess {
            child,
            exited: false,
        }
    }
}

impl Session for ChildProcess {
    fn release(&mut self) {
        if !self.exited {
            let _ = self.child.kill();
            let _ = self.child.wait();
            self.exited = true;
        }
    }
}

#[derive(Clone, Copy)]
enum Keep {
    Head,
    Tail,
}

struct Captured {
    bytes: Vec<u8>,
    total: usize,
}

/// Drain `pipe` on a thread, keeping at most `cap` bytes.
///
/// The pipe is always read to EOF so the program never blocks on a full pipe.
fn spawn_reader<R: Read + Send + 'static>(
    mut pipe: R,
    cap: usize,
    keep: Keep,
) -> JoinHandle<Captured> {
    std::thread::spawn(move || {
        let mut bytes = Vec::new();
        let mut total = 0usize;
        let mut chunk = [0u8; 8192];
        loop {
            let n = match pipe.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            };
            total += n;
            match keep {
                Keep::Head => {
                    let room = cap.saturating_sub(bytes.len());
                    bytes.extend_from_slice(&chunk[..n.min(room)]);
                }
                Keep::Tail => {
                    bytes.extend_from_slice(&chunk[..n]);
                    if bytes.len() > cap {
                        let excess = bytes.len() - cap;
                        bytes.drain(..excess);
                    }
                }
            }
        }
        Captured { bytes, total }
    })
}

/// Write the request and close stdin. BrokenPipe is fine: the program may
/// exit without reading its input.
fn spawn_writer<W: Write + Send + 'static>(
    mut pipe: W,
    data: Vec<u8>,
) -> JoinHandle<std::io::Result<()>> {
    std::thread::spawn(move || match pipe.write_all(&data) {
        Err(e) if e.kind() != std::io::ErrorKind::BrokenPipe => Err(e),
        _ => Ok(()),
    })
}

fn join_reader(handle: Option<JoinHandle<Captured>>) -> Captured {
    handle
        .and_then(|h| h.join().ok())
        .unwrap_or(Captured {
            bytes: Vec::new(),
            total: 0,
        })
}

fn stderr_detail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return "no diagnostic output".to_string();
    }
    let chars: Vec<char> = trimmed.chars().collect();
    let start = chars.len().saturating_sub(DETAIL_CHARS);
    chars[start..].iter().collect()
}

#[derive(Deserialize)]
struct MetricsDocument {
    metrics: Vec<MetricTuple>,
}

#[derive(Deserialize)]
struct TablesDocument {
    tables: Vec<ExtractedTable>,
}

/// Parse `text` as a JSON object carrying `key`.
///
/// `NoData` when the text is not such an object, `Unparseable` when the key
/// is present but its content does not match.
fn json_document<T: serde::de::DeserializeOwned>(text: &str, key: &str) -> Result<T, WorkerError> {
    let value: serde_json::Value = serde_json::from_str(text.trim())
        .map_err(|_| WorkerError::no_data("output is not a JSON document"))?;
    if value.get(key).is_none() {
        return Err(WorkerError::no_data(format!("no {:?} key", key)));
    }
    serde_json::from_value(value).map_err(|e| WorkerError::unparseable(e.to_string()))
}

fn extract_metrics(text: &str) -> Result<WorkerResult, WorkerError> {
    let doc: MetricsDocument = json_document(text, "metrics")?;
    Ok(WorkerResult::from_tuples(doc.metrics))
}

fn extract_tables(text: &str) -> Result<WorkerResult, WorkerError> {
    let doc: TablesDocument = json_document(text, "tables")?;
    let mut result = WorkerResult::new();
    for table in &doc.tables {
        result.extend(super::map_table(
            &table.title,
            &table.headers,
            &table.rows,
            table.total.as_ref(),
        ));
    }
    Ok(result)
}

fn extract_delimited(text: &str) -> Result<WorkerResult, WorkerError> {
    let mut result = WorkerResult::new();
    for (idx, line) in text.lines().enumerate() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() || line.trim_start().starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split('\t').map(str::trim).collect();
        let tuple = match fields.as_slice() {
            [title, category, value] => MetricTuple::new(*title, *category, *value),
            [title, category, sub, value] => {
                MetricTuple::new(*title, *category, *value).with_sub_category(*sub)
            }
            _ => {
                return Err(WorkerError::unparseable(format!(
                    "line {}: expected 3 or 4 tab-separated fields, got {}",
                    idx + 1,
                    fields.len()
                )))
            }
        };
        result.push(tuple);
    }
    if result.is_empty() {
        return Err(WorkerError::no_data("no output lines"));
    }
    Ok(result)
}

fn output_extractor() -> TieredExtractor<str> {
    TieredExtractor::new()
        .with_tier(FnTier::new("metrics_json", extract_metrics))
        .with_tier(FnTier::new("tables_json", extract_tables))
        .with_tier(FnTier::new("delimited_text", extract_delimited))
}
