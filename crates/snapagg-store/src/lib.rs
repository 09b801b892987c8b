//! Snapshot store for the aggregator.
//!
//! Owns the persisted metric table and the data dictionary:
//! - [`table`]: in-memory rows with a natural-key index
//! - [`merge`]: idempotent replace-by-key merge of worker results
//! - [`csv_io`]: Arrow-backed CSV load/save with corruption detection
//! - [`dictionary`]: schema drift registry rendered as Markdown
//! - [`store`]: the facade the orchestrator drives

pub mod clock;
pub mod csv_io;
pub mod dictionary;
pub mod error;
pub mod fsutil;
pub mod lock;
pub mod merge;
pub mod retention;
pub mod schema;
pub mod store;
pub mod table;

pub use clock::{Clock, FixedClock, SystemClock};
pub use dictionary::{DataDictionary, DataDictionaryEntry};
pub use error::StoreError;
pub use lock::StoreLock;
pub use merge::{MergeReport, RejectKind, RejectedTuple};
pub use store::{SaveReport, SnapshotStore, StoreOptions};
pub use table::{MetricTable, Upsert};

/// File name of the persisted table inside the output directory.
pub const TABLE_FILENAME: &str = "kpi_snapshots.csv";

/// File name of the data dictionary inside the output directory.
pub const DICTIONARY_FILENAME: &str = "DATA_DICTIONARY.md";
