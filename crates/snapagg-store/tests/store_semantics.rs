//! End-to-end store behavior across save/load cycles.

use chrono::{Duration, NaiveDate, NaiveDateTime};
use std::sync::Arc;
use tempfile::TempDir;

use snapagg_common::{MetricKey, MetricTuple, NewMetric, WorkerResult};
use snapagg_store::{FixedClock, SnapshotStore, StoreError, StoreLock, StoreOptions};

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 2, d).unwrap()
}

fn at(d: u32, h: u32, m: u32) -> NaiveDateTime {
    day(d).and_hms_opt(h, m, 0).unwrap()
}

fn result(tuples: Vec<MetricTuple>) -> WorkerResult {
    WorkerResult::from_tuples(tuples)
}

struct Fixture {
    dir: TempDir,
    clock: Arc<FixedClock>,
}

impl Fixture {
    fn new(start: NaiveDateTime) -> Self {
        Fixture {
            dir: TempDir::new().unwrap(),
            clock: Arc::new(FixedClock::new(start)),
        }
    }

    fn options(&self) -> StoreOptions {
        StoreOptions::in_dir(self.dir.path())
    }

    fn open(&self) -> SnapshotStore {
        SnapshotStore::open(self.options(), self.clock.clone()).unwrap()
    }

    /// One complete run: open, merge, save.
    fn run(&self, source: &str, date: NaiveDate, res: &WorkerResult) {
        let mut store = self.open();
        store.merge(source, date, res).unwrap();
        store.save().unwrap();
    }

    fn table_text(&self) -> String {
        std::fs::read_to_string(self.options().table_path).unwrap()
    }
}

#[test]
fn later_run_same_day_replaces_value_and_timestamp() {
    let fx = Fixture::new(at(8, 9, 0));
    fx.run(
        "smax",
        day(8),
        &result(vec![MetricTuple::new("BIA Requests", "total", 42i64)]),
    );

    fx.clock.set(at(8, 14, 30));
    fx.run(
        "smax",
        day(8),
        &result(vec![MetricTuple::new("BIA Requests", "total", 47i64)]),
    );

    let store = fx.open();
    assert_eq!(store.table().len(), 1);
    let row = store
        .table()
        .get(&MetricKey {
            date: day(8),
            source: "smax".into(),
            metric_title: "BIA Requests".into(),
            category: "total".into(),
            sub_category: String::new(),
        })
        .unwrap();
    assert_eq!(row.value, 47.0);
    assert_eq!(row.timestamp, at(8, 14, 30));

    assert!(fx
        .table_text()
        .contains("2026-02-08,2026-02-08 14:30:00,smax,BIA Requests,total,,47"));
}

#[test]
fn rerunning_identical_result_does_not_grow_table() {
    let fx = Fixture::new(at(8, 9, 0));
    let res = result(vec![
        MetricTuple::new("Tickets", "open", 10i64),
        MetricTuple::new("Tickets", "closed", 20i64).with_sub_category("L1"),
    ]);
    for _ in 0..3 {
        fx.run("smax", day(8), &res);
        fx.clock.advance(Duration::minutes(15));
    }
    assert_eq!(fx.open().table().len(), 2);
}

#[test]
fn next_day_adds_rows_and_keeps_history() {
    let fx = Fixture::new(at(8, 9, 0));
    fx.run(
        "smax",
        day(8),
        &result(vec![MetricTuple::new("Tickets", "open", 10i64)]),
    );

    fx.clock.set(at(9, 9, 0));
    fx.run(
        "smax",
        day(9),
        &result(vec![MetricTuple::new("Tickets", "open", 12i64)]),
    );

    let store = fx.open();
    assert_eq!(store.table().len(), 2);
    assert_eq!(store.select(Some(day(8)), None)[0].value, 10.0);
    assert_eq!(store.select(Some(day(9)), None)[0].value, 12.0);
}

#[test]
fn new_metrics_are_documented_exactly_once() {
    let fx = Fixture::new(at(8, 9, 0));
    let res = result(vec![
        MetricTuple::new("Tickets", "open", 1i64),
        MetricTuple::new("Tickets", "closed", 2i64),
        MetricTuple::new("Calls", "total", 3i64),
    ]);

    let mut store = fx.open();
    let report = store.merge("smax", day(8), &res).unwrap();
    assert_eq!(
        report.new_metrics,
        vec![NewMetric::new("Tickets", "smax"), NewMetric::new("Calls", "smax")]
    );
    assert_eq!(store.save().unwrap().dictionary_added, 2);

    // Second run, new day, one extra category and one extra metric.
    fx.clock.set(at(9, 9, 0));
    let mut store = fx.open();
    let report = store
        .merge(
            "smax",
            day(9),
            &result(vec![
                MetricTuple::new("Tickets", "pending", 1i64),
                MetricTuple::new("Escalations", "total", 1i64),
            ]),
        )
        .unwrap();
    assert_eq!(report.new_metrics, vec![NewMetric::new("Escalations", "smax")]);
    store.save().unwrap();

    let doc = std::fs::read_to_string(fx.options().dictionary_path).unwrap();
    assert_eq!(doc.matches("| Tickets | smax |").count(), 1);
    assert_eq!(doc.matches("| Escalations | smax |").count(), 1);
    assert!(doc.contains("| Escalations | smax | Report from smax. [Add description] | 2026-02-09 09:00:00 |"));
}

#[test]
fn corrupt_table_is_fatal_and_left_untouched() {
    let fx = Fixture::new(at(8, 9, 0));
    let path = fx.options().table_path;
    std::fs::write(&path, "garbage,header\n1,2\n").unwrap();

    let err = SnapshotStore::open(fx.options(), fx.clock.clone()).unwrap_err();
    assert!(matches!(err, StoreError::Corruption { .. }));
    assert_eq!(
        std::fs::read_to_string(&path).unwrap(),
        "garbage,header\n1,2\n"
    );
    assert!(!fx.options().dictionary_path.exists());
}

#[test]
fn retention_prunes_on_save() {
    let fx = Fixture::new(at(1, 9, 0));
    fx.run(
        "smax",
        day(1),
        &result(vec![MetricTuple::new("Tickets", "open", 1i64)]),
    );

    fx.clock.set(at(20, 9, 0));
    let mut options = fx.options();
    options.retention_days = 7;
    let mut store = SnapshotStore::open(options, fx.clock.clone()).unwrap();
    store
        .merge(
            "smax",
            day(20),
            &result(vec![MetricTuple::new("Tickets", "open", 2i64)]),
        )
        .unwrap();
    let report = store.save().unwrap();
    assert_eq!(report.pruned, 1);
    assert_eq!(report.rows, 1);
}

#[test]
fn mirror_receives_identical_copy() {
    let fx = Fixture::new(at(8, 9, 0));
    let mirror_dir = TempDir::new().unwrap();
    let mut options = fx.options();
    options.mirror_path = Some(mirror_dir.path().join("share").join("kpi.csv"));

    let mut store = SnapshotStore::open(options.clone(), fx.clock.clone()).unwrap();
    store
        .merge(
            "smax",
            day(8),
            &result(vec![MetricTuple::new("Tickets", "open", 1i64)]),
        )
        .unwrap();
    let report = store.save().unwrap();
    assert!(report.mirror_error.is_none());

    let mirror = std::fs::read_to_string(options.mirror_path.unwrap()).unwrap();
    assert_eq!(mirror, fx.table_text());
}

#[test]
fn lock_blocks_second_writer() {
    let fx = Fixture::new(at(8, 9, 0));
    let _held = StoreLock::acquire(fx.dir.path()).unwrap();
    assert!(matches!(
        StoreLock::acquire(fx.dir.path()),
        Err(StoreError::Locked { .. })
    ));
}

#[test]
fn backfilled_date_survives_retention() {
    let fx = Fixture::new(at(20, 9, 0));
    let mut options = fx.options();
    options.retention_days = 7;

    let mut store = SnapshotStore::open(options, fx.clock.clone()).unwrap();
    store
        .merge(
            "smax",
            day(1),
            &result(vec![MetricTuple::new("Tickets", "open", 5i64)]),
        )
        .unwrap();
    let report = store.save().unwrap();

    assert_eq!(report.pruned, 0);
    assert_eq!(report.kept_past_retention, 1);
    assert_eq!(report.rows, 1);
    assert!(fx.table_text().contains("2026-02-01,"));
}

#[test]
fn failed_dictionary_write_is_repaired_by_next_save() {
    let fx = Fixture::new(at(8, 9, 0));
    let blocker = fx.dir.path().join("blocker");
    std::fs::write(&blocker, "not a directory").unwrap();
    let mut broken = fx.options();
    broken.dictionary_path = blocker.join("DATA_DICTIONARY.md");

    let mut store = SnapshotStore::open(broken, fx.clock.clone()).unwrap();
    store
        .merge(
            "smax",
            day(8),
            &result(vec![MetricTuple::new("Tickets", "open", 1i64)]),
        )
        .unwrap();
    let report = store.save().unwrap();
    assert!(report.dictionary_error.is_some());
    assert_eq!(report.rows, 1);

    // The pair is no longer new, but it is still undocumented.
    fx.clock.set(at(8, 17, 0));
    let mut store = fx.open();
    let report = store.save().unwrap();
    assert_eq!(report.dictionary_added, 1);
    assert!(store
        .dictionary()
        .contains(&NewMetric::new("Tickets", "smax")));
    let doc = std::fs::read_to_string(fx.options().dictionary_path).unwrap();
    assert!(doc.contains("| Tickets | smax |"));
}
