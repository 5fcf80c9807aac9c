//! Result store over SQLite.

use crate::schema;
use benchy_core::{BenchmarkDefinition, Fingerprint, RawOutcome, TimeUnit};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::Serialize;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

/// Errors from the result store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("benchmark {0} has not been recorded")]
    UnknownBenchmark(Fingerprint),

    #[error("value out of range for {column}: {value}")]
    OutOfRange { column: &'static str, value: u64 },
}

/// Row id of a stored suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SuiteId(pub i64);

/// A definition as stored: identity and display metadata only.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredDefinition {
    pub fingerprint: Fingerprint,
    pub name: String,
    pub description: String,
    pub suite_id: Option<SuiteId>,
}

/// One persisted measurement.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultRecord {
    pub fingerprint: Fingerprint,
    /// Stored with microsecond precision
    pub timestamp: DateTime<Utc>,
    /// Timing trials run; zero for failures
    pub trial_count: u32,
    pub loops: Option<u64>,
    pub timing: Option<f64>,
    pub units: Option<TimeUnit>,
    pub failure_detail: Option<String>,
}

impl ResultRecord {
    /// Flatten an outcome into a storable record.
    pub fn from_outcome(outcome: &RawOutcome, timestamp: DateTime<Utc>) -> Self {
        match (outcome.timing(), outcome.failure_detail()) {
            (Some(timing), _) => Self {
                fingerprint: outcome.fingerprint,
                timestamp,
                trial_count: timing.repeat,
                loops: Some(timing.loops),
                timing: Some(timing.timing),
                units: Some(timing.units),
                failure_detail: None,
            },
            (None, detail) => Self {
                fingerprint: outcome.fingerprint,
                timestamp,
                trial_count: 0,
                loops: None,
                timing: None,
                units: None,
                failure_detail: Some(detail.unwrap_or_default().to_string()),
            },
        }
    }

    pub fn is_success(&self) -> bool {
        self.timing.is_some()
    }
}

/// Persistent store of definitions and their result history.
pub struct ResultStore {
    conn: Connection,
}

impl ResultStore {
    /// Open (creating if needed) a database file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        debug!("opening result store at {}", path.display());
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        Self::init(conn)
    }

    /// A throwaway store, mostly for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        schema::configure(&conn)?;
        schema::migrate(&conn)?;
        Ok(Self { conn })
    }

    /// Insert a suite, or update its description if the name exists.
    pub fn record_suite(&self, name: &str, description: &str) -> Result<SuiteId, StoreError> {
        self.conn.execute(
            "INSERT INTO benchmark_suites (name, description) VALUES (?1, ?2)
             ON CONFLICT(name) DO UPDATE SET description = excluded.description",
            params![name, description],
        )?;
        let id = self.conn.query_row(
            "SELECT id FROM benchmark_suites WHERE name = ?1",
            params![name],
            |row| row.get(0),
        )?;
        Ok(SuiteId(id))
    }

    /// Upsert a definition keyed by fingerprint.
    ///
    /// Name and description take the latest values. A `None` suite keeps
    /// whatever suite the row already had.
    pub fn record_definition(
        &self,
        definition: &BenchmarkDefinition,
        suite: Option<SuiteId>,
    ) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO benchmarks (fingerprint, name, description, suite_id)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(fingerprint) DO UPDATE SET
                name = excluded.name,
                description = excluded.description,
                suite_id = COALESCE(excluded.suite_id, benchmarks.suite_id)",
            params![
                definition.fingerprint().to_hex(),
                definition.name,
                definition.description,
                suite.map(|s| s.0),
            ],
        )?;
        Ok(())
    }

    /// Append one result. Returns the new row id.
    pub fn record_result(&self, record: &ResultRecord) -> Result<i64, StoreError> {
        if self.definition(&record.fingerprint)?.is_none() {
            return Err(StoreError::UnknownBenchmark(record.fingerprint));
        }
        insert_result(&self.conn, record)?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Append a batch of results atomically, in order.
    pub fn record_results(&mut self, records: &[ResultRecord]) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        for record in records {
            let known: Option<i64> = tx
                .query_row(
                    "SELECT 1 FROM benchmarks WHERE fingerprint = ?1",
                    params![record.fingerprint.to_hex()],
                    |row| row.get(0),
                )
                .optional()?;
            if known.is_none() {
                return Err(StoreError::UnknownBenchmark(record.fingerprint));
            }
            insert_result(&tx, record)?;
        }
        tx.commit()?;
        Ok(())
    }

    /// One stored definition.
    pub fn definition(
        &self,
        fingerprint: &Fingerprint,
    ) -> Result<Option<StoredDefinition>, StoreError> {
        Ok(self
            .conn
            .query_row(
                "SELECT fingerprint, name, description, suite_id
                 FROM benchmarks WHERE fingerprint = ?1",
                params![fingerprint.to_hex()],
                read_definition,
            )
            .optional()?)
    }

    /// All stored definitions in the order they were first recorded.
    pub fn definitions(&self) -> Result<Vec<StoredDefinition>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT fingerprint, name, description, suite_id
             FROM benchmarks ORDER BY rowid ASC",
        )?;
        let rows = stmt.query_map([], read_definition)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// History of one benchmark, oldest first.
    pub fn results_for(&self, fingerprint: &Fingerprint) -> Result<Vec<ResultRecord>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT fingerprint, timestamp, trial_count, loops, timing, units, failure_detail
             FROM results WHERE fingerprint = ?1
             ORDER BY timestamp ASC, id ASC",
        )?;
        let rows = stmt.query_map(params![fingerprint.to_hex()], read_result)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Delete the history of one benchmark. Returns the rows removed.
    ///
    /// Administrative only; suite runs never call this.
    pub fn purge_results(&self, fingerprint: &Fingerprint) -> Result<usize, StoreError> {
        let removed = self.conn.execute(
            "DELETE FROM results WHERE fingerprint = ?1",
            params![fingerprint.to_hex()],
        )?;
        debug!("purged {removed} results for {}", fingerprint.short());
        Ok(removed)
    }
}

fn insert_result(conn: &Connection, record: &ResultRecord) -> Result<(), StoreError> {
    let loops = record
        .loops
        .map(|l| {
            i64::try_from(l).map_err(|_| StoreError::OutOfRange {
                column: "loops",
                value: l,
            })
        })
        .transpose()?;
    conn.execute(
        "INSERT INTO results
            (fingerprint, timestamp, trial_count, loops, timing, units, failure_detail)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            record.fingerprint.to_hex(),
            record.timestamp.timestamp_micros(),
            record.trial_count,
            loops,
            record.timing,
            record.units.map(|u| u.as_str()),
            record.failure_detail,
        ],
    )?;
    Ok(())
}

fn conversion_error(idx: usize, ty: Type, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, ty, msg.into())
}

fn read_fingerprint(row: &Row<'_>, idx: usize) -> rusqlite::Result<Fingerprint> {
    let hex: String = row.get(idx)?;
    hex.parse()
        .map_err(|e: benchy_core::ParseFingerprintError| conversion_error(idx, Type::Text, e.to_string()))
}

fn read_definition(row: &Row<'_>) -> rusqlite::Result<StoredDefinition> {
    Ok(StoredDefinition {
        fingerprint: read_fingerprint(row, 0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        suite_id: row.get::<_, Option<i64>>(3)?.map(SuiteId),
    })
}

fn read_result(row: &Row<'_>) -> rusqlite::Result<ResultRecord> {
    let micros: i64 = row.get(1)?;
    let timestamp = DateTime::from_timestamp_micros(micros)
        .ok_or_else(|| conversion_error(1, Type::Integer, format!("bad timestamp {micros}")))?;
    let loops = row
        .get::<_, Option<i64>>(3)?
        .map(|l| u64::try_from(l).map_err(|_| conversion_error(3, Type::Integer, format!("negative loops {l}"))))
        .transpose()?;
    let units = row
        .get::<_, Option<String>>(5)?
        .map(|u| u.parse::<TimeUnit>().map_err(|e| conversion_error(5, Type::Text, e)))
        .transpose()?;

    Ok(ResultRecord {
        fingerprint: read_fingerprint(row, 0)?,
        timestamp,
        trial_count: row.get(2)?,
        loops,
        timing: row.get(4)?,
        units,
        failure_detail: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use benchy_core::{Failure, FailureKind, Timing};
    use chrono::{Duration, TimeZone};

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + seconds, 0).unwrap()
    }

    fn record(def: &BenchmarkDefinition, timestamp: DateTime<Utc>, timing: f64) -> ResultRecord {
        let outcome = RawOutcome::success(
            def.fingerprint(),
            Timing {
                loops: 100,
                repeat: 3,
                timing,
                units: TimeUnit::Milliseconds,
            },
        );
        ResultRecord::from_outcome(&outcome, timestamp)
    }

    #[test]
    fn test_record_definition_is_idempotent() {
        let store = ResultStore::open_in_memory().unwrap();
        let def = BenchmarkDefinition::new("n = 10", "range(n)").with_name("range");

        store.record_definition(&def, None).unwrap();
        store.record_definition(&def, None).unwrap();

        let defs = store.definitions().unwrap();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].fingerprint, def.fingerprint());
        assert_eq!(defs[0].name, "range");
    }

    #[test]
    fn test_rerecord_updates_metadata_in_place() {
        let store = ResultStore::open_in_memory().unwrap();
        let suite = store.record_suite("lists", "list benchmarks").unwrap();
        let first = BenchmarkDefinition::new("", "1 + 1").with_name("first");
        let other = BenchmarkDefinition::new("", "2 + 2").with_name("other");
        store.record_definition(&first, Some(suite)).unwrap();
        store.record_definition(&other, None).unwrap();

        let renamed = first.clone().with_name("renamed").with_description("new");
        store.record_definition(&renamed, None).unwrap();

        let defs = store.definitions().unwrap();
        assert_eq!(defs.len(), 2);
        // first-recorded order survives the update
        assert_eq!(defs[0].name, "renamed");
        assert_eq!(defs[0].description, "new");
        assert_eq!(defs[0].suite_id, Some(suite));
        assert_eq!(defs[1].name, "other");
    }

    #[test]
    fn test_record_suite_is_idempotent_by_name() {
        let store = ResultStore::open_in_memory().unwrap();
        let a = store.record_suite("core", "v1").unwrap();
        let b = store.record_suite("core", "v2").unwrap();
        let c = store.record_suite("other", "").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_history_is_append_only_and_ordered() {
        let store = ResultStore::open_in_memory().unwrap();
        let def = BenchmarkDefinition::new("", "1 + 1");
        store.record_definition(&def, None).unwrap();

        // inserted out of timestamp order, read back in order
        store.record_result(&record(&def, at(20), 2.0)).unwrap();
        store.record_result(&record(&def, at(10), 1.0)).unwrap();
        store.record_result(&record(&def, at(30), 3.0)).unwrap();
        store.record_result(&record(&def, at(30), 4.0)).unwrap();

        let history = store.results_for(&def.fingerprint()).unwrap();
        let timings: Vec<_> = history.iter().map(|r| r.timing.unwrap()).collect();
        assert_eq!(timings, vec![1.0, 2.0, 3.0, 4.0]);
        assert!(history.iter().all(|r| r.units == Some(TimeUnit::Milliseconds)));
        assert_eq!(history[0].loops, Some(100));
        assert_eq!(history[0].trial_count, 3);
    }

    #[test]
    fn test_timestamp_keeps_microseconds() {
        let store = ResultStore::open_in_memory().unwrap();
        let def = BenchmarkDefinition::new("", "1");
        store.record_definition(&def, None).unwrap();
        let ts = at(0) + Duration::microseconds(123_456);
        store.record_result(&record(&def, ts, 1.0)).unwrap();
        assert_eq!(store.results_for(&def.fingerprint()).unwrap()[0].timestamp, ts);
    }

    #[test]
    fn test_failure_record() {
        let store = ResultStore::open_in_memory().unwrap();
        let def = BenchmarkDefinition::new("", "1 / 0");
        store.record_definition(&def, None).unwrap();
        let outcome = RawOutcome::failure(
            def.fingerprint(),
            Failure::new(FailureKind::Statement, "Division by zero"),
        );
        store
            .record_result(&ResultRecord::from_outcome(&outcome, at(0)))
            .unwrap();

        let history = store.results_for(&def.fingerprint()).unwrap();
        assert_eq!(history.len(), 1);
        assert!(!history[0].is_success());
        assert_eq!(history[0].trial_count, 0);
        assert_eq!(history[0].failure_detail.as_deref(), Some("Division by zero"));
    }

    #[test]
    fn test_result_for_unknown_benchmark_is_rejected() {
        let store = ResultStore::open_in_memory().unwrap();
        let def = BenchmarkDefinition::new("", "never recorded");
        let err = store.record_result(&record(&def, at(0), 1.0)).unwrap_err();
        assert!(matches!(err, StoreError::UnknownBenchmark(fp) if fp == def.fingerprint()));
    }

    #[test]
    fn test_foreign_keys_are_enforced() {
        let store = ResultStore::open_in_memory().unwrap();
        let err = store
            .conn
            .execute(
                "INSERT INTO results (fingerprint, timestamp, trial_count) VALUES ('nope', 0, 0)",
                [],
            )
            .unwrap_err();
        assert!(err.to_string().contains("FOREIGN KEY"));
    }

    #[test]
    fn test_batch_is_atomic() {
        let mut store = ResultStore::open_in_memory().unwrap();
        let known = BenchmarkDefinition::new("", "1");
        let unknown = BenchmarkDefinition::new("", "2");
        store.record_definition(&known, None).unwrap();

        let batch = [record(&known, at(0), 1.0), record(&unknown, at(1), 1.0)];
        assert!(store.record_results(&batch).is_err());
        assert!(store.results_for(&known.fingerprint()).unwrap().is_empty());

        store.record_results(&batch[..1]).unwrap();
        assert_eq!(store.results_for(&known.fingerprint()).unwrap().len(), 1);
    }

    #[test]
    fn test_purge_only_touches_one_benchmark() {
        let store = ResultStore::open_in_memory().unwrap();
        let a = BenchmarkDefinition::new("", "1");
        let b = BenchmarkDefinition::new("", "2");
        store.record_definition(&a, None).unwrap();
        store.record_definition(&b, None).unwrap();
        for i in 0..3 {
            store.record_result(&record(&a, at(i), 1.0)).unwrap();
        }
        store.record_result(&record(&b, at(0), 1.0)).unwrap();

        assert_eq!(store.purge_results(&a.fingerprint()).unwrap(), 3);
        assert!(store.results_for(&a.fingerprint()).unwrap().is_empty());
        assert_eq!(store.results_for(&b.fingerprint()).unwrap().len(), 1);
        assert_eq!(store.definitions().unwrap().len(), 2);
    }
}
