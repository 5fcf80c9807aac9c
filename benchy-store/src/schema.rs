//! Table definitions.

use rusqlite::Connection;

/// Bumped whenever a table changes shape.
pub const SCHEMA_VERSION: i64 = 1;

const CREATE_TABLES: &str = "
CREATE TABLE IF NOT EXISTS benchmark_suites (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    name        TEXT NOT NULL UNIQUE,
    description TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS benchmarks (
    fingerprint TEXT PRIMARY KEY,
    name        TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    suite_id    INTEGER REFERENCES benchmark_suites(id)
);

CREATE TABLE IF NOT EXISTS results (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    fingerprint    TEXT NOT NULL REFERENCES benchmarks(fingerprint),
    timestamp      INTEGER NOT NULL,
    trial_count    INTEGER NOT NULL,
    loops          INTEGER,
    timing         REAL,
    units          TEXT,
    failure_detail TEXT
);

CREATE INDEX IF NOT EXISTS idx_results_fingerprint_time
    ON results(fingerprint, timestamp, id);
";

/// Connection pragmas applied on every open.
pub fn configure(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;")
}

/// Create missing tables and stamp the schema version.
pub fn migrate(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(CREATE_TABLES)?;
    let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if version < SCHEMA_VERSION {
        conn.execute_batch(&format!("PRAGMA user_version = {SCHEMA_VERSION};"))?;
    }
    Ok(())
}
