//! Benchy Store - Persistent Results
//!
//! An SQLite database with three tables:
//! - `suites`: named groups of benchmarks
//! - `benchmarks`: one row per definition fingerprint, upserted
//! - `results`: append-only history of measured outcomes

mod schema;
mod store;

pub use store::{ResultRecord, ResultStore, StoreError, StoredDefinition, SuiteId};
