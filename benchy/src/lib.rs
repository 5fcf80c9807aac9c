#![warn(missing_docs)]
//! # Benchy
//!
//! Measures how long short code fragments take to run, repeatably and
//! comparably, and keeps the history.
//!
//! - **Process Isolation**: every benchmark runs in a fresh worker process; a
//!   fragment that aborts, hangs or panics fails alone
//! - **Zero-Copy IPC**: supervisor-worker communication uses rkyv frames
//! - **Adaptive Timing**: loop counts 1, 10, 100, ... until a trial is long
//!   enough, then best of `repeat` trials
//! - **Baselines**: timings relative to a reference benchmark
//! - **Memory**: peak resident-set growth of a statement
//! - **History**: append-only SQLite store keyed by content fingerprint
//!
//! ## Quick Start
//!
//! ```ignore
//! use benchy::prelude::*;
//!
//! let mut config = ExecutorConfig::new(env!("CARGO_BIN_EXE_benchy"));
//! config.timing.units = UnitPolicy::Auto;
//! let executor = IsolatedExecutor::new(config);
//!
//! let outcome = executor.execute(&BenchmarkDefinition::new("n = 1000", "l = range(n)"));
//! println!("{:?}", outcome.timing());
//! ```

// Re-export core types
pub use benchy_core::{
    AdaptiveTimer, BenchmarkDefinition, BenchmarkSuite, EngineKind, Failure, FailureKind,
    Fingerprint, Measurement, MemoryUsage, OutcomeStatus, RawOutcome, TimeUnit, Timing,
    UNMEASURABLE, UnitPolicy, best_trial, fingerprint, peak_usage, select_unit,
};

// Re-export baseline normalization
pub use benchy_stats::{AnnotatedOutcome, NormalizeError, normalize};

// Re-export the result store
pub use benchy_store::{ResultRecord, ResultStore, StoreError, StoredDefinition, SuiteId};

// Re-export execution
pub use benchy_cli::{
    BenchyConfig, ExecutorConfig, IsolatedExecutor, LoadedSuite, MemoryMode, MemorySampling,
    SuiteEntry, SuiteReport, SuiteRunner,
};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        BenchmarkDefinition, ExecutorConfig, IsolatedExecutor, MemoryMode, MemorySampling,
        RawOutcome, ResultStore, SuiteRunner, TimeUnit, UnitPolicy, normalize,
    };
}

/// Run the Benchy CLI.
///
/// The `benchy` binary is nothing but this call; it doubles as the worker
/// when started with `--benchy-worker`.
pub use benchy_cli::run;
