//! Benchy Core - Definitions and Worker Runtime
//!
//! This crate provides everything that runs inside a worker, plus the types
//! the supervisor side shares with it:
//! - `BenchmarkDefinition` and its content `Fingerprint`
//! - Fragment engines (`ExprEngine`, `ShellEngine`)
//! - `AdaptiveTimer` for loop calibration and best-of-repeat timing
//! - Resident-memory sampling with peak reduction
//! - `WorkerMain`, the worker process loop

mod definition;
pub mod engine;
mod fingerprint;
mod measure;
pub mod memory;
mod outcome;
pub mod timer;
mod worker;

pub use definition::{BenchmarkDefinition, BenchmarkSuite, DEFAULT_REPEAT};
pub use engine::{EngineError, ExprEngine, FragmentEngine, ShellEngine};
pub use fingerprint::{FINGERPRINT_LEN, Fingerprint, ParseFingerprintError, fingerprint};
pub use measure::{Timer, pin_to_cpu, resident_memory_bytes, resident_memory_mb};
pub use memory::{UNMEASURABLE, peak_usage};
pub use outcome::{
    Failure, FailureKind, MEMORY_UNITS, MemoryUsage, OutcomeStatus, RawOutcome, Timing,
};
pub use timer::{AdaptiveTimer, Measurement, best_trial, select_unit};
pub use worker::{WorkerMain, sample_memory, shutdown_requested, time_benchmark};

pub use benchy_ipc::{EngineKind, TimeUnit, UnitPolicy};
