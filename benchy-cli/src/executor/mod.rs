//! Benchmark Executor
//!
//! Runs benchmarks in isolated workers and collects their outcomes.
//!
//! ## Pipeline Overview
//!
//! ```text
//! BenchmarkDefinition (from a suite file)
//!       │
//!       ▼
//! ┌─────────────┐
//! │  execution  │  One worker per request: timing, then memory
//! └──────┬──────┘
//!        │
//!        ▼
//! ┌─────────────┐
//! │   runner    │  Ordered collection, baseline, persistence
//! └──────┬──────┘
//!        │
//!        ▼
//! ┌─────────────┐
//! │ formatting  │  Human-readable table or JSON
//! └─────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`execution`] - Isolated execution of a single benchmark
//! - [`runner`] - Suite execution, normalization and persistence
//! - [`formatting`] - Output formatting

mod execution;
mod formatting;
mod runner;

// Re-export public API
pub use execution::{ExecutorConfig, IsolatedExecutor, MemorySampling};
pub use formatting::{
    OutputFormat, format_definitions, format_history, format_human_output, format_report,
};
pub use runner::{RunError, SuiteEntry, SuiteReport, SuiteRunner, persist};
