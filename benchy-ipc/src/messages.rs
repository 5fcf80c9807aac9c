//! IPC Message Types
//!
//! All messages are serialized with rkyv and validated on read.

use rkyv::{Archive, Deserialize as RkyvDeserialize, Serialize as RkyvSerialize};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A benchmark definition as it travels to the worker.
///
/// Carries every field of a definition so the worker-side view is lossless.
#[derive(Debug, Clone, PartialEq, Eq, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub struct BenchmarkPayload {
    /// Display name
    pub name: String,
    /// Free-form description
    pub description: String,
    /// Fragment that builds the environment
    pub setup: String,
    /// Fragment being timed
    pub statement: String,
    /// Fragment run after measurement
    pub cleanup: String,
    /// Number of independent trials
    pub repeat: u32,
    /// Fixed loop count per trial (adaptive when absent)
    pub ncalls: Option<u64>,
}

/// Which fragment engine the worker should use.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    Archive,
    RkyvSerialize,
    RkyvDeserialize,
)]
#[archive(check_bytes)]
#[serde(rename_all = "kebab-case")]
pub enum EngineKind {
    /// Embedded expression interpreter
    #[default]
    Expr,
    /// External `/bin/sh` interpreter
    Shell,
}

impl FromStr for EngineKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "expr" => Ok(EngineKind::Expr),
            "shell" | "sh" => Ok(EngineKind::Shell),
            other => Err(format!("Unknown engine: {}", other)),
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EngineKind::Expr => "expr",
            EngineKind::Shell => "shell",
        })
    }
}

/// Display unit for a timing.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Archive,
    RkyvSerialize,
    RkyvDeserialize,
)]
#[archive(check_bytes)]
pub enum TimeUnit {
    /// Seconds
    #[serde(rename = "s")]
    Seconds,
    /// Milliseconds
    #[serde(rename = "ms")]
    Milliseconds,
    /// Microseconds
    #[serde(rename = "us")]
    Microseconds,
    /// Nanoseconds
    #[serde(rename = "ns")]
    Nanoseconds,
}

impl TimeUnit {
    /// All units, largest first. The index is the unit's "order".
    pub const ALL: [TimeUnit; 4] = [
        TimeUnit::Seconds,
        TimeUnit::Milliseconds,
        TimeUnit::Microseconds,
        TimeUnit::Nanoseconds,
    ];

    /// How many of this unit make up one second.
    pub fn per_second(self) -> f64 {
        match self {
            TimeUnit::Seconds => 1.0,
            TimeUnit::Milliseconds => 1e3,
            TimeUnit::Microseconds => 1e6,
            TimeUnit::Nanoseconds => 1e9,
        }
    }

    /// Express a duration in seconds in this unit.
    pub fn from_seconds(self, seconds: f64) -> f64 {
        seconds * self.per_second()
    }

    /// Convert a value expressed in this unit back to seconds.
    pub fn to_seconds(self, value: f64) -> f64 {
        value / self.per_second()
    }

    /// Short label ("s", "ms", "us", "ns").
    pub fn as_str(self) -> &'static str {
        match self {
            TimeUnit::Seconds => "s",
            TimeUnit::Milliseconds => "ms",
            TimeUnit::Microseconds => "us",
            TimeUnit::Nanoseconds => "ns",
        }
    }
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "s" | "sec" | "seconds" => Ok(TimeUnit::Seconds),
            "ms" | "milliseconds" => Ok(TimeUnit::Milliseconds),
            "us" | "µs" | "microseconds" => Ok(TimeUnit::Microseconds),
            "ns" | "nanoseconds" => Ok(TimeUnit::Nanoseconds),
            other => Err(format!("Unknown time unit: {}", other)),
        }
    }
}

/// How the worker picks the unit of the reported timing.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Archive, RkyvSerialize, RkyvDeserialize,
)]
#[archive(check_bytes)]
pub enum UnitPolicy {
    /// Pick the unit from the magnitude of the timing
    Auto,
    /// Always report in this unit
    Fixed(TimeUnit),
}

impl Default for UnitPolicy {
    fn default() -> Self {
        UnitPolicy::Fixed(TimeUnit::Milliseconds)
    }
}

impl fmt::Display for UnitPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitPolicy::Auto => f.write_str("auto"),
            UnitPolicy::Fixed(unit) => unit.fmt(f),
        }
    }
}

impl FromStr for UnitPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("auto") {
            Ok(UnitPolicy::Auto)
        } else {
            s.parse().map(UnitPolicy::Fixed)
        }
    }
}

/// Calibration and unit settings for a timing run
#[derive(Debug, Clone, PartialEq, Eq, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub struct TimingConfig {
    /// A calibration trial must last at least this long (nanoseconds)
    pub min_trial_ns: u64,
    /// Upper bound on calibration steps (loop counts 1, 10, 100, ...)
    pub max_calibration_steps: u32,
    /// Unit selection
    pub units: UnitPolicy,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            min_trial_ns: 100_000_000, // 0.1 s
            max_calibration_steps: 10,
            units: UnitPolicy::default(),
        }
    }
}

impl TimingConfig {
    /// Validate configuration values, returning a description of the first error found.
    pub fn validate(&self) -> Result<(), String> {
        if self.min_trial_ns == 0 {
            return Err("min_trial_ns must be > 0".to_string());
        }
        if self.max_calibration_steps == 0 {
            return Err("max_calibration_steps must be > 0".to_string());
        }
        // 10^19 overflows u64
        if self.max_calibration_steps > 19 {
            return Err(format!(
                "max_calibration_steps ({}) must be <= 19",
                self.max_calibration_steps
            ));
        }
        Ok(())
    }
}

/// Settings for an in-worker memory sampling run
#[derive(Debug, Clone, PartialEq, Eq, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub struct MemoryConfig {
    /// Number of trials to run inside this worker
    pub repeat: u32,
}

/// Commands sent from Supervisor to Worker
#[derive(Debug, Clone, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub enum SupervisorCommand {
    /// Time a benchmark
    Time {
        /// The definition to run
        payload: BenchmarkPayload,
        /// Engine for the fragments
        engine: EngineKind,
        /// Calibration settings
        config: TimingConfig,
    },

    /// Sample resident memory of a benchmark's statement
    SampleMemory {
        /// The definition to run
        payload: BenchmarkPayload,
        /// Engine for the fragments
        engine: EngineKind,
        /// Trial settings
        config: MemoryConfig,
    },

    /// Request graceful shutdown
    Shutdown,
}

/// Successful timing measured by the worker
#[derive(Debug, Clone, PartialEq, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub struct TimingReport {
    /// Loop count per trial
    pub loops: u64,
    /// Trials run
    pub repeat: u32,
    /// Best per-iteration duration, in `units`
    pub timing: f64,
    /// Unit of `timing`
    pub units: TimeUnit,
    /// Elapsed nanoseconds of every trial, in run order
    pub trial_nanos: Vec<u64>,
    /// Error text from the cleanup fragment, if it failed
    pub cleanup_error: Option<String>,
}

/// Per-trial memory usage measured by the worker
#[derive(Debug, Clone, PartialEq, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub struct MemoryReport {
    /// Usage of each trial in MB; `f64::NEG_INFINITY` marks an unmeasurable trial
    pub usages_mb: Vec<f64>,
    /// Diagnostics of trials that failed
    pub errors: Vec<String>,
}

/// Worker capabilities advertised during handshake
#[derive(Debug, Clone, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub struct WorkerCapabilities {
    /// Protocol version for compatibility
    pub protocol_version: u32,
    /// Worker process id (for diagnostics)
    pub pid: u32,
    /// Whether resident memory can be sampled on this platform
    pub has_rss_sampling: bool,
}

impl Default for WorkerCapabilities {
    fn default() -> Self {
        Self {
            protocol_version: crate::PROTOCOL_VERSION,
            pid: std::process::id(),
            has_rss_sampling: cfg!(unix),
        }
    }
}

/// Messages sent from Worker to Supervisor
#[derive(Debug, Clone, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub enum WorkerMessage {
    /// Initial handshake with worker capabilities
    Hello(WorkerCapabilities),

    /// Timing completed
    Timing(TimingReport),

    /// Memory sampling completed (possibly with unmeasurable trials)
    Memory(MemoryReport),

    /// The benchmark failed inside the worker
    Failure {
        /// Error category
        kind: FailureKind,
        /// Human-readable diagnostic
        message: String,
        /// Error text from the cleanup fragment, if it also failed
        cleanup_error: Option<String>,
    },
}

/// Categories of failures reported by a live worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub enum FailureKind {
    /// The setup fragment failed
    Setup,
    /// The statement failed during calibration or a trial
    Statement,
    /// Rust panic (caught)
    Panic,
    /// The worker could not understand the request
    Protocol,
}
