//! Outcome of one isolated execution.

use crate::fingerprint::Fingerprint;
use benchy_ipc::TimeUnit;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unit label for memory usage (mebibytes, as reported by RSS samplers).
pub const MEMORY_UNITS: &str = "MB";

/// Why a benchmark produced no timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    /// The setup fragment failed
    EnvironmentSetup,
    /// The statement failed during calibration or timed execution
    Statement,
    /// The worker died, was unreachable, or broke protocol
    WorkerCrash,
    /// The worker exceeded its time budget and was killed
    Timeout,
    /// Every memory sampling trial failed
    UnmeasurableMemory,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FailureKind::EnvironmentSetup => "setup failure",
            FailureKind::Statement => "statement failure",
            FailureKind::WorkerCrash => "worker crash",
            FailureKind::Timeout => "timeout",
            FailureKind::UnmeasurableMemory => "unmeasurable memory",
        };
        f.write_str(label)
    }
}

/// A failed execution: kind plus captured diagnostic text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: FailureKind,
    pub detail: String,
}

impl Failure {
    pub fn new(kind: FailureKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.detail)
    }
}

/// A successful best-of-repeat timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timing {
    /// Statement executions per trial
    pub loops: u64,
    /// Trials run
    pub repeat: u32,
    /// Best per-iteration duration, in `units`
    pub timing: f64,
    pub units: TimeUnit,
}

impl Timing {
    /// The timing converted to seconds, for cross-unit comparison.
    pub fn seconds(&self) -> f64 {
        self.units.to_seconds(self.timing)
    }
}

/// Peak memory usage of a statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryUsage {
    /// Trials run
    pub repeat: u32,
    /// Maximum per-trial usage, in [`MEMORY_UNITS`]
    pub usage: f64,
    /// Trials that could not be measured
    pub unmeasurable: u32,
}

/// Success with a timing, or failure with a diagnostic. Never both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum OutcomeStatus {
    Success(Timing),
    Failure(Failure),
}

/// Result of one isolated execution of a benchmark definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawOutcome {
    pub fingerprint: Fingerprint,
    #[serde(flatten)]
    pub status: OutcomeStatus,
    /// Present when memory sampling was requested and succeeded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<MemoryUsage>,
    /// Set when memory sampling was requested and failed; does not affect `status`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_failure: Option<Failure>,
    /// Auxiliary text: cleanup errors and captured worker stderr
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<String>,
}

impl RawOutcome {
    pub fn success(fingerprint: Fingerprint, timing: Timing) -> Self {
        Self {
            fingerprint,
            status: OutcomeStatus::Success(timing),
            memory: None,
            memory_failure: None,
            diagnostics: None,
        }
    }

    pub fn failure(fingerprint: Fingerprint, failure: Failure) -> Self {
        Self {
            fingerprint,
            status: OutcomeStatus::Failure(failure),
            memory: None,
            memory_failure: None,
            diagnostics: None,
        }
    }

    /// Attach auxiliary diagnostics, appending to any already present.
    pub fn with_diagnostics(mut self, text: Option<String>) -> Self {
        if let Some(text) = text.filter(|t| !t.trim().is_empty()) {
            self.diagnostics = Some(match self.diagnostics.take() {
                Some(existing) => format!("{existing}\n{text}"),
                None => text,
            });
        }
        self
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, OutcomeStatus::Success(_))
    }

    pub fn timing(&self) -> Option<&Timing> {
        match &self.status {
            OutcomeStatus::Success(timing) => Some(timing),
            OutcomeStatus::Failure(_) => None,
        }
    }

    pub fn failure_info(&self) -> Option<&Failure> {
        match &self.status {
            OutcomeStatus::Success(_) => None,
            OutcomeStatus::Failure(failure) => Some(failure),
        }
    }

    /// Diagnostic text of a failed outcome.
    pub fn failure_detail(&self) -> Option<&str> {
        self.failure_info().map(|f| f.detail.as_str())
    }

    /// Peak memory in MB, if sampled.
    pub fn memory_peak(&self) -> Option<f64> {
        self.memory.as_ref().map(|m| m.usage)
    }
}
