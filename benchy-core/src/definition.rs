//! Benchmark definitions and suites.

use crate::fingerprint::{Fingerprint, fingerprint};
use benchy_ipc::BenchmarkPayload;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Default number of timing trials.
pub const DEFAULT_REPEAT: u32 = 3;

/// A named unit of measurement: setup, statement and cleanup fragments.
///
/// The fragments cannot be edited in place. `with_cleanup` and friends
/// consume the definition and return a new one, so a cached fingerprint
/// always describes the fragments it sits next to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkDefinition {
    #[serde(default)]
    setup: String,
    statement: String,
    #[serde(default)]
    cleanup: String,
    /// Display name (not necessarily unique)
    #[serde(default)]
    pub name: String,
    /// Free-form description
    #[serde(default)]
    pub description: String,
    /// Number of independent timing trials
    #[serde(default = "default_repeat")]
    pub repeat: u32,
    /// Fixed loop count per trial; chosen adaptively when `None`
    #[serde(default)]
    pub ncalls: Option<u64>,
    #[serde(skip)]
    fingerprint: OnceLock<Fingerprint>,
}

fn default_repeat() -> u32 {
    DEFAULT_REPEAT
}

impl BenchmarkDefinition {
    /// Create a definition with an empty cleanup and default settings.
    pub fn new(setup: impl Into<String>, statement: impl Into<String>) -> Self {
        Self {
            setup: setup.into(),
            statement: statement.into(),
            cleanup: String::new(),
            name: String::new(),
            description: String::new(),
            repeat: DEFAULT_REPEAT,
            ncalls: None,
            fingerprint: OnceLock::new(),
        }
    }

    /// Replace the cleanup fragment, producing a new definition.
    pub fn with_cleanup(self, cleanup: impl Into<String>) -> Self {
        Self {
            cleanup: cleanup.into(),
            fingerprint: OnceLock::new(),
            ..self
        }
    }

    /// Set the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the number of trials.
    pub fn with_repeat(mut self, repeat: u32) -> Self {
        self.repeat = repeat;
        self
    }

    /// Fix the loop count per trial.
    pub fn with_ncalls(mut self, ncalls: u64) -> Self {
        self.ncalls = Some(ncalls);
        self
    }

    pub fn setup(&self) -> &str {
        &self.setup
    }

    pub fn statement(&self) -> &str {
        &self.statement
    }

    pub fn cleanup(&self) -> &str {
        &self.cleanup
    }

    /// Content fingerprint, computed on first use.
    pub fn fingerprint(&self) -> Fingerprint {
        *self
            .fingerprint
            .get_or_init(|| fingerprint(&self.setup, &self.statement, &self.cleanup))
    }

    /// Name for display; falls back to the short fingerprint.
    pub fn display_name(&self) -> String {
        if self.name.is_empty() {
            self.fingerprint().short()
        } else {
            self.name.clone()
        }
    }

    /// Check the settings a worker cannot recover from.
    pub fn validate(&self) -> Result<(), String> {
        if self.repeat == 0 {
            return Err(format!("{}: repeat must be > 0", self.display_name()));
        }
        if self.ncalls == Some(0) {
            return Err(format!("{}: ncalls must be > 0", self.display_name()));
        }
        if self.statement.trim().is_empty() {
            return Err(format!("{}: statement is empty", self.display_name()));
        }
        Ok(())
    }

    /// Wire form of this definition.
    pub fn to_payload(&self) -> BenchmarkPayload {
        BenchmarkPayload {
            name: self.name.clone(),
            description: self.description.clone(),
            setup: self.setup.clone(),
            statement: self.statement.clone(),
            cleanup: self.cleanup.clone(),
            repeat: self.repeat,
            ncalls: self.ncalls,
        }
    }

    /// Rebuild a definition from its wire form.
    pub fn from_payload(payload: BenchmarkPayload) -> Self {
        Self {
            setup: payload.setup,
            statement: payload.statement,
            cleanup: payload.cleanup,
            name: payload.name,
            description: payload.description,
            repeat: payload.repeat,
            ncalls: payload.ncalls,
            fingerprint: OnceLock::new(),
        }
    }
}

/// A named, ordered collection of benchmarks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BenchmarkSuite {
    /// Suite name
    pub name: String,
    /// Free-form description
    #[serde(default)]
    pub description: String,
    /// Benchmarks in submission order
    #[serde(default)]
    pub benchmarks: Vec<BenchmarkDefinition>,
}

impl BenchmarkSuite {
    /// Create an empty suite
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Append a benchmark
    pub fn push(&mut self, benchmark: BenchmarkDefinition) {
        self.benchmarks.push(benchmark);
    }

    pub fn len(&self) -> usize {
        self.benchmarks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.benchmarks.is_empty()
    }
}
