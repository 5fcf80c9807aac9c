//! Benchmark Execution
//!
//! Runs one benchmark definition in freshly spawned worker processes and
//! turns whatever comes back (a report, a failure message, silence, a
//! corpse) into a [`RawOutcome`].
//!
//! ## Data Flow
//!
//! ```text
//! BenchmarkDefinition
//!        │  to_payload()
//!        ▼
//! ┌──────────────────┐   Time / SampleMemory    ┌────────┐
//! │ IsolatedExecutor │ ───────── fd 3 ────────▶ │ worker │
//! │                  │ ◀──────── fd 4 ───────── │        │
//! └────────┬─────────┘   Timing / Memory /      └────────┘
//!          │             Failure (+ stderr)
//!          ▼
//!     RawOutcome
//! ```

use crate::config::MemoryMode;
use crate::supervisor::{SupervisorError, WorkerHandle};
use benchy_core::memory::{self, UNMEASURABLE};
use benchy_core::{
    BenchmarkDefinition, Failure, FailureKind, Fingerprint, MemoryUsage, RawOutcome, Timing,
};
use benchy_ipc::{
    EngineKind, FailureKind as WorkerFailureKind, MemoryReport, SupervisorCommand, TimingConfig,
    WorkerMessage,
};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, warn};

/// Memory sampling settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemorySampling {
    pub mode: MemoryMode,
    /// Number of sampling trials
    pub repeat: u32,
}

/// Configuration for benchmark execution
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Budget for one worker, from spawn to its last reply
    pub timeout: Duration,
    pub engine: EngineKind,
    pub timing: TimingConfig,
    /// Sample memory after a successful timing
    pub memory: Option<MemorySampling>,
    /// Binary re-executed as the worker
    pub worker_binary: PathBuf,
    /// CPU workers pin themselves to; `None` leaves scheduling alone
    pub pin_cpu: Option<usize>,
}

impl ExecutorConfig {
    /// Defaults with the given worker binary
    pub fn new(worker_binary: impl Into<PathBuf>) -> Self {
        Self {
            timeout: Duration::from_secs(60),
            engine: EngineKind::default(),
            timing: TimingConfig::default(),
            memory: None,
            worker_binary: worker_binary.into(),
            pin_cpu: Some(0),
        }
    }
}

/// Executor that runs benchmarks in isolated worker processes via IPC
///
/// This provides crash isolation - if a fragment aborts, hangs or panics,
/// it won't take down the supervisor process.
#[derive(Debug, Clone)]
pub struct IsolatedExecutor {
    config: ExecutorConfig,
}

impl IsolatedExecutor {
    /// Create a new isolated executor
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Stop pinning workers, so concurrent workers do not share one CPU.
    pub fn unpin(&mut self) {
        self.config.pin_cpu = None;
    }

    /// Time one benchmark in a fresh worker, then sample its memory if
    /// configured. Never panics and never fabricates a timing.
    pub fn execute(&self, bench: &BenchmarkDefinition) -> RawOutcome {
        let fingerprint = bench.fingerprint();
        if let Err(e) = bench.validate() {
            return RawOutcome::failure(
                fingerprint,
                Failure::new(FailureKind::Statement, format!("invalid definition: {e}")),
            );
        }

        debug!(
            benchmark = %bench.display_name(),
            engine = %self.config.engine,
            "dispatching to worker"
        );
        let mut outcome = self.time(bench);

        if let Some(sampling) = self.config.memory {
            if outcome.is_success() {
                match self.sample_memory(bench, sampling) {
                    Ok(usage) => outcome.memory = Some(usage),
                    Err(failure) => {
                        warn!("{}: {failure}", bench.display_name());
                        outcome.memory_failure = Some(failure);
                    }
                }
            }
        }

        outcome
    }

    fn time(&self, bench: &BenchmarkDefinition) -> RawOutcome {
        let fingerprint = bench.fingerprint();
        let command = SupervisorCommand::Time {
            payload: bench.to_payload(),
            engine: self.config.engine,
            config: self.config.timing.clone(),
        };

        let (reply, stderr) = self.run_command(&command);
        match reply {
            Ok(WorkerMessage::Timing(report)) => {
                if let Some(err) = &report.cleanup_error {
                    warn!("{}: {err}", bench.display_name());
                }
                let timing = Timing {
                    loops: report.loops,
                    repeat: report.repeat,
                    timing: report.timing,
                    units: report.units,
                };
                RawOutcome::success(fingerprint, timing)
                    .with_diagnostics(report.cleanup_error)
                    .with_diagnostics(stderr)
            }
            Ok(WorkerMessage::Failure {
                kind,
                message,
                cleanup_error,
            }) => {
                let failure = match kind {
                    WorkerFailureKind::Setup => Failure::new(FailureKind::EnvironmentSetup, message),
                    WorkerFailureKind::Statement => Failure::new(FailureKind::Statement, message),
                    WorkerFailureKind::Panic => Failure::new(
                        FailureKind::WorkerCrash,
                        format!("worker panicked: {message}"),
                    ),
                    WorkerFailureKind::Protocol => Failure::new(
                        FailureKind::WorkerCrash,
                        format!("worker rejected request: {message}"),
                    ),
                };
                RawOutcome::failure(fingerprint, failure)
                    .with_diagnostics(cleanup_error)
                    .with_diagnostics(stderr)
            }
            Ok(other) => RawOutcome::failure(
                fingerprint,
                crash_failure(&format!("unexpected reply to Time: {other:?}"), stderr),
            ),
            Err(e) => RawOutcome::failure(fingerprint, supervisor_failure(&e, stderr)),
        }
    }

    fn sample_memory(
        &self,
        bench: &BenchmarkDefinition,
        sampling: MemorySampling,
    ) -> Result<MemoryUsage, Failure> {
        let report = match sampling.mode {
            MemoryMode::InPlace => match self.memory_run(bench, sampling.repeat) {
                Ok(report) => report,
                Err(detail) => MemoryReport {
                    usages_mb: vec![UNMEASURABLE; sampling.repeat as usize],
                    errors: vec![detail],
                },
            },
            MemoryMode::Isolated => memory::sample_trials(sampling.repeat, || {
                let report = self.memory_run(bench, 1)?;
                match report.usages_mb.first() {
                    Some(usage) if usage.is_finite() => Ok(*usage),
                    _ => Err(report.errors.join("\n")),
                }
            }),
        };
        memory::reduce(&report)
    }

    /// One worker running `repeat` memory trials.
    fn memory_run(&self, bench: &BenchmarkDefinition, repeat: u32) -> Result<MemoryReport, String> {
        let command = SupervisorCommand::SampleMemory {
            payload: bench.to_payload(),
            engine: self.config.engine,
            config: benchy_ipc::MemoryConfig { repeat },
        };
        let (reply, stderr) = self.run_command(&command);
        match reply {
            Ok(WorkerMessage::Memory(report)) => Ok(report),
            Ok(WorkerMessage::Failure { message, .. }) => Err(message),
            Ok(other) => Err(format!("unexpected reply to SampleMemory: {other:?}")),
            Err(e) => Err(supervisor_failure(&e, stderr).detail),
        }
    }

    /// Spawn a worker, send one command, and collect its reply plus
    /// whatever it wrote to stderr. The worker is gone when this returns.
    fn run_command(
        &self,
        command: &SupervisorCommand,
    ) -> (Result<WorkerMessage, SupervisorError>, Option<String>) {
        let launched = WorkerHandle::launch_pinned(
            &self.config.worker_binary,
            self.config.timeout,
            self.config.pin_cpu,
        );
        let mut worker = match launched {
            Ok(worker) => worker,
            Err(e) => return (Err(e), None),
        };

        let reply = worker.handshake().and_then(|()| worker.request(command));
        let stderr = if reply.is_ok() {
            worker.shutdown()
        } else {
            worker.terminate()
        };
        (reply, stderr)
    }
}

/// Failure for a worker that returned no usable reply.
fn supervisor_failure(err: &SupervisorError, stderr: Option<String>) -> Failure {
    match err {
        SupervisorError::Timeout(timeout) => {
            warn!("worker timed out after {timeout:?}");
            let mut failure = crash_failure(&format!("worker timed out after {timeout:?}"), stderr);
            failure.kind = FailureKind::Timeout;
            failure
        }
        other => crash_failure(&other.to_string(), stderr),
    }
}

fn crash_failure(reason: &str, stderr: Option<String>) -> Failure {
    let detail = match stderr {
        Some(text) => format!("{reason}\n{}", text.trim_end()),
        None => format!("{reason}; no output produced"),
    };
    Failure::new(FailureKind::WorkerCrash, detail)
}

/// Outcome for a benchmark that could not be scheduled at all.
pub(crate) fn unscheduled(fingerprint: Fingerprint, reason: &str) -> RawOutcome {
    RawOutcome::failure(fingerprint, crash_failure(reason, None))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn executor(binary: &str) -> IsolatedExecutor {
        let mut config = ExecutorConfig::new(binary);
        config.timeout = Duration::from_secs(5);
        IsolatedExecutor::new(config)
    }

    #[test]
    fn test_invalid_definition_is_statement_failure() {
        let outcome = executor("/nonexistent").execute(&BenchmarkDefinition::new("", "1").with_repeat(0));
        let failure = outcome.failure_info().unwrap();
        assert_eq!(failure.kind, FailureKind::Statement);
        assert!(failure.detail.starts_with("invalid definition"));
    }

    #[test]
    fn test_missing_worker_binary_is_crash() {
        let outcome = executor("/nonexistent/benchy-worker").execute(&BenchmarkDefinition::new("", "1"));
        let failure = outcome.failure_info().unwrap();
        assert_eq!(failure.kind, FailureKind::WorkerCrash);
        assert!(failure.detail.contains("no output produced"));
        assert!(outcome.timing().is_none());
    }

    #[test]
    fn test_timeout_detail_says_timed_out() {
        let failure = supervisor_failure(&SupervisorError::Timeout(Duration::from_secs(1)), None);
        assert_eq!(failure.kind, FailureKind::Timeout);
        assert!(failure.detail.contains("timed out"));

        let failure = supervisor_failure(
            &SupervisorError::WorkerCrashed("worker exited with signal: 6 (SIGABRT)".into()),
            Some("abort called\n".into()),
        );
        assert_eq!(failure.kind, FailureKind::WorkerCrash);
        assert_eq!(
            failure.detail,
            "Worker crashed: worker exited with signal: 6 (SIGABRT)\nabort called"
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_exit_without_hello_keeps_stderr() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("worker.sh");
        std::fs::write(&script, "#!/bin/sh\necho 'boom: segfault' >&2\nexit 139\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let outcome = executor(script.to_str().unwrap()).execute(&BenchmarkDefinition::new("", "1"));
        let failure = outcome.failure_info().unwrap();
        assert_eq!(failure.kind, FailureKind::WorkerCrash);
        assert!(failure.detail.contains("boom: segfault"), "{}", failure.detail);
    }
}
