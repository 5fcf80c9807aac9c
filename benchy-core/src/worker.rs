//! Worker Process Entry Point
//!
//! Handles the worker side of the supervisor-worker architecture: read one
//! command, run the definition with the requested engine, answer with a
//! single message.
//!
//! On Unix, uses fd 3/4 for IPC (set via `BENCHY_IPC_FD`) and installs a
//! SIGTERM handler for graceful shutdown. On non-Unix, falls back to
//! stdin/stdout and skips signal handling.

use crate::engine::{ExprEngine, FragmentEngine, ShellEngine};
use crate::measure::{Timer, pin_to_cpu, resident_memory_mb};
use crate::memory::sample_in_place;
use crate::timer::AdaptiveTimer;
use benchy_ipc::{
    BenchmarkPayload, EngineKind, FailureKind, FrameError, FrameReader, FrameWriter, IPC_FD_ENV,
    MemoryConfig, PIN_CPU_ENV, SupervisorCommand, TimingConfig, TimingReport, WorkerCapabilities,
    WorkerMessage,
};
use std::sync::atomic::{AtomicBool, Ordering};

#[cfg(unix)]
use std::os::unix::io::FromRawFd;

/// Global flag set by SIGTERM handler to request graceful shutdown.
static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Check if a graceful shutdown has been requested via SIGTERM.
pub fn shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::Relaxed)
}

/// Install a SIGTERM handler that sets the `SHUTDOWN_REQUESTED` flag.
/// The handler is async-signal-safe (only sets an atomic).
#[cfg(unix)]
fn install_sigterm_handler() {
    unsafe {
        let mut sa: libc::sigaction = std::mem::zeroed();
        sa.sa_sigaction = sigterm_handler as *const () as usize;
        sa.sa_flags = libc::SA_RESTART;
        libc::sigemptyset(&mut sa.sa_mask);
        libc::sigaction(libc::SIGTERM, &sa, std::ptr::null_mut());
    }
}

#[cfg(unix)]
extern "C" fn sigterm_handler(_sig: libc::c_int) {
    SHUTDOWN_REQUESTED.store(true, Ordering::Relaxed);
}

/// No-op on non-Unix (no SIGTERM equivalent).
#[cfg(not(unix))]
fn install_sigterm_handler() {}

/// IPC transport: either inherited fd pair or stdin/stdout fallback.
enum IpcTransport {
    #[cfg(unix)]
    Fds { read_fd: i32, write_fd: i32 },
    Stdio,
}

fn detect_transport() -> IpcTransport {
    #[cfg(unix)]
    if let Ok(val) = std::env::var(IPC_FD_ENV) {
        if let Some((r, w)) = val.split_once(',') {
            if let (Ok(read_fd), Ok(write_fd)) = (r.trim().parse(), w.trim().parse()) {
                return IpcTransport::Fds { read_fd, write_fd };
            }
        }
        eprintln!(
            "benchy: warning: invalid {IPC_FD_ENV}={val:?} (expected <read_fd>,<write_fd>), falling back to stdio"
        );
    }
    IpcTransport::Stdio
}

/// Worker main loop
pub struct WorkerMain {
    reader: FrameReader<Box<dyn std::io::Read>>,
    writer: FrameWriter<Box<dyn std::io::Write>>,
}

impl WorkerMain {
    /// Create a new worker, using the inherited fd pair if `BENCHY_IPC_FD`
    /// is set, otherwise stdin/stdout.
    pub fn new() -> Self {
        match detect_transport() {
            #[cfg(unix)]
            IpcTransport::Fds { read_fd, write_fd } => {
                // Processes started by fragments must not inherit the IPC pipes
                for fd in [read_fd, write_fd] {
                    unsafe {
                        let flags = libc::fcntl(fd, libc::F_GETFD);
                        libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC);
                    }
                }
                let read_file = unsafe { std::fs::File::from_raw_fd(read_fd) };
                let write_file = unsafe { std::fs::File::from_raw_fd(write_fd) };
                Self::with_transport(Box::new(read_file), Box::new(write_file))
            }
            IpcTransport::Stdio => {
                Self::with_transport(Box::new(std::io::stdin()), Box::new(std::io::stdout()))
            }
        }
    }

    /// Create a worker over an explicit reader/writer pair.
    pub fn with_transport(
        reader: Box<dyn std::io::Read>,
        writer: Box<dyn std::io::Write>,
    ) -> Self {
        Self {
            reader: FrameReader::new(reader),
            writer: FrameWriter::new(writer),
        }
    }

    /// Run the worker main loop until `Shutdown`, SIGTERM, or the
    /// supervisor closing its end of the pipe.
    pub fn run(&mut self) -> Result<(), FrameError> {
        install_sigterm_handler();

        self.writer
            .write(&WorkerMessage::Hello(WorkerCapabilities::default()))?;

        // Keep trials on one core when the supervisor asks for it
        if let Some(cpu) = std::env::var(PIN_CPU_ENV)
            .ok()
            .and_then(|v| v.trim().parse().ok())
        {
            let _ = pin_to_cpu(cpu);
        }

        loop {
            if shutdown_requested() {
                break;
            }

            let command: SupervisorCommand = match self.reader.read() {
                Ok(command) => command,
                Err(FrameError::EndOfStream) => break,
                Err(e) => return Err(e),
            };

            let reply = match command {
                SupervisorCommand::Time {
                    payload,
                    engine,
                    config,
                } => guarded(|| match engine {
                    EngineKind::Expr => time_benchmark(&ExprEngine::new(), &payload, &config),
                    EngineKind::Shell => time_benchmark(&ShellEngine::new(), &payload, &config),
                }),
                SupervisorCommand::SampleMemory {
                    payload,
                    engine,
                    config,
                } => guarded(|| match engine {
                    EngineKind::Expr => sample_memory(&ExprEngine::new(), &payload, &config),
                    EngineKind::Shell => sample_memory(&ShellEngine::new(), &payload, &config),
                }),
                SupervisorCommand::Shutdown => break,
            };
            self.writer.write(&reply)?;
        }

        Ok(())
    }
}

impl Default for WorkerMain {
    fn default() -> Self {
        Self::new()
    }
}

fn failure(
    kind: FailureKind,
    message: impl Into<String>,
    cleanup_error: Option<String>,
) -> WorkerMessage {
    WorkerMessage::Failure {
        kind,
        message: message.into(),
        cleanup_error,
    }
}

/// Run `f`, turning a panic into a `Panic` failure message.
fn guarded(f: impl FnOnce() -> WorkerMessage) -> WorkerMessage {
    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)) {
        Ok(message) => message,
        Err(panic) => {
            let message = if let Some(s) = panic.downcast_ref::<&str>() {
                s.to_string()
            } else if let Some(s) = panic.downcast_ref::<String>() {
                s.clone()
            } else {
                "Unknown panic".to_string()
            };
            failure(FailureKind::Panic, message, None)
        }
    }
}

/// Time a definition: setup, calibrate, repeat, cleanup.
pub fn time_benchmark<E: FragmentEngine>(
    engine: &E,
    payload: &BenchmarkPayload,
    config: &TimingConfig,
) -> WorkerMessage {
    if let Err(msg) = config.validate() {
        return failure(FailureKind::Protocol, msg, None);
    }

    let mut env = match engine.prepare(&payload.setup) {
        Ok(env) => env,
        Err(e) => return failure(FailureKind::Setup, e.to_string(), None),
    };

    let timer = AdaptiveTimer::new(config.clone());
    let measured = engine
        .compile(&payload.statement)
        .map_err(|e| e.to_string())
        .and_then(|compiled| {
            timer.measure(payload.repeat, payload.ncalls, |loops| {
                let t = Timer::start();
                for _ in 0..loops {
                    engine
                        .execute(&mut env, &compiled)
                        .map_err(|e| e.to_string())?;
                }
                let elapsed = t.stop();
                if shutdown_requested() {
                    return Err("interrupted by SIGTERM".to_string());
                }
                Ok(elapsed)
            })
        });

    let cleanup_error = engine
        .cleanup(&mut env, &payload.cleanup)
        .err()
        .map(|e| format!("cleanup failed: {e}"));

    match measured {
        Ok(m) => {
            let (timing, units) = m.scaled(config.units);
            tracing::debug!(loops = m.loops, timing, %units, "timed {}", payload.name);
            WorkerMessage::Timing(TimingReport {
                loops: m.loops,
                repeat: m.trials.len() as u32,
                timing,
                units,
                trial_nanos: m
                    .trials
                    .iter()
                    .map(|d| d.as_nanos().min(u64::MAX as u128) as u64)
                    .collect(),
                cleanup_error,
            })
        }
        Err(msg) => failure(FailureKind::Statement, msg, cleanup_error),
    }
}

/// Sample resident memory of a definition's statement inside this process.
pub fn sample_memory<E: FragmentEngine>(
    engine: &E,
    payload: &BenchmarkPayload,
    config: &MemoryConfig,
) -> WorkerMessage {
    WorkerMessage::Memory(sample_in_place(
        engine,
        &payload.setup,
        &payload.statement,
        &payload.cleanup,
        config.repeat,
        resident_memory_mb,
    ))
}
