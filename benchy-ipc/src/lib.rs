#![warn(missing_docs)]
//! Benchy IPC Protocol
//!
//! Wire format for supervisor-worker communication. A benchmark request
//! travels to a freshly spawned worker as one rkyv frame and the outcome
//! comes back as another, so nothing but serialized bytes crosses the
//! process boundary.

mod framing;
mod messages;

pub use framing::{FrameError, FrameReader, FrameWriter, MAX_FRAME_SIZE, read_frame, write_frame};
pub use messages::{
    BenchmarkPayload, EngineKind, FailureKind, MemoryConfig, MemoryReport, SupervisorCommand,
    TimeUnit, TimingConfig, TimingReport, UnitPolicy, WorkerCapabilities, WorkerMessage,
};

/// Protocol version for compatibility checking
pub const PROTOCOL_VERSION: u32 = 1;

/// Environment variable naming the inherited `<read_fd>,<write_fd>` pair.
pub const IPC_FD_ENV: &str = "BENCHY_IPC_FD";

/// Command-line flag that switches a benchy binary into worker mode.
pub const WORKER_FLAG: &str = "--benchy-worker";

/// Environment variable naming the CPU a worker pins itself to.
pub const PIN_CPU_ENV: &str = "BENCHY_PIN_CPU";
