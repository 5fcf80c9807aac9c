//! Supervisor Process
//!
//! Spawns worker processes and talks to them over a pipe pair.

use benchy_ipc::{
    FrameError, FrameReader, FrameWriter, IPC_FD_ENV, PIN_CPU_ENV, PROTOCOL_VERSION,
    SupervisorCommand, WORKER_FLAG, WorkerCapabilities, WorkerMessage,
};
use std::io::Read;
use std::os::unix::io::{FromRawFd, RawFd};
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// How long a timed-out worker gets to exit after SIGTERM.
const TERM_GRACE: Duration = Duration::from_millis(500);

/// How long to wait for the stderr reader after the worker is gone.
const STDERR_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("Failed to spawn worker: {0}")]
    SpawnFailed(#[from] std::io::Error),

    #[error("IPC error: {0}")]
    IpcError(String),

    #[error("Worker crashed: {0}")]
    WorkerCrashed(String),

    #[error("Worker exceeded timeout of {0:?}")]
    Timeout(Duration),

    #[error("Worker protocol error: expected {expected}, got {got}")]
    ProtocolError { expected: String, got: String },
}

impl From<FrameError> for SupervisorError {
    fn from(e: FrameError) -> Self {
        SupervisorError::IpcError(e.to_string())
    }
}

/// Result of polling for data
#[derive(Debug)]
enum PollResult {
    DataAvailable,
    Timeout,
    PipeClosed,
    Error(std::io::Error),
}

/// Wait for data to be available on a file descriptor with timeout
fn wait_for_data(fd: i32, timeout: Duration) -> PollResult {
    let mut pollfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };

    let timeout_ms = timeout.as_millis().min(i32::MAX as u128) as i32;
    let result = unsafe { libc::poll(&mut pollfd, 1, timeout_ms) };

    if result < 0 {
        PollResult::Error(std::io::Error::last_os_error())
    } else if result == 0 {
        PollResult::Timeout
    } else if pollfd.revents & libc::POLLIN != 0 {
        // Even if the pipe is closing there may be data left
        PollResult::DataAvailable
    } else if pollfd.revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0 {
        PollResult::PipeClosed
    } else {
        PollResult::Timeout
    }
}

/// Create a close-on-exec pipe pair, returning (read_fd, write_fd).
#[cfg(target_os = "linux")]
fn create_pipe() -> Result<(RawFd, RawFd), std::io::Error> {
    let mut fds = [0 as RawFd; 2];
    let ret = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) };
    if ret != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok((fds[0], fds[1]))
}

/// Create a close-on-exec pipe pair, returning (read_fd, write_fd).
#[cfg(not(target_os = "linux"))]
fn create_pipe() -> Result<(RawFd, RawFd), std::io::Error> {
    let mut fds = [0 as RawFd; 2];
    let ret = unsafe { libc::pipe(fds.as_mut_ptr()) };
    if ret != 0 {
        return Err(std::io::Error::last_os_error());
    }
    for &fd in &fds {
        unsafe {
            let flags = libc::fcntl(fd, libc::F_GETFD);
            libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC);
        }
    }
    Ok((fds[0], fds[1]))
}

fn close_fd(fd: RawFd) {
    unsafe {
        libc::close(fd);
    }
}

/// Signal the process group led by a worker: the worker and anything its
/// fragments spawned. Returns `Err` if the signal could not be delivered.
fn signal_group(pid: u32, signal: libc::c_int) -> Result<(), std::io::Error> {
    let ret = unsafe { libc::killpg(pid as libc::pid_t, signal) };
    if ret == -1 {
        Err(std::io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Drain a child's stderr on a background thread so it can never fill the
/// pipe and stall the worker.
fn capture_stderr(child: &mut Child) -> Option<mpsc::Receiver<String>> {
    let mut stderr = child.stderr.take()?;
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = stderr.read_to_end(&mut buf);
        let _ = tx.send(String::from_utf8_lossy(&buf).into_owned());
    });
    Some(rx)
}

/// Path of the binary to run workers from: `BENCHY_WORKER_BIN` if set,
/// otherwise the current executable.
pub fn default_worker_binary() -> Result<PathBuf, std::io::Error> {
    match std::env::var_os("BENCHY_WORKER_BIN") {
        Some(path) => Ok(PathBuf::from(path)),
        None => std::env::current_exe(),
    }
}

/// Worker process handle
///
/// The whole life of a handle, from spawn to the last reply, is bounded by
/// one timeout. Dropping the handle kills the worker if it is still alive.
pub struct WorkerHandle {
    child: Child,
    reader: FrameReader<std::fs::File>,
    writer: FrameWriter<std::fs::File>,
    capabilities: Option<WorkerCapabilities>,
    timeout: Duration,
    deadline: Instant,
    msg_read_fd: RawFd,
    stderr: Option<mpsc::Receiver<String>>,
    /// Set once the group has been killed and the worker reaped
    killed: bool,
}

impl WorkerHandle {
    /// Spawn a worker from `binary` and complete the handshake.
    pub fn spawn(binary: &Path, timeout: Duration) -> Result<Self, SupervisorError> {
        let mut handle = Self::launch(binary, timeout)?;
        handle.handshake()?;
        Ok(handle)
    }

    /// Spawn a worker from `binary` using fd 3/4 for IPC, without waiting
    /// for its `Hello`.
    pub fn launch(binary: &Path, timeout: Duration) -> Result<Self, SupervisorError> {
        Self::launch_pinned(binary, timeout, None)
    }

    /// Like [`launch`](Self::launch), asking the worker to pin itself to `cpu`.
    pub fn launch_pinned(
        binary: &Path,
        timeout: Duration,
        cpu: Option<usize>,
    ) -> Result<Self, SupervisorError> {
        let deadline = Instant::now() + timeout;

        // cmd_pipe: supervisor writes commands → worker reads from fd 3
        let (cmd_read, cmd_write) = create_pipe()?;
        // msg_pipe: worker writes messages from fd 4 → supervisor reads
        let (msg_read, msg_write) = match create_pipe() {
            Ok(fds) => fds,
            Err(e) => {
                close_fd(cmd_read);
                close_fd(cmd_write);
                return Err(SupervisorError::SpawnFailed(e));
            }
        };

        let mut command = Command::new(binary);
        command
            .arg(WORKER_FLAG)
            .env(IPC_FD_ENV, "3,4")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        if let Some(cpu) = cpu {
            command.env(PIN_CPU_ENV, cpu.to_string());
        }

        // In the child: lead a new process group, then move cmd_read→3 and
        // msg_write→4. Both go through fds >= 10 first so a pipe end already
        // sitting on 3 or 4 cannot be clobbered. Every other pipe end is
        // close-on-exec.
        unsafe {
            command.pre_exec(move || {
                // Fragment processes join this group and die with it
                if libc::setpgid(0, 0) < 0 {
                    return Err(std::io::Error::last_os_error());
                }

                // Die with the supervisor, even if it is killed
                #[cfg(target_os = "linux")]
                libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGKILL);

                let read_tmp = libc::fcntl(cmd_read, libc::F_DUPFD_CLOEXEC, 10);
                let write_tmp = libc::fcntl(msg_write, libc::F_DUPFD_CLOEXEC, 10);
                if read_tmp < 0 || write_tmp < 0 {
                    return Err(std::io::Error::last_os_error());
                }
                // dup2 leaves the new descriptor without FD_CLOEXEC
                if libc::dup2(read_tmp, 3) < 0 || libc::dup2(write_tmp, 4) < 0 {
                    return Err(std::io::Error::last_os_error());
                }
                libc::close(read_tmp);
                libc::close(write_tmp);

                Ok(())
            });
        }

        let mut child = match command.spawn() {
            Ok(c) => c,
            Err(e) => {
                close_fd(cmd_read);
                close_fd(cmd_write);
                close_fd(msg_read);
                close_fd(msg_write);
                return Err(SupervisorError::SpawnFailed(e));
            }
        };

        // Close the child-side ends in the parent
        close_fd(cmd_read);
        close_fd(msg_write);

        let stderr = capture_stderr(&mut child);
        let writer_file = unsafe { std::fs::File::from_raw_fd(cmd_write) };
        let reader_file = unsafe { std::fs::File::from_raw_fd(msg_read) };

        Ok(Self {
            child,
            reader: FrameReader::new(reader_file),
            writer: FrameWriter::new(writer_file),
            capabilities: None,
            timeout,
            deadline,
            msg_read_fd: msg_read,
            stderr,
            killed: false,
        })
    }

    /// Wait for Hello message from worker and validate protocol version
    pub fn handshake(&mut self) -> Result<(), SupervisorError> {
        match self.receive()? {
            WorkerMessage::Hello(caps) => {
                if caps.protocol_version != PROTOCOL_VERSION {
                    return Err(SupervisorError::ProtocolError {
                        expected: format!("protocol version {PROTOCOL_VERSION}"),
                        got: format!("protocol version {}", caps.protocol_version),
                    });
                }
                tracing::trace!(pid = caps.pid, "worker ready");
                self.capabilities = Some(caps);
                Ok(())
            }
            other => Err(SupervisorError::ProtocolError {
                expected: "Hello".to_string(),
                got: format!("{other:?}"),
            }),
        }
    }

    /// Get worker capabilities
    pub fn capabilities(&self) -> Option<&WorkerCapabilities> {
        self.capabilities.as_ref()
    }

    /// Send one command and wait for its reply.
    pub fn request(
        &mut self,
        command: &SupervisorCommand,
    ) -> Result<WorkerMessage, SupervisorError> {
        self.writer.write(command)?;
        match self.receive()? {
            WorkerMessage::Hello(_) => Err(SupervisorError::ProtocolError {
                expected: "Timing/Memory/Failure".to_string(),
                got: "Hello".to_string(),
            }),
            reply => Ok(reply),
        }
    }

    /// Read the next message, bounded by the handle's deadline.
    fn receive(&mut self) -> Result<WorkerMessage, SupervisorError> {
        loop {
            let remaining = self.deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return self.handle_timeout();
            }

            // Even with buffered data we verify the worker is alive: the
            // buffer might hold an incomplete frame that will never complete.
            if self.reader.has_buffered_data() {
                if !self.is_alive() {
                    return Err(SupervisorError::WorkerCrashed(
                        "worker exited with a partial message buffered".to_string(),
                    ));
                }
            } else {
                match wait_for_data(self.msg_read_fd, remaining.min(Duration::from_millis(100))) {
                    PollResult::DataAvailable => {}
                    PollResult::Timeout => {
                        if !self.is_alive() {
                            return Err(SupervisorError::WorkerCrashed(self.exit_description()));
                        }
                        continue;
                    }
                    PollResult::PipeClosed => {
                        return Err(SupervisorError::WorkerCrashed(self.exit_description()));
                    }
                    PollResult::Error(e) => {
                        return Err(SupervisorError::WorkerCrashed(format!("pipe error: {e}")));
                    }
                }
            }

            return match self.reader.read::<WorkerMessage>() {
                Ok(msg) => Ok(msg),
                Err(FrameError::EndOfStream) => {
                    Err(SupervisorError::WorkerCrashed(self.exit_description()))
                }
                Err(e) => {
                    if !self.is_alive() {
                        return Err(SupervisorError::WorkerCrashed(self.exit_description()));
                    }
                    Err(SupervisorError::IpcError(e.to_string()))
                }
            };
        }
    }

    /// Handle timeout: send SIGTERM, give the worker a short grace period
    /// to exit, then SIGKILL.
    fn handle_timeout(&mut self) -> Result<WorkerMessage, SupervisorError> {
        // Ignore error: the worker may already be dead
        let _ = signal_group(self.child.id(), libc::SIGTERM);

        let grace_deadline = Instant::now() + TERM_GRACE;
        while self.is_alive() && Instant::now() < grace_deadline {
            std::thread::sleep(Duration::from_millis(10));
        }

        self.kill_group();

        Err(SupervisorError::Timeout(self.timeout))
    }

    /// Describe how the worker exited, waiting for it briefly.
    fn exit_description(&mut self) -> String {
        let grace_deadline = Instant::now() + TERM_GRACE;
        loop {
            match self.child.try_wait() {
                Ok(Some(status)) => return format!("worker exited with {status}"),
                Ok(None) if Instant::now() < grace_deadline => {
                    std::thread::sleep(Duration::from_millis(10));
                }
                Ok(None) => return "worker closed its message pipe".to_string(),
                Err(e) => return format!("worker status unavailable: {e}"),
            }
        }
    }

    /// Shutdown the worker gracefully and return what it wrote to stderr.
    pub fn shutdown(mut self) -> Option<String> {
        let _ = self.writer.write(&SupervisorCommand::Shutdown);
        let grace_deadline = Instant::now() + TERM_GRACE;
        while self.is_alive() && Instant::now() < grace_deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        self.terminate()
    }

    /// Kill the worker's process group and return what the worker wrote
    /// to stderr.
    pub fn terminate(&mut self) -> Option<String> {
        self.kill_group();
        self.stderr
            .take()
            .and_then(|rx| rx.recv_timeout(STDERR_GRACE).ok())
            .filter(|text| !text.trim().is_empty())
    }

    /// SIGKILL the worker's group, including processes that outlived the
    /// worker, then reap the worker.
    fn kill_group(&mut self) {
        if self.killed {
            return;
        }
        self.killed = true;
        let _ = signal_group(self.child.id(), libc::SIGKILL);
        if self.is_alive() {
            let _ = self.child.kill();
        }
        let _ = self.child.wait();
    }

    /// Check if worker process is still running
    pub fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        if !self.killed && self.is_alive() {
            // Graceful: SIGTERM first, brief wait, then SIGKILL
            let _ = signal_group(self.child.id(), libc::SIGTERM);
            std::thread::sleep(Duration::from_millis(50));
        }
        self.kill_group();
    }
}
