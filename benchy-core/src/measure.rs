//! Clocks and process probes used inside the worker.

use std::time::{Duration, Instant};

/// Bytes in one MB as reported for memory usage.
pub const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Wall-clock timer for one trial
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Start a new timer
    #[inline(always)]
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Elapsed wall time since `start`
    #[inline(always)]
    pub fn stop(&self) -> Duration {
        self.start.elapsed()
    }
}

/// Current resident set size of this process, in bytes.
#[cfg(target_os = "linux")]
pub fn resident_memory_bytes() -> Result<u64, std::io::Error> {
    // statm: size resident shared text lib data dt (in pages)
    let statm = std::fs::read_to_string("/proc/self/statm")?;
    let resident_pages: u64 = statm
        .split_whitespace()
        .nth(1)
        .and_then(|field| field.parse().ok())
        .ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("unexpected /proc/self/statm contents: {statm:?}"),
            )
        })?;
    Ok(resident_pages * page_size())
}

#[cfg(target_os = "linux")]
fn page_size() -> u64 {
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 { size as u64 } else { 4096 }
}

/// Peak resident set size of this process, in bytes.
///
/// Without a cheap current-RSS probe the high-water mark is the best
/// available reading; it still grows with what the statement allocates.
#[cfg(all(unix, not(target_os = "linux")))]
pub fn resident_memory_bytes() -> Result<u64, std::io::Error> {
    let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
    let ret = unsafe { libc::getrusage(libc::RUSAGE_SELF, &mut usage) };
    if ret != 0 {
        return Err(std::io::Error::last_os_error());
    }
    // ru_maxrss is in bytes on macOS
    Ok(usage.ru_maxrss as u64)
}

#[cfg(not(unix))]
pub fn resident_memory_bytes() -> Result<u64, std::io::Error> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "resident memory sampling is not supported on this platform",
    ))
}

/// Current resident set size in MB.
pub fn resident_memory_mb() -> Result<f64, std::io::Error> {
    resident_memory_bytes().map(|bytes| bytes as f64 / BYTES_PER_MB)
}

/// Set CPU affinity to pin the current thread to a specific core
///
/// Keeps trials from migrating between cores mid-measurement.
#[cfg(target_os = "linux")]
pub fn pin_to_cpu(cpu: usize) -> Result<(), std::io::Error> {
    use std::mem::MaybeUninit;

    unsafe {
        let mut set = MaybeUninit::<libc::cpu_set_t>::zeroed();
        let set_ref = set.assume_init_mut();

        libc::CPU_ZERO(set_ref);
        libc::CPU_SET(cpu, set_ref);

        let result = libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), set_ref);

        if result == 0 {
            Ok(())
        } else {
            Err(std::io::Error::last_os_error())
        }
    }
}

#[cfg(not(target_os = "linux"))]
pub fn pin_to_cpu(_cpu: usize) -> Result<(), std::io::Error> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer() {
        let timer = Timer::start();
        std::thread::sleep(Duration::from_millis(10));
        assert!(timer.stop() >= Duration::from_millis(5));
    }

    #[cfg(unix)]
    #[test]
    fn test_resident_memory_is_positive() {
        let mb = resident_memory_mb().unwrap();
        assert!(mb > 0.0);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_resident_memory_grows_with_touched_allocation() {
        let before = resident_memory_bytes().unwrap();
        // 64 MB, written so the pages become resident
        let block = vec![1u8; 64 * 1024 * 1024];
        let after = resident_memory_bytes().unwrap();
        assert!(block.iter().step_by(4096).all(|&b| b == 1));
        assert!(after > before + 32 * 1024 * 1024);
    }
}
