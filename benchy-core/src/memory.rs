//! Memory sampling: resident-set growth of a statement, reduced by peak.
//!
//! Timing keeps the *fastest* trial, memory keeps the *largest*: noise only
//! ever inflates wall time, while a memory regression matters at its worst.

use crate::engine::FragmentEngine;
use crate::outcome::{Failure, FailureKind, MemoryUsage};
use benchy_ipc::MemoryReport;

/// Usage recorded for a trial that could not be measured.
pub const UNMEASURABLE: f64 = f64::NEG_INFINITY;

/// Largest measurable usage, or `None` if no trial was measurable.
pub fn peak_usage(usages: &[f64]) -> Option<f64> {
    usages
        .iter()
        .copied()
        .filter(|u| u.is_finite())
        .fold(None, |peak, u| Some(peak.map_or(u, |p: f64| p.max(u))))
}

/// Run `repeat` trials, recording [`UNMEASURABLE`] for each one that fails.
pub fn sample_trials(
    repeat: u32,
    mut trial: impl FnMut() -> Result<f64, String>,
) -> MemoryReport {
    let mut report = MemoryReport {
        usages_mb: Vec::with_capacity(repeat as usize),
        errors: Vec::new(),
    };
    for _ in 0..repeat {
        match trial() {
            Ok(usage) => report.usages_mb.push(usage),
            Err(err) => {
                report.usages_mb.push(UNMEASURABLE);
                report.errors.push(err);
            }
        }
    }
    report
}

/// Sample memory in the current process.
///
/// Each trial re-runs setup, then reads `probe` (resident MB) immediately
/// before and after one execution of the statement.
pub fn sample_in_place<E: FragmentEngine>(
    engine: &E,
    setup: &str,
    statement: &str,
    cleanup: &str,
    repeat: u32,
    probe: impl Fn() -> std::io::Result<f64>,
) -> MemoryReport {
    sample_trials(repeat, || {
        let mut env = engine
            .prepare(setup)
            .map_err(|e| format!("setup failed: {e}"))?;
        let compiled = engine.compile(statement).map_err(|e| e.to_string())?;

        let before = probe().map_err(|e| format!("rss probe failed: {e}"))?;
        engine
            .execute(&mut env, &compiled)
            .map_err(|e| e.to_string())?;
        let after = probe().map_err(|e| format!("rss probe failed: {e}"))?;

        if let Err(err) = engine.cleanup(&mut env, cleanup) {
            tracing::debug!("cleanup after memory trial failed: {err}");
        }
        Ok(after - before)
    })
}

/// Reduce per-trial usages to a single peak.
///
/// Fails with [`FailureKind::UnmeasurableMemory`] when every trial was
/// unmeasurable; the failure carries the trial errors.
pub fn reduce(report: &MemoryReport) -> Result<MemoryUsage, Failure> {
    let repeat = report.usages_mb.len() as u32;
    let unmeasurable = report.usages_mb.iter().filter(|u| !u.is_finite()).count() as u32;
    match peak_usage(&report.usages_mb) {
        Some(usage) => Ok(MemoryUsage {
            repeat,
            usage,
            unmeasurable,
        }),
        None => {
            let detail = if report.errors.is_empty() {
                format!("all {repeat} memory trials were unmeasurable")
            } else {
                format!(
                    "all {repeat} memory trials were unmeasurable:\n{}",
                    report.errors.join("\n")
                )
            };
            Err(Failure::new(FailureKind::UnmeasurableMemory, detail))
        }
    }
}
