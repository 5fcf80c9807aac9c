//! Adaptive timer: loop-count calibration, best-of-repeat, unit scaling.
//!
//! The timer never touches a clock itself. It drives a trial closure that
//! runs the statement `loops` times and returns how long that took, which
//! keeps the calibration logic testable with a fake clock.

use benchy_ipc::{TimeUnit, TimingConfig, UnitPolicy};
use std::time::Duration;

/// Result of a calibrated, repeated measurement
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    /// Statement executions per trial
    pub loops: u64,
    /// Elapsed time of every trial, in run order
    pub trials: Vec<Duration>,
    /// Best per-iteration duration, in seconds
    pub best_seconds: f64,
}

impl Measurement {
    /// Scale the best per-iteration time according to `policy`.
    pub fn scaled(&self, policy: UnitPolicy) -> (f64, TimeUnit) {
        let unit = select_unit(self.best_seconds, policy);
        (unit.from_seconds(self.best_seconds), unit)
    }
}

/// Picks a loop count, then keeps the fastest of several trials.
#[derive(Debug, Clone)]
pub struct AdaptiveTimer {
    config: TimingConfig,
}

impl AdaptiveTimer {
    pub fn new(config: TimingConfig) -> Self {
        Self { config }
    }

    /// Shortest trial duration that ends calibration.
    pub fn threshold(&self) -> Duration {
        Duration::from_nanos(self.config.min_trial_ns)
    }

    /// Find a loop count whose trial lasts at least the threshold.
    ///
    /// Loop counts 1, 10, 100, ... are tried in turn, up to
    /// `max_calibration_steps` of them. If none reaches the threshold, the
    /// last count tried is used.
    pub fn calibrate<E>(
        &self,
        trial: &mut impl FnMut(u64) -> Result<Duration, E>,
    ) -> Result<u64, E> {
        let threshold = self.threshold();
        let mut loops = 1u64;
        for step in 0..self.config.max_calibration_steps.max(1) {
            if step > 0 {
                loops = loops.saturating_mul(10);
            }
            if trial(loops)? >= threshold {
                break;
            }
        }
        Ok(loops)
    }

    /// Run `repeat` trials with `ncalls` loops each, calibrating first when
    /// `ncalls` is `None`. The first trial error aborts the measurement.
    pub fn measure<E>(
        &self,
        repeat: u32,
        ncalls: Option<u64>,
        mut trial: impl FnMut(u64) -> Result<Duration, E>,
    ) -> Result<Measurement, E> {
        let loops = match ncalls {
            Some(n) => n.max(1),
            None => self.calibrate(&mut trial)?,
        };

        let repeat = repeat.max(1);
        let mut trials = Vec::with_capacity(repeat as usize);
        for _ in 0..repeat {
            trials.push(trial(loops)?);
        }

        let best = best_trial(&trials).unwrap_or_default();
        Ok(Measurement {
            loops,
            best_seconds: best.as_secs_f64() / loops as f64,
            trials,
        })
    }
}

/// Fastest of a set of trials.
pub fn best_trial(trials: &[Duration]) -> Option<Duration> {
    trials.iter().copied().min()
}

/// Unit to report a per-iteration time of `best_seconds` in.
///
/// `Auto` picks the unit from the decade of the value, stepping down one
/// unit per three decades below a second, so the scaled value lands in
/// `[0.01, 10)`. Values above that range stay in seconds and zero or
/// negative values are reported in nanoseconds.
pub fn select_unit(best_seconds: f64, policy: UnitPolicy) -> TimeUnit {
    match policy {
        UnitPolicy::Fixed(unit) => unit,
        UnitPolicy::Auto => {
            if best_seconds <= 0.0 || !best_seconds.is_finite() {
                return TimeUnit::Nanoseconds;
            }
            let magnitude = -(best_seconds.log10().floor() as i64);
            let order = magnitude.div_euclid(3).clamp(0, 3) as usize;
            TimeUnit::ALL[order]
        }
    }
}
