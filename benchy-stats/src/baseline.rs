//! Baseline Normalization
//!
//! Expresses every successful timing as a multiple of a reference timing.
//! Timings are converted to seconds before dividing, so outcomes reported
//! in different units compare correctly.

use benchy_core::RawOutcome;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use thiserror::Error;

/// A raw outcome plus its timing relative to the reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotatedOutcome {
    /// The outcome as measured
    #[serde(flatten)]
    pub outcome: RawOutcome,
    /// `timing / reference timing`; `None` for failures or when no
    /// normalization took place
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relative_timing: Option<f64>,
}

impl AnnotatedOutcome {
    /// Wrap an outcome without a relative timing.
    pub fn unannotated(outcome: RawOutcome) -> Self {
        Self {
            outcome,
            relative_timing: None,
        }
    }
}

/// Errors from baseline normalization
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NormalizeError {
    /// The designated reference is not in the collection
    #[error("reference {0} not found among outcomes")]
    ReferenceMissing(String),

    /// The designated reference has no timing
    #[error("reference {key} failed: {detail}")]
    ReferenceFailed {
        /// Reference key
        key: String,
        /// Failure diagnostic of the reference
        detail: String,
    },

    /// The reference timing is zero, so ratios are undefined
    #[error("reference {0} has a zero timing")]
    ZeroReference(String),
}

/// Annotate `outcomes` with timings relative to a reference.
///
/// With `reference` set, the outcome under that key is the reference; it
/// must exist and have succeeded. Without one, the fastest successful
/// outcome is used. Failed outcomes pass through without a ratio and the
/// input order is preserved. If nothing succeeded there is nothing to
/// compare, and every outcome passes through unannotated.
pub fn normalize<K: PartialEq + Debug>(
    outcomes: Vec<(K, RawOutcome)>,
    reference: Option<&K>,
) -> Result<Vec<(K, AnnotatedOutcome)>, NormalizeError> {
    let reference_seconds = match reference {
        Some(key) => {
            let (_, outcome) = outcomes
                .iter()
                .find(|(k, _)| k == key)
                .ok_or_else(|| NormalizeError::ReferenceMissing(format!("{key:?}")))?;
            match outcome.timing() {
                Some(timing) => Some((format!("{key:?}"), timing.seconds())),
                None => {
                    return Err(NormalizeError::ReferenceFailed {
                        key: format!("{key:?}"),
                        detail: outcome.failure_detail().unwrap_or_default().to_string(),
                    });
                }
            }
        }
        None => outcomes
            .iter()
            .filter_map(|(k, o)| o.timing().map(|t| (k, t.seconds())))
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(k, seconds)| (format!("{k:?}"), seconds)),
    };

    let Some((reference_key, reference_seconds)) = reference_seconds else {
        return Ok(outcomes
            .into_iter()
            .map(|(k, o)| (k, AnnotatedOutcome::unannotated(o)))
            .collect());
    };

    if reference_seconds <= 0.0 {
        return Err(NormalizeError::ZeroReference(reference_key));
    }

    Ok(outcomes
        .into_iter()
        .map(|(k, outcome)| {
            let relative_timing = outcome.timing().map(|t| t.seconds() / reference_seconds);
            (
                k,
                AnnotatedOutcome {
                    outcome,
                    relative_timing,
                },
            )
        })
        .collect())
}
