#![warn(missing_docs)]
//! Benchy Statistics
//!
//! Reductions that look across benchmarks rather than within one:
//! - Relative timing against the fastest outcome or a designated reference

mod baseline;

pub use baseline::{AnnotatedOutcome, NormalizeError, normalize};
