//! Benchmark Planner
//!
//! Builds the execution plan by filtering a suite's benchmarks.
//!
//! Filtering matches a regex against the display name (the short
//! fingerprint for unnamed benchmarks). Ordering is never changed:
//! outcomes must come back in submission order.

use benchy_core::{BenchmarkDefinition, BenchmarkSuite};
use regex::Regex;

/// Execution plan for benchmarks
pub struct ExecutionPlan {
    /// Benchmarks to run, in submission order
    pub benchmarks: Vec<BenchmarkDefinition>,
    /// Benchmarks dropped by the filter
    pub skipped: usize,
}

/// Build an execution plan from a suite
pub fn build_plan(suite: &BenchmarkSuite, filter: Option<&Regex>) -> ExecutionPlan {
    let benchmarks: Vec<_> = suite
        .benchmarks
        .iter()
        .filter(|b| filter.is_none_or(|re| re.is_match(&b.display_name())))
        .cloned()
        .collect();

    ExecutionPlan {
        skipped: suite.len() - benchmarks.len(),
        benchmarks,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn suite() -> BenchmarkSuite {
        let mut suite = BenchmarkSuite::new("s");
        for name in ["list_fill", "dict_build", "list_range"] {
            suite.push(BenchmarkDefinition::new("", name.replace('_', " + ")).with_name(name));
        }
        suite
    }

    #[test]
    fn test_no_filter() {
        let plan = build_plan(&suite(), None);

        // Submission order, not alphabetical
        let names: Vec<_> = plan.benchmarks.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["list_fill", "dict_build", "list_range"]);
        assert_eq!(plan.skipped, 0);
    }

    #[test]
    fn test_regex_filter() {
        let re = Regex::new("^list_").unwrap();
        let plan = build_plan(&suite(), Some(&re));

        let names: Vec<_> = plan.benchmarks.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["list_fill", "list_range"]);
        assert_eq!(plan.skipped, 1);
    }

    #[test]
    fn test_unnamed_matches_short_fingerprint() {
        let mut suite = BenchmarkSuite::new("s");
        let bench = BenchmarkDefinition::new("", "1 + 1");
        let short = bench.fingerprint().short();
        suite.push(bench);

        let re = Regex::new(&format!("^{short}$")).unwrap();
        assert_eq!(build_plan(&suite, Some(&re)).benchmarks.len(), 1);
    }
}
