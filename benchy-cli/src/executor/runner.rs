//! Suite Runner
//!
//! Executes a plan, normalizes the outcomes against a baseline, and
//! persists them. Outcomes always come back one per submitted benchmark,
//! in submission order, whatever `jobs` is set to.

use super::execution::{IsolatedExecutor, unscheduled};
use benchy_core::{BenchmarkDefinition, RawOutcome};
use benchy_stats::{AnnotatedOutcome, NormalizeError, normalize};
use benchy_store::{ResultRecord, ResultStore, StoreError};
use chrono::{DateTime, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::ThreadPoolBuilder;
use rayon::prelude::*;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

/// Errors that abort a suite run
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Normalize(#[from] NormalizeError),

    #[error("failed to persist results: {0}")]
    Store(#[from] StoreError),
}

/// One benchmark and what happened to it
#[derive(Debug, Clone, Serialize)]
pub struct SuiteEntry {
    pub definition: BenchmarkDefinition,
    pub outcome: AnnotatedOutcome,
}

/// Ordered results of a suite run, the hand-off to presentation
#[derive(Debug, Clone, Serialize)]
pub struct SuiteReport {
    pub suite: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub timestamp: DateTime<Utc>,
    /// Name of the designated baseline, if one was used
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    pub entries: Vec<SuiteEntry>,
}

impl SuiteReport {
    pub fn failures(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| !e.outcome.outcome.is_success())
            .count()
    }
}

/// Runs a list of benchmarks through an [`IsolatedExecutor`]
pub struct SuiteRunner {
    executor: IsolatedExecutor,
    jobs: usize,
    progress: bool,
}

impl SuiteRunner {
    /// With `jobs > 1`, workers are no longer pinned to a single CPU.
    pub fn new(mut executor: IsolatedExecutor, jobs: usize) -> Self {
        if jobs > 1 {
            executor.unpin();
        }
        Self {
            executor,
            jobs: jobs.max(1),
            progress: true,
        }
    }

    /// Show or hide the progress bar
    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    fn progress_bar(&self, len: usize) -> ProgressBar {
        if !self.progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(len as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}",
                )
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        pb
    }

    /// Execute every benchmark; outcomes line up with `benchmarks`.
    pub fn execute_all(&self, benchmarks: &[BenchmarkDefinition]) -> Vec<RawOutcome> {
        let pb = self.progress_bar(benchmarks.len());
        let run_one = |bench: &BenchmarkDefinition| {
            pb.set_message(bench.display_name());
            let outcome = self.executor.execute(bench);
            match outcome.failure_info() {
                None => info!("{} done", bench.display_name()),
                Some(failure) => info!("{} failed: {}", bench.display_name(), failure.kind),
            }
            pb.inc(1);
            outcome
        };

        let outcomes = if self.jobs == 1 || benchmarks.len() <= 1 {
            benchmarks.iter().map(run_one).collect()
        } else {
            warn!(
                "running {} benchmarks concurrently; contention will distort timings",
                self.jobs
            );
            match ThreadPoolBuilder::new()
                .num_threads(self.jobs.min(benchmarks.len()))
                .build()
            {
                Ok(pool) => pool.install(|| benchmarks.par_iter().map(run_one).collect()),
                Err(e) => benchmarks
                    .iter()
                    .map(|b| unscheduled(b.fingerprint(), &format!("failed to build worker pool: {e}")))
                    .collect(),
            }
        };

        pb.finish_and_clear();
        outcomes
    }

    /// Execute, normalize, and (with a store) persist a suite.
    ///
    /// `reference` names the baseline benchmark; without one the fastest
    /// success is used. A designated reference that fails falls back to
    /// the fastest success with a warning.
    pub fn run(
        &self,
        suite: &str,
        description: &str,
        benchmarks: Vec<BenchmarkDefinition>,
        reference: Option<&str>,
        store: Option<&mut ResultStore>,
    ) -> Result<SuiteReport, RunError> {
        let reference_index = reference
            .map(|name| {
                benchmarks
                    .iter()
                    .position(|b| b.name == name)
                    .ok_or_else(|| NormalizeError::ReferenceMissing(name.to_string()))
            })
            .transpose()?;

        let timestamp = Utc::now();
        let outcomes = self.execute_all(&benchmarks);
        let annotated = annotate(outcomes, reference_index)?;

        let report = SuiteReport {
            suite: suite.to_string(),
            description: description.to_string(),
            timestamp,
            reference: reference.map(str::to_string),
            entries: benchmarks
                .into_iter()
                .zip(annotated)
                .map(|(definition, (_, outcome))| SuiteEntry {
                    definition,
                    outcome,
                })
                .collect(),
        };

        if let Some(store) = store {
            persist(store, &report)?;
        }
        Ok(report)
    }
}

fn annotate(
    outcomes: Vec<RawOutcome>,
    reference: Option<usize>,
) -> Result<Vec<(usize, AnnotatedOutcome)>, NormalizeError> {
    let keyed = || outcomes.iter().cloned().enumerate().collect::<Vec<_>>();
    match normalize(keyed(), reference.as_ref()) {
        Err(NormalizeError::ReferenceFailed { detail, .. }) if reference.is_some() => {
            warn!("reference benchmark failed ({detail}); using the fastest benchmark instead");
            annotate(outcomes, None)
        }
        Err(NormalizeError::ZeroReference(_)) => {
            warn!("reference timing is zero; relative timings omitted");
            Ok(keyed()
                .into_iter()
                .map(|(k, o)| (k, AnnotatedOutcome::unannotated(o)))
                .collect())
        }
        result => result,
    }
}

/// Record the suite, its definitions and one result per entry.
pub fn persist(store: &mut ResultStore, report: &SuiteReport) -> Result<(), StoreError> {
    let suite_id = store.record_suite(&report.suite, &report.description)?;
    for entry in &report.entries {
        store.record_definition(&entry.definition, Some(suite_id))?;
    }
    let records: Vec<_> = report
        .entries
        .iter()
        .map(|e| ResultRecord::from_outcome(&e.outcome.outcome, report.timestamp))
        .collect();
    store.record_results(&records)?;
    info!(
        "recorded {} results for suite {}",
        records.len(),
        report.suite
    );
    Ok(())
}
