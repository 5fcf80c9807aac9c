//! Integration tests for Benchy
//!
//! These tests run real worker processes (the `benchy` binary built for
//! this test run) and verify the end-to-end behavior of the harness.

use benchy::prelude::*;
use benchy::{FailureKind, LoadedSuite};
use std::process::Command;
use std::time::{Duration, Instant};

const BENCHY: &str = env!("CARGO_BIN_EXE_benchy");

fn executor_config() -> ExecutorConfig {
    let mut config = ExecutorConfig::new(BENCHY);
    config.timeout = Duration::from_secs(30);
    // Keep calibration short; statements here are cheap
    config.timing.min_trial_ns = 10_000_000;
    config
}

fn executor() -> IsolatedExecutor {
    IsolatedExecutor::new(executor_config())
}

/// Building a list succeeds with a calibrated loop count
#[test]
fn test_allocation_scenario() {
    let bench = BenchmarkDefinition::new("n = 10000", "l = range(n)").with_name("range");
    let outcome = executor().execute(&bench);

    let timing = outcome.timing().unwrap_or_else(|| panic!("{outcome:?}"));
    assert_eq!(outcome.fingerprint, bench.fingerprint());
    assert_eq!(timing.repeat, 3);
    assert_eq!(timing.units, TimeUnit::Milliseconds);
    assert!(timing.loops >= 1);
    assert!(timing.timing > 0.0);
    // The calibrated trial reached the 10ms threshold; the best trial is
    // allowed to be somewhat faster than the calibration run
    let trial_seconds = timing.seconds() * timing.loops as f64;
    assert!(trial_seconds >= 0.005, "trial lasted {trial_seconds}s");
}

/// A statement that raises produces a failure and no timing
#[test]
fn test_divide_by_zero_scenario() {
    let outcome = executor().execute(&BenchmarkDefinition::new("", "x = 1 / 0"));

    assert!(outcome.timing().is_none());
    let failure = outcome.failure_info().unwrap();
    assert_eq!(failure.kind, FailureKind::Statement);
    assert!(!failure.detail.is_empty());
}

/// Sleeps of 1, 2 and 4 ms normalize to roughly 1x, 2x, 4x
#[test]
fn test_relative_scenario() {
    let benches = [1, 2, 4]
        .into_iter()
        .map(|ms| {
            BenchmarkDefinition::new("", format!("sleep({ms})"))
                .with_name(format!("sleep{ms}"))
                .with_ncalls(5)
        })
        .collect::<Vec<_>>();

    let runner = SuiteRunner::new(executor(), 1).with_progress(false);
    let report = runner.run("sleeps", "", benches, None, None).unwrap();

    let ratios: Vec<f64> = report
        .entries
        .iter()
        .map(|e| e.outcome.relative_timing.unwrap_or_else(|| panic!("{e:?}")))
        .collect();
    assert!((ratios[0] - 1.0).abs() < 1e-12);
    assert!((1.5..2.6).contains(&ratios[1]), "{ratios:?}");
    assert!((3.0..5.2).contains(&ratios[2]), "{ratios:?}");
    for entry in &report.entries {
        assert_eq!(entry.outcome.outcome.timing().unwrap().loops, 5);
    }
}

/// A hung worker is killed and reported as a timeout
#[test]
fn test_timeout_scenario() {
    let mut config = executor_config();
    config.timeout = Duration::from_secs(1);
    let executor = IsolatedExecutor::new(config);

    let start = Instant::now();
    let outcome = executor.execute(&BenchmarkDefinition::new("", "sleep(5000)").with_ncalls(1));
    let elapsed = start.elapsed();

    let failure = outcome.failure_info().unwrap();
    assert_eq!(failure.kind, FailureKind::Timeout);
    assert!(failure.detail.contains("timed out"), "{}", failure.detail);
    assert!(elapsed < Duration::from_secs(4), "took {elapsed:?}");
}

/// A worker that aborts fails alone; the next benchmark still runs
#[test]
fn test_crash_isolation() {
    let benches = vec![
        BenchmarkDefinition::new("", "abort()").with_name("crash"),
        BenchmarkDefinition::new("", "1 + 1").with_name("fine"),
    ];
    let runner = SuiteRunner::new(executor(), 1).with_progress(false);
    let report = runner.run("crashy", "", benches, None, None).unwrap();

    let crash = report.entries[0].outcome.outcome.failure_info().unwrap();
    assert_eq!(crash.kind, FailureKind::WorkerCrash);
    assert!(!crash.detail.is_empty());

    let fine = &report.entries[1].outcome;
    assert!(fine.outcome.is_success());
    assert_eq!(fine.relative_timing, Some(1.0));
}

/// A timed-out benchmark fails alone; the suite carries on and the next
/// benchmark becomes the reference
#[test]
fn test_timeout_then_continue() {
    let mut config = executor_config();
    config.timeout = Duration::from_secs(1);
    let benches = vec![
        BenchmarkDefinition::new("", "sleep(5000)").with_name("hang").with_ncalls(1),
        BenchmarkDefinition::new("", "1 + 1").with_name("fine"),
    ];
    let runner = SuiteRunner::new(IsolatedExecutor::new(config), 1).with_progress(false);
    let report = runner.run("hangs", "", benches, None, None).unwrap();

    let hang = report.entries[0].outcome.outcome.failure_info().unwrap();
    assert_eq!(hang.kind, FailureKind::Timeout);
    assert!(hang.detail.contains("timed out"), "{}", hang.detail);
    assert!(report.entries[0].outcome.relative_timing.is_none());

    let fine = &report.entries[1].outcome;
    assert!(fine.outcome.is_success(), "{fine:?}");
    assert_eq!(fine.relative_timing, Some(1.0));
}

#[test]
fn test_setup_failure() {
    let outcome = executor().execute(&BenchmarkDefinition::new("x = ", "x + 1"));
    let failure = outcome.failure_info().unwrap();
    assert_eq!(failure.kind, FailureKind::EnvironmentSetup);
    assert!(outcome.timing().is_none());
}

/// A failing cleanup is reported but does not downgrade the timing
#[test]
fn test_cleanup_failure_keeps_success() {
    let bench = BenchmarkDefinition::new("n = 3", "m = n * 2").with_cleanup("1 / 0");
    let outcome = executor().execute(&bench);

    assert!(outcome.is_success(), "{outcome:?}");
    let diagnostics = outcome.diagnostics.as_deref().unwrap_or_default();
    assert!(diagnostics.contains("cleanup failed"), "{diagnostics}");
}

#[cfg(target_os = "linux")]
#[test]
fn test_memory_sampling_both_modes() {
    for mode in [MemoryMode::InPlace, MemoryMode::Isolated] {
        let mut config = executor_config();
        config.memory = Some(MemorySampling { mode, repeat: 2 });
        let bench = BenchmarkDefinition::new("", "l = fill(0, 2000000)").with_ncalls(1);

        let outcome = IsolatedExecutor::new(config).execute(&bench);
        assert!(outcome.is_success(), "{outcome:?}");
        let memory = outcome
            .memory
            .as_ref()
            .unwrap_or_else(|| panic!("{mode:?}: {:?}", outcome.memory_failure));
        assert_eq!(memory.repeat, 2);
        assert_eq!(memory.unmeasurable, 0);
        assert!(memory.usage > 1.0, "{mode:?}: {} MB", memory.usage);
    }
}

#[cfg(target_os = "linux")]
#[test]
fn test_shell_engine() {
    let mut config = executor_config();
    config.engine = benchy::EngineKind::Shell;
    let executor = IsolatedExecutor::new(config);

    let ok = executor.execute(&BenchmarkDefinition::new("export GREETING=hi", "test \"$GREETING\" = hi").with_ncalls(3));
    assert!(ok.is_success(), "{ok:?}");

    let failed = executor.execute(&BenchmarkDefinition::new("", "echo nope >&2; exit 3").with_ncalls(1));
    let failure = failed.failure_info().unwrap();
    assert_eq!(failure.kind, FailureKind::Statement);
    assert!(failure.detail.contains("nope"), "{}", failure.detail);
}

/// `true` once `pid` has exited (gone, or a zombie nobody reaped yet)
#[cfg(target_os = "linux")]
fn process_gone(pid: u32) -> bool {
    match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
        // State follows the parenthesised command name
        Ok(stat) => stat
            .rsplit_once(')')
            .and_then(|(_, rest)| rest.trim_start().chars().next())
            .is_some_and(|state| state == 'Z' || state == 'X'),
        Err(_) => true,
    }
}

/// Processes started by a shell statement die with the timed-out worker
#[cfg(target_os = "linux")]
#[test]
fn test_timeout_kills_statement_processes() {
    let dir = tempfile::tempdir().unwrap();
    let pid_file = dir.path().join("pid");

    let mut config = executor_config();
    config.engine = benchy::EngineKind::Shell;
    config.timeout = Duration::from_secs(1);
    let executor = IsolatedExecutor::new(config);

    let statement = format!("echo $$ > '{}'; exec sleep 37.123", pid_file.display());
    let outcome = executor.execute(&BenchmarkDefinition::new("", statement).with_ncalls(1));
    assert_eq!(outcome.failure_info().unwrap().kind, FailureKind::Timeout);

    let pid: u32 = std::fs::read_to_string(&pid_file)
        .unwrap()
        .trim()
        .parse()
        .unwrap();
    let deadline = Instant::now() + Duration::from_secs(2);
    while !process_gone(pid) {
        assert!(Instant::now() < deadline, "statement process {pid} outlived the timeout");
        std::thread::sleep(Duration::from_millis(20));
    }
}

/// Two runs of one suite leave one definition row each and two ordered results
#[test]
fn test_suite_history() {
    let dir = tempfile::tempdir().unwrap();
    let suite: LoadedSuite = r#"
        [suite]
        name = "history"

        [[benchmark]]
        name = "add"
        statement = "1 + 1"
        ncalls = 10

        [[benchmark]]
        name = "broken"
        statement = "1 / 0"
    "#
    .parse()
    .unwrap();

    let mut store = ResultStore::open(dir.path().join("results.db")).unwrap();
    let runner = SuiteRunner::new(executor(), 1).with_progress(false);
    for _ in 0..2 {
        runner
            .run(
                &suite.suite.name,
                "",
                suite.suite.benchmarks.clone(),
                None,
                Some(&mut store),
            )
            .unwrap();
    }

    let defs = store.definitions().unwrap();
    let names: Vec<_> = defs.iter().map(|d| d.name.as_str()).collect();
    assert_eq!(names, vec!["add", "broken"]);

    let add = store.results_for(&defs[0].fingerprint).unwrap();
    assert_eq!(add.len(), 2);
    assert!(add[0].timestamp <= add[1].timestamp);
    assert!(add.iter().all(|r| r.is_success() && r.loops == Some(10)));

    let broken = store.results_for(&defs[1].fingerprint).unwrap();
    assert_eq!(broken.len(), 2);
    assert!(broken.iter().all(|r| r.failure_detail.is_some()));
}

/// The binary runs a suite file end to end and prints JSON
#[test]
fn test_cli_run_json() {
    let dir = tempfile::tempdir().unwrap();
    let suite_path = dir.path().join("suite.toml");
    std::fs::write(
        &suite_path,
        r#"
        [suite]
        name = "cli"
        reference = "small"

        [[benchmark]]
        name = "small"
        statement = "l = range(10)"
        ncalls = 100

        [[benchmark]]
        name = "large"
        statement = "l = range(10000)"
        ncalls = 100
        "#,
    )
    .unwrap();
    let db = dir.path().join("cli.db");

    let output = Command::new(BENCHY)
        .current_dir(dir.path())
        .args(["run", "--format", "json", "--db"])
        .arg(&db)
        .arg(&suite_path)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["suite"], "cli");
    assert_eq!(report["reference"], "small");
    let entries = report["entries"].as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["outcome"]["relative_timing"], 1.0);
    assert!(entries[1]["outcome"]["relative_timing"].as_f64().unwrap() > 1.0);

    let list = Command::new(BENCHY)
        .args(["history", "--db"])
        .arg(&db)
        .output()
        .unwrap();
    let text = String::from_utf8_lossy(&list.stdout);
    assert!(text.contains("small") && text.contains("large"), "{text}");
    assert!(text.contains("2 benchmarks recorded."), "{text}");
}

/// A failing benchmark makes the binary exit non-zero
#[test]
fn test_cli_exit_code_on_failure() {
    let dir = tempfile::tempdir().unwrap();
    let suite_path = dir.path().join("suite.toml");
    std::fs::write(
        &suite_path,
        "[suite]\nname = \"bad\"\n\n[[benchmark]]\nname = \"div\"\nstatement = \"1 / 0\"\n",
    )
    .unwrap();

    let status = Command::new(BENCHY)
        .current_dir(dir.path())
        .args(["run", "--format", "json"])
        .arg(&suite_path)
        .status()
        .unwrap();
    assert_eq!(status.code(), Some(1));
}
