//! Output Formatting
//!
//! Terminal table and JSON renderings of a [`SuiteReport`], plus the
//! history listing used by `benchy history`.

use super::runner::SuiteReport;
use benchy_core::{MEMORY_UNITS, OutcomeStatus};
use benchy_store::{ResultRecord, StoredDefinition};

/// Output format for a suite report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Aligned terminal table
    #[default]
    Human,
    /// Pretty-printed JSON
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "human" => Ok(OutputFormat::Human),
            "json" => Ok(OutputFormat::Json),
            other => Err(format!("Unknown output format: {}", other)),
        }
    }
}

/// Four significant digits, trailing zeros dropped (like `%.4g` without
/// the exponent form).
fn significant(value: f64) -> String {
    if value == 0.0 || !value.is_finite() {
        return value.to_string();
    }
    let magnitude = value.abs().log10().floor() as i32;
    let decimals = (3 - magnitude).max(0) as usize;
    let text = format!("{value:.decimals$}");
    if text.contains('.') {
        text.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        text
    }
}

/// Render a report in the requested format
pub fn format_report(report: &SuiteReport, format: OutputFormat) -> anyhow::Result<String> {
    Ok(match format {
        OutputFormat::Human => format_human_output(report),
        OutputFormat::Json => {
            let mut json = serde_json::to_string_pretty(report)?;
            json.push('\n');
            json
        }
    })
}

/// Format a report for human-readable terminal display
pub fn format_human_output(report: &SuiteReport) -> String {
    let mut output = String::new();

    output.push('\n');
    output.push_str(&format!("Suite: {}\n", report.suite));
    if !report.description.is_empty() {
        output.push_str(&format!("{}\n", report.description));
    }
    output.push_str(&"=".repeat(72));
    output.push('\n');

    let names: Vec<String> = report
        .entries
        .iter()
        .map(|e| e.definition.display_name())
        .collect();
    let width = names.iter().map(|n| n.len()).max().unwrap_or(9).max(9);

    output.push_str(&format!(
        "  {:<width$}  {:>14}  {:>9}  {:>14}  {:>10}\n",
        "Benchmark", "Timing", "Relative", "Loops x Rep", "Memory"
    ));
    output.push_str(&format!("  {}\n", "-".repeat(width + 57)));

    for (entry, name) in report.entries.iter().zip(&names) {
        let outcome = &entry.outcome.outcome;
        match &outcome.status {
            OutcomeStatus::Success(timing) => {
                let relative = entry
                    .outcome
                    .relative_timing
                    .map(|r| format!("{r:.2}x"))
                    .unwrap_or_else(|| "-".to_string());
                let memory = match (&outcome.memory, &outcome.memory_failure) {
                    (Some(m), _) => format!("{:.2} {MEMORY_UNITS}", m.usage),
                    (None, Some(_)) => "n/a".to_string(),
                    (None, None) => String::new(),
                };
                output.push_str(&format!(
                    "  {:<width$}  {:>14}  {:>9}  {:>14}  {:>10}\n",
                    name,
                    format!("{} {}", significant(timing.timing), timing.units),
                    relative,
                    format!("{} x {}", timing.loops, timing.repeat),
                    memory,
                ));
            }
            OutcomeStatus::Failure(failure) => {
                output.push_str(&format!(
                    "  {:<width$}  FAILED ({})\n",
                    name, failure.kind
                ));
                for line in failure.detail.lines().take(5) {
                    output.push_str(&format!("      {line}\n"));
                }
            }
        }

        if let Some(failure) = &outcome.memory_failure {
            output.push_str(&format!("      memory: {}\n", failure.detail.lines().next().unwrap_or("")));
        }
        if let Some(diagnostics) = &outcome.diagnostics {
            for line in diagnostics.lines().take(3) {
                output.push_str(&format!("      note: {line}\n"));
            }
        }
    }

    let failed = report.failures();
    output.push('\n');
    output.push_str(&format!(
        "{} benchmarks, {} succeeded, {} failed\n",
        report.entries.len(),
        report.entries.len() - failed,
        failed
    ));
    output
}

/// Format stored definitions, one per line
pub fn format_definitions(definitions: &[StoredDefinition]) -> String {
    let mut output = String::new();
    for def in definitions {
        output.push_str(&format!("{}  {}\n", def.fingerprint, def.name));
    }
    output.push_str(&format!("{} benchmarks recorded.\n", definitions.len()));
    output
}

/// Format the history of one benchmark, oldest first
pub fn format_history(definition: &StoredDefinition, records: &[ResultRecord]) -> String {
    let mut output = format!("{} ({})\n", definition.name, definition.fingerprint.short());
    for record in records {
        let when = record.timestamp.format("%Y-%m-%d %H:%M:%S");
        match (record.timing, record.units) {
            (Some(timing), Some(units)) => output.push_str(&format!(
                "  {when}  {} {units}  ({} x {})\n",
                significant(timing),
                record.loops.unwrap_or_default(),
                record.trial_count
            )),
            _ => output.push_str(&format!(
                "  {when}  FAILED: {}\n",
                record
                    .failure_detail
                    .as_deref()
                    .and_then(|d| d.lines().next())
                    .unwrap_or("")
            )),
        }
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::SuiteEntry;
    use benchy_core::{BenchmarkDefinition, Failure, FailureKind, RawOutcome, TimeUnit, Timing};
    use benchy_stats::AnnotatedOutcome;
    use chrono::Utc;

    fn report() -> SuiteReport {
        let fast = BenchmarkDefinition::new("", "1 + 1").with_name("fast");
        let broken = BenchmarkDefinition::new("", "1 / 0").with_name("broken");
        SuiteReport {
            suite: "demo".to_string(),
            description: String::new(),
            timestamp: Utc::now(),
            reference: None,
            entries: vec![
                SuiteEntry {
                    outcome: AnnotatedOutcome {
                        outcome: RawOutcome::success(
                            fast.fingerprint(),
                            Timing {
                                loops: 1000,
                                repeat: 3,
                                timing: 0.0123,
                                units: TimeUnit::Milliseconds,
                            },
                        ),
                        relative_timing: Some(1.0),
                    },
                    definition: fast,
                },
                SuiteEntry {
                    outcome: AnnotatedOutcome::unannotated(RawOutcome::failure(
                        broken.fingerprint(),
                        Failure::new(FailureKind::Statement, "Division by zero"),
                    )),
                    definition: broken,
                },
            ],
        }
    }

    #[test]
    fn test_human_output() {
        let text = format_human_output(&report());
        assert!(text.contains("Suite: demo"));
        assert!(text.contains("0.0123 ms"));
        assert!(text.contains("1.00x"));
        assert!(text.contains("1000 x 3"));
        assert!(text.contains("broken"));
        assert!(text.contains("FAILED (statement failure)"));
        assert!(text.contains("Division by zero"));
        assert!(text.contains("2 benchmarks, 1 succeeded, 1 failed"));
    }

    #[test]
    fn test_json_output() {
        let json = format_report(&report(), OutputFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        let entries = value["entries"].as_array().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0]["definition"]["name"], "fast");
        assert_eq!(entries[0]["outcome"]["status"], "success");
        assert_eq!(entries[0]["outcome"]["relative_timing"], 1.0);
        assert_eq!(entries[1]["outcome"]["status"], "failure");
        assert_eq!(entries[1]["outcome"]["detail"], "Division by zero");
        assert!(entries[1]["outcome"].get("relative_timing").is_none());
    }

    #[test]
    fn test_significant_digits() {
        assert_eq!(significant(0.0123), "0.0123");
        assert_eq!(significant(0.00004567), "0.00004567");
        assert_eq!(significant(12.34567), "12.35");
        assert_eq!(significant(1500.0), "1500");
        assert_eq!(significant(2.5), "2.5");
        assert_eq!(significant(0.0), "0");
    }

    #[test]
    fn test_fast_statement_is_not_rounded_to_zero() {
        let mut report = report();
        if let OutcomeStatus::Success(timing) = &mut report.entries[0].outcome.outcome.status {
            timing.timing = 0.00003125;
        }
        let text = format_human_output(&report);
        assert!(text.contains("0.00003125 ms"), "{text}");
        assert!(!text.contains("0.0000 ms"));
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("JSON".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert!("html".parse::<OutputFormat>().is_err());
    }
}
