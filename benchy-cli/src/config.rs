//! Configuration loading from benchy.toml
//!
//! Benchy configuration can be specified in a `benchy.toml` file in the project root.
//! The configuration is automatically discovered by walking up from the current directory.

use benchy_ipc::{EngineKind, TimingConfig, UnitPolicy};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the configuration file looked up by [`BenchyConfig::discover`]
pub const CONFIG_FILE: &str = "benchy.toml";

/// Benchy configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BenchyConfig {
    /// Runner configuration
    #[serde(default)]
    pub runner: RunnerConfig,
    /// Memory sampling configuration
    #[serde(default)]
    pub memory: MemoryConfig,
    /// Result store configuration
    #[serde(default)]
    pub store: StoreConfig,
    /// Output configuration
    #[serde(default)]
    pub output: OutputConfig,
}

/// Where memory sampling trials run
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum MemoryMode {
    /// All trials inside one worker; a crash loses the whole run
    #[default]
    InPlace,
    /// One fresh worker per trial; a crash loses one trial
    Isolated,
}

/// Runner configuration for benchmark execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Timeout for a single benchmark (e.g., "60s", "5m")
    #[serde(default = "default_timeout")]
    pub timeout: String,
    /// Unit policy: "auto", "s", "ms", "us" or "ns"
    #[serde(default = "default_units")]
    pub units: String,
    /// A calibration trial must last at least this long (e.g., "100ms")
    #[serde(default = "default_min_trial_time")]
    pub min_trial_time: String,
    /// Upper bound on calibration steps
    #[serde(default = "default_max_calibration_steps")]
    pub max_calibration_steps: u32,
    /// Fragment engine: "expr" or "shell"
    #[serde(default)]
    pub engine: EngineKind,
    /// Number of benchmarks run concurrently
    #[serde(default)]
    pub jobs: Option<usize>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            units: default_units(),
            min_trial_time: default_min_trial_time(),
            max_calibration_steps: default_max_calibration_steps(),
            engine: EngineKind::default(),
            jobs: None,
        }
    }
}

fn default_timeout() -> String {
    "60s".to_string()
}
fn default_units() -> String {
    "ms".to_string()
}
fn default_min_trial_time() -> String {
    "100ms".to_string()
}
fn default_max_calibration_steps() -> u32 {
    10
}

/// Memory sampling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Sample peak resident memory after timing
    #[serde(default)]
    pub enabled: bool,
    /// Where the sampling trials run
    #[serde(default)]
    pub mode: MemoryMode,
    /// Number of sampling trials
    #[serde(default = "default_memory_repeat")]
    pub repeat: u32,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            mode: MemoryMode::default(),
            repeat: default_memory_repeat(),
        }
    }
}

fn default_memory_repeat() -> u32 {
    3
}

/// Result store configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StoreConfig {
    /// SQLite database path; results are not persisted when unset
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Default output format: "human" or "json"
    #[serde(default = "default_format")]
    pub format: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: default_format(),
        }
    }
}

fn default_format() -> String {
    "human".to_string()
}

impl BenchyConfig {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Try to discover and load configuration by walking up from current directory
    pub fn discover() -> Option<Self> {
        Self::discover_from(std::env::current_dir().ok()?)
    }

    /// Walk up from `dir` looking for a configuration file
    pub fn discover_from(mut dir: PathBuf) -> Option<Self> {
        loop {
            let config_path = dir.join(CONFIG_FILE);
            if config_path.exists() {
                return match Self::load(&config_path) {
                    Ok(config) => Some(config),
                    Err(e) => {
                        tracing::warn!("ignoring {}: {e}", config_path.display());
                        None
                    }
                };
            }
            if !dir.pop() {
                break;
            }
        }
        None
    }

    /// Per-benchmark timeout
    pub fn timeout(&self) -> anyhow::Result<Duration> {
        Ok(Duration::from_nanos(Self::parse_duration(&self.runner.timeout)?))
    }

    /// Calibration and unit settings sent to workers
    pub fn timing_config(&self) -> anyhow::Result<TimingConfig> {
        let units: UnitPolicy = self
            .runner
            .units
            .parse()
            .map_err(|e: String| anyhow::anyhow!(e))?;
        let config = TimingConfig {
            min_trial_ns: Self::parse_duration(&self.runner.min_trial_time)?,
            max_calibration_steps: self.runner.max_calibration_steps,
            units,
        };
        config.validate().map_err(|e| anyhow::anyhow!(e))?;
        Ok(config)
    }

    /// Generate a default configuration as TOML string
    pub fn default_toml() -> String {
        r#"# Benchy Configuration

[runner]
# Timeout for a single benchmark, including calibration
timeout = "60s"
# Unit policy: auto, s, ms, us or ns
units = "ms"
# Calibration stops at the first loop count whose trial lasts this long
min_trial_time = "100ms"
# Loop counts 1, 10, 100, ... are tried at most this many times
max_calibration_steps = 10
# Fragment engine: expr or shell
engine = "expr"
# Benchmarks run concurrently (distorts timings; uncomment to enable)
# jobs = 4

[memory]
# Sample peak resident memory of each statement
enabled = false
# "in-place" (one worker) or "isolated" (one worker per trial)
mode = "in-place"
repeat = 3

[store]
# SQLite result history (uncomment to enable)
# path = "benchy.db"

[output]
# Default output format: human or json
format = "human"
"#
        .to_string()
    }

    /// Parse duration string (e.g., "3s", "500ms", "2m") to nanoseconds
    pub fn parse_duration(s: &str) -> anyhow::Result<u64> {
        let s = s.trim();
        if s.is_empty() {
            return Err(anyhow::anyhow!("Empty duration string"));
        }

        // Find where the number ends and unit begins
        let (num_part, unit_part) = s
            .char_indices()
            .find(|(_, c)| c.is_alphabetic())
            .map(|(i, _)| s.split_at(i))
            .unwrap_or((s, "s"));

        let value: f64 = num_part
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("Invalid duration number: {}", num_part))?;
        if !value.is_finite() || value < 0.0 {
            return Err(anyhow::anyhow!("Invalid duration: {}", s));
        }

        let multiplier: u64 = match unit_part.to_lowercase().as_str() {
            "ns" => 1,
            "us" | "µs" => 1_000,
            "ms" => 1_000_000,
            "s" | "" => 1_000_000_000,
            "m" | "min" => 60_000_000_000,
            _ => return Err(anyhow::anyhow!("Unknown duration unit: {}", unit_part)),
        };

        Ok((value * multiplier as f64) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use benchy_ipc::TimeUnit;

    #[test]
    fn test_default_config() {
        let config = BenchyConfig::default();
        assert_eq!(config.runner.timeout, "60s");
        assert_eq!(config.runner.engine, EngineKind::Expr);
        assert!(!config.memory.enabled);
        assert_eq!(config.memory.mode, MemoryMode::InPlace);
        assert!(config.store.path.is_none());

        let timing = config.timing_config().unwrap();
        assert_eq!(timing.min_trial_ns, 100_000_000);
        assert_eq!(timing.max_calibration_steps, 10);
        assert_eq!(timing.units, UnitPolicy::Fixed(TimeUnit::Milliseconds));
        assert_eq!(config.timeout().unwrap(), Duration::from_secs(60));
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(BenchyConfig::parse_duration("3s").unwrap(), 3_000_000_000);
        assert_eq!(BenchyConfig::parse_duration("500ms").unwrap(), 500_000_000);
        assert_eq!(BenchyConfig::parse_duration("100us").unwrap(), 100_000);
        assert_eq!(BenchyConfig::parse_duration("1000ns").unwrap(), 1000);
        assert_eq!(BenchyConfig::parse_duration("2m").unwrap(), 120_000_000_000);
        assert_eq!(BenchyConfig::parse_duration("1.5s").unwrap(), 1_500_000_000);
        assert_eq!(BenchyConfig::parse_duration("45").unwrap(), 45_000_000_000);
        assert!(BenchyConfig::parse_duration("").is_err());
        assert!(BenchyConfig::parse_duration("-1s").is_err());
        assert!(BenchyConfig::parse_duration("3 fortnights").is_err());
    }

    #[test]
    fn test_parse_toml() {
        let toml_str = r#"
            [runner]
            units = "auto"
            engine = "shell"

            [memory]
            enabled = true
            mode = "isolated"
        "#;

        let config: BenchyConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.runner.engine, EngineKind::Shell);
        assert_eq!(config.timing_config().unwrap().units, UnitPolicy::Auto);
        assert!(config.memory.enabled);
        assert_eq!(config.memory.mode, MemoryMode::Isolated);
        // Defaults should still apply
        assert_eq!(config.memory.repeat, 3);
        assert_eq!(config.output.format, "human");
    }

    #[test]
    fn test_invalid_timing_config_is_rejected() {
        let mut config = BenchyConfig::default();
        config.runner.max_calibration_steps = 0;
        assert!(config.timing_config().is_err());

        let mut config = BenchyConfig::default();
        config.runner.units = "fortnights".to_string();
        assert!(config.timing_config().is_err());
    }

    #[test]
    fn test_default_toml_parses() {
        let default_toml = BenchyConfig::default_toml();
        let config: BenchyConfig = toml::from_str(&default_toml).unwrap();
        assert_eq!(config.runner.timeout, "60s");
        assert_eq!(config.memory.repeat, 3);
    }

    #[test]
    fn test_discover_walks_up() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            "[store]\npath = \"history.db\"\n",
        )
        .unwrap();
        let nested = dir.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();

        let config = BenchyConfig::discover_from(nested).unwrap();
        assert_eq!(config.store.path, Some(PathBuf::from("history.db")));
    }
}
