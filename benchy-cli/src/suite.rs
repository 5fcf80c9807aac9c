//! Suite files
//!
//! A suite file is TOML with a `[suite]` table and an array of
//! `[[benchmark]]` tables:
//!
//! ```toml
//! [suite]
//! name = "lists"
//! engine = "expr"        # optional, overrides benchy.toml
//! reference = "fill"     # optional baseline benchmark
//!
//! [[benchmark]]
//! name = "fill"
//! statement = "l = fill(0, 10000)"
//! ```

use benchy_core::{BenchmarkDefinition, BenchmarkSuite};
use benchy_ipc::EngineKind;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors loading a suite file
#[derive(Debug, Error)]
pub enum SuiteError {
    #[error("cannot read suite {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid suite file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid benchmark {0}")]
    InvalidBenchmark(String),

    #[error("reference {0:?} does not name a benchmark in the suite")]
    UnknownReference(String),
}

#[derive(Debug, Deserialize)]
struct SuiteHeader {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    engine: Option<EngineKind>,
    #[serde(default)]
    reference: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SuiteFile {
    suite: SuiteHeader,
    #[serde(default)]
    benchmark: Vec<BenchmarkDefinition>,
}

/// A suite plus the run settings its file carries
#[derive(Debug, Clone)]
pub struct LoadedSuite {
    pub suite: BenchmarkSuite,
    /// Engine requested by the file, if any
    pub engine: Option<EngineKind>,
    /// Baseline benchmark name, if any
    pub reference: Option<String>,
}

impl LoadedSuite {
    /// Read and validate a suite file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SuiteError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| SuiteError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        content.parse()
    }
}

impl std::str::FromStr for LoadedSuite {
    type Err = SuiteError;

    fn from_str(content: &str) -> Result<Self, Self::Err> {
        let file: SuiteFile = toml::from_str(content)?;

        let mut suite = BenchmarkSuite::new(file.suite.name);
        suite.description = file.suite.description;
        for bench in file.benchmark {
            bench.validate().map_err(SuiteError::InvalidBenchmark)?;
            suite.push(bench);
        }

        if let Some(reference) = &file.suite.reference {
            if !suite.benchmarks.iter().any(|b| &b.name == reference) {
                return Err(SuiteError::UnknownReference(reference.clone()));
            }
        }

        Ok(Self {
            suite,
            engine: file.suite.engine,
            reference: file.suite.reference,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTS: &str = r#"
        [suite]
        name = "lists"
        description = "list construction"
        reference = "range"

        [[benchmark]]
        name = "range"
        setup = "n = 10000"
        statement = "l = range(n)"

        [[benchmark]]
        name = "fill"
        statement = "l = fill(0, 10000)"
        cleanup = "l = 0"
        repeat = 5
        ncalls = 20
    "#;

    #[test]
    fn test_load_keeps_file_order() {
        let loaded: LoadedSuite = LISTS.parse().unwrap();
        assert_eq!(loaded.suite.name, "lists");
        assert_eq!(loaded.suite.description, "list construction");
        assert_eq!(loaded.reference.as_deref(), Some("range"));
        assert_eq!(loaded.engine, None);

        let names: Vec<_> = loaded.suite.benchmarks.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["range", "fill"]);

        let fill = &loaded.suite.benchmarks[1];
        assert_eq!(fill.cleanup(), "l = 0");
        assert_eq!(fill.repeat, 5);
        assert_eq!(fill.ncalls, Some(20));
    }

    #[test]
    fn test_engine_override() {
        let loaded: LoadedSuite = "[suite]\nname = \"sh\"\nengine = \"shell\"\n"
            .parse()
            .unwrap();
        assert_eq!(loaded.engine, Some(EngineKind::Shell));
        assert!(loaded.suite.is_empty());
    }

    #[test]
    fn test_rejects_bad_suites() {
        let unknown_ref = "[suite]\nname = \"x\"\nreference = \"nope\"\n";
        assert!(matches!(
            unknown_ref.parse::<LoadedSuite>(),
            Err(SuiteError::UnknownReference(_))
        ));

        let empty_statement = "[suite]\nname = \"x\"\n[[benchmark]]\nstatement = \"  \"\n";
        assert!(matches!(
            empty_statement.parse::<LoadedSuite>(),
            Err(SuiteError::InvalidBenchmark(_))
        ));

        let typo = "[suite]\nname = \"x\"\n[[benchmarks]]\nstatement = \"1\"\n";
        assert!(matches!(typo.parse::<LoadedSuite>(), Err(SuiteError::Parse(_))));
    }

    #[test]
    fn test_load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lists.toml");
        std::fs::write(&path, LISTS).unwrap();
        assert_eq!(LoadedSuite::load(&path).unwrap().suite.len(), 2);

        let missing = LoadedSuite::load(dir.path().join("missing.toml"));
        assert!(matches!(missing, Err(SuiteError::Io { .. })));
    }
}
