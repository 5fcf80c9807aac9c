//! Shell engine: every fragment is a `sh -c` script.
//!
//! Setup runs once with `set -a`, so every variable it assigns is exported;
//! the resulting environment is captured and handed to each statement and
//! to cleanup. A fragment fails when its shell exits non-zero.

use super::{EngineError, FragmentEngine};
use std::process::{Command, Output, Stdio};

const SHELL: &str = "sh";

/// Runs fragments with `sh -c`
#[derive(Debug, Default, Clone, Copy)]
pub struct ShellEngine;

/// Variables exported by the setup fragment
#[derive(Debug, Clone, Default)]
pub struct ShellEnv {
    vars: Vec<(String, String)>,
}

impl ShellEnv {
    /// Look up an exported variable
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

impl ShellEngine {
    pub fn new() -> Self {
        Self
    }

    fn run(env: &ShellEnv, script: &str) -> Result<Output, EngineError> {
        let output = Command::new(SHELL)
            .arg("-c")
            .arg(script)
            .env_clear()
            .envs(env.vars.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()?;
        check(output)
    }
}

fn check(output: Output) -> Result<Output, EngineError> {
    if output.status.success() {
        Ok(output)
    } else {
        Err(EngineError::Exit {
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

fn parse_env(raw: &[u8]) -> Result<ShellEnv, EngineError> {
    let mut vars = Vec::new();
    for entry in raw.split(|&b| b == 0).filter(|e| !e.is_empty()) {
        let entry = String::from_utf8_lossy(entry);
        let (key, value) = entry
            .split_once('=')
            .ok_or_else(|| EngineError::Environment(format!("entry without '=': {entry:?}")))?;
        vars.push((key.to_string(), value.to_string()));
    }
    Ok(ShellEnv { vars })
}

impl FragmentEngine for ShellEngine {
    type Env = ShellEnv;
    type Compiled = String;

    fn prepare(&self, setup: &str) -> Result<Self::Env, EngineError> {
        // Setup output goes to stderr so stdout carries only the environment
        let script = if setup.trim().is_empty() {
            "env -0".to_string()
        } else {
            format!("set -a\n{{ {setup}\n}} >&2 && env -0")
        };
        let output = Command::new(SHELL)
            .arg("-c")
            .arg(script)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()?;
        parse_env(&check(output)?.stdout)
    }

    fn compile(&self, statement: &str) -> Result<Self::Compiled, EngineError> {
        Ok(statement.to_string())
    }

    fn execute(&self, env: &mut Self::Env, statement: &Self::Compiled) -> Result<(), EngineError> {
        Self::run(env, statement).map(|_| ())
    }

    fn cleanup(&self, env: &mut Self::Env, cleanup: &str) -> Result<(), EngineError> {
        if cleanup.trim().is_empty() {
            return Ok(());
        }
        Self::run(env, cleanup).map(|_| ())
    }
}
