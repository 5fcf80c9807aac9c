//! Fragment engines: how setup, statement and cleanup text gets executed.
//!
//! An engine turns setup text into an environment, compiles the statement
//! once, and then executes the compiled statement against that
//! environment as many times as the timer asks.

mod expr;
mod shell;

pub use expr::ExprEngine;
pub use shell::{ShellEngine, ShellEnv};

use thiserror::Error;

/// Errors raised while running a fragment
#[derive(Debug, Error)]
pub enum EngineError {
    /// The expression language rejected or failed a fragment
    #[error("{0}")]
    Expr(#[from] evalexpr::EvalexprError),

    /// A shell process could not be started
    #[error("failed to spawn shell: {0}")]
    Spawn(#[from] std::io::Error),

    /// A shell fragment exited unsuccessfully
    #[error("{status}: {stderr}")]
    Exit {
        /// Exit status as reported by the OS
        status: String,
        /// Captured standard error, trimmed
        stderr: String,
    },

    /// Output of the setup fragment could not be understood
    #[error("malformed environment: {0}")]
    Environment(String),
}

/// Runs fragments in some language.
pub trait FragmentEngine {
    /// State produced by setup and visible to statement and cleanup
    type Env;
    /// A statement prepared for repeated execution
    type Compiled;

    /// Run the setup fragment and return the resulting environment.
    fn prepare(&self, setup: &str) -> Result<Self::Env, EngineError>;

    /// Prepare the statement once, ahead of timing.
    fn compile(&self, statement: &str) -> Result<Self::Compiled, EngineError>;

    /// Execute the compiled statement once.
    fn execute(&self, env: &mut Self::Env, statement: &Self::Compiled) -> Result<(), EngineError>;

    /// Run the cleanup fragment against the environment.
    fn cleanup(&self, env: &mut Self::Env, cleanup: &str) -> Result<(), EngineError>;
}
