//! In-process expression engine built on `evalexpr`.
//!
//! Fragments are `;`-separated expressions sharing one variable context.
//! A few functions are registered on top of the evalexpr builtins:
//!
//! - `range(n)`: tuple `(0, 1, ..., n - 1)`
//! - `fill(value, n)`: tuple of `n` copies of `value`
//! - `sleep(ms)`: block the thread for `ms` milliseconds
//! - `abort()`: terminate the process immediately

use super::{EngineError, FragmentEngine};
use evalexpr::{
    ContextWithMutableFunctions, EvalexprError, Function, HashMapContext, Node, Value,
    build_operator_tree,
};
use std::time::Duration;

/// Evaluates fragments with `evalexpr`
#[derive(Debug, Default, Clone, Copy)]
pub struct ExprEngine;

impl ExprEngine {
    pub fn new() -> Self {
        Self
    }

    fn context() -> Result<HashMapContext, EvalexprError> {
        let mut context = HashMapContext::new();
        context.set_function("range".into(), Function::new(range))?;
        context.set_function("fill".into(), Function::new(fill))?;
        context.set_function("sleep".into(), Function::new(sleep))?;
        context.set_function("abort".into(), Function::new(abort))?;
        Ok(context)
    }

    fn run(context: &mut HashMapContext, fragment: &str) -> Result<(), EngineError> {
        if fragment.trim().is_empty() {
            return Ok(());
        }
        build_operator_tree(fragment)?.eval_with_context_mut(context)?;
        Ok(())
    }
}

fn non_negative(value: &Value) -> Result<usize, EvalexprError> {
    let n = value.as_int()?;
    usize::try_from(n)
        .map_err(|_| EvalexprError::CustomMessage(format!("expected a non-negative count, got {n}")))
}

fn range(argument: &Value) -> Result<Value, EvalexprError> {
    let n = non_negative(argument)?;
    Ok(Value::Tuple((0..n as i64).map(Value::Int).collect()))
}

fn fill(argument: &Value) -> Result<Value, EvalexprError> {
    let args = argument.as_fixed_len_tuple(2)?;
    let n = non_negative(&args[1])?;
    Ok(Value::Tuple(vec![args[0].clone(); n]))
}

fn abort(_: &Value) -> Result<Value, EvalexprError> {
    std::process::abort()
}

fn sleep(argument: &Value) -> Result<Value, EvalexprError> {
    let ms = argument.as_number()?;
    if !ms.is_finite() || ms < 0.0 {
        return Err(EvalexprError::CustomMessage(format!(
            "sleep duration must be a non-negative number of ms, got {ms}"
        )));
    }
    std::thread::sleep(Duration::from_secs_f64(ms / 1000.0));
    Ok(Value::Empty)
}

impl FragmentEngine for ExprEngine {
    type Env = HashMapContext;
    type Compiled = Node;

    fn prepare(&self, setup: &str) -> Result<Self::Env, EngineError> {
        let mut context = Self::context()?;
        Self::run(&mut context, setup)?;
        Ok(context)
    }

    fn compile(&self, statement: &str) -> Result<Self::Compiled, EngineError> {
        Ok(build_operator_tree(statement)?)
    }

    fn execute(&self, env: &mut Self::Env, statement: &Self::Compiled) -> Result<(), EngineError> {
        statement.eval_with_context_mut(env)?;
        Ok(())
    }

    fn cleanup(&self, env: &mut Self::Env, cleanup: &str) -> Result<(), EngineError> {
        Self::run(env, cleanup)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evalexpr::{Context, ContextWithMutableVariables};

    fn run_once(setup: &str, statement: &str) -> Result<HashMapContext, EngineError> {
        let engine = ExprEngine::new();
        let mut env = engine.prepare(setup)?;
        let compiled = engine.compile(statement)?;
        engine.execute(&mut env, &compiled)?;
        Ok(env)
    }

    #[test]
    fn test_setup_variables_visible_to_statement() {
        let env = run_once("n = 5", "m = n * 2").unwrap();
        assert_eq!(env.get_value("m"), Some(&Value::Int(10)));
    }

    #[test]
    fn test_range_and_fill() {
        let env = run_once("", "r = range(4); f = fill(\"c\", 3)").unwrap();
        assert_eq!(
            env.get_value("r"),
            Some(&Value::Tuple(vec![
                Value::Int(0),
                Value::Int(1),
                Value::Int(2),
                Value::Int(3)
            ]))
        );
        assert_eq!(
            env.get_value("f"),
            Some(&Value::Tuple(vec![Value::String("c".into()); 3]))
        );
    }

    #[test]
    fn test_division_by_zero_fails() {
        let err = run_once("", "x = 1 / 0").unwrap_err();
        assert!(matches!(err, EngineError::Expr(_)));
    }

    #[test]
    fn test_negative_range_fails() {
        assert!(run_once("", "range(-1)").is_err());
    }

    #[test]
    fn test_syntax_error_fails_to_compile() {
        assert!(ExprEngine::new().compile("1 +").is_err());
    }

    #[test]
    fn test_cleanup_sees_environment() {
        let engine = ExprEngine::new();
        let mut env = engine.prepare("x = 1").unwrap();
        engine.cleanup(&mut env, "x = x - 1").unwrap();
        assert_eq!(env.get_value("x"), Some(&Value::Int(0)));
        assert!(engine.cleanup(&mut env, "missing_var + 1").is_err());
    }

    #[test]
    fn test_empty_fragments_are_noops() {
        let engine = ExprEngine::new();
        let mut env = engine.prepare("  ").unwrap();
        env.set_value("y".into(), Value::Int(3)).unwrap();
        engine.cleanup(&mut env, "").unwrap();
        assert_eq!(env.get_value("y"), Some(&Value::Int(3)));
    }
}
