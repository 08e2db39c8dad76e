//! Conditional step gates (`run_if` / `skip_if`).
//!
//! Gate predicates are evaluated with `jexl_eval`, a sandboxed expression
//! language: comparisons, boolean connectives, dotted field access, literals
//! and a fixed set of transforms. Nothing in an expression can reach the host.
//! Context keys are exposed as top-level variables (`fetch_result.ok == true`).
//!
//! Evaluation failures never reach the scheduler. They are logged as
//! warnings and resolve fail-open: a broken `skip_if` does not skip, a broken
//! `run_if` does not run.

use std::borrow::Cow;
use std::collections::HashMap;

use serde_json::{json, Value};
use stepflow_types::workflow::StepDefinition;

use super::context::to_expression_context;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur during expression evaluation.
#[derive(Debug, thiserror::Error)]
pub enum ExpressionError {
    #[error("expression evaluation failed: {0}")]
    EvalFailed(String),

    #[error("invalid context: {0}")]
    InvalidContext(String),
}

// ---------------------------------------------------------------------------
// GateDecision
// ---------------------------------------------------------------------------

/// Outcome of checking a step's gate against the current context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// No gate, or `run_if` is truthy: the step may be dispatched.
    Run,
    /// `skip_if` is truthy: the step becomes `skipped` and is never dispatched.
    Skip,
    /// `run_if` is falsy: the step stays pending and is re-checked next pass.
    Defer,
}

// ---------------------------------------------------------------------------
// GateEvaluator
// ---------------------------------------------------------------------------

/// JEXL evaluator with the standard transforms registered.
pub struct GateEvaluator {
    evaluator: jexl_eval::Evaluator<'static>,
}

impl GateEvaluator {
    pub fn new() -> Self {
        let evaluator = jexl_eval::Evaluator::new()
            .with_transform("lower", |args: &[Value]| {
                let s = args.first().and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(s.to_lowercase()))
            })
            .with_transform("upper", |args: &[Value]| {
                let s = args.first().and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(s.to_uppercase()))
            })
            .with_transform("trim", |args: &[Value]| {
                let s = args.first().and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(s.trim()))
            })
            .with_transform("contains", |args: &[Value]| {
                let found = match (args.first(), args.get(1)) {
                    (Some(Value::String(s)), Some(Value::String(needle))) => s.contains(needle.as_str()),
                    (Some(Value::Array(items)), Some(needle)) => items.contains(needle),
                    _ => false,
                };
                Ok(json!(found))
            })
            .with_transform("startsWith", |args: &[Value]| {
                let subject = args.first().and_then(|v| v.as_str()).unwrap_or("");
                let prefix = args.get(1).and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(subject.starts_with(prefix)))
            })
            .with_transform("endsWith", |args: &[Value]| {
                let subject = args.first().and_then(|v| v.as_str()).unwrap_or("");
                let suffix = args.get(1).and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(subject.ends_with(suffix)))
            })
            .with_transform("length", |args: &[Value]| {
                let len = match args.first() {
                    Some(Value::String(s)) => s.chars().count(),
                    Some(Value::Array(a)) => a.len(),
                    Some(Value::Object(o)) => o.len(),
                    _ => 0,
                };
                Ok(json!(len as f64))
            });

        Self { evaluator }
    }

    /// Evaluate an expression to a boolean using JavaScript-like truthiness.
    ///
    /// `===` and `!==` are accepted as aliases for `==` and `!=`.
    pub fn evaluate_bool(&self, expression: &str, context: &Value) -> Result<bool, ExpressionError> {
        if !context.is_object() {
            return Err(ExpressionError::InvalidContext(
                "context must be a JSON object".to_string(),
            ));
        }

        let expression = normalize_operators(expression);
        let result = self
            .evaluator
            .eval_in_context(&expression, context)
            .map_err(|e| ExpressionError::EvalFailed(e.to_string()))?;

        Ok(truthy(&result))
    }

    /// Decide whether a pending step may be dispatched.
    ///
    /// `skip_if` is checked first and wins over `run_if`.
    pub fn should_run(&self, step: &StepDefinition, context: &HashMap<String, Value>) -> GateDecision {
        let Some(conditions) = &step.conditions else {
            return GateDecision::Run;
        };
        if conditions.skip_if.is_none() && conditions.run_if.is_none() {
            return GateDecision::Run;
        }

        let expr_ctx = to_expression_context(context);

        if let Some(skip_if) = &conditions.skip_if {
            if self.evaluate_or_warn(&step.id, "skip_if", skip_if, &expr_ctx) {
                return GateDecision::Skip;
            }
        }

        match &conditions.run_if {
            Some(run_if) if !self.evaluate_or_warn(&step.id, "run_if", run_if, &expr_ctx) => GateDecision::Defer,
            _ => GateDecision::Run,
        }
    }

    fn evaluate_or_warn(&self, step_id: &str, gate: &str, expression: &str, context: &Value) -> bool {
        match self.evaluate_bool(expression, context) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(
                    step_id,
                    gate,
                    expression,
                    error = %e,
                    "gate expression failed to evaluate, treating as false"
                );
                false
            }
        }
    }
}

impl Default for GateEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for GateEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GateEvaluator").finish_non_exhaustive()
    }
}

/// Coerce a JSON value to boolean using JavaScript-like truthiness.
fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Rewrite `===` / `!==` to `==` / `!=` outside of string literals.
fn normalize_operators(expression: &str) -> Cow<'_, str> {
    if !expression.contains("==") {
        return Cow::Borrowed(expression);
    }

    let mut out = String::with_capacity(expression.len());
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut chars = expression.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if let Some(q) = quote {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }

        match c {
            '\'' | '"' => {
                quote = Some(c);
                out.push(c);
            }
            '=' | '!' if expression[i + 1..].starts_with("==") => {
                out.push(c);
                out.push('=');
                // Drop the third character of the strict operator.
                chars.next();
                chars.next();
            }
            _ => out.push(c),
        }
    }

    Cow::Owned(out)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
