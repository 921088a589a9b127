//! JEXL expression evaluator for edge conditions.
//!
//! Wraps `jexl_eval::Evaluator` with a small set of string/collection
//! transforms. Node results are always passed as the context object and are
//! never interpolated into expression strings.

use serde_json::{Value, json};

/// Errors that can occur during expression evaluation.
#[derive(Debug, thiserror::Error)]
pub enum ExpressionError {
    #[error("expression evaluation failed: {0}")]
    EvalFailed(String),

    #[error("invalid context: {0}")]
    InvalidContext(String),
}

fn str_arg(args: &[Value], idx: usize) -> &str {
    args.get(idx).and_then(|v| v.as_str()).unwrap_or("")
}

/// JEXL evaluator with the standard transforms registered.
///
/// Conditions look like `result.score > 0.8`, `next_hint == 'revise'` or
/// `results.review.comments|length == 0`.
pub struct WorkflowEvaluator {
    evaluator: jexl_eval::Evaluator<'static>,
}

impl WorkflowEvaluator {
    pub fn new() -> Self {
        let evaluator = jexl_eval::Evaluator::new()
            .with_transform("lower", |args: &[Value]| {
                Ok(json!(str_arg(args, 0).to_lowercase()))
            })
            .with_transform("upper", |args: &[Value]| {
                Ok(json!(str_arg(args, 0).to_uppercase()))
            })
            .with_transform("trim", |args: &[Value]| Ok(json!(str_arg(args, 0).trim())))
            .with_transform("contains", |args: &[Value]| {
                let found = match args.first() {
                    Some(Value::Array(items)) => args.get(1).is_some_and(|needle| items.contains(needle)),
                    _ => str_arg(args, 0).contains(str_arg(args, 1)),
                };
                Ok(json!(found))
            })
            .with_transform("startsWith", |args: &[Value]| {
                Ok(json!(str_arg(args, 0).starts_with(str_arg(args, 1))))
            })
            .with_transform("endsWith", |args: &[Value]| {
                Ok(json!(str_arg(args, 0).ends_with(str_arg(args, 1))))
            })
            .with_transform("not", |args: &[Value]| {
                Ok(json!(!truthy(args.first().unwrap_or(&Value::Null))))
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

    /// Evaluate an expression and coerce the result with JavaScript-like
    /// truthiness. The context must be a JSON object.
    pub fn evaluate_bool(&self, expression: &str, context: &Value) -> Result<bool, ExpressionError> {
        self.evaluate_value(expression, context)
            .map(|result| truthy(&result))
    }

    /// Evaluate an expression and return the raw JSON value.
    pub fn evaluate_value(&self, expression: &str, context: &Value) -> Result<Value, ExpressionError> {
        if !context.is_object() {
            return Err(ExpressionError::InvalidContext(
                "context must be a JSON object".to_string(),
            ));
        }

        self.evaluator
            .eval_in_context(expression, context)
            .map_err(|e| ExpressionError::EvalFailed(e.to_string()))
    }
}

impl Default for WorkflowEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

/// JavaScript-like truthiness.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::Number(n) => n.as_f64().unwrap_or(0.0) != 0.0,
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
