//! JEXL evaluation for free-form condition strings.
//!
//! Wraps `jexl_eval::Evaluator` with the standard transforms pre-registered.
//! The environment is always passed as the context object, NEVER interpolated
//! into the expression text.

use serde_json::{Value as Json, json};

use super::context::Environment;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ExpressionError {
    #[error("expression evaluation failed: {0}")]
    EvalFailed(String),

    #[error("invalid context: {0}")]
    InvalidContext(String),
}

// ---------------------------------------------------------------------------
// ExpressionEvaluator
// ---------------------------------------------------------------------------

/// JEXL evaluator with string, boolean and length transforms.
///
/// Used for condition strings that are neither a plain variable reference nor
/// a single placeholder, e.g. `count > 3 && status|lower == 'ok'`.
pub struct ExpressionEvaluator {
    evaluator: jexl_eval::Evaluator<'static>,
}

impl ExpressionEvaluator {
    pub fn new() -> Self {
        let evaluator = jexl_eval::Evaluator::new()
            .with_transform("lower", |args: &[Json]| {
                Ok(json!(first_str(args).to_lowercase()))
            })
            .with_transform("upper", |args: &[Json]| {
                Ok(json!(first_str(args).to_uppercase()))
            })
            .with_transform("trim", |args: &[Json]| Ok(json!(first_str(args).trim())))
            .with_transform("split", |args: &[Json]| {
                let delimiter = args.get(1).and_then(|v| v.as_str()).unwrap_or(",");
                let parts: Vec<&str> = first_str(args).split(delimiter).collect();
                Ok(json!(parts))
            })
            .with_transform("not", |args: &[Json]| {
                Ok(json!(!json_truthy(args.first().unwrap_or(&Json::Null))))
            })
            .with_transform("contains", |args: &[Json]| {
                let search = args.get(1).and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(first_str(args).contains(search)))
            })
            .with_transform("startsWith", |args: &[Json]| {
                let prefix = args.get(1).and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(first_str(args).starts_with(prefix)))
            })
            .with_transform("endsWith", |args: &[Json]| {
                let suffix = args.get(1).and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(first_str(args).ends_with(suffix)))
            })
            .with_transform("length", |args: &[Json]| {
                let len = match args.first() {
                    Some(Json::String(s)) => s.chars().count(),
                    Some(Json::Array(a)) => a.len(),
                    Some(Json::Object(o)) => o.len(),
                    _ => 0,
                };
                Ok(json!(len as f64))
            });

        Self { evaluator }
    }

    /// Evaluate an expression and return the raw JSON value.
    pub fn evaluate_value(&self, expression: &str, context: &Json) -> Result<Json, ExpressionError> {
        if !context.is_object() {
            return Err(ExpressionError::InvalidContext(
                "context must be a JSON object".to_string(),
            ));
        }

        self.evaluator
            .eval_in_context(expression, context)
            .map_err(|e| ExpressionError::EvalFailed(e.to_string()))
    }

    /// Evaluate an expression, coercing the result with JavaScript-like truthiness.
    pub fn evaluate_bool(&self, expression: &str, context: &Json) -> Result<bool, ExpressionError> {
        self.evaluate_value(expression, context)
            .map(|result| json_truthy(&result))
    }

    /// Evaluate against the variables of an environment.
    pub fn evaluate_in_environment(
        &self,
        expression: &str,
        env: &Environment,
    ) -> Result<bool, ExpressionError> {
        self.evaluate_bool(expression, &env.to_json())
    }
}

impl Default for ExpressionEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ExpressionEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpressionEvaluator").finish_non_exhaustive()
    }
}

fn first_str(args: &[Json]) -> &str {
    args.first().and_then(|v| v.as_str()).unwrap_or("")
}

fn json_truthy(value: &Json) -> bool {
    match value {
        Json::Bool(b) => *b,
        Json::Null => false,
        Json::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Json::String(s) => !s.is_empty(),
        Json::Array(_) | Json::Object(_) => true,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
