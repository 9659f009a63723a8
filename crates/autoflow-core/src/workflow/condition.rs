//! Condition evaluation for `condition` steps and `while` loops.
//!
//! A condition is a boolean literal, a string, or a structured
//! `{left, operator, right}` comparison. Strings naming a variable (or a
//! dotted path) test its truthiness; a string that is exactly one placeholder
//! tests the resolved value; anything else is handed to JEXL, with any
//! placeholders bound as context variables.

use std::cmp::Ordering;
use std::sync::LazyLock;

use regex::Regex;

use autoflow_types::value::Value;
use autoflow_types::workflow::ConditionExpr;

use super::context::Environment;
use super::expression::ExpressionEvaluator;
use super::placeholder::{bind_placeholders, has_placeholder, resolve_scalar, sole_placeholder};

static IDENTIFIER_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_$][A-Za-z0-9_$]*(\.[A-Za-z0-9_$]+)*$").expect("valid identifier pattern")
});

/// Operators accepted in structured comparisons.
pub const OPERATORS: &[&str] = &[
    "==", "===", "!=", "!==", ">", ">=", "<", "<=", "contains", "matches",
];

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConditionError {
    #[error("invalid expression: {0}")]
    InvalidExpression(String),
}

/// Evaluates `ConditionExpr`s against an environment.
///
/// The JEXL evaluator is not `Send`, so one is built per expression.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConditionEvaluator;

impl ConditionEvaluator {
    pub fn new() -> Self {
        Self
    }

    pub fn evaluate(&self, condition: &ConditionExpr, env: &Environment) -> Result<bool, ConditionError> {
        match condition {
            ConditionExpr::Literal(b) => Ok(*b),
            ConditionExpr::Expression(text) => self.evaluate_text(text, env),
            ConditionExpr::Compare {
                left,
                operator,
                right,
            } => {
                let left = resolve_scalar(left, env);
                let right = resolve_scalar(right, env);
                compare(&left, operator, &right)
            }
        }
    }

    fn evaluate_text(&self, text: &str, env: &Environment) -> Result<bool, ConditionError> {
        let text = text.trim();
        match text {
            "" | "false" | "null" => return Ok(false),
            "true" => return Ok(true),
            _ => {}
        }
        if let Some(name) = sole_placeholder(text) {
            return Ok(env.lookup(name).is_some_and(Value::is_truthy));
        }
        if IDENTIFIER_PATH.is_match(text) {
            return Ok(env.lookup(text).is_some_and(Value::is_truthy));
        }
        if has_placeholder(text) {
            let (expression, bindings) = bind_placeholders(text, env);
            let mut context = env.to_json();
            if let Some(vars) = context.as_object_mut() {
                for (name, value) in bindings {
                    vars.insert(name, value.to_json());
                }
            }
            return ExpressionEvaluator::new()
                .evaluate_bool(&expression, &context)
                .map_err(|e| ConditionError::InvalidExpression(format!("{text}: {e}")));
        }
        ExpressionEvaluator::new()
            .evaluate_in_environment(text, env)
            .map_err(|e| ConditionError::InvalidExpression(format!("{text}: {e}")))
    }
}

/// Apply a comparison operator to two resolved operands.
pub fn compare(left: &Value, operator: &str, right: &Value) -> Result<bool, ConditionError> {
    let outcome = match operator {
        "==" => loose_eq(left, right),
        "!=" => !loose_eq(left, right),
        "===" => strict_eq(left, right),
        "!==" => !strict_eq(left, right),
        ">" => ordering(left, right).is_some_and(Ordering::is_gt),
        ">=" => ordering(left, right).is_some_and(Ordering::is_ge),
        "<" => ordering(left, right).is_some_and(Ordering::is_lt),
        "<=" => ordering(left, right).is_some_and(Ordering::is_le),
        "contains" => contains(left, right),
        "matches" => {
            let pattern = right.to_text();
            let re = Regex::new(&pattern).map_err(|e| {
                ConditionError::InvalidExpression(format!("bad pattern '{pattern}': {e}"))
            })?;
            re.is_match(&left.to_text())
        }
        other => {
            return Err(ConditionError::InvalidExpression(format!(
                "unknown operator '{other}', expected one of: {}",
                OPERATORS.join(", ")
            )));
        }
    };
    Ok(outcome)
}

/// Coercive equality.
///
/// Numbers compare numerically with numeric text and booleans (as 1/0);
/// null equals only null; collections fall back to strict equality.
pub fn loose_eq(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::Text(a), Value::Text(b)) => a == b,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (
            Value::Int(_) | Value::Float(_) | Value::Text(_) | Value::Bool(_),
            Value::Int(_) | Value::Float(_) | Value::Text(_) | Value::Bool(_),
        ) => match (left.as_f64(), right.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        },
        (Value::List(_) | Value::Record(_) | Value::Handle(_), Value::Text(text))
        | (Value::Text(text), Value::List(_) | Value::Record(_) | Value::Handle(_)) => {
            let other = if matches!(left, Value::Text(_)) { right } else { left };
            other.to_text() == *text
        }
        _ => strict_eq(left, right),
    }
}

/// Equality without coercion. `Int` and `Float` count as one numeric kind.
pub fn strict_eq(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => a == b,
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
            left.as_f64() == right.as_f64()
        }
        (Value::List(a), Value::List(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| strict_eq(x, y))
        }
        (Value::Record(a), Value::Record(b)) => {
            a.len() == b.len()
                && a.iter()
                    .all(|(k, v)| b.get(k).is_some_and(|other| strict_eq(v, other)))
        }
        _ => left == right,
    }
}

/// Numeric when both sides coerce to numbers, lexicographic when both are
/// text, otherwise unordered.
fn ordering(left: &Value, right: &Value) -> Option<Ordering> {
    if !left.is_null() && !right.is_null() {
        if let (Some(a), Some(b)) = (left.as_f64(), right.as_f64()) {
            return a.partial_cmp(&b);
        }
    }
    match (left, right) {
        (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn contains(haystack: &Value, needle: &Value) -> bool {
    if let Value::List(items) = haystack {
        if items.iter().any(|item| loose_eq(item, needle)) {
            return true;
        }
    }
    haystack.to_text().contains(&needle.to_text())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env() -> Environment {
        let mut env = Environment::new();
        env.set("count", Value::Int(5));
        env.set("zero", Value::Int(0));
        env.set("title", Value::from("Order #1234 confirmed"));
        env.set("flags", Value::record([("ready", Value::Bool(true))]));
        env
    }

    fn cmp(left: impl Into<Value>, op: &str, right: impl Into<Value>) -> bool {
        compare(&left.into(), op, &right.into()).unwrap()
    }

    #[test]
    fn test_literal_and_truthiness() {
        let eval = ConditionEvaluator::new();
        let env = env();
        assert!(eval.evaluate(&ConditionExpr::Literal(true), &env).unwrap());
        assert!(eval
            .evaluate(&ConditionExpr::Expression("count".to_string()), &env)
            .unwrap());
        assert!(!eval
            .evaluate(&ConditionExpr::Expression("zero".to_string()), &env)
            .unwrap());
        assert!(!eval
            .evaluate(&ConditionExpr::Expression("missing".to_string()), &env)
            .unwrap());
        assert!(eval
            .evaluate(&ConditionExpr::Expression("flags.ready".to_string()), &env)
            .unwrap());
        assert!(eval
            .evaluate(&ConditionExpr::Expression("${count}".to_string()), &env)
            .unwrap());
    }

    #[test]
    fn test_jexl_fallback() {
        let eval = ConditionEvaluator::new();
        let env = env();
        assert!(eval
            .evaluate(&ConditionExpr::Expression("count > 3 && count < 10".to_string()), &env)
            .unwrap());
        assert!(!eval
            .evaluate(&ConditionExpr::Expression("count == 6".to_string()), &env)
            .unwrap());
    }

    #[test]
    fn test_jexl_with_embedded_placeholders() {
        let eval = ConditionEvaluator::new();
        let env = env();
        let holds = |text: &str| {
            eval.evaluate(&ConditionExpr::Expression(text.to_string()), &env)
                .unwrap()
        };
        assert!(holds("${count} > 3"));
        assert!(!holds("${count} > 10"));
        assert!(holds("${flags.ready} && ${count} == 5"));
        assert!(holds("${title}|lower|contains('order')"));
    }

    #[test]
    fn test_structured_comparison_resolves_placeholders() {
        let eval = ConditionEvaluator::new();
        let env = env();
        let cond = ConditionExpr::compare("${count}", ">=", 5);
        assert!(eval.evaluate(&cond, &env).unwrap());
        let cond = ConditionExpr::compare("${title}", "matches", r"#\d{4}");
        assert!(eval.evaluate(&cond, &env).unwrap());
    }

    #[test]
    fn test_unknown_operator_is_invalid_expression() {
        let err = compare(&Value::Int(1), "~=", &Value::Int(1)).unwrap_err();
        let ConditionError::InvalidExpression(message) = err;
        assert!(message.contains("'~='"));
        assert!(message.contains("contains, matches"));
    }

    #[test]
    fn test_bad_regex_is_invalid_expression() {
        let err = compare(&Value::from("abc"), "matches", &Value::from("(")).unwrap_err();
        assert!(matches!(err, ConditionError::InvalidExpression(_)));
    }

    #[test]
    fn test_loose_equality_coerces() {
        assert!(cmp(42, "==", "42"));
        assert!(cmp(1, "==", true));
        assert!(cmp(2.0, "==", 2));
        assert!(!cmp("abc", "==", 0));
        assert!(!cmp(Value::Null, "==", 0));
        assert!(cmp(Value::Null, "==", Value::Null));
        assert!(cmp(42, "!=", "43"));
    }

    #[test]
    fn test_strict_equality_requires_same_kind() {
        assert!(!cmp(42, "===", "42"));
        assert!(cmp(42, "===", 42.0));
        assert!(cmp("a", "===", "a"));
        assert!(cmp(1, "!==", true));
    }

    #[test]
    fn test_ordering() {
        assert!(cmp(10, ">", 9));
        assert!(cmp("10", ">", 9));
        assert!(cmp("b", ">", "a"));
        assert!(cmp(3, "<=", 3));
        assert!(!cmp("abc", "<", 5));
        assert!(!cmp(Value::Null, "<", 5));
    }

    #[test]
    fn test_contains() {
        assert!(cmp("hello world", "contains", "lo w"));
        assert!(!cmp("hello", "contains", "xyz"));
        assert!(cmp(
            Value::List(vec![Value::Int(1), Value::Int(2)]),
            "contains",
            2
        ));
        assert!(cmp(12345, "contains", 234));
    }
}
