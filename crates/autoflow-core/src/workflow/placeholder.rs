//! `${name}` placeholder resolution.
//!
//! A string that is exactly one placeholder resolves to the raw environment
//! value, keeping its type. Placeholders mixed with literal text are
//! substituted textually, with unbound names rendering as empty text.
//! Resolution always builds a new value; step definitions are never mutated.

use std::sync::LazyLock;

use regex::{Captures, Regex};

use autoflow_types::value::Value;

use super::context::Environment;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{\s*([^}]+?)\s*\}").expect("valid placeholder pattern"));

/// If `text` is exactly one placeholder, return the referenced name.
pub fn sole_placeholder(text: &str) -> Option<&str> {
    let caps = PLACEHOLDER.captures(text)?;
    let whole = caps.get(0)?;
    if whole.start() == 0 && whole.end() == text.len() {
        caps.get(1).map(|m| m.as_str())
    } else {
        None
    }
}

/// Whether `text` contains any placeholder.
pub fn has_placeholder(text: &str) -> bool {
    PLACEHOLDER.is_match(text)
}

/// Substitute every placeholder in `text` with the text form of its value.
pub fn render(text: &str, env: &Environment) -> String {
    PLACEHOLDER
        .replace_all(text, |caps: &Captures<'_>| {
            env.lookup(&caps[1]).map(Value::to_text).unwrap_or_default()
        })
        .into_owned()
}

/// Swap each placeholder in an expression for a generated identifier.
///
/// Returns the rewritten expression and the value bound to each identifier.
/// Values never enter the expression text; callers pass them as context.
pub fn bind_placeholders(expression: &str, env: &Environment) -> (String, Vec<(String, Value)>) {
    let mut bindings = Vec::new();
    let rewritten = PLACEHOLDER
        .replace_all(expression, |caps: &Captures<'_>| {
            let name = format!("__placeholder{}", bindings.len());
            let value = env.lookup(&caps[1]).cloned().unwrap_or(Value::Null);
            bindings.push((name.clone(), value));
            name
        })
        .into_owned();
    (rewritten, bindings)
}

/// Resolve a single value. Only text is inspected; everything else is cloned.
pub fn resolve_scalar(value: &Value, env: &Environment) -> Value {
    match value {
        Value::Text(text) => resolve_text(text, env),
        other => other.clone(),
    }
}

fn resolve_text(text: &str, env: &Environment) -> Value {
    if let Some(name) = sole_placeholder(text) {
        return env.lookup(name).cloned().unwrap_or(Value::Null);
    }
    if has_placeholder(text) {
        Value::Text(render(text, env))
    } else {
        Value::Text(text.to_string())
    }
}

/// Resolve placeholders through lists and records, returning a new value.
pub fn resolve_deep(value: &Value, env: &Environment) -> Value {
    match value {
        Value::List(items) => Value::List(items.iter().map(|v| resolve_deep(v, env)).collect()),
        Value::Record(map) => Value::Record(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve_deep(v, env)))
                .collect(),
        ),
        other => resolve_scalar(other, env),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env() -> Environment {
        let mut env = Environment::new();
        env.set("x", Value::Int(42));
        env.set("name", Value::from("Ada"));
        env.set("nothing", Value::Null);
        env.set(
            "page",
            Value::record([("title", Value::from("Home")), ("links", Value::Int(3))]),
        );
        env
    }

    #[test]
    fn test_sole_placeholder_keeps_type() {
        let env = env();
        assert_eq!(resolve_scalar(&Value::from("${x}"), &env), Value::Int(42));
        assert_eq!(
            resolve_scalar(&Value::from("${ page }"), &env),
            env.get("page").cloned().unwrap()
        );
    }

    #[test]
    fn test_sole_placeholder_unbound_is_null() {
        assert_eq!(resolve_scalar(&Value::from("${missing}"), &env()), Value::Null);
    }

    #[test]
    fn test_mixed_text_substitution() {
        let env = env();
        assert_eq!(
            resolve_scalar(&Value::from("hi ${name}, x=${x}"), &env),
            Value::from("hi Ada, x=42")
        );
        assert_eq!(
            resolve_scalar(&Value::from("prefix-${y}-suffix"), &env),
            Value::from("prefix--suffix")
        );
        assert_eq!(
            resolve_scalar(&Value::from("[${nothing}]"), &env),
            Value::from("[]")
        );
    }

    #[test]
    fn test_dotted_path() {
        let env = env();
        assert_eq!(
            resolve_scalar(&Value::from("${page.title}"), &env),
            Value::from("Home")
        );
        assert_eq!(
            resolve_scalar(&Value::from("links: ${page.links}"), &env),
            Value::from("links: 3")
        );
    }

    #[test]
    fn test_two_placeholders_are_not_sole() {
        assert_eq!(sole_placeholder("${a}${b}"), None);
        assert_eq!(sole_placeholder(" ${a}"), None);
        assert_eq!(sole_placeholder("${a}"), Some("a"));
    }

    #[test]
    fn test_non_text_passes_through() {
        let env = env();
        assert_eq!(resolve_scalar(&Value::Int(7), &env), Value::Int(7));
        assert_eq!(resolve_scalar(&Value::Bool(false), &env), Value::Bool(false));
    }

    #[test]
    fn test_resolve_deep_leaves_original_untouched() {
        let env = env();
        let payload = Value::record([
            ("kind", Value::from("type")),
            ("text", Value::from("${name}")),
            (
                "targets",
                Value::List(vec![Value::from("${x}"), Value::from("#${x}")]),
            ),
        ]);
        let before = payload.clone();
        let resolved = resolve_deep(&payload, &env);

        assert_eq!(payload, before);
        assert_eq!(resolved.get("text"), Some(&Value::from("Ada")));
        assert_eq!(
            resolved.get("targets"),
            Some(&Value::List(vec![Value::Int(42), Value::from("#42")]))
        );
    }

    #[test]
    fn test_bind_placeholders_keeps_values_out_of_text() {
        let (text, bindings) = bind_placeholders("${x} > 3 && ${ name } == 'Ada' || ${gone}", &env());
        assert_eq!(
            text,
            "__placeholder0 > 3 && __placeholder1 == 'Ada' || __placeholder2"
        );
        assert_eq!(
            bindings,
            vec![
                ("__placeholder0".to_string(), Value::Int(42)),
                ("__placeholder1".to_string(), Value::from("Ada")),
                ("__placeholder2".to_string(), Value::Null),
            ]
        );
    }

    #[test]
    fn test_text_without_placeholders_is_literal() {
        assert_eq!(
            resolve_scalar(&Value::from("$ {not} a placeholder"), &env()),
            Value::from("$ {not} a placeholder")
        );
    }
}
