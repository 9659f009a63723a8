//! Dynamically-shaped values that flow through a workflow environment.
//!
//! `Value` is a closed sum type: every variable, step output, action payload
//! and script result is one of its variants. It serializes through JSON so
//! definitions stay plain documents, with one extension: an object of the
//! exact shape `{"$handle": {"kind": .., "id": ..}}` is an opaque host handle
//! (e.g. a browser tab reference) rather than a record.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value as Json};

/// JSON key marking an opaque host handle.
pub const HANDLE_KEY: &str = "$handle";

/// A value held in the workflow environment.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "serde_json::Value", into = "serde_json::Value")]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<Value>),
    Record(IndexMap<String, Value>),
    Handle(HostHandle),
}

/// An opaque reference to something owned by the host (a tab, a window).
///
/// The engine never interprets handles; it only carries them between steps.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HostHandle {
    pub kind: String,
    pub id: String,
}

impl Value {
    /// Short name of the variant, used in error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Int(_) | Value::Float(_) => "number",
            Value::Text(_) => "text",
            Value::List(_) => "list",
            Value::Record(_) => "record",
            Value::Handle(_) => "handle",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Float(_))
    }

    /// JavaScript-like truthiness.
    ///
    /// Lists, records and handles are always truthy, even when empty.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0 && !f.is_nan(),
            Value::Text(s) => !s.is_empty(),
            Value::List(_) | Value::Record(_) | Value::Handle(_) => true,
        }
    }

    /// Render the value for textual placeholder substitution.
    pub fn to_text(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => format_float(*f),
            Value::Text(s) => s.clone(),
            Value::Handle(h) => format!("{}:{}", h.kind, h.id),
            Value::List(_) | Value::Record(_) => {
                serde_json::to_string(&self.to_json()).unwrap_or_default()
            }
        }
    }

    /// Numeric view of the value, coercing booleans and numeric text.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Text(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    None
                } else {
                    trimmed.parse::<f64>().ok()
                }
            }
            _ => None,
        }
    }

    /// Integer view of the value. Floats are truncated toward zero.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) if f.is_finite() => Some(f.trunc() as i64),
            Value::Text(s) => {
                let trimmed = s.trim();
                trimmed
                    .parse::<i64>()
                    .ok()
                    .or_else(|| trimmed.parse::<f64>().ok().filter(|f| f.is_finite()).map(|f| f.trunc() as i64))
            }
            Value::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&IndexMap<String, Value>> {
        match self {
            Value::Record(map) => Some(map),
            _ => None,
        }
    }

    /// Look up a field of a record, or an index of a list given as text.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Record(map) => map.get(key),
            Value::List(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        }
    }

    /// Convert to a plain JSON value.
    pub fn to_json(&self) -> Json {
        self.clone().into()
    }

    /// Build a record from key/value pairs.
    pub fn record<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Value::Record(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

fn format_float(f: f64) -> String {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e15 {
        format!("{}", f as i64)
    } else {
        f.to_string()
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

// ---------------------------------------------------------------------------
// JSON conversions
// ---------------------------------------------------------------------------

impl From<Json> for Value {
    fn from(json: Json) -> Self {
        match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(b),
            Json::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Json::String(s) => Value::Text(s),
            Json::Array(items) => Value::List(items.into_iter().map(Value::from).collect()),
            Json::Object(map) => {
                if let Some(handle) = handle_from_object(&map) {
                    return Value::Handle(handle);
                }
                Value::Record(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

fn handle_from_object(map: &Map<String, Json>) -> Option<HostHandle> {
    if map.len() != 1 {
        return None;
    }
    let inner = map.get(HANDLE_KEY)?;
    serde_json::from_value(inner.clone()).ok()
}

impl From<Value> for Json {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(b),
            Value::Int(i) => Json::Number(i.into()),
            Value::Float(f) => Number::from_f64(f).map(Json::Number).unwrap_or(Json::Null),
            Value::Text(s) => Json::String(s),
            Value::List(items) => Json::Array(items.into_iter().map(Json::from).collect()),
            Value::Record(map) => {
                Json::Object(map.into_iter().map(|(k, v)| (k, Json::from(v))).collect())
            }
            Value::Handle(h) => {
                let mut inner = Map::new();
                inner.insert("kind".to_string(), Json::String(h.kind));
                inner.insert("id".to_string(), Json::String(h.id));
                let mut outer = Map::new();
                outer.insert(HANDLE_KEY.to_string(), Json::Object(inner));
                Json::Object(outer)
            }
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<u32> for Value {
    fn from(i: u32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<usize> for Value {
    fn from(i: usize) -> Self {
        i64::try_from(i).map(Value::Int).unwrap_or(Value::Float(i as f64))
    }
}

impl From<u64> for Value {
    fn from(i: u64) -> Self {
        i64::try_from(i).map(Value::Int).unwrap_or(Value::Float(i as f64))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

impl From<IndexMap<String, Value>> for Value {
    fn from(map: IndexMap<String, Value>) -> Self {
        Value::Record(map)
    }
}

impl From<HostHandle> for Value {
    fn from(handle: HostHandle) -> Self {
        Value::Handle(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_integers_stay_integers() {
        let v: Value = serde_json::from_value(json!(42)).unwrap();
        assert_eq!(v, Value::Int(42));
        assert_eq!(serde_json::to_value(&v).unwrap(), json!(42));
    }

    #[test]
    fn test_floats_parse_as_float() {
        let v: Value = serde_json::from_value(json!(1.5)).unwrap();
        assert_eq!(v, Value::Float(1.5));
    }

    #[test]
    fn test_handle_shape_is_recognized() {
        let v: Value =
            serde_json::from_value(json!({ "$handle": { "kind": "tab", "id": "17" } })).unwrap();
        assert_eq!(
            v,
            Value::Handle(HostHandle {
                kind: "tab".to_string(),
                id: "17".to_string()
            })
        );
        assert_eq!(v.to_text(), "tab:17");
        assert_eq!(
            serde_json::to_value(&v).unwrap(),
            json!({ "$handle": { "kind": "tab", "id": "17" } })
        );
    }

    #[test]
    fn test_handle_key_with_siblings_is_a_record() {
        let v: Value = serde_json::from_value(json!({
            "$handle": { "kind": "tab", "id": "1" },
            "other": true
        }))
        .unwrap();
        assert!(matches!(v, Value::Record(_)));
    }

    #[test]
    fn test_record_preserves_insertion_order() {
        let v: Value = serde_json::from_str(r#"{"zeta":1,"alpha":2,"mid":3}"#).unwrap();
        let keys: Vec<&String> = v.as_record().unwrap().keys().collect();
        assert_eq!(keys, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::Int(0).is_truthy());
        assert!(!Value::Float(f64::NAN).is_truthy());
        assert!(!Value::from("").is_truthy());
        assert!(Value::from("0").is_truthy());
        assert!(Value::List(vec![]).is_truthy());
        assert!(Value::Record(IndexMap::new()).is_truthy());
    }

    #[test]
    fn test_text_rendering() {
        assert_eq!(Value::Null.to_text(), "");
        assert_eq!(Value::Float(3.0).to_text(), "3");
        assert_eq!(Value::Float(2.5).to_text(), "2.5");
        assert_eq!(
            Value::List(vec![Value::Int(1), Value::from("a")]).to_text(),
            r#"[1,"a"]"#
        );
    }

    #[test]
    fn test_numeric_coercion() {
        assert_eq!(Value::from(" 12 ").as_f64(), Some(12.0));
        assert_eq!(Value::from("abc").as_f64(), None);
        assert_eq!(Value::from("").as_f64(), None);
        assert_eq!(Value::Bool(true).as_i64(), Some(1));
        assert_eq!(Value::from("7.9").as_i64(), Some(7));
    }

    #[test]
    fn test_get_walks_records_and_lists() {
        let v = Value::record([
            ("bytes", Value::from("abc")),
            ("items", Value::List(vec![Value::Int(5), Value::Int(6)])),
        ]);
        assert_eq!(v.get("bytes"), Some(&Value::from("abc")));
        assert_eq!(
            v.get("items").and_then(|items| items.get("1")),
            Some(&Value::Int(6))
        );
        assert_eq!(v.get("missing"), None);
    }
}
