//! The variable environment that flows through one workflow execution.
//!
//! `Environment` is an ordered key/value store. It is owned by a single run
//! and never shared by reference: parallel branches and sub-workflows work on
//! their own copies and hand results back by value.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use autoflow_types::value::Value;

// ---------------------------------------------------------------------------
// Reserved keys
// ---------------------------------------------------------------------------

pub const TARGET_ID: &str = "_targetId";
pub const WORKFLOW_ID: &str = "_workflowId";
pub const EXECUTION_ID: &str = "_executionId";
pub const LOOP_INDEX: &str = "_loopIndex";
pub const BRANCH_INDEX: &str = "_branchIndex";
pub const SUB_WORKFLOW_RESULT: &str = "_subWorkflowResult";

/// Keys managed by the engine.
pub const RESERVED_KEYS: &[&str] = &[
    TARGET_ID,
    WORKFLOW_ID,
    EXECUTION_ID,
    LOOP_INDEX,
    BRANCH_INDEX,
    SUB_WORKFLOW_RESULT,
];

pub fn is_reserved(key: &str) -> bool {
    RESERVED_KEYS.contains(&key)
}

/// Identity of the run an environment belongs to.
///
/// Stamped into the environment before every step dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct RunIdentity {
    pub workflow_id: String,
    pub execution_id: Uuid,
    pub target_ref: Option<Value>,
}

impl RunIdentity {
    pub fn new(workflow_id: impl Into<String>, target_ref: Option<Value>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            execution_id: Uuid::now_v7(),
            target_ref,
        }
    }
}

// ---------------------------------------------------------------------------
// Environment
// ---------------------------------------------------------------------------

/// Mutable variable mapping for one execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Environment {
    vars: IndexMap<String, Value>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from definition defaults, with `overrides` winning on conflict.
    pub fn seed(
        defaults: &IndexMap<String, Value>,
        overrides: &IndexMap<String, Value>,
    ) -> Self {
        let mut vars = defaults.clone();
        for (key, value) in overrides {
            vars.insert(key.clone(), value.clone());
        }
        Self { vars }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.vars.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.vars.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.vars.shift_remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.vars.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.vars.iter()
    }

    /// Resolve a bare name, or a dotted path through records and lists.
    ///
    /// A key that itself contains dots wins over path traversal.
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        if let Some(value) = self.vars.get(path) {
            return Some(value);
        }
        let mut segments = path.split('.');
        let head = segments.next()?;
        let mut current = self.vars.get(head)?;
        for segment in segments {
            current = current.get(segment)?;
        }
        Some(current)
    }

    /// Write the run identity into the reserved keys.
    pub fn stamp(&mut self, identity: &RunIdentity) {
        self.vars.insert(
            TARGET_ID.to_string(),
            identity.target_ref.clone().unwrap_or(Value::Null),
        );
        self.vars.insert(
            WORKFLOW_ID.to_string(),
            Value::Text(identity.workflow_id.clone()),
        );
        self.vars.insert(
            EXECUTION_ID.to_string(),
            Value::Text(identity.execution_id.to_string()),
        );
    }

    /// Shallow copy for a parallel branch, tagged with its index.
    pub fn fork_branch(&self, index: usize) -> Self {
        let mut fork = self.clone();
        fork.set(BRANCH_INDEX, Value::from(index));
        fork
    }

    /// Apply the full variable map a script handed back.
    ///
    /// Keys present are written; user keys missing from `vars` are removed.
    /// Reserved keys are never removed.
    pub fn replace_user_variables(&mut self, vars: IndexMap<String, Value>) {
        self.vars
            .retain(|key, _| is_reserved(key) || vars.contains_key(key));
        for (key, value) in vars {
            self.vars.insert(key, value);
        }
    }

    /// User-visible variables, without reserved keys.
    pub fn user_variables(&self) -> IndexMap<String, Value> {
        self.vars
            .iter()
            .filter(|(key, _)| !is_reserved(key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    pub fn as_map(&self) -> &IndexMap<String, Value> {
        &self.vars
    }

    pub fn into_map(self) -> IndexMap<String, Value> {
        self.vars
    }

    /// The environment as a JSON object, for expression evaluation.
    pub fn to_json(&self) -> serde_json::Value {
        Value::Record(self.vars.clone()).to_json()
    }
}

impl From<IndexMap<String, Value>> for Environment {
    fn from(vars: IndexMap<String, Value>) -> Self {
        Self { vars }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> RunIdentity {
        RunIdentity::new("checkout", Some(Value::from("tab-7")))
    }

    #[test]
    fn test_seed_overrides_win() {
        let mut defaults = IndexMap::new();
        defaults.insert("url".to_string(), Value::from("https://a.example"));
        defaults.insert("retries".to_string(), Value::Int(1));
        let mut overrides = IndexMap::new();
        overrides.insert("url".to_string(), Value::from("https://b.example"));

        let env = Environment::seed(&defaults, &overrides);
        assert_eq!(env.get("url"), Some(&Value::from("https://b.example")));
        assert_eq!(env.get("retries"), Some(&Value::Int(1)));
        assert_eq!(env.len(), 2);
    }

    #[test]
    fn test_lookup_dotted_path() {
        let mut env = Environment::new();
        env.set(
            "shot",
            Value::record([("bytes", Value::from("iVBOR")), ("w", Value::Int(800))]),
        );
        env.set("urls", Value::List(vec![Value::from("a"), Value::from("b")]));

        assert_eq!(env.lookup("shot.bytes"), Some(&Value::from("iVBOR")));
        assert_eq!(env.lookup("urls.1"), Some(&Value::from("b")));
        assert_eq!(env.lookup("shot.height"), None);
        assert_eq!(env.lookup("nothing"), None);
    }

    #[test]
    fn test_lookup_prefers_literal_dotted_key() {
        let mut env = Environment::new();
        env.set("a.b", Value::Int(1));
        env.set("a", Value::record([("b", Value::Int(2))]));
        assert_eq!(env.lookup("a.b"), Some(&Value::Int(1)));
    }

    #[test]
    fn test_stamp_overwrites_user_writes() {
        let id = identity();
        let mut env = Environment::new();
        env.set(WORKFLOW_ID, "hijacked");
        env.stamp(&id);
        assert_eq!(env.get(WORKFLOW_ID), Some(&Value::from("checkout")));
        assert_eq!(env.get(TARGET_ID), Some(&Value::from("tab-7")));
        assert_eq!(
            env.get(EXECUTION_ID),
            Some(&Value::Text(id.execution_id.to_string()))
        );
    }

    #[test]
    fn test_fork_branch_is_independent() {
        let mut parent = Environment::new();
        parent.set("shared", Value::Int(1));

        let mut branch = parent.fork_branch(2);
        branch.set("shared", Value::Int(99));

        assert_eq!(branch.get(BRANCH_INDEX), Some(&Value::Int(2)));
        assert_eq!(parent.get("shared"), Some(&Value::Int(1)));
        assert!(!parent.contains(BRANCH_INDEX));
    }

    #[test]
    fn test_replace_user_variables_keeps_reserved() {
        let mut env = Environment::new();
        env.stamp(&identity());
        env.set("keep", Value::Int(1));
        env.set("drop", Value::Int(2));

        let mut next = IndexMap::new();
        next.insert("keep".to_string(), Value::Int(10));
        next.insert("added".to_string(), Value::Bool(true));
        env.replace_user_variables(next);

        assert_eq!(env.get("keep"), Some(&Value::Int(10)));
        assert_eq!(env.get("added"), Some(&Value::Bool(true)));
        assert!(!env.contains("drop"));
        assert!(env.contains(WORKFLOW_ID));
    }

    #[test]
    fn test_user_variables_filters_reserved() {
        let mut env = Environment::new();
        env.stamp(&identity());
        env.set("x", Value::Int(1));
        let user = env.user_variables();
        assert_eq!(user.len(), 1);
        assert!(user.contains_key("x"));
    }

    #[test]
    fn test_to_json_shape() {
        let mut env = Environment::new();
        env.set("count", Value::Int(3));
        let json = env.to_json();
        assert_eq!(json["count"], serde_json::json!(3));
    }
}
