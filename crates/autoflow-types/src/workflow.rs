//! Workflow definition types for Autoflow.
//!
//! A `WorkflowDefinition` is the persisted, immutable description of a
//! workflow: seed variables plus an ordered list of `Step`s. Steps are a
//! closed tagged union discriminated by the `type` field. Definitions
//! round-trip through JSON and YAML documents with camelCase field names.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Discriminants accepted for the `type` field of a step.
pub const STEP_KINDS: &[&str] = &[
    "action",
    "condition",
    "loop",
    "wait",
    "parallel",
    "subWorkflow",
    "script",
];

// ---------------------------------------------------------------------------
// Workflow Definition
// ---------------------------------------------------------------------------

/// A declaratively-defined workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDefinition {
    /// Registry key. Assigned on creation when empty.
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "default_version")]
    pub version: String,
    /// Seed variables for every execution of this workflow.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub variables: IndexMap<String, Value>,
    pub steps: Vec<Step>,
    #[serde(default)]
    pub on_error: OnError,
    /// Trigger descriptors. Carried for hosts; the engine never reads them.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub triggers: Vec<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

fn default_version() -> String {
    "1.0.0".to_string()
}

impl WorkflowDefinition {
    /// Create a definition with the given name and steps and no seed variables.
    pub fn new(name: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            id: String::new(),
            name: name.into(),
            description: None,
            version: default_version(),
            variables: IndexMap::new(),
            steps,
            on_error: OnError::default(),
            triggers: Vec::new(),
            created_at: None,
            updated_at: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_variable(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.variables.insert(key.into(), value.into());
        self
    }

    pub fn with_on_error(mut self, on_error: OnError) -> Self {
        self.on_error = on_error;
        self
    }
}

/// What the run does when a step fails after its retries are exhausted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnError {
    /// Abort the run at the failing step.
    #[default]
    Stop,
    /// Record the failure and continue with the next step.
    Continue,
}

// ---------------------------------------------------------------------------
// Steps
// ---------------------------------------------------------------------------

/// One unit of workflow behavior.
///
/// The common fields live here; the kind-specific fields are flattened in
/// from `StepKind` so the document reads `{"type": "wait", "duration": 100}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Environment key the step result is written to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_variable: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
    #[serde(flatten)]
    pub kind: StepKind,
}

impl Step {
    pub fn new(kind: StepKind) -> Self {
        Self {
            name: None,
            output_variable: None,
            retry: None,
            kind,
        }
    }

    pub fn action(payload: impl Into<Value>) -> Self {
        Self::new(StepKind::Action {
            action: payload.into(),
        })
    }

    pub fn wait(duration_ms: u64) -> Self {
        Self::new(StepKind::Wait {
            duration: Value::from(duration_ms),
        })
    }

    pub fn script(source: impl Into<String>) -> Self {
        Self::new(StepKind::Script {
            script: source.into(),
            timeout: None,
        })
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn output(mut self, variable: impl Into<String>) -> Self {
        self.output_variable = Some(variable.into());
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Display label: the step name, or the kind when unnamed.
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(self.kind.kind_name())
    }
}

/// Kind-specific step payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum StepKind {
    /// Delegate an opaque payload to the host action executor.
    #[serde(alias = "Action")]
    Action { action: Value },

    /// Run `then` when the condition holds, `else` otherwise.
    #[serde(alias = "Condition")]
    Condition {
        condition: ConditionExpr,
        #[serde(rename = "then", default)]
        then_steps: Vec<Step>,
        #[serde(rename = "else", default, skip_serializing_if = "Vec::is_empty")]
        else_steps: Vec<Step>,
    },

    /// Repeat a nested step list.
    #[serde(alias = "Loop")]
    Loop {
        loop_type: LoopType,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        items: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        condition: Option<ConditionExpr>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        times: Option<Value>,
        /// Variable bound to the current element of a `forEach` loop.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        item_variable: Option<String>,
        #[serde(default)]
        steps: Vec<Step>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_iterations: Option<u32>,
    },

    /// Suspend for `duration` milliseconds.
    #[serde(alias = "Wait")]
    Wait { duration: Value },

    /// Run each branch concurrently against its own environment copy.
    #[serde(alias = "Parallel")]
    Parallel { branches: Vec<Vec<Step>> },

    /// Invoke another registered workflow.
    #[serde(alias = "SubWorkflow")]
    SubWorkflow {
        workflow_id: Value,
        #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
        variables: IndexMap<String, Value>,
    },

    /// Evaluate script text with access to the environment.
    #[serde(alias = "Script")]
    Script {
        script: String,
        /// Timeout in milliseconds; falls back to the engine default.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout: Option<u64>,
    },
}

impl StepKind {
    /// The `type` discriminant for this kind.
    pub fn kind_name(&self) -> &'static str {
        match self {
            StepKind::Action { .. } => "action",
            StepKind::Condition { .. } => "condition",
            StepKind::Loop { .. } => "loop",
            StepKind::Wait { .. } => "wait",
            StepKind::Parallel { .. } => "parallel",
            StepKind::SubWorkflow { .. } => "subWorkflow",
            StepKind::Script { .. } => "script",
        }
    }
}

/// Whether a raw `type` string names a known step kind.
///
/// Accepts the PascalCase spelling as well (`"SubWorkflow"`).
pub fn is_known_step_kind(kind: &str) -> bool {
    STEP_KINDS
        .iter()
        .any(|known| *known == kind || pascal_case(known) == kind)
}

fn pascal_case(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
        None => String::new(),
    }
}

/// Loop flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LoopType {
    /// Iterate the elements of `items`.
    ForEach,
    /// Repeat while `condition` holds.
    While,
    /// Repeat `times` times.
    Times,
}

impl LoopType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoopType::ForEach => "forEach",
            LoopType::While => "while",
            LoopType::Times => "times",
        }
    }
}

/// A condition as written in a definition.
///
/// Untagged: a JSON boolean, a string, or a `{left, operator, right}` object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConditionExpr {
    Literal(bool),
    Expression(String),
    Compare {
        left: Value,
        operator: String,
        right: Value,
    },
}

impl ConditionExpr {
    pub fn compare(left: impl Into<Value>, operator: &str, right: impl Into<Value>) -> Self {
        ConditionExpr::Compare {
            left: left.into(),
            operator: operator.to_string(),
            right: right.into(),
        }
    }
}

/// Per-step retry configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    #[serde(default)]
    pub enabled: bool,
    /// Additional attempts after the first; engine default when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    /// Delay between attempts in milliseconds; engine default when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<u64>,
}

impl RetryPolicy {
    pub fn enabled(max_retries: u32, delay_ms: u64) -> Self {
        Self {
            enabled: true,
            max_retries: Some(max_retries),
            delay: Some(delay_ms),
        }
    }
}
