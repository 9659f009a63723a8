//! Execution tracking types.
//!
//! `ExecutionRecord` is the ordered log of one run; `ExecutionResult` is what
//! the controller hands back to the caller once the run is finalized.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::value::Value;

/// Run state of an execution controller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    #[default]
    Idle,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl RunState {
    /// Whether a run is in flight (running or paused).
    pub fn is_active(&self) -> bool {
        matches!(self, RunState::Running | RunState::Paused)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunState::Completed | RunState::Failed | RunState::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Idle => "idle",
            RunState::Running => "running",
            RunState::Paused => "paused",
            RunState::Completed => "completed",
            RunState::Failed => "failed",
            RunState::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one top-level step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRecord {
    pub index: usize,
    pub name: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StepRecord {
    pub fn succeeded(index: usize, name: impl Into<String>, result: Value) -> Self {
        Self {
            index,
            name: name.into(),
            success: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn failed(index: usize, name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            index,
            name: name.into(),
            success: false,
            result: None,
            error: Some(error.into()),
        }
    }

    /// The record as an environment value.
    pub fn to_value(&self) -> Value {
        let mut fields = IndexMap::new();
        fields.insert("index".to_string(), Value::from(self.index));
        fields.insert("name".to_string(), Value::from(self.name.as_str()));
        fields.insert("success".to_string(), Value::Bool(self.success));
        if let Some(result) = &self.result {
            fields.insert("result".to_string(), result.clone());
        }
        if let Some(error) = &self.error {
            fields.insert("error".to_string(), Value::from(error.as_str()));
        }
        Value::Record(fields)
    }
}

/// An error recorded during a run, attributed to a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordedError {
    pub step_index: usize,
    pub message: String,
}

/// The ordered log of one execution.
///
/// Created at run start, appended to while the run progresses, and sealed
/// (end time set) when the run reaches a terminal state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub id: Uuid,
    pub workflow_id: String,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_ref: Option<Value>,
    pub steps: Vec<StepRecord>,
    pub errors: Vec<RecordedError>,
}

impl ExecutionRecord {
    pub fn new(id: Uuid, workflow_id: impl Into<String>, target_ref: Option<Value>) -> Self {
        Self {
            id,
            workflow_id: workflow_id.into(),
            start_time: Utc::now(),
            end_time: None,
            target_ref,
            steps: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn push_success(&mut self, index: usize, name: &str, result: Value) {
        self.steps.push(StepRecord::succeeded(index, name, result));
    }

    pub fn push_failure(&mut self, index: usize, name: &str, error: &str) {
        self.steps.push(StepRecord::failed(index, name, error));
        self.push_error(index, error);
    }

    /// Record an error that has no step outcome of its own.
    pub fn push_error(&mut self, index: usize, error: &str) {
        self.errors.push(RecordedError {
            step_index: index,
            message: error.to_string(),
        });
    }

    /// Set the end time. Later calls keep the first value.
    pub fn seal(&mut self) {
        if self.end_time.is_none() {
            self.end_time = Some(Utc::now());
        }
    }

    pub fn is_sealed(&self) -> bool {
        self.end_time.is_some()
    }

    /// Wall-clock duration in milliseconds, up to now if not sealed.
    pub fn duration_ms(&self) -> u64 {
        let end = self.end_time.unwrap_or_else(Utc::now);
        (end - self.start_time).num_milliseconds().max(0) as u64
    }
}

/// Final outcome of an `execute()` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub execution_id: Uuid,
    pub workflow_id: String,
    pub success: bool,
    pub state: RunState,
    /// Per-step outcomes in execution order.
    pub results: Vec<StepRecord>,
    /// Environment as it stood when the run ended.
    pub environment: IndexMap<String, Value>,
    /// First unrecovered error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<usize>,
    pub duration_ms: u64,
    pub record: ExecutionRecord,
}

impl ExecutionResult {
    /// Build a result from a sealed record.
    pub fn from_record(
        record: ExecutionRecord,
        state: RunState,
        environment: IndexMap<String, Value>,
        failure: Option<(usize, String)>,
    ) -> Self {
        let (failed_step, error) = match failure {
            Some((index, message)) => (Some(index), Some(message)),
            None => (None, None),
        };
        Self {
            execution_id: record.id,
            workflow_id: record.workflow_id.clone(),
            success: state == RunState::Completed,
            state,
            results: record.steps.clone(),
            environment,
            error,
            failed_step,
            duration_ms: record.duration_ms(),
            record,
        }
    }
}

/// Point-in-time view of a controller for `status()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub state: RunState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,
    /// Index of the top-level step being run or about to run.
    pub current_step: usize,
    pub total_steps: usize,
    pub environment: IndexMap<String, Value>,
}

impl StatusSnapshot {
    pub fn idle() -> Self {
        Self {
            state: RunState::Idle,
            execution_id: None,
            workflow_id: None,
            current_step: 0,
            total_steps: 0,
            environment: IndexMap::new(),
        }
    }
}
