//! Lifecycle events emitted by the workflow engine.
//!
//! `EngineEvent` is broadcast on the engine's event bus. All variants are
//! Clone + Send + Sync so they can travel through tokio broadcast channels.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::value::Value;

/// Severity of a script log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptLogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl ScriptLogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScriptLogLevel::Debug => "debug",
            ScriptLogLevel::Info => "info",
            ScriptLogLevel::Warn => "warn",
            ScriptLogLevel::Error => "error",
        }
    }
}

/// Events emitted during a workflow execution.
///
/// `step_index` is the top-level step index. Step-scoped events also carry a
/// `path` locating nested steps (`"2/then/0"`, `"4/branch/1/0"`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum EngineEvent {
    /// A run has begun.
    Started {
        execution_id: Uuid,
        workflow_id: String,
        total_steps: usize,
    },

    StepStarted {
        execution_id: Uuid,
        step_index: usize,
        path: String,
        name: String,
        kind: String,
    },

    StepCompleted {
        execution_id: Uuid,
        step_index: usize,
        path: String,
        name: String,
        result: Value,
        duration_ms: u64,
    },

    StepFailed {
        execution_id: Uuid,
        step_index: usize,
        path: String,
        name: String,
        error: String,
    },

    /// A failed attempt is about to be retried.
    Retrying {
        execution_id: Uuid,
        step_index: usize,
        path: String,
        /// 1-based number of the retry about to run.
        attempt: u32,
        max_retries: u32,
        delay_ms: u64,
        error: String,
    },

    Paused {
        execution_id: Uuid,
        step_index: usize,
    },

    Resumed {
        execution_id: Uuid,
        step_index: usize,
    },

    Cancelled {
        execution_id: Uuid,
        step_index: usize,
    },

    Completed {
        execution_id: Uuid,
        step_index: usize,
        duration_ms: u64,
        steps_completed: usize,
        results: Vec<Value>,
    },

    Failed {
        execution_id: Uuid,
        step_index: usize,
        error: String,
    },

    /// A log line produced by a script step.
    ScriptLog {
        execution_id: Uuid,
        step_index: usize,
        path: String,
        level: ScriptLogLevel,
        message: String,
    },
}

impl EngineEvent {
    pub fn execution_id(&self) -> Uuid {
        match self {
            EngineEvent::Started { execution_id, .. }
            | EngineEvent::StepStarted { execution_id, .. }
            | EngineEvent::StepCompleted { execution_id, .. }
            | EngineEvent::StepFailed { execution_id, .. }
            | EngineEvent::Retrying { execution_id, .. }
            | EngineEvent::Paused { execution_id, .. }
            | EngineEvent::Resumed { execution_id, .. }
            | EngineEvent::Cancelled { execution_id, .. }
            | EngineEvent::Completed { execution_id, .. }
            | EngineEvent::Failed { execution_id, .. }
            | EngineEvent::ScriptLog { execution_id, .. } => *execution_id,
        }
    }

    /// Top-level step index. `Started` reports 0.
    pub fn step_index(&self) -> usize {
        match self {
            EngineEvent::Started { .. } => 0,
            EngineEvent::StepStarted { step_index, .. }
            | EngineEvent::StepCompleted { step_index, .. }
            | EngineEvent::StepFailed { step_index, .. }
            | EngineEvent::Retrying { step_index, .. }
            | EngineEvent::Paused { step_index, .. }
            | EngineEvent::Resumed { step_index, .. }
            | EngineEvent::Cancelled { step_index, .. }
            | EngineEvent::Completed { step_index, .. }
            | EngineEvent::Failed { step_index, .. }
            | EngineEvent::ScriptLog { step_index, .. } => *step_index,
        }
    }

    /// The camelCase discriminant, as serialized in `type`.
    pub fn name(&self) -> &'static str {
        match self {
            EngineEvent::Started { .. } => "started",
            EngineEvent::StepStarted { .. } => "stepStarted",
            EngineEvent::StepCompleted { .. } => "stepCompleted",
            EngineEvent::StepFailed { .. } => "stepFailed",
            EngineEvent::Retrying { .. } => "retrying",
            EngineEvent::Paused { .. } => "paused",
            EngineEvent::Resumed { .. } => "resumed",
            EngineEvent::Cancelled { .. } => "cancelled",
            EngineEvent::Completed { .. } => "completed",
            EngineEvent::Failed { .. } => "failed",
            EngineEvent::ScriptLog { .. } => "scriptLog",
        }
    }
}
