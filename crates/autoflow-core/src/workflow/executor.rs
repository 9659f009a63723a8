//! Execution controller: the public control surface of the engine.
//!
//! `WorkflowEngine` owns a registry of definitions, the collaborator ports
//! (actions and scripts), and one `RunControl`. Each `execute()` call threads
//! its own `RunScope`, environment and `ExecutionRecord` through the step
//! runner, so nested sub-workflow runs never touch the controller's
//! bookkeeping. One engine serves one in-flight run at a time; a second
//! `execute()` while running fails with `AlreadyRunning`.
//!
//! # Execution flow
//!
//! 1. Seed the environment from definition variables plus caller overrides.
//! 2. Stamp reserved keys, move to `Running`, emit `started`.
//! 3. Run the top-level steps through `StepRunner::run_frame`.
//! 4. Seal the record, settle the terminal state, emit `completed`, `failed`
//!    or `cancelled`.

use std::sync::Arc;

use chrono::Utc;
use indexmap::IndexMap;
use tokio::sync::broadcast;
use uuid::Uuid;

use autoflow_types::config::EngineConfig;
use autoflow_types::event::EngineEvent;
use autoflow_types::execution::{ExecutionRecord, ExecutionResult, RunState, StatusSnapshot};
use autoflow_types::value::Value;
use autoflow_types::workflow::WorkflowDefinition;

use super::action::BoxActionExecutor;
use super::context::{Environment, RunIdentity};
use super::control::RunControl;
use super::definition::{WorkflowError, validate_definition};
use super::registry::{InMemoryRegistry, WorkflowRegistry};
use super::script::BoxScriptEvaluator;
use super::step_runner::{FrameFailure, RunScope, StepError, StepRunner};
use crate::event::EventBus;

// ---------------------------------------------------------------------------
// WorkflowExecutor trait
// ---------------------------------------------------------------------------

/// Control surface of a workflow engine.
///
/// Uses RPITIT for the async `execute`, matching the other ports.
pub trait WorkflowExecutor: Send + Sync {
    /// Validate and register a definition, returning its id.
    fn create_workflow(&self, definition: WorkflowDefinition) -> Result<String, ExecutorError>;

    /// Run a registered workflow to completion.
    fn execute(
        &self,
        workflow_id: &str,
        options: ExecuteOptions,
    ) -> impl std::future::Future<Output = Result<ExecutionResult, ExecutorError>> + Send;

    fn pause(&self) -> Result<(), ExecutorError>;

    fn resume(&self) -> Result<(), ExecutorError>;

    /// Cancel the current run. Succeeds without effect when nothing is running.
    fn cancel(&self) -> Result<(), ExecutorError>;

    fn status(&self) -> StatusSnapshot;
}

// ---------------------------------------------------------------------------
// ExecuteOptions
// ---------------------------------------------------------------------------

/// Per-call inputs to `execute()`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecuteOptions {
    /// Opaque host target, passed through to every action.
    pub target_ref: Option<Value>,
    /// Seed variables; these win over the definition's defaults.
    pub variables: IndexMap<String, Value>,
}

impl ExecuteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_target(mut self, target_ref: impl Into<Value>) -> Self {
        self.target_ref = Some(target_ref.into());
        self
    }

    pub fn with_variable(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.variables.insert(key.into(), value.into());
        self
    }
}

// ---------------------------------------------------------------------------
// ExecutorError
// ---------------------------------------------------------------------------

/// Errors that can occur at the controller level.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("a workflow is already running on this engine")]
    AlreadyRunning,

    #[error("cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: RunState,
    },

    #[error("workflow not found: {0}")]
    WorkflowNotFound(String),

    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    /// The run stopped at an unrecovered step failure.
    #[error("step {step_index} failed: {error}")]
    RunFailed {
        step_index: usize,
        error: StepError,
        execution: Box<ExecutionResult>,
    },

    #[error("execution cancelled")]
    Cancelled { execution: Box<ExecutionResult> },
}

impl ExecutorError {
    /// The final result carried by a failed or cancelled run.
    pub fn execution(&self) -> Option<&ExecutionResult> {
        match self {
            ExecutorError::RunFailed { execution, .. } | ExecutorError::Cancelled { execution } => {
                Some(execution)
            }
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// WorkflowEngine
// ---------------------------------------------------------------------------

/// Sequential workflow engine with pause/resume/cancel.
pub struct WorkflowEngine {
    actions: BoxActionExecutor,
    scripts: BoxScriptEvaluator,
    registry: Arc<dyn WorkflowRegistry>,
    events: EventBus,
    control: Arc<RunControl>,
    config: Arc<EngineConfig>,
}

impl WorkflowEngine {
    /// Create an engine with an in-memory registry and scripts disabled.
    pub fn new(actions: BoxActionExecutor, config: EngineConfig) -> Self {
        let events = EventBus::new(config.event_capacity);
        Self {
            actions,
            scripts: BoxScriptEvaluator::disabled(),
            registry: Arc::new(InMemoryRegistry::new()),
            control: Arc::new(RunControl::new(events.clone())),
            events,
            config: Arc::new(config),
        }
    }

    pub fn with_scripts(mut self, scripts: BoxScriptEvaluator) -> Self {
        self.scripts = scripts;
        self
    }

    pub fn with_registry(mut self, registry: Arc<dyn WorkflowRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Publish lifecycle events on an existing bus.
    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.control = Arc::new(RunControl::new(events.clone()));
        self.events = events;
        self
    }

    pub fn registry(&self) -> &Arc<dyn WorkflowRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> RunState {
        self.control.state()
    }

    /// Run a definition directly, without registering it.
    pub async fn execute_definition(
        &self,
        definition: Arc<WorkflowDefinition>,
        options: ExecuteOptions,
    ) -> Result<ExecutionResult, ExecutorError> {
        let identity = RunIdentity::new(definition.id.clone(), options.target_ref.clone());
        let mut env = Environment::seed(&definition.variables, &options.variables);
        env.stamp(&identity);

        let cancel = self
            .control
            .begin(&identity, definition.steps.len(), &env)?;
        let execution_id = identity.execution_id;
        let scope = RunScope {
            identity,
            on_error: definition.on_error,
            control: Arc::clone(&self.control),
            cancel,
            depth: 0,
        };

        tracing::info!(
            %execution_id,
            workflow_id = %definition.id,
            total_steps = definition.steps.len(),
            "workflow started"
        );
        self.events.publish(EngineEvent::Started {
            execution_id,
            workflow_id: definition.id.clone(),
            total_steps: definition.steps.len(),
        });

        let mut record =
            ExecutionRecord::new(execution_id, definition.id.clone(), options.target_ref);
        let outcome = self
            .runner()
            .run_frame(&definition.steps, &mut env, &scope, &mut record)
            .await;
        record.seal();
        self.control.record_environment(&env);

        let requested = match &outcome {
            Ok(()) => RunState::Completed,
            Err(FrameFailure {
                error: StepError::Cancelled,
                ..
            }) => RunState::Cancelled,
            Err(_) => RunState::Failed,
        };
        let state = self.control.finish(requested);
        let step_index = self.control.snapshot().current_step;
        let failure = outcome
            .as_ref()
            .err()
            .map(|f| (f.index, f.error.to_string()));
        let result = ExecutionResult::from_record(record, state, env.into_map(), failure);

        match (state, outcome) {
            (RunState::Completed, _) => {
                let steps_completed = result.results.iter().filter(|r| r.success).count();
                tracing::info!(
                    %execution_id,
                    duration_ms = result.duration_ms,
                    steps_completed,
                    "workflow completed"
                );
                self.events.publish(EngineEvent::Completed {
                    execution_id,
                    step_index,
                    duration_ms: result.duration_ms,
                    steps_completed,
                    results: result.results.iter().map(|r| r.to_value()).collect(),
                });
                Ok(result)
            }
            (RunState::Failed, Err(FrameFailure { index, error })) => {
                tracing::error!(%execution_id, step_index = index, %error, "workflow failed");
                self.events.publish(EngineEvent::Failed {
                    execution_id,
                    step_index: index,
                    error: error.to_string(),
                });
                Err(ExecutorError::RunFailed {
                    step_index: index,
                    error,
                    execution: Box::new(result),
                })
            }
            _ => {
                tracing::info!(%execution_id, step_index, "workflow cancelled");
                self.events.publish(EngineEvent::Cancelled {
                    execution_id,
                    step_index,
                });
                Err(ExecutorError::Cancelled {
                    execution: Box::new(result),
                })
            }
        }
    }

    fn runner(&self) -> StepRunner {
        StepRunner::new(
            self.actions.clone(),
            self.scripts.clone(),
            Arc::clone(&self.registry),
            self.events.clone(),
            Arc::clone(&self.config),
        )
    }
}

impl WorkflowExecutor for WorkflowEngine {
    fn create_workflow(&self, mut definition: WorkflowDefinition) -> Result<String, ExecutorError> {
        if definition.id.trim().is_empty() {
            definition.id = Uuid::now_v7().to_string();
        }
        let now = Utc::now();
        definition.created_at.get_or_insert(now);
        definition.updated_at = Some(now);
        validate_definition(&definition)?;

        let id = definition.id.clone();
        tracing::debug!(workflow_id = %id, name = %definition.name, "workflow registered");
        self.registry.put(definition);
        Ok(id)
    }

    async fn execute(
        &self,
        workflow_id: &str,
        options: ExecuteOptions,
    ) -> Result<ExecutionResult, ExecutorError> {
        let definition = self
            .registry
            .get(workflow_id)
            .ok_or_else(|| ExecutorError::WorkflowNotFound(workflow_id.to_string()))?;
        self.execute_definition(definition, options).await
    }

    fn pause(&self) -> Result<(), ExecutorError> {
        self.control.pause()
    }

    fn resume(&self) -> Result<(), ExecutorError> {
        self.control.resume()
    }

    fn cancel(&self) -> Result<(), ExecutorError> {
        self.control.cancel();
        Ok(())
    }

    fn status(&self) -> StatusSnapshot {
        self.control.snapshot()
    }
}

impl std::fmt::Debug for WorkflowEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowEngine")
            .field("state", &self.control.state())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
