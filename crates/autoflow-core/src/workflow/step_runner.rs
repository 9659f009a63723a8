//! Step runner for all seven step kinds.
//!
//! Every step, top-level or nested, enters through `StepRunner::run_step`,
//! which checks the pause/cancel boundary, re-stamps the reserved keys,
//! emits lifecycle events, drives the retry loop around the kind handler, and
//! writes `outputVariable`. Nested step lists go through `run_sequence`; a
//! whole workflow body (top-level or sub-workflow) goes through `run_frame`.
//!
//! Step kinds: Action, Condition, Loop, Wait, Parallel, SubWorkflow, Script.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::{BoxFuture, join_all};
use indexmap::IndexMap;
use tokio_util::sync::CancellationToken;

use autoflow_types::config::EngineConfig;
use autoflow_types::event::EngineEvent;
use autoflow_types::execution::ExecutionRecord;
use autoflow_types::value::Value;
use autoflow_types::workflow::{ConditionExpr, LoopType, OnError, Step, StepKind};

use super::action::{ActionContext, BoxActionExecutor};
use super::condition::{ConditionError, ConditionEvaluator};
use super::context::{Environment, LOOP_INDEX, RunIdentity, SUB_WORKFLOW_RESULT};
use super::control::RunControl;
use super::placeholder::{resolve_deep, resolve_scalar};
use super::registry::WorkflowRegistry;
use super::retry::RetryHandler;
use super::script::{BoxScriptEvaluator, ScriptError, ScriptLogger, ScriptRequest};
use crate::event::EventBus;

/// Default variable bound to the current `forEach` element.
pub const DEFAULT_ITEM_VARIABLE: &str = "item";

// ---------------------------------------------------------------------------
// StepError
// ---------------------------------------------------------------------------

/// Errors that can occur during step execution.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StepError {
    /// Bad condition operator, pattern or expression.
    #[error("invalid expression: {0}")]
    InvalidExpression(String),

    /// A step parameter resolved to an unusable value.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("workflow not found: {0}")]
    WorkflowNotFound(String),

    #[error("action execution failed: {0}")]
    ActionExecutionFailed(String),

    #[error("script execution failed: {0}")]
    ScriptExecutionFailed(String),

    #[error("sub-workflow depth {depth} exceeds maximum {max}")]
    SubWorkflowDepthExceeded { depth: u32, max: u32 },

    #[error("sub-workflow '{workflow_id}' failed: {error}")]
    SubWorkflowFailed { workflow_id: String, error: String },

    #[error("execution cancelled")]
    Cancelled,
}

impl StepError {
    /// Cancellation aborts immediately; everything else may be retried.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, StepError::Cancelled)
    }
}

impl From<ConditionError> for StepError {
    fn from(err: ConditionError) -> Self {
        match err {
            ConditionError::InvalidExpression(msg) => StepError::InvalidExpression(msg),
        }
    }
}

// ---------------------------------------------------------------------------
// Run scope
// ---------------------------------------------------------------------------

/// Per-frame execution parameters threaded through every step.
///
/// A sub-workflow gets its own scope (identity, `onError`, depth) but shares
/// the parent's control and cancellation token.
#[derive(Debug, Clone)]
pub struct RunScope {
    pub identity: RunIdentity,
    pub on_error: OnError,
    pub control: Arc<RunControl>,
    pub cancel: CancellationToken,
    /// Sub-workflow nesting depth; 0 for the top-level run.
    pub depth: u32,
}

/// Where a step sits: its top-level index plus the nested path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepLocation {
    pub step_index: usize,
    pub path: String,
}

impl StepLocation {
    pub fn top(step_index: usize) -> Self {
        Self {
            step_index,
            path: step_index.to_string(),
        }
    }

    pub fn child(&self, segment: &str) -> Self {
        Self {
            step_index: self.step_index,
            path: format!("{}/{segment}", self.path),
        }
    }
}

/// The step at `index` of a frame failed (or the frame was cancelled there).
#[derive(Debug, Clone, PartialEq)]
pub struct FrameFailure {
    pub index: usize,
    pub error: StepError,
}

// ---------------------------------------------------------------------------
// StepRunner
// ---------------------------------------------------------------------------

/// Executes steps by dispatching to kind-specific handlers.
///
/// Cheap to clone; parallel branches each take a clone into their task.
#[derive(Clone)]
pub struct StepRunner {
    actions: BoxActionExecutor,
    scripts: BoxScriptEvaluator,
    registry: Arc<dyn WorkflowRegistry>,
    conditions: ConditionEvaluator,
    events: EventBus,
    config: Arc<EngineConfig>,
}

impl StepRunner {
    pub fn new(
        actions: BoxActionExecutor,
        scripts: BoxScriptEvaluator,
        registry: Arc<dyn WorkflowRegistry>,
        events: EventBus,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            actions,
            scripts,
            registry,
            conditions: ConditionEvaluator::new(),
            events,
            config,
        }
    }

    /// Run a workflow body, recording every top-level outcome in `record`.
    ///
    /// Failures are subject to `scope.on_error`; cancellation always aborts.
    pub fn run_frame<'a>(
        &'a self,
        steps: &'a [Step],
        env: &'a mut Environment,
        scope: &'a RunScope,
        record: &'a mut ExecutionRecord,
    ) -> BoxFuture<'a, Result<(), FrameFailure>> {
        Box::pin(async move {
            for (index, step) in steps.iter().enumerate() {
                if scope.depth == 0 {
                    scope.control.record_progress(index, env);
                }
                match self.run_step(step, env, scope, StepLocation::top(index)).await {
                    Ok(result) => record.push_success(index, step.label(), result),
                    Err(StepError::Cancelled) => {
                        record.push_error(index, &StepError::Cancelled.to_string());
                        return Err(FrameFailure {
                            index,
                            error: StepError::Cancelled,
                        });
                    }
                    Err(error) => {
                        record.push_failure(index, step.label(), &error.to_string());
                        match scope.on_error {
                            OnError::Stop => return Err(FrameFailure { index, error }),
                            OnError::Continue => {
                                tracing::warn!(
                                    execution_id = %scope.identity.execution_id,
                                    step_index = index,
                                    %error,
                                    "step failed, continuing"
                                );
                            }
                        }
                    }
                }
            }
            Ok(())
        })
    }

    /// Run a nested step list under the frame's `onError` policy.
    ///
    /// With `continue`, a failed step contributes `{success: false, error}`
    /// to the returned results.
    pub fn run_sequence<'a>(
        &'a self,
        steps: &'a [Step],
        env: &'a mut Environment,
        scope: &'a RunScope,
        prefix: &'a StepLocation,
    ) -> BoxFuture<'a, Result<Vec<Value>, StepError>> {
        Box::pin(async move {
            let mut results = Vec::with_capacity(steps.len());
            for (i, step) in steps.iter().enumerate() {
                let loc = prefix.child(&i.to_string());
                match self.run_step(step, env, scope, loc).await {
                    Ok(result) => results.push(result),
                    Err(StepError::Cancelled) => return Err(StepError::Cancelled),
                    Err(error) => match scope.on_error {
                        OnError::Stop => return Err(error),
                        OnError::Continue => results.push(Value::record([
                            ("success", Value::Bool(false)),
                            ("error", Value::from(error.to_string())),
                        ])),
                    },
                }
            }
            Ok(results)
        })
    }

    /// Run one step with boundary checks, events, retry and output binding.
    pub fn run_step<'a>(
        &'a self,
        step: &'a Step,
        env: &'a mut Environment,
        scope: &'a RunScope,
        loc: StepLocation,
    ) -> BoxFuture<'a, Result<Value, StepError>> {
        Box::pin(async move {
            scope.control.checkpoint().await?;
            env.stamp(&scope.identity);

            let execution_id = scope.identity.execution_id;
            let name = step.label().to_string();
            tracing::debug!(
                %execution_id,
                step_index = loc.step_index,
                path = %loc.path,
                kind = step.kind.kind_name(),
                "step started"
            );
            self.events.publish(EngineEvent::StepStarted {
                execution_id,
                step_index: loc.step_index,
                path: loc.path.clone(),
                name: name.clone(),
                kind: step.kind.kind_name().to_string(),
            });

            let started = Instant::now();
            let schedule = RetryHandler::schedule(step.retry.as_ref(), &self.config);
            let mut retries = 0u32;
            let outcome = loop {
                let error = match self.dispatch(step, env, scope, &loc).await {
                    Ok(result) => break Ok(result),
                    Err(error) => error,
                };
                let Some(schedule) =
                    schedule.filter(|s| RetryHandler::should_retry(s, retries, &error))
                else {
                    break Err(error);
                };
                retries += 1;
                let delay_ms = u64::try_from(schedule.delay.as_millis()).unwrap_or(u64::MAX);
                tracing::warn!(
                    %execution_id,
                    step_index = loc.step_index,
                    path = %loc.path,
                    attempt = retries,
                    max_retries = schedule.max_retries,
                    %error,
                    "step failed, retrying"
                );
                self.events.publish(EngineEvent::Retrying {
                    execution_id,
                    step_index: loc.step_index,
                    path: loc.path.clone(),
                    attempt: retries,
                    max_retries: schedule.max_retries,
                    delay_ms,
                    error: error.to_string(),
                });
                tokio::select! {
                    _ = tokio::time::sleep(schedule.delay) => {}
                    _ = scope.cancel.cancelled() => break Err(StepError::Cancelled),
                }
            };

            match outcome {
                Ok(result) => {
                    if let Some(variable) = &step.output_variable {
                        env.set(variable.clone(), result.clone());
                    }
                    let duration_ms =
                        u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
                    tracing::debug!(
                        %execution_id,
                        step_index = loc.step_index,
                        path = %loc.path,
                        duration_ms,
                        "step completed"
                    );
                    self.events.publish(EngineEvent::StepCompleted {
                        execution_id,
                        step_index: loc.step_index,
                        path: loc.path,
                        name,
                        result: result.clone(),
                        duration_ms,
                    });
                    Ok(result)
                }
                Err(StepError::Cancelled) => Err(StepError::Cancelled),
                Err(error) => {
                    tracing::debug!(
                        %execution_id,
                        step_index = loc.step_index,
                        path = %loc.path,
                        %error,
                        "step failed"
                    );
                    self.events.publish(EngineEvent::StepFailed {
                        execution_id,
                        step_index: loc.step_index,
                        path: loc.path,
                        name,
                        error: error.to_string(),
                    });
                    Err(error)
                }
            }
        })
    }

    async fn dispatch(
        &self,
        step: &Step,
        env: &mut Environment,
        scope: &RunScope,
        loc: &StepLocation,
    ) -> Result<Value, StepError> {
        match &step.kind {
            StepKind::Action { action } => self.run_action(action, env, scope, loc).await,
            StepKind::Condition {
                condition,
                then_steps,
                else_steps,
            } => {
                self.run_condition(condition, then_steps, else_steps, env, scope, loc)
                    .await
            }
            StepKind::Loop { .. } => self.run_loop(&step.kind, env, scope, loc).await,
            StepKind::Wait { duration } => self.run_wait(duration, env, scope).await,
            StepKind::Parallel { branches } => self.run_parallel(branches, env, scope, loc).await,
            StepKind::SubWorkflow {
                workflow_id,
                variables,
            } => self.run_sub_workflow(workflow_id, variables, env, scope).await,
            StepKind::Script { script, timeout } => {
                self.run_script(script, *timeout, env, scope, loc).await
            }
        }
    }

    // -----------------------------------------------------------------------
    // Action
    // -----------------------------------------------------------------------

    async fn run_action(
        &self,
        action: &Value,
        env: &Environment,
        scope: &RunScope,
        loc: &StepLocation,
    ) -> Result<Value, StepError> {
        let payload = resolve_deep(action, env);
        let ctx = ActionContext {
            target_ref: scope.identity.target_ref.clone(),
            execution_id: scope.identity.execution_id,
            step_index: loc.step_index,
            path: loc.path.clone(),
        };
        self.actions
            .execute_action(payload, ctx)
            .await
            .map_err(|e| StepError::ActionExecutionFailed(e.to_string()))
    }

    // -----------------------------------------------------------------------
    // Condition
    // -----------------------------------------------------------------------

    async fn run_condition(
        &self,
        condition: &ConditionExpr,
        then_steps: &[Step],
        else_steps: &[Step],
        env: &mut Environment,
        scope: &RunScope,
        loc: &StepLocation,
    ) -> Result<Value, StepError> {
        let met = self.conditions.evaluate(condition, env)?;
        let (branch, steps) = if met {
            ("then", then_steps)
        } else {
            ("else", else_steps)
        };
        let results = self
            .run_sequence(steps, env, scope, &loc.child(branch))
            .await?;
        Ok(Value::record([
            ("conditionMet", Value::Bool(met)),
            ("branch", Value::from(branch)),
            ("results", Value::List(results)),
        ]))
    }

    // -----------------------------------------------------------------------
    // Loop
    // -----------------------------------------------------------------------

    async fn run_loop(
        &self,
        kind: &StepKind,
        env: &mut Environment,
        scope: &RunScope,
        loc: &StepLocation,
    ) -> Result<Value, StepError> {
        let StepKind::Loop {
            loop_type,
            items,
            condition,
            times,
            item_variable,
            steps,
            max_iterations,
        } = kind
        else {
            return Err(StepError::InvalidParameter("not a loop step".to_string()));
        };

        let max = max_iterations.unwrap_or(self.config.default_max_iterations) as usize;
        let mut results = Vec::new();
        let mut exhausted = false;

        match loop_type {
            LoopType::ForEach => {
                let items = loop_items(items.as_ref(), env)?;
                let item_variable = item_variable.as_deref().unwrap_or(DEFAULT_ITEM_VARIABLE);
                exhausted = items.len() > max;
                for (i, item) in items.into_iter().take(max).enumerate() {
                    check_cancelled(scope)?;
                    env.set(item_variable, item);
                    env.set(LOOP_INDEX, Value::from(i));
                    let iteration = self
                        .run_sequence(steps, env, scope, &loc.child(&format!("iter/{i}")))
                        .await?;
                    results.push(Value::List(iteration));
                }
            }
            LoopType::While => {
                let condition = condition.as_ref().ok_or_else(|| {
                    StepError::InvalidParameter("while loop requires 'condition'".to_string())
                })?;
                let mut i = 0usize;
                while self.conditions.evaluate(condition, env)? {
                    if i >= max {
                        exhausted = true;
                        break;
                    }
                    check_cancelled(scope)?;
                    env.set(LOOP_INDEX, Value::from(i));
                    let iteration = self
                        .run_sequence(steps, env, scope, &loc.child(&format!("iter/{i}")))
                        .await?;
                    results.push(Value::List(iteration));
                    i += 1;
                }
            }
            LoopType::Times => {
                let resolved = times
                    .as_ref()
                    .map(|t| resolve_scalar(t, env))
                    .unwrap_or(Value::Null);
                let n = resolved.as_i64().ok_or_else(|| {
                    StepError::InvalidParameter(format!(
                        "times loop count must be a number, got {}",
                        resolved.kind_name()
                    ))
                })?;
                let n = usize::try_from(n.max(0)).unwrap_or(usize::MAX);
                exhausted = n > max;
                for i in 0..n.min(max) {
                    check_cancelled(scope)?;
                    env.set(LOOP_INDEX, Value::from(i));
                    let iteration = self
                        .run_sequence(steps, env, scope, &loc.child(&format!("iter/{i}")))
                        .await?;
                    results.push(Value::List(iteration));
                }
            }
        }

        if exhausted {
            tracing::warn!(
                execution_id = %scope.identity.execution_id,
                step_index = loc.step_index,
                path = %loc.path,
                max_iterations = max,
                "loop stopped at iteration cap"
            );
        }

        Ok(Value::record([
            ("loopType", Value::from(loop_type.as_str())),
            ("iterations", Value::from(results.len())),
            ("exhausted", Value::Bool(exhausted)),
            ("results", Value::List(results)),
        ]))
    }

    // -----------------------------------------------------------------------
    // Wait
    // -----------------------------------------------------------------------

    async fn run_wait(
        &self,
        duration: &Value,
        env: &Environment,
        scope: &RunScope,
    ) -> Result<Value, StepError> {
        let resolved = resolve_scalar(duration, env);
        let ms = resolved.as_f64().ok_or_else(|| {
            StepError::InvalidParameter(format!(
                "wait duration must be a number, got {}",
                resolved.kind_name()
            ))
        })?;
        let ms = if ms.is_finite() && ms > 0.0 { ms as u64 } else { 0 };

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(ms)) => {
                Ok(Value::record([("duration", Value::from(ms))]))
            }
            _ = scope.cancel.cancelled() => Err(StepError::Cancelled),
        }
    }

    // -----------------------------------------------------------------------
    // Parallel
    // -----------------------------------------------------------------------

    async fn run_parallel(
        &self,
        branches: &[Vec<Step>],
        env: &Environment,
        scope: &RunScope,
        loc: &StepLocation,
    ) -> Result<Value, StepError> {
        let handles: Vec<_> = branches
            .iter()
            .enumerate()
            .map(|(b, branch)| {
                let runner = self.clone();
                let steps = branch.clone();
                let mut branch_env = env.fork_branch(b);
                let scope = scope.clone();
                let prefix = loc.child(&format!("branch/{b}"));
                tokio::spawn(async move {
                    runner
                        .run_sequence(&steps, &mut branch_env, &scope, &prefix)
                        .await
                })
            })
            .collect();

        // Dropping the handles on cancel detaches the branch tasks.
        let joined = tokio::select! {
            joined = join_all(handles) => joined,
            _ = scope.cancel.cancelled() => return Err(StepError::Cancelled),
        };

        let outcomes = joined
            .into_iter()
            .enumerate()
            .map(|(b, joined)| {
                let mut fields = IndexMap::new();
                fields.insert("branchIndex".to_string(), Value::from(b));
                match joined {
                    Ok(Ok(results)) => {
                        fields.insert("success".to_string(), Value::Bool(true));
                        fields.insert("results".to_string(), Value::List(results));
                    }
                    Ok(Err(error)) => {
                        fields.insert("success".to_string(), Value::Bool(false));
                        fields.insert("error".to_string(), Value::from(error.to_string()));
                    }
                    Err(join_error) => {
                        fields.insert("success".to_string(), Value::Bool(false));
                        fields.insert(
                            "error".to_string(),
                            Value::from(format!("branch task failed: {join_error}")),
                        );
                    }
                }
                Value::Record(fields)
            })
            .collect();
        Ok(Value::List(outcomes))
    }

    // -----------------------------------------------------------------------
    // SubWorkflow
    // -----------------------------------------------------------------------

    async fn run_sub_workflow(
        &self,
        workflow_id: &Value,
        variables: &IndexMap<String, Value>,
        env: &mut Environment,
        scope: &RunScope,
    ) -> Result<Value, StepError> {
        let workflow_id = match resolve_scalar(workflow_id, env) {
            Value::Null => {
                return Err(StepError::InvalidParameter(
                    "subWorkflow id resolved to null".to_string(),
                ));
            }
            Value::Text(id) => id,
            other => other.to_text(),
        };
        let definition = self
            .registry
            .get(&workflow_id)
            .ok_or_else(|| StepError::WorkflowNotFound(workflow_id.clone()))?;

        let depth = scope.depth + 1;
        let max = self.config.max_sub_workflow_depth;
        if depth > max {
            return Err(StepError::SubWorkflowDepthExceeded { depth, max });
        }

        let overrides: IndexMap<String, Value> = variables
            .iter()
            .map(|(k, v)| (k.clone(), resolve_deep(v, env)))
            .collect();
        let mut child_env = Environment::seed(&definition.variables, &overrides);
        let child_scope = RunScope {
            identity: RunIdentity::new(
                definition.id.clone(),
                scope.identity.target_ref.clone(),
            ),
            on_error: definition.on_error,
            control: Arc::clone(&scope.control),
            cancel: scope.cancel.clone(),
            depth,
        };
        let child_id = child_scope.identity.execution_id;
        child_env.stamp(&child_scope.identity);

        tracing::info!(
            parent_execution_id = %scope.identity.execution_id,
            execution_id = %child_id,
            workflow_id = %workflow_id,
            depth,
            "sub-workflow started"
        );

        let mut child_record = ExecutionRecord::new(
            child_id,
            definition.id.clone(),
            scope.identity.target_ref.clone(),
        );
        let outcome = self
            .run_frame(&definition.steps, &mut child_env, &child_scope, &mut child_record)
            .await;
        child_record.seal();

        let mut summary = IndexMap::new();
        summary.insert("workflowId".to_string(), Value::from(workflow_id.as_str()));
        summary.insert("executionId".to_string(), Value::from(child_id.to_string()));
        summary.insert("success".to_string(), Value::Bool(outcome.is_ok()));
        summary.insert(
            "results".to_string(),
            Value::List(child_record.steps.iter().map(|r| r.to_value()).collect()),
        );
        summary.insert(
            "variables".to_string(),
            Value::Record(child_env.user_variables()),
        );
        if let Err(failure) = &outcome {
            summary.insert("error".to_string(), Value::from(failure.error.to_string()));
        }
        let summary = Value::Record(summary);
        env.set(SUB_WORKFLOW_RESULT, summary.clone());

        match outcome {
            Ok(()) => Ok(summary),
            Err(FrameFailure {
                error: StepError::Cancelled,
                ..
            }) => Err(StepError::Cancelled),
            Err(failure) => Err(StepError::SubWorkflowFailed {
                workflow_id,
                error: failure.error.to_string(),
            }),
        }
    }

    // -----------------------------------------------------------------------
    // Script
    // -----------------------------------------------------------------------

    async fn run_script(
        &self,
        source: &str,
        timeout_ms: Option<u64>,
        env: &mut Environment,
        scope: &RunScope,
        loc: &StepLocation,
    ) -> Result<Value, StepError> {
        let timeout = match timeout_ms {
            Some(0) => None,
            Some(ms) => Some(Duration::from_millis(ms)),
            None => self.config.script_timeout(),
        };

        let logger = {
            let events = self.events.clone();
            let execution_id = scope.identity.execution_id;
            let step_index = loc.step_index;
            let path = loc.path.clone();
            ScriptLogger::new(move |level, message| {
                events.publish(EngineEvent::ScriptLog {
                    execution_id,
                    step_index,
                    path: path.clone(),
                    level,
                    message: message.to_string(),
                });
            })
        };

        let script_cancel = scope.cancel.child_token();
        let request = ScriptRequest {
            source: source.to_string(),
            variables: env.as_map().clone(),
            timeout,
            cancel: script_cancel.clone(),
            logger,
        };

        let evaluation = self.scripts.evaluate(request);
        let outcome = match timeout {
            Some(limit) => match tokio::time::timeout(limit, evaluation).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    script_cancel.cancel();
                    Err(ScriptError::TimedOut(limit))
                }
            },
            None => evaluation.await,
        };

        match outcome {
            Ok(outcome) => {
                env.replace_user_variables(outcome.variables);
                Ok(outcome.result)
            }
            Err(ScriptError::Cancelled) if scope.cancel.is_cancelled() => Err(StepError::Cancelled),
            Err(error) => Err(StepError::ScriptExecutionFailed(error.to_string())),
        }
    }
}

impl std::fmt::Debug for StepRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepRunner")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn check_cancelled(scope: &RunScope) -> Result<(), StepError> {
    if scope.cancel.is_cancelled() {
        Err(StepError::Cancelled)
    } else {
        Ok(())
    }
}

/// Resolve `forEach` items: a list, null (no iterations), or JSON array text.
fn loop_items(items: Option<&Value>, env: &Environment) -> Result<Vec<Value>, StepError> {
    let resolved = items
        .map(|items| resolve_deep(items, env))
        .unwrap_or(Value::Null);
    match resolved {
        Value::List(items) => Ok(items),
        Value::Null => Ok(Vec::new()),
        Value::Text(text) => match serde_json::from_str::<Value>(&text) {
            Ok(Value::List(items)) => Ok(items),
            _ => Err(StepError::InvalidParameter(format!(
                "forEach items must be a list, got text '{text}'"
            ))),
        },
        other => Err(StepError::InvalidParameter(format!(
            "forEach items must be a list, got {}",
            other.kind_name()
        ))),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use autoflow_types::execution::RunState;
    use autoflow_types::workflow::{RetryPolicy, WorkflowDefinition};

    use crate::workflow::action::{ActionError, FnActionExecutor};
    use crate::workflow::registry::InMemoryRegistry;

    struct Harness {
        runner: StepRunner,
        scope: RunScope,
        registry: Arc<InMemoryRegistry>,
        calls: Arc<Mutex<Vec<Value>>>,
    }

    /// Actions echo their payload; a payload of `"fail"` fails.
    fn harness(on_error: OnError) -> Harness {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&calls);
        let actions = BoxActionExecutor::new(FnActionExecutor::new(
            move |payload: Value, _ctx: ActionContext| {
                seen.lock().unwrap().push(payload.clone());
                async move {
                    if payload == Value::from("fail") {
                        Err(ActionError::Failed("boom".to_string()))
                    } else {
                        Ok(payload)
                    }
                }
            },
        ));
        let registry = Arc::new(InMemoryRegistry::new());
        let events = EventBus::new(256);
        let config = Arc::new(EngineConfig {
            default_retry_delay_ms: 1,
            ..EngineConfig::default()
        });
        let runner = StepRunner::new(
            actions,
            BoxScriptEvaluator::disabled(),
            registry.clone(),
            events.clone(),
            config,
        );
        let control = Arc::new(RunControl::new(events));
        let identity = RunIdentity::new("test", None);
        let cancel = control
            .begin(&identity, 1, &Environment::new())
            .unwrap();
        Harness {
            runner,
            scope: RunScope {
                identity,
                on_error,
                control,
                cancel,
                depth: 0,
            },
            registry,
            calls,
        }
    }

    async fn run(h: &Harness, step: &Step, env: &mut Environment) -> Result<Value, StepError> {
        h.runner
            .run_step(step, env, &h.scope, StepLocation::top(0))
            .await
    }

    fn loop_step(loop_type: LoopType) -> StepKind {
        StepKind::Loop {
            loop_type,
            items: None,
            condition: None,
            times: None,
            item_variable: None,
            steps: vec![Step::action("${_loopIndex}")],
            max_iterations: None,
        }
    }

    #[tokio::test]
    async fn test_action_resolves_payload_and_binds_output() {
        let h = harness(OnError::Stop);
        let mut env = Environment::new();
        env.set("url", "https://example.com");
        let step = Step::action(Value::record([("goto", Value::from("${url}"))])).output("nav");

        let result = run(&h, &step, &mut env).await.unwrap();
        assert_eq!(result.get("goto"), Some(&Value::from("https://example.com")));
        assert_eq!(env.get("nav"), Some(&result));
    }

    #[tokio::test]
    async fn test_action_failure_maps_error() {
        let h = harness(OnError::Stop);
        let err = run(&h, &Step::action("fail"), &mut Environment::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StepError::ActionExecutionFailed(msg) if msg == "boom"));
    }

    #[tokio::test]
    async fn test_retry_runs_extra_attempts() {
        let h = harness(OnError::Stop);
        let step = Step::action("fail").with_retry(RetryPolicy::enabled(2, 1));
        assert!(run(&h, &step, &mut Environment::new()).await.is_err());
        assert_eq!(h.calls.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_condition_picks_branch() {
        let h = harness(OnError::Stop);
        let mut env = Environment::new();
        env.set("count", Value::Int(2));
        let step = Step::new(StepKind::Condition {
            condition: ConditionExpr::compare("${count}", ">", 5),
            then_steps: vec![Step::action("big")],
            else_steps: vec![Step::action("small")],
        });
        let result = run(&h, &step, &mut env).await.unwrap();
        assert_eq!(result.get("branch"), Some(&Value::from("else")));
        assert_eq!(*h.calls.lock().unwrap(), vec![Value::from("small")]);
    }

    #[tokio::test]
    async fn test_condition_unknown_operator_fails() {
        let h = harness(OnError::Stop);
        let step = Step::new(StepKind::Condition {
            condition: ConditionExpr::compare(1, "<>", 2),
            then_steps: vec![],
            else_steps: vec![],
        });
        let err = run(&h, &step, &mut Environment::new()).await.unwrap_err();
        assert!(matches!(err, StepError::InvalidExpression(_)));
    }

    #[tokio::test]
    async fn test_for_each_binds_item_and_index() {
        let h = harness(OnError::Stop);
        let mut env = Environment::new();
        env.set("urls", Value::List(vec![Value::from("a"), Value::from("b")]));
        let step = Step::new(StepKind::Loop {
            loop_type: LoopType::ForEach,
            items: Some(Value::from("${urls}")),
            condition: None,
            times: None,
            item_variable: Some("url".to_string()),
            steps: vec![Step::action("${url}-${_loopIndex}")],
            max_iterations: None,
        });
        let result = run(&h, &step, &mut env).await.unwrap();
        assert_eq!(result.get("iterations"), Some(&Value::Int(2)));
        assert_eq!(
            *h.calls.lock().unwrap(),
            vec![Value::from("a-0"), Value::from("b-1")]
        );
    }

    #[tokio::test]
    async fn test_for_each_accepts_json_text_and_null() {
        let h = harness(OnError::Stop);
        let mut env = Environment::new();
        let mut kind = loop_step(LoopType::ForEach);
        if let StepKind::Loop { items, .. } = &mut kind {
            *items = Some(Value::from("[1,2,3]"));
        }
        let result = run(&h, &Step::new(kind.clone()), &mut env).await.unwrap();
        assert_eq!(result.get("iterations"), Some(&Value::Int(3)));

        if let StepKind::Loop { items, .. } = &mut kind {
            *items = Some(Value::from("${missing}"));
        }
        let result = run(&h, &Step::new(kind), &mut env).await.unwrap();
        assert_eq!(result.get("iterations"), Some(&Value::Int(0)));
    }

    #[tokio::test]
    async fn test_for_each_rejects_non_list() {
        let h = harness(OnError::Stop);
        let mut kind = loop_step(LoopType::ForEach);
        if let StepKind::Loop { items, .. } = &mut kind {
            *items = Some(Value::Int(4));
        }
        let err = run(&h, &Step::new(kind), &mut Environment::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StepError::InvalidParameter(_)));
    }

    #[tokio::test]
    async fn test_times_clamps_to_max_iterations() {
        let h = harness(OnError::Stop);
        let mut kind = loop_step(LoopType::Times);
        if let StepKind::Loop {
            times,
            max_iterations,
            ..
        } = &mut kind
        {
            *times = Some(Value::from("10"));
            *max_iterations = Some(4);
        }
        let result = run(&h, &Step::new(kind), &mut Environment::new())
            .await
            .unwrap();
        assert_eq!(result.get("iterations"), Some(&Value::Int(4)));
        assert_eq!(result.get("exhausted"), Some(&Value::Bool(true)));
    }

    #[tokio::test]
    async fn test_while_always_true_stops_at_cap() {
        let h = harness(OnError::Stop);
        let mut kind = loop_step(LoopType::While);
        if let StepKind::Loop {
            condition,
            max_iterations,
            ..
        } = &mut kind
        {
            *condition = Some(ConditionExpr::Literal(true));
            *max_iterations = Some(7);
        }
        let result = run(&h, &Step::new(kind), &mut Environment::new())
            .await
            .unwrap();
        assert_eq!(result.get("iterations"), Some(&Value::Int(7)));
        assert_eq!(h.calls.lock().unwrap().len(), 7);
    }

    #[tokio::test]
    async fn test_while_condition_sees_body_writes() {
        let h = harness(OnError::Stop);
        let mut kind = loop_step(LoopType::While);
        if let StepKind::Loop {
            condition, steps, ..
        } = &mut kind
        {
            *condition = Some(ConditionExpr::compare("${n}", "<", 2));
            *steps = vec![Step::action("${_loopIndex}").output("n")];
        }
        let mut env = Environment::new();
        env.set("n", Value::Int(0));
        let result = run(&h, &Step::new(kind), &mut env).await.unwrap();
        // n takes 0, 1, 2 as _loopIndex; the loop stops once n reaches 2.
        assert_eq!(result.get("iterations"), Some(&Value::Int(3)));
        assert_eq!(result.get("exhausted"), Some(&Value::Bool(false)));
    }

    #[tokio::test]
    async fn test_wait_clamps_negative_and_rejects_text() {
        let h = harness(OnError::Stop);
        let step = Step::new(StepKind::Wait {
            duration: Value::Int(-50),
        });
        let result = run(&h, &step, &mut Environment::new()).await.unwrap();
        assert_eq!(result.get("duration"), Some(&Value::Int(0)));

        let step = Step::new(StepKind::Wait {
            duration: Value::from("soon"),
        });
        assert!(matches!(
            run(&h, &step, &mut Environment::new()).await,
            Err(StepError::InvalidParameter(_))
        ));
    }

    #[tokio::test]
    async fn test_parallel_contains_branch_failures() {
        let h = harness(OnError::Stop);
        let mut env = Environment::new();
        env.set("shared", Value::Int(1));
        let step = Step::new(StepKind::Parallel {
            branches: vec![
                vec![Step::action("fail")],
                vec![Step::action("${_branchIndex}").output("shared")],
            ],
        });
        let result = run(&h, &step, &mut env).await.unwrap();
        let outcomes = result.as_list().unwrap();
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].get("success"), Some(&Value::Bool(false)));
        assert_eq!(outcomes[1].get("success"), Some(&Value::Bool(true)));
        assert_eq!(outcomes[1].get("branchIndex"), Some(&Value::Int(1)));
        // Branch writes never reach the parent environment.
        assert_eq!(env.get("shared"), Some(&Value::Int(1)));
    }

    #[tokio::test]
    async fn test_sub_workflow_not_found() {
        let h = harness(OnError::Stop);
        let step = Step::new(StepKind::SubWorkflow {
            workflow_id: Value::from("nope"),
            variables: IndexMap::new(),
        });
        let err = run(&h, &step, &mut Environment::new()).await.unwrap_err();
        assert_eq!(err, StepError::WorkflowNotFound("nope".to_string()));
    }

    #[tokio::test]
    async fn test_sub_workflow_depth_limit() {
        let h = harness(OnError::Stop);
        let recursive = WorkflowDefinition::new(
            "self",
            vec![Step::new(StepKind::SubWorkflow {
                workflow_id: Value::from("self"),
                variables: IndexMap::new(),
            })],
        )
        .with_id("self");
        h.registry.put(recursive);

        let step = Step::new(StepKind::SubWorkflow {
            workflow_id: Value::from("self"),
            variables: IndexMap::new(),
        });
        let err = run(&h, &step, &mut Environment::new()).await.unwrap_err();
        assert!(matches!(err, StepError::SubWorkflowFailed { .. }), "got {err:?}");
        assert!(err.to_string().contains("depth"), "got {err}");
    }

    #[tokio::test]
    async fn test_script_disabled_fails_step() {
        let h = harness(OnError::Stop);
        let err = run(&h, &Step::script("1"), &mut Environment::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StepError::ScriptExecutionFailed(_)));
    }

    #[tokio::test]
    async fn test_cancelled_scope_stops_at_boundary() {
        let h = harness(OnError::Stop);
        h.scope.control.cancel();
        assert_eq!(h.scope.control.state(), RunState::Cancelled);
        let err = run(&h, &Step::action("x"), &mut Environment::new())
            .await
            .unwrap_err();
        assert_eq!(err, StepError::Cancelled);
        assert!(h.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sequence_continue_records_failures() {
        let h = harness(OnError::Continue);
        let steps = vec![Step::action("fail"), Step::action("ok")];
        let results = h
            .runner
            .run_sequence(&steps, &mut Environment::new(), &h.scope, &StepLocation::top(0))
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].get("success"), Some(&Value::Bool(false)));
        assert_eq!(results[1], Value::from("ok"));
    }
}
