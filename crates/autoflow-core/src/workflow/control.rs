//! Run state machine shared between a controller and its in-flight run.
//!
//! `RunControl` holds the `Idle -> Running -> {Paused <-> Running} ->
//! Completed | Failed | Cancelled` state in a `watch` channel so the step
//! loop can park at a step boundary while paused and wake on resume or
//! cancel. A fresh `CancellationToken` is minted per run; cancelling it
//! interrupts waits and abandons parallel joins.

use std::sync::Mutex;

use indexmap::IndexMap;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use autoflow_types::event::EngineEvent;
use autoflow_types::execution::{RunState, StatusSnapshot};
use autoflow_types::value::Value;

use super::context::{Environment, RunIdentity};
use super::executor::ExecutorError;
use super::step_runner::StepError;
use crate::event::EventBus;

#[derive(Debug, Default)]
struct Progress {
    execution_id: Option<Uuid>,
    workflow_id: Option<String>,
    current_step: usize,
    total_steps: usize,
    environment: IndexMap<String, Value>,
}

/// Pause/resume/cancel state for one controller.
#[derive(Debug)]
pub struct RunControl {
    state: watch::Sender<RunState>,
    cancel: Mutex<CancellationToken>,
    progress: Mutex<Progress>,
    events: EventBus,
}

impl RunControl {
    pub fn new(events: EventBus) -> Self {
        let (state, _) = watch::channel(RunState::Idle);
        Self {
            state,
            cancel: Mutex::new(CancellationToken::new()),
            progress: Mutex::new(Progress::default()),
            events,
        }
    }

    pub fn state(&self) -> RunState {
        *self.state.borrow()
    }

    /// Move to `Running` for a new run.
    ///
    /// Fails with `AlreadyRunning` while a run is running or paused.
    pub fn begin(
        &self,
        identity: &RunIdentity,
        total_steps: usize,
        env: &Environment,
    ) -> Result<CancellationToken, ExecutorError> {
        self.transition(
            &[
                RunState::Idle,
                RunState::Completed,
                RunState::Failed,
                RunState::Cancelled,
            ],
            RunState::Running,
        )
        .map_err(|_| ExecutorError::AlreadyRunning)?;

        let token = CancellationToken::new();
        *lock(&self.cancel) = token.clone();
        *lock(&self.progress) = Progress {
            execution_id: Some(identity.execution_id),
            workflow_id: Some(identity.workflow_id.clone()),
            current_step: 0,
            total_steps,
            environment: env.as_map().clone(),
        };
        Ok(token)
    }

    /// Record the top-level step about to run and the environment before it.
    pub fn record_progress(&self, step_index: usize, env: &Environment) {
        let mut progress = lock(&self.progress);
        progress.current_step = step_index;
        progress.environment = env.as_map().clone();
    }

    /// Record the final environment without moving the step cursor.
    pub fn record_environment(&self, env: &Environment) {
        lock(&self.progress).environment = env.as_map().clone();
    }

    /// Enter a terminal state. A run already cancelled stays cancelled.
    pub fn finish(&self, outcome: RunState) -> RunState {
        let mut settled = outcome;
        self.state.send_if_modified(|current| {
            if *current == RunState::Cancelled {
                settled = RunState::Cancelled;
                false
            } else {
                *current = outcome;
                true
            }
        });
        settled
    }

    /// `Running -> Paused`. Takes effect at the next step boundary.
    pub fn pause(&self) -> Result<(), ExecutorError> {
        self.transition(&[RunState::Running], RunState::Paused)
            .map_err(|state| ExecutorError::InvalidState {
                operation: "pause",
                state,
            })?;
        let (execution_id, step_index) = self.position();
        tracing::info!(%execution_id, step_index, "workflow paused");
        self.events.publish(EngineEvent::Paused {
            execution_id,
            step_index,
        });
        Ok(())
    }

    /// `Paused -> Running`.
    pub fn resume(&self) -> Result<(), ExecutorError> {
        self.transition(&[RunState::Paused], RunState::Running)
            .map_err(|state| ExecutorError::InvalidState {
                operation: "resume",
                state,
            })?;
        let (execution_id, step_index) = self.position();
        tracing::info!(%execution_id, step_index, "workflow resumed");
        self.events.publish(EngineEvent::Resumed {
            execution_id,
            step_index,
        });
        Ok(())
    }

    /// Request cancellation. A no-op unless a run is running or paused.
    pub fn cancel(&self) {
        if self
            .transition(&[RunState::Running, RunState::Paused], RunState::Cancelled)
            .is_ok()
        {
            let (execution_id, step_index) = self.position();
            tracing::info!(%execution_id, step_index, "workflow cancellation requested");
            lock(&self.cancel).cancel();
        }
    }

    /// Step boundary: park while paused, fail once cancelled.
    pub async fn checkpoint(&self) -> Result<(), StepError> {
        let mut rx = self.state.subscribe();
        let state = match rx.wait_for(|state| *state != RunState::Paused).await {
            Ok(state) => *state,
            Err(_) => RunState::Cancelled,
        };
        if state == RunState::Cancelled {
            Err(StepError::Cancelled)
        } else {
            Ok(())
        }
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        let progress = lock(&self.progress);
        StatusSnapshot {
            state: self.state(),
            execution_id: progress.execution_id,
            workflow_id: progress.workflow_id.clone(),
            current_step: progress.current_step,
            total_steps: progress.total_steps,
            environment: progress.environment.clone(),
        }
    }

    fn position(&self) -> (Uuid, usize) {
        let progress = lock(&self.progress);
        (
            progress.execution_id.unwrap_or_else(Uuid::nil),
            progress.current_step,
        )
    }

    /// Apply `to` if the current state is one of `from`; otherwise return it.
    fn transition(&self, from: &[RunState], to: RunState) -> Result<RunState, RunState> {
        let mut outcome = Err(RunState::Idle);
        self.state.send_if_modified(|current| {
            if from.contains(current) {
                outcome = Ok(*current);
                *current = to;
                true
            } else {
                outcome = Err(*current);
                false
            }
        });
        outcome
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
