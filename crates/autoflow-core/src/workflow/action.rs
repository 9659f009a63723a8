//! The action executor port.
//!
//! The engine never performs host automation itself. `Action` steps hand a
//! fully-resolved payload to an `ActionExecutor` supplied by the caller.
//!
//! Follows the same blanket-impl pattern as the other dynamic ports:
//! 1. `ActionExecutor` is the ergonomic trait (RPITIT async fn)
//! 2. `ActionExecutorDyn` is its object-safe twin with boxed futures
//! 3. `BoxActionExecutor` wraps `Arc<dyn ActionExecutorDyn>` and delegates

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use uuid::Uuid;

use autoflow_types::value::Value;

/// Where an action is being executed.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionContext {
    /// Opaque host target supplied to `execute()` (e.g. a tab reference).
    pub target_ref: Option<Value>,
    pub execution_id: Uuid,
    /// Top-level step index.
    pub step_index: usize,
    /// Location of the step, including nesting.
    pub path: String,
}

/// Errors reported by an action executor.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ActionError {
    #[error("{0}")]
    Failed(String),

    #[error("unsupported action: {0}")]
    Unsupported(String),
}

/// Performs concrete automation actions on behalf of the engine.
pub trait ActionExecutor: Send + Sync {
    fn execute_action(
        &self,
        payload: Value,
        ctx: ActionContext,
    ) -> impl Future<Output = Result<Value, ActionError>> + Send;
}

/// Object-safe version of [`ActionExecutor`].
pub trait ActionExecutorDyn: Send + Sync {
    fn execute_action_boxed(
        &self,
        payload: Value,
        ctx: ActionContext,
    ) -> Pin<Box<dyn Future<Output = Result<Value, ActionError>> + Send + '_>>;
}

impl<T: ActionExecutor> ActionExecutorDyn for T {
    fn execute_action_boxed(
        &self,
        payload: Value,
        ctx: ActionContext,
    ) -> Pin<Box<dyn Future<Output = Result<Value, ActionError>> + Send + '_>> {
        Box::pin(self.execute_action(payload, ctx))
    }
}

/// Type-erased, cheaply clonable action executor.
#[derive(Clone)]
pub struct BoxActionExecutor {
    inner: Arc<dyn ActionExecutorDyn>,
}

impl BoxActionExecutor {
    pub fn new<T: ActionExecutor + 'static>(executor: T) -> Self {
        Self {
            inner: Arc::new(executor),
        }
    }

    pub async fn execute_action(
        &self,
        payload: Value,
        ctx: ActionContext,
    ) -> Result<Value, ActionError> {
        self.inner.execute_action_boxed(payload, ctx).await
    }
}

impl std::fmt::Debug for BoxActionExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxActionExecutor").finish_non_exhaustive()
    }
}

/// Adapts an async closure into an `ActionExecutor`.
pub struct FnActionExecutor<F> {
    f: F,
}

impl<F> FnActionExecutor<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F, Fut> ActionExecutor for FnActionExecutor<F>
where
    F: Fn(Value, ActionContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, ActionError>> + Send,
{
    fn execute_action(
        &self,
        payload: Value,
        ctx: ActionContext,
    ) -> impl Future<Output = Result<Value, ActionError>> + Send {
        (self.f)(payload, ctx)
    }
}
