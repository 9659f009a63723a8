//! Dry-run action executor.
//!
//! [`EchoActionExecutor`] implements the [`ActionExecutor`] port from
//! autoflow-core without touching any real target: every resolved payload is
//! logged and handed back, so a workflow can be exercised end to end (loops,
//! placeholders, sub-workflows) before it is wired to a browser host.

use autoflow_core::workflow::action::{ActionContext, ActionError, ActionExecutor};
use autoflow_types::value::Value;

/// Action executor that echoes each payload back as its result.
///
/// The result is `{ok: true, action, stepIndex, path}`, with `targetRef`
/// added when the run has one.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoActionExecutor;

impl EchoActionExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl ActionExecutor for EchoActionExecutor {
    async fn execute_action(&self, payload: Value, ctx: ActionContext) -> Result<Value, ActionError> {
        tracing::info!(
            execution_id = %ctx.execution_id,
            step_index = ctx.step_index,
            path = %ctx.path,
            action = %payload,
            "echo action"
        );

        let mut fields = vec![
            ("ok", Value::Bool(true)),
            ("action", payload),
            ("stepIndex", Value::from(ctx.step_index)),
            ("path", Value::from(ctx.path)),
        ];
        if let Some(target) = ctx.target_ref {
            fields.push(("targetRef", target));
        }
        Ok(Value::record(fields))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn ctx(target_ref: Option<Value>) -> ActionContext {
        ActionContext {
            target_ref,
            execution_id: Uuid::now_v7(),
            step_index: 2,
            path: "2/iter/0/0".to_string(),
        }
    }

    #[tokio::test]
    async fn test_echo_returns_payload_and_location() {
        let payload = Value::record([("click", Value::from("#submit"))]);
        let result = EchoActionExecutor::new()
            .execute_action(payload.clone(), ctx(None))
            .await
            .unwrap();

        assert_eq!(result.get("ok"), Some(&Value::Bool(true)));
        assert_eq!(result.get("action"), Some(&payload));
        assert_eq!(result.get("stepIndex"), Some(&Value::Int(2)));
        assert_eq!(result.get("path"), Some(&Value::from("2/iter/0/0")));
        assert!(result.get("targetRef").is_none());
    }

    #[tokio::test]
    async fn test_echo_includes_target() {
        let result = EchoActionExecutor::new()
            .execute_action(Value::from("screenshot"), ctx(Some(Value::from("tab-3"))))
            .await
            .unwrap();
        assert_eq!(result.get("targetRef"), Some(&Value::from("tab-3")));
    }
}
