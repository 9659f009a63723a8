//! Application state shared by the CLI commands.
//!
//! AppState resolves the data directory, loads `config.toml`, and builds a
//! [`WorkflowEngine`] pinned to the concrete infra collaborators.

use std::path::PathBuf;

use autoflow_core::workflow::action::BoxActionExecutor;
use autoflow_core::workflow::executor::WorkflowEngine;
use autoflow_core::workflow::script::BoxScriptEvaluator;
use autoflow_infra::config::{load_global_config, resolve_data_dir};
use autoflow_infra::workflow::{EchoActionExecutor, RhaiScriptEvaluator};
use autoflow_types::config::GlobalConfig;

#[derive(Debug, Clone)]
pub struct AppState {
    pub data_dir: PathBuf,
    pub config: GlobalConfig,
}

impl AppState {
    /// Resolve the data directory and load its configuration.
    pub async fn init() -> anyhow::Result<Self> {
        let data_dir = resolve_data_dir();
        let config = load_global_config(&data_dir).await;
        tracing::debug!(data_dir = %data_dir.display(), "application state ready");
        Ok(Self { data_dir, config })
    }

    /// Default directory scanned by `list` when none is given.
    pub fn workflows_dir(&self) -> PathBuf {
        self.data_dir.join("workflows")
    }

    /// Engine wired with the echo action executor and rhai scripts.
    pub fn build_engine(&self) -> WorkflowEngine {
        WorkflowEngine::new(
            BoxActionExecutor::new(EchoActionExecutor::new()),
            self.config.engine.clone(),
        )
        .with_scripts(BoxScriptEvaluator::new(
            RhaiScriptEvaluator::new().with_max_operations(self.config.engine.script_max_operations),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use autoflow_core::workflow::executor::{ExecuteOptions, ExecutorError};
    use autoflow_types::config::EngineConfig;
    use autoflow_types::workflow::{Step, WorkflowDefinition};

    fn state(engine: EngineConfig) -> AppState {
        AppState {
            data_dir: PathBuf::from("/tmp/autoflow-test"),
            config: GlobalConfig { engine },
        }
    }

    #[test]
    fn test_workflows_dir_is_under_data_dir() {
        let state = state(EngineConfig::default());
        assert_eq!(
            state.workflows_dir(),
            PathBuf::from("/tmp/autoflow-test/workflows")
        );
    }

    #[tokio::test]
    async fn test_build_engine_applies_script_operation_budget() {
        let state = state(EngineConfig {
            script_max_operations: 1_000,
            ..EngineConfig::default()
        });
        let engine = state.build_engine();
        let def = WorkflowDefinition::new("budget", vec![Step::script("loop {}")]);
        let err = engine
            .execute_definition(Arc::new(def), ExecuteOptions::new())
            .await
            .unwrap_err();
        let ExecutorError::RunFailed { error, .. } = err else {
            panic!("expected RunFailed, got {err:?}");
        };
        assert!(error.to_string().to_lowercase().contains("operations"));
    }
}
