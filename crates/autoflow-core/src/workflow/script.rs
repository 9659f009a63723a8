//! The script evaluator port.
//!
//! `Script` steps run user-authored script text through a pluggable
//! `ScriptEvaluator`. The evaluator receives a copy of the environment's
//! variables and hands back the variables as the script left them; the
//! engine merges them into the environment. Log output is routed through a
//! `ScriptLogger` that the engine turns into `scriptLog` events.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use tokio_util::sync::CancellationToken;

use autoflow_types::event::ScriptLogLevel;
use autoflow_types::value::Value;

/// Sink for script log lines.
#[derive(Clone)]
pub struct ScriptLogger {
    sink: Arc<dyn Fn(ScriptLogLevel, &str) + Send + Sync>,
}

impl ScriptLogger {
    pub fn new(sink: impl Fn(ScriptLogLevel, &str) + Send + Sync + 'static) -> Self {
        Self {
            sink: Arc::new(sink),
        }
    }

    /// A logger that drops everything.
    pub fn discard() -> Self {
        Self::new(|_, _| {})
    }

    pub fn log(&self, level: ScriptLogLevel, message: &str) {
        (self.sink)(level, message);
    }
}

impl std::fmt::Debug for ScriptLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ScriptLogger")
    }
}

/// Everything an evaluator needs to run one script.
#[derive(Debug, Clone)]
pub struct ScriptRequest {
    pub source: String,
    pub variables: IndexMap<String, Value>,
    /// `None` means no limit.
    pub timeout: Option<Duration>,
    pub cancel: CancellationToken,
    pub logger: ScriptLogger,
}

/// A settled script.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptOutcome {
    /// The value passed to `resolve`, or the value of the last expression.
    pub result: Value,
    /// Variables as the script left them.
    pub variables: IndexMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScriptError {
    /// The script rejected its completion handle or threw.
    #[error("script rejected: {0}")]
    Rejected(String),

    #[error("script timed out after {0:?}")]
    TimedOut(Duration),

    #[error("script cancelled")]
    Cancelled,

    #[error("script execution is disabled")]
    Disabled,

    #[error("script engine error: {0}")]
    Engine(String),
}

/// Evaluates script text.
pub trait ScriptEvaluator: Send + Sync {
    fn evaluate(
        &self,
        request: ScriptRequest,
    ) -> impl Future<Output = Result<ScriptOutcome, ScriptError>> + Send;
}

/// Object-safe version of [`ScriptEvaluator`].
pub trait ScriptEvaluatorDyn: Send + Sync {
    fn evaluate_boxed(
        &self,
        request: ScriptRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ScriptOutcome, ScriptError>> + Send + '_>>;
}

impl<T: ScriptEvaluator> ScriptEvaluatorDyn for T {
    fn evaluate_boxed(
        &self,
        request: ScriptRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ScriptOutcome, ScriptError>> + Send + '_>> {
        Box::pin(self.evaluate(request))
    }
}

/// Type-erased, cheaply clonable script evaluator.
#[derive(Clone)]
pub struct BoxScriptEvaluator {
    inner: Arc<dyn ScriptEvaluatorDyn>,
}

impl BoxScriptEvaluator {
    pub fn new<T: ScriptEvaluator + 'static>(evaluator: T) -> Self {
        Self {
            inner: Arc::new(evaluator),
        }
    }

    /// An evaluator that rejects every script.
    pub fn disabled() -> Self {
        Self::new(DisabledScriptEvaluator)
    }

    pub async fn evaluate(&self, request: ScriptRequest) -> Result<ScriptOutcome, ScriptError> {
        self.inner.evaluate_boxed(request).await
    }
}

impl std::fmt::Debug for BoxScriptEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxScriptEvaluator").finish_non_exhaustive()
    }
}

/// For hardened deployments: every script fails with `ScriptError::Disabled`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledScriptEvaluator;

impl ScriptEvaluator for DisabledScriptEvaluator {
    async fn evaluate(&self, _request: ScriptRequest) -> Result<ScriptOutcome, ScriptError> {
        Err(ScriptError::Disabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn request(source: &str) -> ScriptRequest {
        ScriptRequest {
            source: source.to_string(),
            variables: IndexMap::new(),
            timeout: None,
            cancel: CancellationToken::new(),
            logger: ScriptLogger::discard(),
        }
    }

    #[tokio::test]
    async fn test_disabled_evaluator_rejects() {
        let evaluator = BoxScriptEvaluator::disabled();
        let err = evaluator.evaluate(request("1 + 1")).await.unwrap_err();
        assert_eq!(err, ScriptError::Disabled);
    }

    #[test]
    fn test_logger_forwards_lines() {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&lines);
        let logger = ScriptLogger::new(move |level, message| {
            sink.lock().unwrap().push(format!("{}:{message}", level.as_str()));
        });
        logger.log(ScriptLogLevel::Warn, "slow page");
        assert_eq!(*lines.lock().unwrap(), vec!["warn:slow page".to_string()]);
    }
}
