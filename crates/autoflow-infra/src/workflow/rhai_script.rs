//! Sandboxed rhai evaluator for script steps.
//!
//! Each script runs on a blocking thread inside a fresh `rhai::Engine`:
//!
//! - `vars` is the environment as an object map; whatever the script leaves
//!   in it becomes the step's variable map.
//! - `print`, `debug`, `log(x)`, `warn(x)` and `error(x)` go to the step's
//!   log sink.
//! - `resolve(value)` settles the script with `value`; `reject(reason)` and
//!   `throw` settle it as a failure. Without `resolve`, the value of the last
//!   expression is the result.
//! - `sleep(ms)` blocks the script thread and wakes early on cancellation.
//!
//! A progress callback terminates the script once the deadline passes or the
//! cancellation token fires. Module imports are resolved by a dummy resolver,
//! and no filesystem or network functions are registered.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use rhai::module_resolvers::DummyModuleResolver;
use rhai::{Dynamic, Engine, EvalAltResult, Position, Scope};
use tokio_util::sync::CancellationToken;

use autoflow_core::workflow::script::{
    ScriptError, ScriptEvaluator, ScriptLogger, ScriptOutcome, ScriptRequest,
};
use autoflow_types::event::ScriptLogLevel;
use autoflow_types::value::Value;

/// Name of the environment map inside the script scope.
const VARS: &str = "vars";

/// Longest single `std::thread::sleep` inside `sleep(ms)`.
const SLEEP_SLICE: Duration = Duration::from_millis(10);

const TERMINATED_TIMEOUT: &str = "timeout";
const TERMINATED_CANCELLED: &str = "cancelled";

/// Script evaluator backed by an embedded rhai engine.
#[derive(Debug, Clone, Default)]
pub struct RhaiScriptEvaluator {
    max_operations: Option<u64>,
}

impl RhaiScriptEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cap the number of operations a script may run (0 means unlimited).
    pub fn with_max_operations(mut self, max_operations: u64) -> Self {
        self.max_operations = Some(max_operations);
        self
    }
}

impl ScriptEvaluator for RhaiScriptEvaluator {
    async fn evaluate(&self, request: ScriptRequest) -> Result<ScriptOutcome, ScriptError> {
        let max_operations = self.max_operations;
        tokio::task::spawn_blocking(move || run_script(request, max_operations))
            .await
            .map_err(|e| ScriptError::Engine(format!("script thread failed: {e}")))?
    }
}

/// The first `resolve(...)` call, if any.
type Settlement = Arc<Mutex<Option<Dynamic>>>;

fn run_script(
    request: ScriptRequest,
    max_operations: Option<u64>,
) -> Result<ScriptOutcome, ScriptError> {
    let ScriptRequest {
        source,
        variables,
        timeout,
        cancel,
        logger,
    } = request;
    let deadline = timeout.map(|limit| Instant::now() + limit);
    let settled: Settlement = Arc::new(Mutex::new(None));

    let mut engine = build_engine(&logger, &cancel, deadline, &settled);
    if let Some(max) = max_operations {
        engine.set_max_operations(max);
    }

    let ast = engine
        .compile(&source)
        .map_err(|e| ScriptError::Engine(format!("syntax error: {e}")))?;

    let vars = rhai::serde::to_dynamic(&variables)
        .map_err(|e| ScriptError::Engine(format!("cannot expose variables: {e}")))?;
    let mut scope = Scope::new();
    scope.push_dynamic(VARS, vars);

    let last = engine
        .eval_ast_with_scope::<Dynamic>(&mut scope, &ast)
        .map_err(|err| script_error(*err, timeout))?;

    let result = match settled.lock().unwrap_or_else(|p| p.into_inner()).take() {
        Some(resolved) => resolved,
        None => last,
    };
    let result = to_value(&result)?;

    let variables = match scope.get(VARS).map(to_value).transpose()? {
        Some(Value::Record(map)) => map,
        Some(other) => {
            return Err(ScriptError::Engine(format!(
                "'{VARS}' must remain an object map, got {}",
                other.kind_name()
            )));
        }
        None => IndexMap::new(),
    };

    Ok(ScriptOutcome { result, variables })
}

fn build_engine(
    logger: &ScriptLogger,
    cancel: &CancellationToken,
    deadline: Option<Instant>,
    settled: &Settlement,
) -> Engine {
    let mut engine = Engine::new();
    engine.set_module_resolver(DummyModuleResolver::new());

    {
        let logger = logger.clone();
        engine.on_print(move |text| logger.log(ScriptLogLevel::Info, text));
    }
    {
        let logger = logger.clone();
        engine.on_debug(move |text, _source, _pos| logger.log(ScriptLogLevel::Debug, text));
    }
    for (name, level) in [
        ("log", ScriptLogLevel::Info),
        ("warn", ScriptLogLevel::Warn),
        ("error", ScriptLogLevel::Error),
    ] {
        let logger = logger.clone();
        engine.register_fn(name, move |message: Dynamic| {
            logger.log(level, &message.to_string());
        });
    }

    {
        let settled = Arc::clone(settled);
        engine.register_fn("resolve", move |value: Dynamic| {
            settled
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .get_or_insert(value);
        });
    }
    {
        let settled = Arc::clone(settled);
        engine.register_fn("resolve", move || {
            settled
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .get_or_insert(Dynamic::UNIT);
        });
    }
    engine.register_fn(
        "reject",
        |reason: Dynamic| -> Result<(), Box<EvalAltResult>> {
            Err(EvalAltResult::ErrorRuntime(reason, Position::NONE).into())
        },
    );

    {
        let cancel = cancel.clone();
        engine.register_fn("sleep", move |ms: rhai::INT| {
            interruptible_sleep(ms, &cancel, deadline);
        });
    }

    let cancel = cancel.clone();
    engine.on_progress(move |_operations| {
        if cancel.is_cancelled() {
            Some(Dynamic::from(TERMINATED_CANCELLED))
        } else if deadline.is_some_and(|d| Instant::now() >= d) {
            Some(Dynamic::from(TERMINATED_TIMEOUT))
        } else {
            None
        }
    });

    engine
}

/// Sleep on the script thread, waking early on cancellation or deadline.
fn interruptible_sleep(ms: rhai::INT, cancel: &CancellationToken, deadline: Option<Instant>) {
    let requested = Instant::now() + Duration::from_millis(u64::try_from(ms).unwrap_or(0));
    let until = deadline.map_or(requested, |d| d.min(requested));
    while !cancel.is_cancelled() {
        let now = Instant::now();
        if now >= until {
            break;
        }
        std::thread::sleep((until - now).min(SLEEP_SLICE));
    }
}

fn script_error(err: EvalAltResult, timeout: Option<Duration>) -> ScriptError {
    match err {
        EvalAltResult::ErrorTerminated(token, _) => {
            if token.to_string() == TERMINATED_TIMEOUT {
                ScriptError::TimedOut(timeout.unwrap_or_default())
            } else {
                ScriptError::Cancelled
            }
        }
        EvalAltResult::ErrorRuntime(reason, _) => ScriptError::Rejected(reason.to_string()),
        EvalAltResult::ErrorInFunctionCall(_, _, inner, _) => script_error(*inner, timeout),
        other => ScriptError::Rejected(other.to_string()),
    }
}

fn to_value(dynamic: &Dynamic) -> Result<Value, ScriptError> {
    rhai::serde::from_dynamic::<serde_json::Value>(dynamic)
        .map(Value::from)
        .map_err(|e| ScriptError::Engine(format!("unsupported script value: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    type Captured = Arc<Mutex<Vec<(ScriptLogLevel, String)>>>;

    fn request(source: &str) -> (ScriptRequest, Captured) {
        let captured: Captured = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&captured);
        let request = ScriptRequest {
            source: source.to_string(),
            variables: IndexMap::new(),
            timeout: Some(Duration::from_secs(5)),
            cancel: CancellationToken::new(),
            logger: ScriptLogger::new(move |level, message| {
                sink.lock().unwrap().push((level, message.to_string()));
            }),
        };
        (request, captured)
    }

    async fn eval(request: ScriptRequest) -> Result<ScriptOutcome, ScriptError> {
        RhaiScriptEvaluator::new().evaluate(request).await
    }

    #[tokio::test]
    async fn test_last_expression_is_result() {
        let (req, _) = request("let x = 40; x + 2");
        let outcome = eval(req).await.unwrap();
        assert_eq!(outcome.result, Value::Int(42));
    }

    #[tokio::test]
    async fn test_resolve_wins_over_last_expression() {
        let (req, _) = request(r#"resolve("done"); 5"#);
        let outcome = eval(req).await.unwrap();
        assert_eq!(outcome.result, Value::from("done"));
    }

    #[tokio::test]
    async fn test_vars_mutations_are_returned() {
        let (mut req, _) = request(
            r#"
            vars.count += 1;
            vars.label = "x";
            vars.remove("scratch");
            "#,
        );
        req.variables.insert("count".to_string(), Value::Int(1));
        req.variables.insert("scratch".to_string(), Value::Bool(true));

        let outcome = eval(req).await.unwrap();
        assert_eq!(outcome.variables.get("count"), Some(&Value::Int(2)));
        assert_eq!(outcome.variables.get("label"), Some(&Value::from("x")));
        assert!(!outcome.variables.contains_key("scratch"));
    }

    #[tokio::test]
    async fn test_nested_values_round_trip() {
        let (mut req, _) = request("vars.page.links.len()");
        req.variables.insert(
            "page".to_string(),
            Value::record([(
                "links",
                Value::List(vec![Value::from("a"), Value::from("b")]),
            )]),
        );
        let outcome = eval(req).await.unwrap();
        assert_eq!(outcome.result, Value::Int(2));
        assert_eq!(
            outcome.variables.get("page").and_then(|p| p.get("links")),
            Some(&Value::List(vec![Value::from("a"), Value::from("b")]))
        );
    }

    #[tokio::test]
    async fn test_reject_and_throw_fail() {
        let (req, _) = request(r#"reject("element missing")"#);
        assert_eq!(
            eval(req).await.unwrap_err(),
            ScriptError::Rejected("element missing".to_string())
        );

        let (req, _) = request(r#"throw "bad state""#);
        assert_eq!(
            eval(req).await.unwrap_err(),
            ScriptError::Rejected("bad state".to_string())
        );
    }

    #[tokio::test]
    async fn test_log_hooks_reach_sink() {
        let (req, captured) = request(r#"print("hello"); log("a"); warn(1); error("e");"#);
        eval(req).await.unwrap();
        let captured = captured.lock().unwrap().clone();
        assert_eq!(
            captured,
            vec![
                (ScriptLogLevel::Info, "hello".to_string()),
                (ScriptLogLevel::Info, "a".to_string()),
                (ScriptLogLevel::Warn, "1".to_string()),
                (ScriptLogLevel::Error, "e".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_runaway_script_times_out() {
        let (mut req, _) = request("loop {}");
        req.timeout = Some(Duration::from_millis(100));
        let err = eval(req).await.unwrap_err();
        assert_eq!(err, ScriptError::TimedOut(Duration::from_millis(100)));
    }

    #[tokio::test]
    async fn test_operation_budget_stops_runaway_script() {
        let (req, _) = request("loop {}");
        let err = RhaiScriptEvaluator::new()
            .with_max_operations(1_000)
            .evaluate(req)
            .await
            .unwrap_err();
        match err {
            ScriptError::Rejected(reason) => assert!(reason.to_lowercase().contains("operations")),
            other => panic!("expected Rejected, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_zero_operation_budget_is_unbounded() {
        let (req, _) = request("let n = 0; for i in 0..5000 { n += i; } n");
        let outcome = RhaiScriptEvaluator::new()
            .with_max_operations(0)
            .evaluate(req)
            .await
            .unwrap();
        assert_eq!(outcome.result, Value::Int(12_497_500));
    }

    #[tokio::test]
    async fn test_cancel_stops_sleeping_script() {
        let (req, _) = request("sleep(10000); 1");
        let cancel = req.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        });

        let started = Instant::now();
        let err = eval(req).await.unwrap_err();
        assert_eq!(err, ScriptError::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_module_imports_are_refused() {
        let (req, _) = request(r#"import "fs" as fs; 1"#);
        assert!(eval(req).await.is_err());
    }

    #[tokio::test]
    async fn test_syntax_error_is_engine_error() {
        let (req, _) = request("let = ;");
        assert!(matches!(eval(req).await, Err(ScriptError::Engine(_))));
    }
}
