//! Workflow adapters: concrete collaborators for the engine ports.
//!
//! - `rhai_script` -- Sandboxed rhai evaluator for script steps
//! - `echo_action` -- Action executor that logs and echoes payloads

pub mod echo_action;
pub mod rhai_script;

pub use echo_action::EchoActionExecutor;
pub use rhai_script::RhaiScriptEvaluator;
