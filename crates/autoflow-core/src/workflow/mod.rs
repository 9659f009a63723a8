//! Workflow engine core: definitions, step execution and run control.
//!
//! - `definition` -- JSON/YAML parsing, validation, filesystem load/save
//! - `context` -- Execution environment and reserved keys
//! - `placeholder` -- `${name}` resolution against the environment
//! - `expression` -- JEXL evaluator for free-form condition strings
//! - `condition` -- Condition evaluator and comparison operators
//! - `retry` -- Per-step retry schedule
//! - `action` / `script` -- Collaborator ports for actions and scripts
//! - `registry` -- Workflow registry for sub-workflow lookup
//! - `control` -- Pause/resume/cancel state machine
//! - `step_runner` -- Handlers for all seven step kinds
//! - `executor` -- The execution controller

pub mod action;
pub mod condition;
pub mod context;
pub mod control;
pub mod definition;
pub mod executor;
pub mod expression;
pub mod placeholder;
pub mod registry;
pub mod retry;
pub mod script;
pub mod step_runner;
