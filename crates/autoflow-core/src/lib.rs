//! Workflow execution engine for Autoflow.
//!
//! This crate defines the engine and the ports it consumes (`ActionExecutor`,
//! `ScriptEvaluator`, `WorkflowRegistry`). Concrete adapters such as the rhai
//! script evaluator live in `autoflow-infra`.

pub mod event;
pub mod workflow;
