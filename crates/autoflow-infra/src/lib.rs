//! Infrastructure layer for Autoflow.
//!
//! Contains implementations of the ports defined in `autoflow-core`: the
//! rhai-backed script evaluator, the echo action executor used for dry runs,
//! and the global configuration loader.

pub mod config;
pub mod workflow;
