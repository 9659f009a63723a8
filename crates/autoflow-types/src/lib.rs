//! Shared domain types for Autoflow.
//!
//! This crate contains the types passed between the engine, its adapters and
//! its callers: the `Value` model, workflow definitions, execution records,
//! lifecycle events and configuration.
//!
//! Zero infrastructure dependencies -- only serde, indexmap, uuid, chrono.

pub mod config;
pub mod event;
pub mod execution;
pub mod value;
pub mod workflow;
