//! Observability setup for Autoflow: tracing subscriber and optional
//! OpenTelemetry export.

pub mod tracing_setup;
