//! Global configuration types for Autoflow.
//!
//! `GlobalConfig` represents the top-level `config.toml` that tunes engine
//! defaults such as retry delays and loop bounds.

use serde::{Deserialize, Serialize};

/// Top-level configuration.
///
/// Loaded from `~/.autoflow/config.toml`. All fields have sensible defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GlobalConfig {
    #[serde(default)]
    pub engine: EngineConfig,
}

/// Engine-wide defaults applied when a step does not specify its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Retry attempts after the first when a step enables retry without a count.
    #[serde(default = "default_max_retries")]
    pub default_max_retries: u32,

    /// Delay between retry attempts in milliseconds.
    #[serde(default = "default_retry_delay_ms")]
    pub default_retry_delay_ms: u64,

    /// Iteration cap for loops that omit `maxIterations`.
    #[serde(default = "default_max_iterations")]
    pub default_max_iterations: u32,

    /// Maximum nesting depth of sub-workflow calls.
    #[serde(default = "default_max_sub_workflow_depth")]
    pub max_sub_workflow_depth: u32,

    /// Script timeout in milliseconds. 0 disables the timeout.
    #[serde(default = "default_script_timeout_ms")]
    pub script_timeout_ms: u64,

    /// Operation budget per script run. 0 leaves scripts unbounded.
    #[serde(default)]
    pub script_max_operations: u64,

    /// Capacity of the lifecycle event broadcast channel.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_max_iterations() -> u32 {
    100
}

fn default_max_sub_workflow_depth() -> u32 {
    5
}

fn default_script_timeout_ms() -> u64 {
    30_000
}

fn default_event_capacity() -> usize {
    1024
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_max_retries: default_max_retries(),
            default_retry_delay_ms: default_retry_delay_ms(),
            default_max_iterations: default_max_iterations(),
            max_sub_workflow_depth: default_max_sub_workflow_depth(),
            script_timeout_ms: default_script_timeout_ms(),
            script_max_operations: 0,
            event_capacity: default_event_capacity(),
        }
    }
}

impl EngineConfig {
    /// Script timeout, or `None` when disabled.
    pub fn script_timeout(&self) -> Option<std::time::Duration> {
        (self.script_timeout_ms > 0).then(|| std::time::Duration::from_millis(self.script_timeout_ms))
    }
}
