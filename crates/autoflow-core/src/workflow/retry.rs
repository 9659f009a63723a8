//! Retry handling for step execution.
//!
//! Stateless: a step's `RetryPolicy` is resolved against the engine defaults
//! into a `RetrySchedule`, and the step runner asks `RetryHandler` whether a
//! failed attempt should be re-run.

use std::time::Duration;

use autoflow_types::config::EngineConfig;
use autoflow_types::workflow::RetryPolicy;

use super::step_runner::StepError;

/// Retry parameters for one step, with engine defaults applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrySchedule {
    /// Attempts allowed after the first.
    pub max_retries: u32,
    pub delay: Duration,
}

/// Stateless retry handler for step failures.
pub struct RetryHandler;

impl RetryHandler {
    /// Resolve a step's policy. `None` when retry is absent or disabled.
    pub fn schedule(policy: Option<&RetryPolicy>, config: &EngineConfig) -> Option<RetrySchedule> {
        let policy = policy.filter(|p| p.enabled)?;
        Some(RetrySchedule {
            max_retries: policy.max_retries.unwrap_or(config.default_max_retries),
            delay: Duration::from_millis(policy.delay.unwrap_or(config.default_retry_delay_ms)),
        })
    }

    /// Whether another attempt should run after `retries_done` retries failed.
    ///
    /// Cancellation is never retried.
    pub fn should_retry(schedule: &RetrySchedule, retries_done: u32, error: &StepError) -> bool {
        error.is_retryable() && retries_done < schedule.max_retries
    }
}
