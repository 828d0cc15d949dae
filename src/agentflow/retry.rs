//! Retry with exponential backoff for activity-layer operations.
//!
//! Activities are at-least-once: transient failures (transport errors,
//! provider 5xx) are retried with exponential backoff and jitter, while
//! configuration and validation errors fail immediately.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;

use crate::agentflow::error::AgentError;

/// Backoff configuration for one class of activity.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Ceiling on the computed delay.
    pub max_delay: Duration,
    /// Exponential multiplier per retry.
    pub backoff_multiplier: f64,
    /// Random jitter fraction (0.0 to 1.0) applied around the delay.
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Delay for the given zero-based retry attempt, jittered.
    fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.initial_delay.as_millis() as f64;
        let exponential = base_ms * self.backoff_multiplier.powi(attempt as i32);
        let capped = exponential.min(self.max_delay.as_millis() as f64);

        let jitter_range = capped * self.jitter_factor;
        let jitter = rand::random::<f64>() * jitter_range;
        let final_delay = capped + jitter - jitter_range / 2.0;

        Duration::from_millis(final_delay.max(0.0) as u64)
    }

    /// Run `operation` until it succeeds, fails non-retryably, or attempts
    /// run out. The last error is returned when retries exhaust.
    pub async fn run<T, F, Fut>(&self, label: &str, operation: F) -> Result<T, AgentError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, AgentError>>,
    {
        let mut last_error = None;

        for attempt in 0..self.max_attempts {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    log::warn!(
                        "{} failed (attempt {}/{}): {}",
                        label,
                        attempt + 1,
                        self.max_attempts,
                        e
                    );
                    last_error = Some(e);
                    if attempt + 1 < self.max_attempts {
                        sleep(self.calculate_delay(attempt)).await;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| AgentError::Fatal(format!("{}: no attempts ran", label))))
    }
}
