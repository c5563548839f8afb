//! Exponential backoff for transient task failures.

use super::{CancellationToken, TaskError};
use crate::domain::ExecutionConfig;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
}

/// Result of an operation together with how many attempts it took.
#[derive(Debug)]
pub struct Attempted<T> {
    pub result: Result<T, TaskError>,
    pub attempts: u32,
}

impl RetryPolicy {
    pub fn from_config(config: &ExecutionConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            multiplier: config.backoff_multiplier,
        }
    }

    /// Delay before retry number `retry` (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(32) as i32;
        let millis = self.initial_backoff.as_millis() as f64 * self.multiplier.powi(exponent);
        let capped = millis.min(self.max_backoff.as_millis() as f64);
        Duration::from_millis(capped.max(0.0) as u64)
    }

    /// Run `op` until it succeeds, fails permanently, runs out of retries or
    /// the run is cancelled. `op` receives the 1-based attempt number.
    pub fn run<T, F>(&self, cancel: &CancellationToken, mut op: F) -> Attempted<T>
    where
        F: FnMut(u32) -> Result<T, TaskError>,
    {
        let mut attempt = 1;
        loop {
            match op(attempt) {
                Ok(value) => return Attempted { result: Ok(value), attempts: attempt },
                Err(e) if e.is_transient() && attempt <= self.max_retries && !cancel.is_cancelled() => {
                    let delay = self.backoff(attempt);
                    warn!(attempt, delay_ms = delay.as_millis() as u64, "transient failure, retrying: {e}");
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                Err(e) => return Attempted { result: Err(e), attempts: attempt },
            }
        }
    }
}
