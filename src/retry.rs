// src/retry.rs
//! Bounded-backoff retry policy.
//!
//! Applied by the orchestrator to exactly one step: the idempotent document
//! store `put`. Conflicts and integrity violations are never retried; they
//! are terminal for the current call and must reach the caller.

use crate::error::StoreError;
use log::warn;
use std::future::Future;
use std::time::Duration;

/// Exponential backoff with a capped delay and a fixed attempt budget.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Backoff delay before retry number `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .map(|d| d.min(self.max_delay))
            .unwrap_or(self.max_delay)
    }

    /// Runs an idempotent operation, retrying transport failures.
    ///
    /// Only [`StoreError::Store`] is retried; any other error is returned
    /// immediately. The last transport error is returned once the attempt
    /// budget is exhausted.
    pub async fn run<F, Fut, T>(&self, mut operation: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut last_err = None;
        for attempt in 0..attempts {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err @ StoreError::Store(_)) => {
                    warn!(
                        "store operation failed (attempt {}/{}): {}",
                        attempt + 1,
                        attempts,
                        err
                    );
                    last_err = Some(err);
                    if attempt + 1 < attempts {
                        tokio::time::sleep(self.delay_for(attempt)).await;
                    }
                }
                Err(err) => return Err(err),
            }
        }
        Err(last_err.unwrap_or_else(|| StoreError::Store("retry budget exhausted".to_string())))
    }
}
