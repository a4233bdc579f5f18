//! Retry policy for refresh-token grants.
//!
//! Only failures that [`AuthError::is_transient`] accepts are retried. A
//! provider that rejects the refresh token is asked once. A request that
//! was sent but never answered is not retried either: the provider may
//! have rotated the refresh token before the connection dropped, and a
//! replay of the old one would end the session anyway.

use fitdash_core::AuthError;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Backoff configuration for refresh attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshRetryPolicy {
    /// Maximum number of retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial: Duration,
    /// Upper bound for any single delay.
    pub max: Duration,
}

impl Default for RefreshRetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial: Duration::from_millis(250),
            max: Duration::from_secs(2),
        }
    }
}

impl RefreshRetryPolicy {
    /// Create the default policy.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set max retries.
    #[must_use]
    pub fn max_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }

    /// Use exponential backoff between `initial` and `max`.
    #[must_use]
    pub fn exponential(mut self, initial: Duration, max: Duration) -> Self {
        self.initial = initial;
        self.max = max;
        self
    }

    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self::new().max_retries(0)
    }

    /// Delay before retry number `attempt` (1-indexed).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.initial
            .saturating_mul(1u32 << exponent)
            .min(self.max)
    }

    /// Run `operation` until it succeeds, fails permanently or runs out of
    /// retries.
    pub async fn run<F, Fut, T>(&self, operation: F) -> Result<T, AuthError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, AuthError>>,
    {
        let max_attempts = self.max_retries.saturating_add(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            debug!(attempt, max_attempts, "Executing refresh attempt");

            match operation().await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    if attempt >= max_attempts || !error.is_transient() {
                        warn!(attempt, error = %error, "Refresh failed, not retrying");
                        return Err(error);
                    }

                    let wait = self.delay_for(attempt);
                    debug!(
                        attempt,
                        wait_ms = wait.as_millis() as u64,
                        error = %error,
                        "Waiting before refresh retry"
                    );
                    sleep(wait).await;
                }
            }
        }
    }
}
