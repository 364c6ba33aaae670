//! Exponential backoff for transient inference failures.

use std::future::Future;
use std::time::Duration;

use sieve_shared::{InferenceSettings, Result};
use tracing::warn;

/// How many times to try a call and how long to wait in between.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry; doubled for every further retry.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl From<&InferenceSettings> for RetryPolicy {
    fn from(settings: &InferenceSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            base_delay: Duration::from_millis(settings.backoff_base_ms),
        }
    }
}

impl RetryPolicy {
    /// Delay after failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(1u32 << attempt.saturating_sub(1).min(16))
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    /// Only errors for which [`SieveError::is_transient`] holds are retried.
    ///
    /// [`SieveError::is_transient`]: sieve_shared::SieveError::is_transient
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        call = label,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient inference failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
