//! Exponential backoff with jitter for transient transport failures

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{error, warn};

use crate::config::RetryConfig;
use crate::error::TransportError;

/// Upper bound of the random delay added to each backoff
pub const DEFAULT_MAX_JITTER: Duration = Duration::from_secs(1);

/// How many times to attempt a call and how long to wait in between
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: config.base_delay,
            max_delay: config.max_delay,
            max_jitter: DEFAULT_MAX_JITTER,
        }
    }

    /// Delay before the retry that follows attempt `attempt` (0-indexed)
    ///
    /// `jitter` is a fraction in `[0, 1]` of `max_jitter`. The result is
    /// `min(base_delay * 2^attempt + jitter, max_delay)`.
    pub fn delay_for(&self, attempt: u32, jitter: f64) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(31));
        let backoff = self.base_delay.saturating_mul(factor);
        let jitter = self.max_jitter.mul_f64(jitter.clamp(0.0, 1.0));
        backoff.saturating_add(jitter).min(self.max_delay)
    }

    fn next_delay(&self, attempt: u32) -> Duration {
        let jitter: f64 = rand::thread_rng().gen_range(0.0..=1.0);
        self.delay_for(attempt, jitter)
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out
    ///
    /// Only [`TransportError::is_retryable`] errors are retried. Sleeping
    /// uses `tokio::time`, so a paused test clock advances through it.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, TransportError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt + 1 < self.max_attempts => {
                    let delay = self.next_delay(attempt);
                    warn!(
                        operation,
                        attempt = attempt + 1,
                        max_attempts = self.max_attempts,
                        delay = ?delay,
                        error = %e,
                        "Request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    if e.is_retryable() {
                        error!(
                            operation,
                            attempts = attempt + 1,
                            error = %e,
                            "Request failed, retries exhausted"
                        );
                    }
                    return Err(e);
                }
            }
        }
    }
}
