//! Retry policy for the read path
//!
//! Exponential backoff with an optional jitter. Only fetches go through
//! here; writes are never retried since that could repeat a side effect.

use std::future::Future;
use std::time::Duration;

use cache_system::CacheKey;
use config::QueryConfig;
use rand::Rng;
use tracing::{debug, warn};

/// Final failure of a retried operation
#[derive(Debug)]
pub struct RetryFailure {
    pub error: anyhow::Error,
    /// Attempts made, including the first
    pub attempts: u32,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
    jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&QueryConfig::default())
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_retries,
            initial_backoff,
            max_backoff: max_backoff.max(initial_backoff),
            jitter: false,
        }
    }

    pub fn from_config(config: &QueryConfig) -> Self {
        Self::new(
            config.max_retries,
            Duration::from_millis(config.initial_backoff_ms),
            Duration::from_millis(config.max_backoff_ms),
        )
        .with_jitter(config.jitter)
    }

    /// Single attempt, no retries
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO, Duration::ZERO)
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Delay before retry number `retry` (0-based), before jitter
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry);
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }

    fn delay_for(&self, retry: u32) -> Duration {
        let delay = self.backoff_for(retry);
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        let millis = delay.as_millis() as u64;
        Duration::from_millis(rand::rng().random_range(millis / 2..=millis))
    }

    /// Run `operation` until it succeeds or the retry budget is spent
    pub async fn run<F, Fut, T>(&self, key: &CacheKey, mut operation: F) -> Result<T, RetryFailure>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match operation().await {
                Ok(value) => {
                    if attempts > 1 {
                        debug!(key = %key, attempts, "Fetch succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(error) if attempts > self.max_retries => {
                    warn!(key = %key, attempts, error = %error, "Fetch failed, retries exhausted");
                    return Err(RetryFailure { error, attempts });
                }
                Err(error) => {
                    let delay = self.delay_for(attempts - 1);
                    warn!(
                        key = %key,
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Fetch failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
