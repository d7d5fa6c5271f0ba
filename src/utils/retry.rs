//! Retry with exponential backoff.

use std::future::Future;
use std::time::Duration;

/// Backoff schedule for retried operations.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    /// Four attempts, waiting 500ms, 1s and 2s between them.
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryConfig {
    /// Delay after the `attempt`-th failure (1-based), doubling each time.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}

/// Run `op` until it succeeds or `config.max_attempts` is exhausted.
/// Returns the last error on failure.
pub async fn retry<T, E, F, Fut>(config: &RetryConfig, label: &str, op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    retry_with_check(config, label, op, |_| true).await
}

/// Like [`retry`], but stops early when `should_retry` rejects the error.
async fn retry_with_check<T, E, F, Fut, C>(
    config: &RetryConfig,
    label: &str,
    mut op: F,
    should_retry: C,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    C: Fn(&E) -> bool,
{
    let attempts = config.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < attempts && should_retry(&e) => {
                let delay = config.delay_for(attempt);
                tracing::warn!(
                    "{} attempt {}/{} failed: {}, retrying in {}ms",
                    label,
                    attempt,
                    attempts,
                    e,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                tracing::error!("{} attempt {}/{} failed: {}, giving up", label, attempt, attempts, e);
                return Err(e);
            }
        }
    }
}
