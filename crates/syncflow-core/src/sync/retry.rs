//! Retry policy: bounded attempts with exponential backoff.

use std::fmt;
use std::future::Future;
use std::time::Duration;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(2);

/// Retry policy for fallible operations.
///
/// Every error is retried until `max_attempts` is reached; the backoff sleep
/// only suspends the retrying task.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total tries, the first one included.
    pub max_attempts: u32,

    /// Delay before the first retry.
    pub base_delay: Duration,

    /// Backoff multiplier for exponential backoff.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, DEFAULT_BASE_DELAY)
    }
}

/// Terminal failure: every attempt failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryExhausted<E> {
    pub attempts: u32,
    pub last_error: E,
}

impl<E: fmt::Display> fmt::Display for RetryExhausted<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gave up after {} attempt(s): {}", self.attempts, self.last_error)
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for RetryExhausted<E> {}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            multiplier: 2.0,
        }
    }

    /// No retries; handy where a caller wants a single shot.
    pub fn once() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Delay before retry number `retry` (1-indexed).
    ///
    /// delay = base_delay * multiplier^(retry - 1); with base_delay=2s:
    /// - retry 1: 2s
    /// - retry 2: 4s
    /// - retry 3: 8s
    pub fn next_delay(&self, retry: u32) -> Duration {
        let base_secs = self.base_delay.as_secs_f64();
        let delay_secs = base_secs * self.multiplier.powi(retry.saturating_sub(1) as i32);
        Duration::from_secs_f64(delay_secs)
    }

    /// Run `op` until it succeeds or attempts run out.
    ///
    /// `op` receives the 1-indexed attempt number.
    pub async fn execute<T, E, F, Fut>(&self, mut op: F) -> Result<T, RetryExhausted<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if attempt >= self.max_attempts => {
                    tracing::error!(attempts = attempt, error = %err, "all attempts failed");
                    return Err(RetryExhausted {
                        attempts: attempt,
                        last_error: err,
                    });
                }
                Err(err) => {
                    let delay = self.next_delay(attempt);
                    tracing::warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
