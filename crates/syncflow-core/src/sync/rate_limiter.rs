//! Sliding-window rate limiter shared by every task of a process.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{Instant, sleep_until};

/// Admits at most `max_calls` acquisitions per rolling `window`.
///
/// The window of recent call times sits behind one async mutex. A caller that
/// finds the window full keeps the lock while it sleeps, so waiters are
/// admitted in arrival order and two callers can never both take the last
/// slot.
#[derive(Debug)]
pub struct RateLimiter {
    max_calls: usize,
    window: Duration,
    calls: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(max_calls: usize, window: Duration) -> Self {
        let max_calls = max_calls.max(1);
        Self {
            max_calls,
            window,
            calls: Mutex::new(VecDeque::with_capacity(max_calls)),
        }
    }

    /// `calls_per_minute` style constructor.
    pub fn per_minute(calls: usize) -> Self {
        Self::new(calls, Duration::from_secs(60))
    }

    pub fn max_calls(&self) -> usize {
        self.max_calls
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Wait until a call slot is free, then take it.
    pub async fn acquire(&self) {
        let mut calls = self.calls.lock().await;
        loop {
            let now = Instant::now();
            while let Some(&oldest) = calls.front() {
                if now.duration_since(oldest) >= self.window {
                    calls.pop_front();
                } else {
                    break;
                }
            }

            if calls.len() < self.max_calls {
                calls.push_back(now);
                return;
            }

            let Some(&oldest) = calls.front() else {
                continue;
            };
            tracing::debug!(
                max_calls = self.max_calls,
                wait_ms = (oldest + self.window).saturating_duration_since(now).as_millis() as u64,
                "rate limit reached, waiting for a slot"
            );
            sleep_until(oldest + self.window).await;
        }
    }
}
