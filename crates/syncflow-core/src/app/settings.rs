//! SyncSettings - 実行時の設定
//!
//! JSON ファイルから読む。全フィールドに既定値があるので、
//! 変えたい項目だけを書けばよい。
//!
//! ```json
//! { "rate_limit": { "max_calls": 200 }, "dependency_failure_policy": "skip_dependents" }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::SyncError;
use crate::sync::{DependencyFailurePolicy, RateLimiter, RetryPolicy};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    pub max_calls: usize,
    pub window_secs: u64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            max_calls: 120,
            window_secs: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 2000,
        }
    }
}

/// Where `by_stock` tasks read their stock codes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StockUniverseSettings {
    pub table: String,
    pub column: String,
}

impl Default for StockUniverseSettings {
    fn default() -> Self {
        Self {
            table: "sync_stock_basic".into(),
            column: "ts_code".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    pub rate_limit: RateLimitSettings,
    pub retry: RetrySettings,
    pub api_timeout_secs: u64,
    /// Upper bound of tasks running at once inside one layer.
    pub max_concurrency: Option<usize>,
    pub dependency_failure_policy: DependencyFailurePolicy,
    pub default_stock_batch_size: usize,
    pub stock_universe: StockUniverseSettings,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            rate_limit: RateLimitSettings::default(),
            retry: RetrySettings::default(),
            api_timeout_secs: 30,
            max_concurrency: None,
            dependency_failure_policy: DependencyFailurePolicy::default(),
            default_stock_batch_size: 50,
            stock_universe: StockUniverseSettings::default(),
        }
    }
}

impl SyncSettings {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SyncError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| SyncError::Config(format!("{}: {e}", path.display())))?;
        let settings: SyncSettings =
            serde_json::from_str(&content).map_err(|e| SyncError::Config(format!("{}: {e}", path.display())))?;
        settings.check()?;
        Ok(settings)
    }

    /// Reject values the engine cannot run with.
    pub fn check(&self) -> Result<(), SyncError> {
        if self.rate_limit.max_calls == 0 || self.rate_limit.window_secs == 0 {
            return Err(SyncError::Config("rate_limit needs max_calls > 0 and window_secs > 0".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(SyncError::Config("retry.max_attempts must be at least 1".into()));
        }
        if self.api_timeout_secs == 0 {
            return Err(SyncError::Config("api_timeout_secs must be positive".into()));
        }
        if self.default_stock_batch_size == 0 {
            return Err(SyncError::Config("default_stock_batch_size must be positive".into()));
        }
        Ok(())
    }

    pub fn rate_limiter(&self) -> RateLimiter {
        RateLimiter::new(self.rate_limit.max_calls, Duration::from_secs(self.rate_limit.window_secs))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry.max_attempts, Duration::from_millis(self.retry.base_delay_ms))
    }

    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.api_timeout_secs)
    }
}
