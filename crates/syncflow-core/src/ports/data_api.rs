//! DataApi port - 外部データ API（レート制限あり）
//!
//! # 設計原則
//! - 1 回の呼び出し = 1 ページ（`limit`/`offset` 付き）または無制限の 1 回
//! - 一時的な失敗はすべて `ApiError` で返し、リトライ判断は呼び出し側に任せる
//! - 返る行の順序はそのまま保持される

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{Params, Row};

/// One page window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub limit: usize,
    pub offset: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// Network failure, 5xx, throttling and the like.
    #[error("transient api error: {0}")]
    Transient(String),

    #[error("api call timed out after {0:?}")]
    Timeout(Duration),

    /// The API answered with an error payload.
    #[error("api rejected the request: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait DataApi: Send + Sync {
    /// Call `endpoint` once. `page = None` means a single unbounded call.
    async fn call(
        &self,
        endpoint: &str,
        params: &Params,
        page: Option<PageRequest>,
    ) -> Result<Vec<Row>, ApiError>;
}
