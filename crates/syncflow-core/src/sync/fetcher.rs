//! Paginated fetch over the rate-limited data API.

use std::sync::Arc;
use std::time::Duration;

use crate::domain::{Params, Row, SyncError};
use crate::ports::{ApiError, DataApi, PageRequest};

use super::cancel::CancelSignal;
use super::rate_limiter::RateLimiter;
use super::retry::RetryPolicy;

pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// One page and whether it ends the data set.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub rows: Vec<Row>,
    pub is_last: bool,
}

impl Page {
    /// A page is the last one when it is empty or shorter than requested.
    fn new(rows: Vec<Row>, page_size: usize) -> Self {
        let is_last = rows.len() < page_size;
        Self { rows, is_last }
    }
}

/// Calls the data API page by page and merges the pages in order.
///
/// Every call goes through the shared [`RateLimiter`], is bounded by
/// `call_timeout` and is retried by the [`RetryPolicy`]; a timeout is just
/// another retryable failure.
#[derive(Clone)]
pub struct PaginatedFetcher {
    api: Arc<dyn DataApi>,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
    call_timeout: Duration,
}

impl PaginatedFetcher {
    pub fn new(api: Arc<dyn DataApi>, limiter: Arc<RateLimiter>, retry: RetryPolicy) -> Self {
        Self {
            api,
            limiter,
            retry,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    /// Fetch everything for `params`.
    ///
    /// With `page_size = None` this is exactly one unbounded call. Otherwise
    /// offsets advance by `page_size` until a short (or empty) page arrives.
    /// Cancellation is checked between pages, never inside one.
    pub async fn fetch_all(
        &self,
        endpoint: &str,
        params: &Params,
        page_size: Option<usize>,
        cancel: &CancelSignal,
    ) -> Result<Vec<Row>, SyncError> {
        let Some(page_size) = page_size else {
            return self.call(endpoint, params, None).await;
        };

        let mut merged = Vec::new();
        let mut offset = 0;
        let mut pages = 0u32;
        loop {
            let page = self.fetch_page(endpoint, params, page_size, offset).await?;
            pages += 1;
            let fetched = page.rows.len();
            merged.extend(page.rows);
            if page.is_last {
                break;
            }
            if cancel.is_cancelled() {
                tracing::info!(endpoint, offset, "cancelled between pages");
                return Err(SyncError::Cancelled);
            }
            offset += fetched;
        }

        tracing::debug!(endpoint, pages, rows = merged.len(), "paginated fetch finished");
        Ok(merged)
    }

    /// One page at `offset`; `is_last` signals end-of-data.
    pub async fn fetch_page(
        &self,
        endpoint: &str,
        params: &Params,
        page_size: usize,
        offset: usize,
    ) -> Result<Page, SyncError> {
        let page = PageRequest {
            limit: page_size,
            offset,
        };
        let rows = self.call(endpoint, params, Some(page)).await?;
        tracing::debug!(endpoint, offset, rows = rows.len(), "page fetched");
        Ok(Page::new(rows, page_size))
    }

    async fn call(&self, endpoint: &str, params: &Params, page: Option<PageRequest>) -> Result<Vec<Row>, SyncError> {
        let api = &self.api;
        let limiter = &self.limiter;
        let call_timeout = self.call_timeout;

        self.retry
            .execute(|_attempt| async move {
                limiter.acquire().await;
                match tokio::time::timeout(call_timeout, api.call(endpoint, params, page)).await {
                    Ok(result) => result,
                    Err(_) => Err(ApiError::Timeout(call_timeout)),
                }
            })
            .await
            .map_err(|exhausted| SyncError::TransientFetch {
                endpoint: endpoint.to_string(),
                attempts: exhausted.attempts,
                source: exhausted.last_error,
            })
    }
}
