//! StockUniverse port - by_stock モードで使う銘柄一覧

use async_trait::async_trait;

use crate::domain::SyncError;

#[async_trait]
pub trait StockUniverse: Send + Sync {
    /// Codes in a stable order. `filter` is an implementation-defined selector.
    async fn list_codes(&self, filter: Option<&str>) -> Result<Vec<String>, SyncError>;
}
