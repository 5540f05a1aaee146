//! StockUniverse の実装
//!
//! - **StaticUniverse**: 固定の銘柄リスト（テスト・デモ用）
//! - **TableStockUniverse**: 同期済みテーブルの列から銘柄を読む（本番用）
//!
//! どちらも `filter` は部分一致（例: ".SZ" で深証銘柄のみ）。

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::{Row, SyncError};
use crate::ports::{StockUniverse, Storage};

fn apply_filter(codes: impl IntoIterator<Item = String>, filter: Option<&str>) -> Vec<String> {
    codes
        .into_iter()
        .filter(|c| filter.is_none_or(|f| c.contains(f)))
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct StaticUniverse {
    codes: Vec<String>,
}

impl StaticUniverse {
    pub fn new<I, S>(codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            codes: codes.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl StockUniverse for StaticUniverse {
    async fn list_codes(&self, filter: Option<&str>) -> Result<Vec<String>, SyncError> {
        Ok(apply_filter(self.codes.iter().cloned(), filter))
    }
}

/// Reads distinct codes from `table.column`, sorted.
pub struct TableStockUniverse {
    storage: Arc<dyn Storage>,
    table: String,
    column: String,
}

impl TableStockUniverse {
    pub fn new(storage: Arc<dyn Storage>, table: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            storage,
            table: table.into(),
            column: column.into(),
        }
    }
}

#[async_trait]
impl StockUniverse for TableStockUniverse {
    async fn list_codes(&self, filter: Option<&str>) -> Result<Vec<String>, SyncError> {
        if !self.storage.table_exists(&self.table).await? {
            tracing::warn!(table = %self.table, "stock universe table does not exist yet");
            return Ok(Vec::new());
        }
        let rows = self.storage.query(&self.table, &Row::new()).await?;
        let codes: BTreeSet<String> = rows
            .iter()
            .filter_map(|r| r.get(&self.column).and_then(|v| v.as_str()).map(str::to_string))
            .collect();
        Ok(apply_filter(codes, filter))
    }
}
