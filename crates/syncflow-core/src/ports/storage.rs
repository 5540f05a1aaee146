//! Storage port - 行ストア（主キーによる upsert）
//!
//! 同期先テーブルとメタデータテーブル（checkpoint / run log / task config）の
//! 両方がこの trait を通して読み書きされる。
//!
//! # 設計原則
//! - `upsert` は主キーが一致する行を置き換える（insert-or-replace）
//! - `upsert` は実際に書けた行数を返す。呼び出し側は件数の不一致を
//!   部分書き込みとして扱う
//! - `query` は列の等値条件だけをサポートする
//! - `swap_in` は別テーブルに書き上げた行で対象テーブルを丸ごと置き換える。
//!   途中で失敗しても対象テーブルは元の行のまま残る

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{Row, TableSchema};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("table not found: {0}")]
    TableNotFound(String),

    #[error("table already exists: {0}")]
    TableExists(String),

    #[error("row for '{table}' is missing primary key column '{column}'")]
    MissingKey { table: String, column: String },

    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("storage backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait Storage: Send + Sync {
    async fn table_exists(&self, name: &str) -> Result<bool, StorageError>;

    async fn create_table(
        &self,
        name: &str,
        schema: &TableSchema,
        primary_keys: &[String],
    ) -> Result<(), StorageError>;

    /// Insert-or-replace keyed by `primary_keys`; returns the rows written.
    async fn upsert(&self, name: &str, rows: &[Row], primary_keys: &[String]) -> Result<usize, StorageError>;

    /// Rows whose columns equal every entry of `filter` (empty filter = all rows).
    async fn query(&self, name: &str, filter: &Row) -> Result<Vec<Row>, StorageError>;

    /// Delete rows matching `filter`; returns the number removed.
    async fn delete(&self, name: &str, filter: &Row) -> Result<usize, StorageError>;

    /// Replace every row of `target` with the rows of `staging`, then drop `staging`.
    /// Either all of it happens or none of it; returns the rows now in `target`.
    async fn swap_in(&self, staging: &str, target: &str) -> Result<usize, StorageError>;
}
