//! InMemoryStorage - 開発用・テスト用の行ストア
//!
//! # 実装詳細
//! - テーブルごとに `主キー列の値 -> 行` の BTreeMap を持つ（順序は主キー順）
//! - upsert は同じ主キーの行を丸ごと置き換える
//! - 主キーのないテーブルへの upsert は追記になる
//! - 書き込み失敗・部分書き込みをテーブル単位で注入できる

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{Row, TableSchema};
use crate::ports::{Storage, StorageError};

const KEY_SEPARATOR: char = '\u{1f}';

/// One table: its declaration and rows keyed by primary key.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Table {
    pub schema: TableSchema,
    pub primary_keys: Vec<String>,
    pub rows: BTreeMap<String, Row>,
    /// Sequence for rows of a keyless table.
    #[serde(default)]
    pub next_row: u64,
}

impl Table {
    fn key_of(&self, table: &str, row: &Row, keys: &[String]) -> Result<String, StorageError> {
        let mut parts = Vec::with_capacity(keys.len());
        for column in keys {
            let value = row.get(column).ok_or_else(|| StorageError::MissingKey {
                table: table.to_string(),
                column: column.clone(),
            })?;
            parts.push(value.to_string());
        }
        Ok(parts.join(&KEY_SEPARATOR.to_string()))
    }
}

fn row_matches(row: &Row, filter: &Row) -> bool {
    filter.iter().all(|(k, v)| row.get(k) == Some(v))
}

/// Injected write fault for one table.
#[derive(Debug, Clone, Copy)]
enum WriteFault {
    Fail,
    /// Only the first `n` rows of every upsert land.
    Cap(usize),
}

#[derive(Default)]
pub struct InMemoryStorage {
    tables: RwLock<HashMap<String, Table>>,
    faults: RwLock<HashMap<String, WriteFault>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every later upsert into `table` fails.
    pub fn fail_writes(&self, table: &str) {
        self.set_fault(table, Some(WriteFault::Fail));
    }

    /// Every later upsert into `table` writes at most `max_rows` rows.
    pub fn cap_writes(&self, table: &str, max_rows: usize) {
        self.set_fault(table, Some(WriteFault::Cap(max_rows)));
    }

    pub fn heal(&self, table: &str) {
        self.set_fault(table, None);
    }

    fn set_fault(&self, table: &str, fault: Option<WriteFault>) {
        let mut faults = self.faults.write().unwrap_or_else(|e| e.into_inner());
        match fault {
            Some(f) => faults.insert(table.to_string(), f),
            None => faults.remove(table),
        };
    }

    fn fault(&self, table: &str) -> Option<WriteFault> {
        self.faults.read().unwrap_or_else(|e| e.into_inner()).get(table).copied()
    }

    /// Row count of `table`, 0 when it does not exist.
    pub fn row_count(&self, table: &str) -> usize {
        self.tables
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(table)
            .map_or(0, |t| t.rows.len())
    }

    pub fn snapshot(&self, table: &str) -> Option<Table> {
        self.tables.read().unwrap_or_else(|e| e.into_inner()).get(table).cloned()
    }

    pub fn restore(&self, name: &str, table: Table) {
        self.tables
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.to_string(), table);
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn table_exists(&self, name: &str) -> Result<bool, StorageError> {
        Ok(self.tables.read().unwrap_or_else(|e| e.into_inner()).contains_key(name))
    }

    async fn create_table(&self, name: &str, schema: &TableSchema, primary_keys: &[String]) -> Result<(), StorageError> {
        let mut tables = self.tables.write().unwrap_or_else(|e| e.into_inner());
        if tables.contains_key(name) {
            return Err(StorageError::TableExists(name.to_string()));
        }
        tables.insert(
            name.to_string(),
            Table {
                schema: schema.clone(),
                primary_keys: primary_keys.to_vec(),
                rows: BTreeMap::new(),
                next_row: 0,
            },
        );
        Ok(())
    }

    async fn upsert(&self, name: &str, rows: &[Row], primary_keys: &[String]) -> Result<usize, StorageError> {
        let limit = match self.fault(name) {
            Some(WriteFault::Fail) => {
                return Err(StorageError::Backend(format!("write to '{name}' rejected")));
            }
            Some(WriteFault::Cap(n)) => n.min(rows.len()),
            None => rows.len(),
        };

        let mut tables = self.tables.write().unwrap_or_else(|e| e.into_inner());
        let table = tables
            .get_mut(name)
            .ok_or_else(|| StorageError::TableNotFound(name.to_string()))?;

        let keys = if primary_keys.is_empty() {
            table.primary_keys.clone()
        } else {
            primary_keys.to_vec()
        };
        if keys.is_empty() {
            for row in &rows[..limit] {
                let key = format!("#{:020}", table.next_row);
                table.next_row += 1;
                table.rows.insert(key, row.clone());
            }
            return Ok(limit);
        }

        // validate every key first so a bad row leaves the table untouched
        let keyed = rows[..limit]
            .iter()
            .map(|row| table.key_of(name, row, &keys).map(|k| (k, row.clone())))
            .collect::<Result<Vec<_>, _>>()?;
        for (key, row) in keyed {
            table.rows.insert(key, row);
        }
        Ok(limit)
    }

    async fn query(&self, name: &str, filter: &Row) -> Result<Vec<Row>, StorageError> {
        let tables = self.tables.read().unwrap_or_else(|e| e.into_inner());
        let table = tables
            .get(name)
            .ok_or_else(|| StorageError::TableNotFound(name.to_string()))?;
        Ok(table.rows.values().filter(|r| row_matches(r, filter)).cloned().collect())
    }

    async fn delete(&self, name: &str, filter: &Row) -> Result<usize, StorageError> {
        let mut tables = self.tables.write().unwrap_or_else(|e| e.into_inner());
        let table = tables
            .get_mut(name)
            .ok_or_else(|| StorageError::TableNotFound(name.to_string()))?;
        let before = table.rows.len();
        table.rows.retain(|_, r| !row_matches(r, filter));
        Ok(before - table.rows.len())
    }

    async fn swap_in(&self, staging: &str, target: &str) -> Result<usize, StorageError> {
        if let Some(WriteFault::Fail) = self.fault(target) {
            return Err(StorageError::Backend(format!("write to '{target}' rejected")));
        }

        let mut tables = self.tables.write().unwrap_or_else(|e| e.into_inner());
        if !tables.contains_key(target) {
            return Err(StorageError::TableNotFound(target.to_string()));
        }
        let staged = tables
            .remove(staging)
            .ok_or_else(|| StorageError::TableNotFound(staging.to_string()))?;
        let count = staged.rows.len();
        if let Some(table) = tables.get_mut(target) {
            table.rows = staged.rows;
            table.next_row = staged.next_row;
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::quotes;
    use serde_json::json;

    fn pks() -> Vec<String> {
        vec!["ts_code".into(), "trade_date".into()]
    }

    async fn storage_with_table() -> InMemoryStorage {
        let storage = InMemoryStorage::new();
        storage.create_table("daily", &TableSchema::new(), &pks()).await.unwrap();
        storage
    }

    #[tokio::test]
    async fn upsert_replaces_rows_with_the_same_key() {
        let storage = storage_with_table().await;
        storage.upsert("daily", &quotes("20240101", 0..3), &pks()).await.unwrap();

        let mut changed = quotes("20240101", 0..1);
        changed[0].insert("close".into(), json!(99.0));
        storage.upsert("daily", &changed, &pks()).await.unwrap();

        assert_eq!(storage.row_count("daily"), 3);
        let mut filter = Row::new();
        filter.insert("ts_code".into(), json!("000000.SZ"));
        let got = storage.query("daily", &filter).await.unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0]["close"], json!(99.0));
    }

    #[tokio::test]
    async fn missing_key_column_writes_nothing() {
        let storage = storage_with_table().await;
        let mut rows = quotes("20240101", 0..2);
        rows[1].remove("trade_date");

        let err = storage.upsert("daily", &rows, &pks()).await.unwrap_err();
        assert!(matches!(err, StorageError::MissingKey { .. }));
        assert_eq!(storage.row_count("daily"), 0);
    }

    #[tokio::test]
    async fn upsert_into_unknown_table_fails() {
        let storage = InMemoryStorage::new();
        let err = storage.upsert("nope", &quotes("20240101", 0..1), &pks()).await.unwrap_err();
        assert!(matches!(err, StorageError::TableNotFound(_)));
    }

    #[tokio::test]
    async fn capped_writes_report_the_short_count() {
        let storage = storage_with_table().await;
        storage.cap_writes("daily", 2);
        let written = storage.upsert("daily", &quotes("20240101", 0..5), &pks()).await.unwrap();
        assert_eq!(written, 2);

        storage.heal("daily");
        let written = storage.upsert("daily", &quotes("20240101", 0..5), &pks()).await.unwrap();
        assert_eq!(written, 5);
    }

    #[tokio::test]
    async fn keyless_table_appends() {
        let storage = InMemoryStorage::new();
        storage.create_table("calendar", &TableSchema::new(), &[]).await.unwrap();
        storage.upsert("calendar", &quotes("20240101", 0..2), &[]).await.unwrap();
        storage.upsert("calendar", &quotes("20240101", 0..2), &[]).await.unwrap();
        assert_eq!(storage.row_count("calendar"), 4);
    }

    #[tokio::test]
    async fn swap_in_replaces_target_and_drops_staging() {
        let storage = InMemoryStorage::new();
        storage.create_table("calendar", &TableSchema::new(), &[]).await.unwrap();
        storage.upsert("calendar", &quotes("20240101", 0..3), &[]).await.unwrap();
        storage.create_table("calendar__staging", &TableSchema::new(), &[]).await.unwrap();
        storage.upsert("calendar__staging", &quotes("20240102", 0..2), &[]).await.unwrap();

        assert_eq!(storage.swap_in("calendar__staging", "calendar").await.unwrap(), 2);

        let rows = storage.query("calendar", &Row::new()).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r["trade_date"] == json!("20240102")));
        assert!(!storage.table_exists("calendar__staging").await.unwrap());
    }

    #[tokio::test]
    async fn failed_swap_keeps_both_tables() {
        let storage = InMemoryStorage::new();
        storage.create_table("calendar", &TableSchema::new(), &[]).await.unwrap();
        storage.upsert("calendar", &quotes("20240101", 0..3), &[]).await.unwrap();
        storage.create_table("calendar__staging", &TableSchema::new(), &[]).await.unwrap();
        storage.upsert("calendar__staging", &quotes("20240102", 0..2), &[]).await.unwrap();
        storage.fail_writes("calendar");

        let err = storage.swap_in("calendar__staging", "calendar").await.unwrap_err();
        assert!(matches!(err, StorageError::Backend(_)));
        assert_eq!(storage.row_count("calendar"), 3);
        assert_eq!(storage.row_count("calendar__staging"), 2);

        storage.heal("calendar");
        let err = storage.swap_in("nope", "calendar").await.unwrap_err();
        assert!(matches!(err, StorageError::TableNotFound(_)));
        assert_eq!(storage.row_count("calendar"), 3);
    }

    #[tokio::test]
    async fn delete_by_filter() {
        let storage = storage_with_table().await;
        storage.upsert("daily", &quotes("20240101", 0..3), &pks()).await.unwrap();
        storage.upsert("daily", &quotes("20240102", 0..3), &pks()).await.unwrap();

        let mut filter = Row::new();
        filter.insert("trade_date".into(), json!("20240101"));
        assert_eq!(storage.delete("daily", &filter).await.unwrap(), 3);
        assert_eq!(storage.row_count("daily"), 3);
    }
}
