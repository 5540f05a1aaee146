//! JsonFileStorage - ディレクトリに 1 テーブル 1 JSON ファイルで保存する行ストア
//!
//! # 実装詳細
//! - 読み書きは InMemoryStorage に任せ、変更のたびにそのテーブルのファイルを書き直す
//! - 書き込みは一時ファイル + rename（途中で落ちても古い内容が残る）
//! - CLI のように 1 プロセスずつ使う前提（複数プロセスからの同時書き込みは想定しない）

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{Row, TableSchema};
use crate::ports::{Storage, StorageError};

use super::inmem_storage::{InMemoryStorage, Table};

const EXTENSION: &str = "json";

pub struct JsonFileStorage {
    dir: PathBuf,
    inner: InMemoryStorage,
    write_lock: Mutex<()>,
}

fn check_name(name: &str) -> Result<(), StorageError> {
    let ok = !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if ok {
        Ok(())
    } else {
        Err(StorageError::Backend(format!("invalid table name '{name}'")))
    }
}

impl JsonFileStorage {
    /// Open `dir`, creating it if needed, and load every table file in it.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, StorageError> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;

        let inner = InMemoryStorage::new();
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let bytes = tokio::fs::read(&path).await?;
            let table: Table = serde_json::from_slice(&bytes)?;
            tracing::debug!(table = name, rows = table.rows.len(), "table loaded");
            inner.restore(name, table);
        }

        Ok(Self {
            dir,
            inner,
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_of(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.{EXTENSION}"))
    }

    async fn persist(&self, name: &str) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().await;
        let path = self.path_of(name);
        let Some(table) = self.inner.snapshot(name) else {
            // dropped table
            return match tokio::fs::remove_file(&path).await {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
                _ => Ok(()),
            };
        };
        let bytes = serde_json::to_vec_pretty(&table)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

#[async_trait]
impl Storage for JsonFileStorage {
    async fn table_exists(&self, name: &str) -> Result<bool, StorageError> {
        self.inner.table_exists(name).await
    }

    async fn create_table(&self, name: &str, schema: &TableSchema, primary_keys: &[String]) -> Result<(), StorageError> {
        check_name(name)?;
        self.inner.create_table(name, schema, primary_keys).await?;
        self.persist(name).await
    }

    async fn upsert(&self, name: &str, rows: &[Row], primary_keys: &[String]) -> Result<usize, StorageError> {
        let written = self.inner.upsert(name, rows, primary_keys).await?;
        self.persist(name).await?;
        Ok(written)
    }

    async fn query(&self, name: &str, filter: &Row) -> Result<Vec<Row>, StorageError> {
        self.inner.query(name, filter).await
    }

    async fn delete(&self, name: &str, filter: &Row) -> Result<usize, StorageError> {
        let removed = self.inner.delete(name, filter).await?;
        if removed > 0 {
            self.persist(name).await?;
        }
        Ok(removed)
    }

    async fn swap_in(&self, staging: &str, target: &str) -> Result<usize, StorageError> {
        let count = self.inner.swap_in(staging, target).await?;
        self.persist(target).await?;
        self.persist(staging).await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::quotes;

    fn pks() -> Vec<String> {
        vec!["ts_code".into(), "trade_date".into()]
    }

    #[tokio::test]
    async fn tables_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let storage = JsonFileStorage::open(dir.path()).await.unwrap();
            storage.create_table("daily", &TableSchema::new(), &pks()).await.unwrap();
            storage.upsert("daily", &quotes("20240101", 0..4), &pks()).await.unwrap();
        }

        let reopened = JsonFileStorage::open(dir.path()).await.unwrap();
        assert!(reopened.table_exists("daily").await.unwrap());
        assert_eq!(reopened.query("daily", &Row::new()).await.unwrap().len(), 4);
        assert!(dir.path().join("daily.json").exists());
    }

    #[tokio::test]
    async fn deletes_are_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonFileStorage::open(dir.path()).await.unwrap();
        storage.create_table("daily", &TableSchema::new(), &pks()).await.unwrap();
        storage.upsert("daily", &quotes("20240101", 0..4), &pks()).await.unwrap();
        storage.delete("daily", &Row::new()).await.unwrap();

        let reopened = JsonFileStorage::open(dir.path()).await.unwrap();
        assert!(reopened.query("daily", &Row::new()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn swapped_table_is_persisted_and_staging_file_removed() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonFileStorage::open(dir.path()).await.unwrap();
        storage.create_table("calendar", &TableSchema::new(), &[]).await.unwrap();
        storage.upsert("calendar", &quotes("20240101", 0..3), &[]).await.unwrap();
        storage.create_table("calendar__staging", &TableSchema::new(), &[]).await.unwrap();
        storage.upsert("calendar__staging", &quotes("20240102", 0..1), &[]).await.unwrap();

        storage.swap_in("calendar__staging", "calendar").await.unwrap();

        assert!(!dir.path().join("calendar__staging.json").exists());
        let reopened = JsonFileStorage::open(dir.path()).await.unwrap();
        assert_eq!(reopened.query("calendar", &Row::new()).await.unwrap().len(), 1);
        assert!(!reopened.table_exists("calendar__staging").await.unwrap());
    }

    #[tokio::test]
    async fn path_like_table_names_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonFileStorage::open(dir.path()).await.unwrap();
        let err = storage.create_table("../escape", &TableSchema::new(), &[]).await.unwrap_err();
        assert!(matches!(err, StorageError::Backend(_)));
    }
}
