//! CheckpointStore: per-task cursor and the append-only run history.
//!
//! # 設計原則
//! - Checkpoint と RunLog の書き込みはこの store だけが行う
//! - 同じ task_id への commit は直列化する（task ごとの Mutex）
//! - 異なる task_id 同士はロックを共有しない
//! - 日付カーソルは後退しない（古い日付の backfill で checkpoint は戻らない）

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{Mutex, OnceCell};

use crate::domain::dates::parse_date;
use crate::domain::{Checkpoint, ColumnDef, Row, RunLog, SyncError, TableSchema};
use crate::ports::{Storage, StorageError};

pub const CHECKPOINT_TABLE: &str = "sync_checkpoint";
pub const RUN_LOG_TABLE: &str = "sync_run_log";

fn schema(columns: &[(&str, &str)]) -> TableSchema {
    columns
        .iter()
        .map(|(name, ty)| (name.to_string(), ColumnDef::new(*ty)))
        .collect()
}

fn to_row<T: Serialize>(value: &T) -> Result<Row, StorageError> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(StorageError::Backend(format!("expected an object row, got {other}"))),
    }
}

fn from_row<T: DeserializeOwned>(row: Row) -> Result<T, StorageError> {
    Ok(serde_json::from_value(Value::Object(row))?)
}

fn task_filter(task_id: &str) -> Row {
    let mut filter = Row::new();
    filter.insert("task_id".into(), Value::String(task_id.to_string()));
    filter
}

/// Later of two cursors when both are dates, otherwise the new one.
fn advance(current: Option<&str>, next: &str) -> String {
    match current {
        Some(cur) if parse_date(cur).is_some() && parse_date(next).is_some() && cur > next => cur.to_string(),
        _ => next.to_string(),
    }
}

pub struct CheckpointStore {
    storage: Arc<dyn Storage>,
    tables_ready: OnceCell<()>,
    task_locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl CheckpointStore {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            tables_ready: OnceCell::new(),
            task_locks: StdMutex::new(HashMap::new()),
        }
    }

    async fn ensure_tables(&self) -> Result<(), SyncError> {
        self.tables_ready
            .get_or_try_init(|| async {
                let tables = [
                    (
                        CHECKPOINT_TABLE,
                        schema(&[
                            ("task_id", "SYMBOL"),
                            ("last_synced_cursor", "STRING"),
                            ("updated_at", "TIMESTAMP"),
                        ]),
                        vec!["task_id".to_string()],
                    ),
                    (
                        RUN_LOG_TABLE,
                        schema(&[
                            ("log_id", "SYMBOL"),
                            ("task_id", "SYMBOL"),
                            ("run_date", "STRING"),
                            ("rows_affected", "LONG"),
                            ("status", "SYMBOL"),
                            ("error_message", "STRING"),
                            ("created_at", "TIMESTAMP"),
                        ]),
                        vec!["log_id".to_string()],
                    ),
                ];
                for (name, schema, pks) in tables {
                    if self.storage.table_exists(name).await? {
                        continue;
                    }
                    match self.storage.create_table(name, &schema, &pks).await {
                        Ok(()) | Err(StorageError::TableExists(_)) => {}
                        Err(e) => return Err(SyncError::from(e)),
                    }
                }
                Ok(())
            })
            .await
            .map(|_| ())
    }

    fn lock_for(&self, task_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.task_locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(task_id.to_string()).or_default().clone()
    }

    pub async fn get(&self, task_id: &str) -> Result<Option<Checkpoint>, SyncError> {
        self.ensure_tables().await?;
        let rows = self.storage.query(CHECKPOINT_TABLE, &task_filter(task_id)).await?;
        match rows.into_iter().next() {
            Some(row) => Ok(Some(from_row(row)?)),
            None => Ok(None),
        }
    }

    /// Advance the checkpoint to `cursor` (if any) and append `log`.
    ///
    /// The checkpoint is written before the log so a crash in between leaves
    /// the task resumable from the new point with a missing history entry,
    /// never the reverse.
    pub async fn commit_success(&self, log: &RunLog, cursor: Option<&str>) -> Result<Option<Checkpoint>, SyncError> {
        self.ensure_tables().await?;
        let lock = self.lock_for(&log.task_id);
        let _guard = lock.lock().await;

        let mut checkpoint = None;
        if let Some(cursor) = cursor {
            let current = self.get(&log.task_id).await?;
            let next = Checkpoint {
                task_id: log.task_id.clone(),
                last_synced_cursor: advance(current.as_ref().map(|c| c.last_synced_cursor.as_str()), cursor),
                updated_at: log.created_at,
            };
            let pks = ["task_id".to_string()];
            self.storage.upsert(CHECKPOINT_TABLE, &[to_row(&next)?], &pks).await?;
            tracing::info!(task_id = %log.task_id, cursor = %next.last_synced_cursor, "checkpoint advanced");
            checkpoint = Some(next);
        }
        self.append_log(log).await?;
        Ok(checkpoint)
    }

    /// Append a history entry without touching the checkpoint.
    pub async fn append_log(&self, log: &RunLog) -> Result<(), SyncError> {
        self.ensure_tables().await?;
        let pks = ["log_id".to_string()];
        self.storage.upsert(RUN_LOG_TABLE, &[to_row(log)?], &pks).await?;
        tracing::debug!(
            task_id = %log.task_id,
            status = log.status.as_str(),
            rows = log.rows_affected,
            "run log appended"
        );
        Ok(())
    }

    /// Most recent entries first.
    pub async fn history(&self, task_id: &str, limit: usize) -> Result<Vec<RunLog>, SyncError> {
        self.ensure_tables().await?;
        let rows = self.storage.query(RUN_LOG_TABLE, &task_filter(task_id)).await?;
        let mut logs = rows
            .into_iter()
            .map(from_row::<RunLog>)
            .collect::<Result<Vec<_>, _>>()?;
        logs.sort_by(|a, b| (b.created_at, &b.log_id).cmp(&(a.created_at, &a.log_id)));
        logs.truncate(limit);
        Ok(logs)
    }

    pub async fn last_run(&self, task_id: &str) -> Result<Option<RunLog>, SyncError> {
        Ok(self.history(task_id, 1).await?.into_iter().next())
    }

    /// Remove the checkpoint of a deleted task. The history stays.
    pub async fn delete(&self, task_id: &str) -> Result<bool, SyncError> {
        self.ensure_tables().await?;
        let lock = self.lock_for(task_id);
        let _guard = lock.lock().await;
        let removed = self.storage.delete(CHECKPOINT_TABLE, &task_filter(task_id)).await?;
        Ok(removed > 0)
    }
}
