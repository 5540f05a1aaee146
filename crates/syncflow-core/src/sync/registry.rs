//! TaskConfigRegistry: validated task definitions over the metadata table.
//!
//! # 設計原則
//! - 正本は `sync_task_config` テーブル。registry はその読み取りキャッシュを持つ
//! - 構造化フィールド（params, primary_keys, schema, depends_on）は JSON 文字列の列
//! - 検証に失敗したバッチは 1 件も書き込まない
//! - 書き込みは registry の write lock の中で行う（検証と適用の間に割り込まれない）

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::domain::{
    ColumnDef, Params, Row, Schedule, SyncError, SyncMode, SyncType, TableSchema, TaskConfig, ValidationError,
};
use crate::ports::{Storage, StorageError};

use super::resolver::DependencyGraph;

pub const TASK_CONFIG_TABLE: &str = "sync_task_config";

/// Persisted shape of one config row.
#[derive(Debug, Serialize, Deserialize)]
struct ConfigRecord {
    task_id: String,
    description: String,
    sync_mode: String,
    sync_type: String,
    source_api: String,
    params: String,
    target_table: String,
    primary_keys: String,
    schema: String,
    depends_on: String,
    api_limit: Option<usize>,
    batch_size: usize,
    enabled: bool,
    schedule: String,
    date_field: Option<String>,
    stock_batch_size: Option<usize>,
    stock_filter: Option<String>,
    auto_add_trade_date: bool,
}

impl ConfigRecord {
    fn from_config(config: &TaskConfig) -> Result<Self, StorageError> {
        Ok(Self {
            task_id: config.task_id.clone(),
            description: config.description.clone(),
            sync_mode: config.sync_mode.as_str().to_string(),
            sync_type: config.sync_type.as_str().to_string(),
            source_api: config.source_api.clone(),
            params: serde_json::to_string(&config.params)?,
            target_table: config.target_table.clone(),
            primary_keys: serde_json::to_string(&config.primary_keys)?,
            schema: serde_json::to_string(&config.schema)?,
            depends_on: serde_json::to_string(&config.depends_on)?,
            api_limit: config.api_limit,
            batch_size: config.batch_size,
            enabled: config.enabled,
            schedule: config.schedule.as_str().to_string(),
            date_field: config.date_field.clone(),
            stock_batch_size: config.stock_batch_size,
            stock_filter: config.stock_filter.clone(),
            auto_add_trade_date: config.auto_add_trade_date,
        })
    }

    fn into_config(self) -> Result<TaskConfig, StorageError> {
        let bad = |field: &str, value: &str| {
            StorageError::Backend(format!("task '{}': unknown {field} '{value}'", self.task_id))
        };
        let sync_mode = SyncMode::parse(&self.sync_mode).ok_or_else(|| bad("sync_mode", &self.sync_mode))?;
        let sync_type = SyncType::parse(&self.sync_type).ok_or_else(|| bad("sync_type", &self.sync_type))?;
        let schedule = Schedule::parse(&self.schedule).ok_or_else(|| bad("schedule", &self.schedule))?;
        Ok(TaskConfig {
            params: serde_json::from_str::<Params>(&self.params)?,
            primary_keys: serde_json::from_str(&self.primary_keys)?,
            schema: serde_json::from_str::<BTreeMap<String, ColumnDef>>(&self.schema)?,
            depends_on: serde_json::from_str(&self.depends_on)?,
            task_id: self.task_id,
            description: self.description,
            sync_mode,
            sync_type,
            source_api: self.source_api,
            target_table: self.target_table,
            api_limit: self.api_limit,
            batch_size: self.batch_size,
            enabled: self.enabled,
            schedule,
            date_field: self.date_field,
            stock_batch_size: self.stock_batch_size,
            stock_filter: self.stock_filter,
            auto_add_trade_date: self.auto_add_trade_date,
        })
    }
}

fn table_schema() -> TableSchema {
    [
        ("task_id", "SYMBOL"),
        ("description", "STRING"),
        ("sync_mode", "SYMBOL"),
        ("sync_type", "SYMBOL"),
        ("source_api", "SYMBOL"),
        ("params", "STRING"),
        ("target_table", "SYMBOL"),
        ("primary_keys", "STRING"),
        ("schema", "STRING"),
        ("depends_on", "STRING"),
        ("api_limit", "INT"),
        ("batch_size", "INT"),
        ("enabled", "BOOL"),
        ("schedule", "SYMBOL"),
        ("date_field", "SYMBOL"),
        ("stock_batch_size", "INT"),
        ("stock_filter", "STRING"),
        ("auto_add_trade_date", "BOOL"),
    ]
    .into_iter()
    .map(|(name, ty)| (name.to_string(), ColumnDef::new(ty)))
    .collect()
}

fn id_filter(task_id: &str) -> Row {
    let mut filter = Row::new();
    filter.insert("task_id".into(), Value::String(task_id.to_string()));
    filter
}

type Cache = BTreeMap<String, TaskConfig>;

pub struct TaskConfigRegistry {
    storage: Arc<dyn Storage>,
    cache: RwLock<Option<Cache>>,
}

impl TaskConfigRegistry {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            cache: RwLock::new(None),
        }
    }

    async fn read_table(&self) -> Result<Cache, SyncError> {
        if !self.storage.table_exists(TASK_CONFIG_TABLE).await? {
            return Ok(Cache::new());
        }
        let rows = self.storage.query(TASK_CONFIG_TABLE, &Row::new()).await?;
        let mut cache = Cache::new();
        for row in rows {
            let record: ConfigRecord = serde_json::from_value(Value::Object(row)).map_err(StorageError::from)?;
            let config = record.into_config()?;
            cache.insert(config.task_id.clone(), config);
        }
        Ok(cache)
    }

    async fn ensure_loaded(&self) -> Result<(), SyncError> {
        if self.cache.read().await.is_some() {
            return Ok(());
        }
        let mut cache = self.cache.write().await;
        if cache.is_none() {
            let loaded = self.read_table().await?;
            tracing::info!(tasks = loaded.len(), "task configs loaded");
            *cache = Some(loaded);
        }
        Ok(())
    }

    /// Drop the cache and read the table again.
    pub async fn reload(&self) -> Result<usize, SyncError> {
        let loaded = self.read_table().await?;
        let count = loaded.len();
        *self.cache.write().await = Some(loaded);
        tracing::info!(tasks = count, "task configs reloaded");
        Ok(count)
    }

    /// Every config, ordered by task id.
    pub async fn load_all(&self) -> Result<Vec<TaskConfig>, SyncError> {
        self.ensure_loaded().await?;
        let cache = self.cache.read().await;
        Ok(cache.as_ref().map(|c| c.values().cloned().collect()).unwrap_or_default())
    }

    pub async fn get(&self, task_id: &str) -> Result<TaskConfig, SyncError> {
        self.ensure_loaded().await?;
        let cache = self.cache.read().await;
        cache
            .as_ref()
            .and_then(|c| c.get(task_id))
            .cloned()
            .ok_or_else(|| SyncError::not_found(task_id))
    }

    /// Enabled configs with `schedule`.
    pub async fn by_schedule(&self, schedule: Schedule) -> Result<Vec<TaskConfig>, SyncError> {
        Ok(self
            .load_all()
            .await?
            .into_iter()
            .filter(|t| t.enabled && t.schedule == schedule)
            .collect())
    }

    pub async fn upsert(&self, config: TaskConfig) -> Result<(), SyncError> {
        self.upsert_batch(vec![config]).await
    }

    /// Validate the whole batch against the registry, then write it.
    pub async fn upsert_batch(&self, configs: Vec<TaskConfig>) -> Result<(), SyncError> {
        self.ensure_loaded().await?;
        let mut guard = self.cache.write().await;
        let current = guard.get_or_insert_with(Cache::new);

        let mut merged = current.clone();
        let mut seen = HashSet::new();
        for config in &configs {
            config.validate()?;
            if !seen.insert(config.task_id.as_str()) {
                return Err(ValidationError::new(config.task_id.clone(), "task_id", "appears twice in the batch").into());
            }
            merged.insert(config.task_id.clone(), config.clone());
        }
        for config in &configs {
            if let Some(missing) = config.depends_on.iter().find(|d| !merged.contains_key(*d)) {
                return Err(ValidationError::new(
                    config.task_id.clone(),
                    "depends_on",
                    format!("references unknown task '{missing}'"),
                )
                .into());
            }
        }
        if let Err(SyncError::CyclicDependency { task_ids }) = DependencyGraph::from_configs(merged.values()).layers() {
            let culprit = configs
                .iter()
                .find(|c| task_ids.contains(&c.task_id))
                .map_or_else(|| task_ids[0].clone(), |c| c.task_id.clone());
            return Err(ValidationError::new(
                culprit,
                "depends_on",
                format!("forms a cycle among {}", task_ids.join(", ")),
            )
            .into());
        }

        self.ensure_table().await?;
        let records = configs
            .iter()
            .map(|c| {
                let record = ConfigRecord::from_config(c)?;
                match serde_json::to_value(record)? {
                    Value::Object(row) => Ok(row),
                    _ => Err(StorageError::Backend("config record is not an object".into())),
                }
            })
            .collect::<Result<Vec<Row>, StorageError>>()?;
        let pks = ["task_id".to_string()];
        let written = self.storage.upsert(TASK_CONFIG_TABLE, &records, &pks).await?;
        if written != records.len() {
            return Err(SyncError::PartialWrite {
                table: TASK_CONFIG_TABLE.to_string(),
                written,
                expected: records.len(),
            });
        }

        for config in configs {
            tracing::info!(task_id = %config.task_id, mode = %config.sync_mode, "task config saved");
            current.insert(config.task_id.clone(), config);
        }
        Ok(())
    }

    /// Remove a config. Rejected while other tasks depend on it.
    pub async fn delete(&self, task_id: &str) -> Result<TaskConfig, SyncError> {
        self.ensure_loaded().await?;
        let mut guard = self.cache.write().await;
        let current = guard.get_or_insert_with(Cache::new);

        if !current.contains_key(task_id) {
            return Err(SyncError::not_found(task_id));
        }
        let dependents: Vec<&str> = current
            .values()
            .filter(|c| c.depends_on.iter().any(|d| d == task_id))
            .map(|c| c.task_id.as_str())
            .collect();
        if !dependents.is_empty() {
            return Err(ValidationError::new(
                task_id,
                "depends_on",
                format!("still required by {}", dependents.join(", ")),
            )
            .into());
        }

        self.storage.delete(TASK_CONFIG_TABLE, &id_filter(task_id)).await?;
        let removed = current.remove(task_id).ok_or_else(|| SyncError::not_found(task_id))?;
        tracing::info!(task_id, "task config deleted");
        Ok(removed)
    }

    /// Import a JSON array of configs as one validated batch.
    pub async fn import_file(&self, path: impl AsRef<Path>) -> Result<usize, SyncError> {
        let path = path.as_ref();
        let text = tokio::fs::read_to_string(path).await.map_err(StorageError::from)?;
        let configs: Vec<TaskConfig> = serde_json::from_str(&text)
            .map_err(|e| SyncError::Config(format!("{}: {e}", path.display())))?;
        let count = configs.len();
        self.upsert_batch(configs).await?;
        Ok(count)
    }

    async fn ensure_table(&self) -> Result<(), SyncError> {
        if self.storage.table_exists(TASK_CONFIG_TABLE).await? {
            return Ok(());
        }
        let pks = ["task_id".to_string()];
        match self.storage.create_table(TASK_CONFIG_TABLE, &table_schema(), &pks).await {
            Ok(()) | Err(StorageError::TableExists(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::InMemoryStorage;

    fn task(id: &str, deps: &[&str]) -> TaskConfig {
        let mut t = TaskConfig::new(id, SyncMode::ByDate, "daily", format!("sync_{id}"));
        t.primary_keys = vec!["ts_code".into(), "trade_date".into()];
        t.depends_on = deps.iter().map(|d| d.to_string()).collect();
        t
    }

    fn registry() -> (Arc<InMemoryStorage>, TaskConfigRegistry) {
        let storage = Arc::new(InMemoryStorage::new());
        (storage.clone(), TaskConfigRegistry::new(storage))
    }

    #[tokio::test]
    async fn every_field_round_trips_through_storage() {
        let (storage, registry) = registry();
        let mut t = task("daily", &[]);
        t.description = "daily quotes".into();
        t.params.insert("trade_date".into(), "{date}".into());
        t.schema.insert("ts_code".into(), ColumnDef::new("SYMBOL"));
        t.schema.insert("trade_date".into(), ColumnDef::new("DATE"));
        t.api_limit = Some(5000);
        t.schedule = Schedule::Weekly;
        t.date_field = Some("trade_date".into());
        t.stock_filter = Some(".SZ".into());
        registry.upsert(t.clone()).await.unwrap();
        let mut dependent = task("adj", &["daily"]);
        dependent.enabled = false;
        registry.upsert(dependent.clone()).await.unwrap();

        let fresh = TaskConfigRegistry::new(storage);
        assert_eq!(fresh.get("daily").await.unwrap(), t);
        assert_eq!(fresh.get("adj").await.unwrap(), dependent);
    }

    #[tokio::test]
    async fn unknown_task_is_not_found() {
        let (_, registry) = registry();
        assert!(matches!(registry.get("nope").await, Err(SyncError::NotFound { .. })));
    }

    #[tokio::test]
    async fn invalid_config_is_not_applied() {
        let (storage, registry) = registry();
        let mut t = task("daily", &[]);
        t.primary_keys.clear();

        let err = registry.upsert(t).await.unwrap_err();
        assert!(matches!(err, SyncError::Validation(ref v) if v.field == "primary_keys"));
        assert!(registry.load_all().await.unwrap().is_empty());
        assert_eq!(storage.row_count(TASK_CONFIG_TABLE), 0);
    }

    #[tokio::test]
    async fn dependency_must_exist_or_ride_in_the_batch() {
        let (_, registry) = registry();
        let err = registry.upsert(task("adj", &["daily"])).await.unwrap_err();
        assert!(matches!(err, SyncError::Validation(ref v) if v.field == "depends_on"));

        registry
            .upsert_batch(vec![task("adj", &["daily"]), task("daily", &[])])
            .await
            .unwrap();
        assert_eq!(registry.load_all().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn one_bad_config_rejects_the_whole_batch() {
        let (_, registry) = registry();
        let mut bad = task("bad", &[]);
        bad.batch_size = 0;

        assert!(registry.upsert_batch(vec![task("good", &[]), bad]).await.is_err());
        assert!(registry.load_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn cycle_is_rejected_as_validation_error() {
        let (_, registry) = registry();
        registry.upsert_batch(vec![task("a", &[]), task("b", &["a"])]).await.unwrap();

        let err = registry.upsert(task("a", &["b"])).await.unwrap_err();
        match err {
            SyncError::Validation(v) => {
                assert_eq!(v.field, "depends_on");
                assert_eq!(v.task_id, "a");
                assert!(v.reason.contains("a, b"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(registry.get("a").await.unwrap().depends_on.is_empty());
    }

    #[tokio::test]
    async fn duplicate_ids_in_one_batch_are_rejected() {
        let (_, registry) = registry();
        let err = registry.upsert_batch(vec![task("a", &[]), task("a", &[])]).await.unwrap_err();
        assert!(matches!(err, SyncError::Validation(ref v) if v.field == "task_id"));
    }

    #[tokio::test]
    async fn delete_is_blocked_by_dependents() {
        let (_, registry) = registry();
        registry.upsert_batch(vec![task("a", &[]), task("b", &["a"])]).await.unwrap();

        assert!(matches!(registry.delete("a").await, Err(SyncError::Validation(_))));
        registry.delete("b").await.unwrap();
        registry.delete("a").await.unwrap();
        assert!(registry.load_all().await.unwrap().is_empty());
        assert!(matches!(registry.delete("a").await, Err(SyncError::NotFound { .. })));
    }

    #[tokio::test]
    async fn by_schedule_skips_disabled_tasks() {
        let (_, registry) = registry();
        let mut weekly = task("weekly", &[]);
        weekly.schedule = Schedule::Weekly;
        let mut off = task("off", &[]);
        off.enabled = false;
        registry.upsert_batch(vec![task("daily", &[]), weekly, off]).await.unwrap();

        let daily: Vec<String> = registry
            .by_schedule(Schedule::Daily)
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.task_id)
            .collect();
        assert_eq!(daily, vec!["daily"]);
    }

    #[tokio::test]
    async fn reload_sees_writes_from_another_registry() {
        let (storage, registry) = registry();
        registry.upsert(task("a", &[])).await.unwrap();

        let other = TaskConfigRegistry::new(storage);
        other.upsert(task("b", &[])).await.unwrap();

        assert_eq!(registry.load_all().await.unwrap().len(), 1);
        assert_eq!(registry.reload().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn import_reads_a_json_array() {
        let (_, registry) = registry();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.json");
        let json = serde_json::to_string(&vec![task("a", &[]), task("b", &["a"])]).unwrap();
        std::fs::write(&path, json).unwrap();

        assert_eq!(registry.import_file(&path).await.unwrap(), 2);
        assert_eq!(registry.get("b").await.unwrap().depends_on, vec!["a"]);
    }
}
