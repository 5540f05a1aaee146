//! Static definition of one sync unit.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use super::errors::ValidationError;
use super::template::Params;

pub const DEFAULT_BATCH_SIZE: usize = 5000;
pub const DEFAULT_STAMP_COLUMN: &str = "trade_date";

/// How a task walks its source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// One (possibly paginated) fetch, no date iteration.
    Full,
    /// One fetch per date in the window.
    ByDate,
    /// One fetch per stock code, stocks written in batches.
    ByStock,
}

impl SyncMode {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncMode::Full => "full",
            SyncMode::ByDate => "by_date",
            SyncMode::ByStock => "by_stock",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "full" => Some(SyncMode::Full),
            "by_date" => Some(SyncMode::ByDate),
            "by_stock" => Some(SyncMode::ByStock),
            _ => None,
        }
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether execution tracks a checkpoint or always replaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncType {
    Incremental,
    Full,
}

impl SyncType {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncType::Incremental => "incremental",
            SyncType::Full => "full",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "incremental" => Some(SyncType::Incremental),
            "full" => Some(SyncType::Full),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Schedule {
    #[default]
    Daily,
    Weekly,
    Monthly,
    Manual,
}

impl Schedule {
    pub fn as_str(self) -> &'static str {
        match self {
            Schedule::Daily => "daily",
            Schedule::Weekly => "weekly",
            Schedule::Monthly => "monthly",
            Schedule::Manual => "manual",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "daily" => Some(Schedule::Daily),
            "weekly" => Some(Schedule::Weekly),
            "monthly" => Some(Schedule::Monthly),
            "manual" => Some(Schedule::Manual),
            _ => None,
        }
    }
}

/// One column of the target table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    #[serde(rename = "type")]
    pub column_type: String,

    #[serde(default = "default_true")]
    pub nullable: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl ColumnDef {
    pub fn new(column_type: impl Into<String>) -> Self {
        Self {
            column_type: column_type.into(),
            nullable: true,
            comment: None,
        }
    }
}

pub type TableSchema = BTreeMap<String, ColumnDef>;

/// Static definition of one sync unit.
///
/// Every field round-trips through the registry's persisted form,
/// `depends_on` included.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskConfig {
    pub task_id: String,

    #[serde(default)]
    pub description: String,

    pub sync_mode: SyncMode,
    pub sync_type: SyncType,

    /// Endpoint name on the external data API.
    pub source_api: String,

    #[serde(default)]
    pub params: Params,

    pub target_table: String,

    /// Upsert conflict keys, in order.
    #[serde(default)]
    pub primary_keys: Vec<String>,

    #[serde(default)]
    pub schema: TableSchema,

    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Page size; pagination is enabled only when set.
    #[serde(default)]
    pub api_limit: Option<usize>,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub schedule: Schedule,

    /// Column holding the business date, informational.
    #[serde(default)]
    pub date_field: Option<String>,

    /// Stocks per write batch in `by_stock` mode.
    #[serde(default)]
    pub stock_batch_size: Option<usize>,

    #[serde(default)]
    pub stock_filter: Option<String>,

    /// Stamp the run date onto every row (`full` mode).
    #[serde(default)]
    pub auto_add_trade_date: bool,
}

fn default_true() -> bool {
    true
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

impl TaskConfig {
    /// Minimal config for the given mode; handy in tests and seeds.
    pub fn new(
        task_id: impl Into<String>,
        sync_mode: SyncMode,
        source_api: impl Into<String>,
        target_table: impl Into<String>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            description: String::new(),
            sync_mode,
            sync_type: SyncType::Incremental,
            source_api: source_api.into(),
            params: Params::new(),
            target_table: target_table.into(),
            primary_keys: Vec::new(),
            schema: TableSchema::new(),
            depends_on: Vec::new(),
            api_limit: None,
            batch_size: DEFAULT_BATCH_SIZE,
            enabled: true,
            schedule: Schedule::Daily,
            date_field: None,
            stock_batch_size: None,
            stock_filter: None,
            auto_add_trade_date: false,
        }
    }

    pub fn tracks_checkpoint(&self) -> bool {
        self.sync_type == SyncType::Incremental
    }

    /// Checks that need nothing but the config itself.
    ///
    /// Registry-level rules (existing dependencies, cycles) live in the
    /// registry.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let err = |field, reason: &str| Err(ValidationError::new(self.task_id.clone(), field, reason));

        if self.task_id.trim().is_empty() {
            return err("task_id", "must not be empty");
        }
        if self.source_api.trim().is_empty() {
            return err("source_api", "must not be empty");
        }
        if self.target_table.trim().is_empty() {
            return err("target_table", "must not be empty");
        }
        if self.sync_type == SyncType::Incremental && self.primary_keys.is_empty() {
            return err("primary_keys", "must not be empty for incremental tasks");
        }
        let mut seen = HashSet::new();
        if self.primary_keys.iter().any(|k| !seen.insert(k.as_str())) {
            return err("primary_keys", "contains duplicates");
        }
        if !self.schema.is_empty() {
            if let Some(missing) = self.primary_keys.iter().find(|k| !self.schema.contains_key(*k)) {
                return Err(ValidationError::new(
                    self.task_id.clone(),
                    "primary_keys",
                    format!("'{missing}' is not a schema column"),
                ));
            }
        }
        if self.batch_size == 0 {
            return err("batch_size", "must be positive");
        }
        if self.api_limit == Some(0) {
            return err("api_limit", "must be positive when set");
        }
        if self.stock_batch_size == Some(0) {
            return err("stock_batch_size", "must be positive when set");
        }
        if self.depends_on.iter().any(|d| d == &self.task_id) {
            return err("depends_on", "a task cannot depend on itself");
        }
        let mut deps = HashSet::new();
        if self.depends_on.iter().any(|d| !deps.insert(d.as_str())) {
            return err("depends_on", "contains duplicates");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn daily() -> TaskConfig {
        let mut t = TaskConfig::new("sync_daily", SyncMode::ByDate, "daily", "sync_daily_data");
        t.primary_keys = vec!["ts_code".into(), "trade_date".into()];
        t
    }

    #[test]
    fn valid_config_passes() {
        assert!(daily().validate().is_ok());
    }

    #[test]
    fn incremental_requires_primary_keys() {
        let mut t = daily();
        t.primary_keys.clear();
        let err = t.validate().unwrap_err();
        assert_eq!(err.field, "primary_keys");

        t.sync_type = SyncType::Full;
        assert!(t.validate().is_ok());
    }

    #[test]
    fn self_dependency_is_rejected() {
        let mut t = daily();
        t.depends_on = vec!["sync_daily".into()];
        assert_eq!(t.validate().unwrap_err().field, "depends_on");
    }

    #[test]
    fn primary_keys_must_be_schema_columns() {
        let mut t = daily();
        t.schema.insert("ts_code".into(), ColumnDef::new("SYMBOL"));
        assert_eq!(t.validate().unwrap_err().field, "primary_keys");

        t.schema.insert("trade_date".into(), ColumnDef::new("DATE"));
        assert!(t.validate().is_ok());
    }

    #[test]
    fn zero_sizes_are_rejected() {
        let mut t = daily();
        t.api_limit = Some(0);
        assert_eq!(t.validate().unwrap_err().field, "api_limit");

        let mut t = daily();
        t.batch_size = 0;
        assert_eq!(t.validate().unwrap_err().field, "batch_size");
    }

    #[test]
    fn deserialize_applies_defaults() {
        let json = r#"{
            "task_id": "sync_stock_basic",
            "sync_mode": "full",
            "sync_type": "full",
            "source_api": "stock_basic",
            "target_table": "sync_stock_basic"
        }"#;
        let t: TaskConfig = serde_json::from_str(json).unwrap();
        assert!(t.enabled);
        assert_eq!(t.batch_size, DEFAULT_BATCH_SIZE);
        assert_eq!(t.schedule, Schedule::Daily);
        assert!(t.depends_on.is_empty());
        assert_eq!(t.api_limit, None);
    }

    #[test]
    fn unknown_sync_mode_fails_to_parse() {
        let json = r#"{
            "task_id": "x", "sync_mode": "hourly", "sync_type": "full",
            "source_api": "a", "target_table": "t"
        }"#;
        assert!(serde_json::from_str::<TaskConfig>(json).is_err());
        assert_eq!(SyncMode::parse("by_stock"), Some(SyncMode::ByStock));
        assert_eq!(SyncMode::parse("hourly"), None);
    }
}
