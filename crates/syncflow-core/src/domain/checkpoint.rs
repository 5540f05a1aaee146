//! Checkpoint and RunLog: the per-task sync history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::RunLogId;

/// Last successfully synced cursor of one task.
///
/// Overwritten on every successful commit; removed only with the task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub task_id: String,
    /// A `YYYYMMDD` date for dated tasks, otherwise an opaque cursor.
    pub last_synced_cursor: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    Failed,
    /// Some units (stocks) failed, the rest were written.
    Partial,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::Failed => "failed",
            RunStatus::Partial => "partial",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(RunStatus::Success),
            "failed" => Some(RunStatus::Failed),
            "partial" => Some(RunStatus::Partial),
            _ => None,
        }
    }
}

/// One execution attempt of a task. Append-only: never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunLog {
    pub log_id: RunLogId,
    pub task_id: String,
    /// Execution date context, e.g. `20240101` or `20240101-20240131`.
    pub run_date: String,
    pub rows_affected: u64,
    pub status: RunStatus,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl RunLog {
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }
}
