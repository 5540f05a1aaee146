//! Errors - エラー型と分類
//!
//! - `ValidationError`: TaskConfig の不備（どのフィールドかを持つ）
//! - `SyncError`: sync コア全体のエラー分類
//!
//! task 単位の失敗は RunLog に記録されて FlowRun の結果として返る。
//! `SyncError` として呼び出し元に返るのは構造的なエラーだけ。

use thiserror::Error;

use crate::ports::{ApiError, StorageError};

/// A malformed TaskConfig, rejected before anything runs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid task config '{task_id}': field '{field}' {reason}")]
pub struct ValidationError {
    pub task_id: String,
    pub field: &'static str,
    pub reason: String,
}

impl ValidationError {
    pub fn new(task_id: impl Into<String>, field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            field,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Network/API failure that survived every retry.
    #[error("fetch from '{endpoint}' failed after {attempts} attempt(s): {source}")]
    TransientFetch {
        endpoint: String,
        attempts: u32,
        #[source]
        source: ApiError,
    },

    #[error("cyclic dependency among tasks: {}", task_ids.join(", "))]
    CyclicDependency { task_ids: Vec<String> },

    /// A batch write landed only part of its rows; the batch counts as failed.
    #[error("partial write to '{table}': {written} of {expected} rows")]
    PartialWrite {
        table: String,
        written: usize,
        expected: usize,
    },

    #[error("task not found: {task_id}")]
    NotFound { task_id: String },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("cancelled")]
    Cancelled,

    #[error("config error: {0}")]
    Config(String),
}

impl SyncError {
    pub fn not_found(task_id: impl Into<String>) -> Self {
        SyncError::NotFound {
            task_id: task_id.into(),
        }
    }

    /// Structural errors abort a flow before any task runs.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            SyncError::Validation(_) | SyncError::CyclicDependency { .. } | SyncError::NotFound { .. }
        )
    }
}
