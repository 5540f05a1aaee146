//! SyncService - 外向きの操作をまとめたファサード
//!
//! UI / API 層や CLI はこの型だけを使う。
//!
//! # エラーの返し方
//! - 入力の不備（存在しない task_id、無効な task、壊れた TaskConfig）→ `Err`
//! - task の失敗 → `Ok(RunLog)` / `Ok(FlowRun)` の中に記録される

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::domain::{DateContext, FlowRun, RunLog, Schedule, SyncError, TaskConfig, TaskSelection, ValidationError};
use crate::sync::{CancelSignal, CheckpointStore, Orchestrator, TaskConfigRegistry, TaskExecutor};

/// Where a task stands: its checkpoint and its latest run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub task_id: String,
    pub enabled: bool,
    pub schedule: Schedule,
    pub last_synced_cursor: Option<String>,
    pub last_run: Option<RunLog>,
}

pub struct SyncService {
    registry: Arc<TaskConfigRegistry>,
    checkpoints: Arc<CheckpointStore>,
    executor: Arc<TaskExecutor>,
    orchestrator: Orchestrator,
}

impl SyncService {
    pub(crate) fn new(
        registry: Arc<TaskConfigRegistry>,
        checkpoints: Arc<CheckpointStore>,
        executor: Arc<TaskExecutor>,
        orchestrator: Orchestrator,
    ) -> Self {
        Self {
            registry,
            checkpoints,
            executor,
            orchestrator,
        }
    }

    pub async fn list_tasks(&self) -> Result<Vec<TaskConfig>, SyncError> {
        self.registry.load_all().await
    }

    pub async fn get_task(&self, task_id: &str) -> Result<TaskConfig, SyncError> {
        self.registry.get(task_id).await
    }

    /// Validate and store `configs` as one batch; nothing is written if any is invalid.
    pub async fn upsert_tasks(&self, configs: Vec<TaskConfig>) -> Result<usize, SyncError> {
        let count = configs.len();
        self.registry.upsert_batch(configs).await?;
        Ok(count)
    }

    pub async fn import_tasks(&self, path: impl AsRef<Path>) -> Result<usize, SyncError> {
        self.registry.import_file(path).await
    }

    /// Remove a task and its checkpoint. Its run history is kept.
    pub async fn delete_task(&self, task_id: &str) -> Result<TaskConfig, SyncError> {
        let removed = self.registry.delete(task_id).await?;
        self.checkpoints.delete(task_id).await?;
        Ok(removed)
    }

    pub async fn get_task_status(&self, task_id: &str) -> Result<TaskStatus, SyncError> {
        let config = self.registry.get(task_id).await?;
        let checkpoint = self.checkpoints.get(task_id).await?;
        let last_run = self.checkpoints.last_run(task_id).await?;
        Ok(TaskStatus {
            task_id: config.task_id,
            enabled: config.enabled,
            schedule: config.schedule,
            last_synced_cursor: checkpoint.map(|c| c.last_synced_cursor),
            last_run,
        })
    }

    /// Run one task by itself, ignoring its dependencies.
    pub async fn run_task(&self, task_id: &str, ctx: DateContext) -> Result<RunLog, SyncError> {
        self.run_task_with_cancel(task_id, ctx, CancelSignal::never()).await
    }

    pub async fn run_task_with_cancel(
        &self,
        task_id: &str,
        ctx: DateContext,
        cancel: CancelSignal,
    ) -> Result<RunLog, SyncError> {
        let config = self.registry.get(task_id).await?;
        if !config.enabled {
            return Err(ValidationError::new(task_id, "enabled", "task is disabled").into());
        }
        self.executor.run(&config, ctx, &cancel).await
    }

    pub async fn run_flow(&self, selection: TaskSelection, ctx: DateContext) -> Result<FlowRun, SyncError> {
        self.orchestrator.run_flow(selection, ctx, CancelSignal::never()).await
    }

    pub async fn run_flow_with_cancel(
        &self,
        selection: TaskSelection,
        ctx: DateContext,
        cancel: CancelSignal,
    ) -> Result<FlowRun, SyncError> {
        self.orchestrator.run_flow(selection, ctx, cancel).await
    }

    /// Newest first. History outlives the task, so an unknown id is not an error.
    pub async fn get_run_history(&self, task_id: &str, limit: usize) -> Result<Vec<RunLog>, SyncError> {
        self.checkpoints.history(task_id, limit).await
    }

    /// Re-read task configs written by another process.
    pub async fn reload(&self) -> Result<usize, SyncError> {
        self.registry.reload().await
    }
}
