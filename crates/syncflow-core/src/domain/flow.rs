//! FlowRun: one orchestrated run over a set of tasks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::checkpoint::{RunLog, RunStatus};
use super::dates::DateContext;
use super::ids::RunId;
use super::task_config::Schedule;

/// Which tasks a flow covers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum TaskSelection {
    /// Every enabled task.
    All,
    Ids(Vec<String>),
    /// Enabled tasks with this schedule.
    Schedule(Schedule),
}

/// Flow state (aggregated from task outcomes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowStatus {
    Running,
    /// Every task succeeded.
    Completed,
    /// At least one task did not succeed.
    Partial,
    /// Resolution failed before any task ran.
    Failed,
    /// The selection was empty; nothing ran.
    Empty,
}

/// What happened to one task inside a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskRunState {
    Succeeded,
    Failed,
    Partial,
    /// Not executed because a dependency did not succeed.
    Blocked,
    /// Not executed, or stopped early, because the flow was cancelled.
    Cancelled,
}

impl TaskRunState {
    pub fn is_success(self) -> bool {
        self == TaskRunState::Succeeded
    }

    pub fn from_run_status(status: RunStatus) -> Self {
        match status {
            RunStatus::Success => TaskRunState::Succeeded,
            RunStatus::Failed => TaskRunState::Failed,
            RunStatus::Partial => TaskRunState::Partial,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub task_id: String,
    /// Zero-based layer index.
    pub layer: usize,
    pub state: TaskRunState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_log: Option<RunLog>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskOutcome {
    pub fn from_run_log(layer: usize, run_log: RunLog) -> Self {
        Self {
            task_id: run_log.task_id.clone(),
            layer,
            state: TaskRunState::from_run_status(run_log.status),
            error: run_log.error_message.clone(),
            run_log: Some(run_log),
        }
    }

    pub fn not_run(task_id: impl Into<String>, layer: usize, state: TaskRunState, reason: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            layer,
            state,
            run_log: None,
            error: Some(reason.into()),
        }
    }
}

/// Result of one `run_flow` invocation.
///
/// Owned by the orchestrator for the duration of the run and handed back to
/// the caller; never persisted as a live object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowRun {
    pub run_id: RunId,
    pub requested_tasks: Vec<String>,
    pub date_context: DateContext,
    /// Resolved layers, in execution order.
    pub layers: Vec<Vec<String>>,
    pub layers_executed: usize,
    pub outcomes: Vec<TaskOutcome>,
    pub status: FlowStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl FlowRun {
    pub fn new(
        run_id: RunId,
        requested_tasks: Vec<String>,
        date_context: DateContext,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            run_id,
            requested_tasks,
            date_context,
            layers: Vec::new(),
            layers_executed: 0,
            outcomes: Vec::new(),
            status: FlowStatus::Running,
            error: None,
            started_at,
            finished_at: None,
        }
    }

    pub fn outcome(&self, task_id: &str) -> Option<&TaskOutcome> {
        self.outcomes.iter().find(|o| o.task_id == task_id)
    }

    pub fn succeeded(&self) -> impl Iterator<Item = &TaskOutcome> {
        self.outcomes.iter().filter(|o| o.state.is_success())
    }

    pub fn failed(&self) -> impl Iterator<Item = &TaskOutcome> {
        self.outcomes.iter().filter(|o| !o.state.is_success())
    }

    /// Resolution failed; no task ran.
    pub fn mark_failed(&mut self, error: impl Into<String>, at: DateTime<Utc>) {
        self.status = FlowStatus::Failed;
        self.error = Some(error.into());
        self.finished_at = Some(at);
    }

    /// Derive the final status from the collected outcomes.
    pub fn finalize(&mut self, at: DateTime<Utc>) {
        self.status = if self.requested_tasks.is_empty() {
            FlowStatus::Empty
        } else if self.outcomes.iter().all(|o| o.state.is_success()) {
            FlowStatus::Completed
        } else {
            FlowStatus::Partial
        };
        self.finished_at = Some(at);
    }
}
