//! Orchestrator: one flow = resolve layers, run each layer concurrently.
//!
//! # 方針
//! - layer は順番に、layer 内のタスクは並行に実行する
//! - タスクの失敗は FlowRun に記録するだけで、兄弟タスクは止めない
//! - 依存先が失敗したタスクを実行するかは `DependencyFailurePolicy` で決める
//! - 構造的なエラー（存在しない / 無効な task_id）は実行前に `Err` で返す
//! - 循環依存は status = failed の FlowRun として返す（何も実行しない）

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::domain::{
    DateContext, FlowRun, RunLog, SyncError, TaskConfig, TaskOutcome, TaskRunState, TaskSelection, ValidationError,
};
use crate::ports::{Clock, IdGenerator};

use super::cancel::CancelSignal;
use super::executor::{CANCELLED_MESSAGE, TaskExecutor};
use super::registry::TaskConfigRegistry;
use super::resolver::DependencyResolver;

/// What to do with a task whose dependency did not succeed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyFailurePolicy {
    /// Dependencies only order execution; the task still runs.
    #[default]
    RunAnyway,
    /// The task is not run and is reported `blocked`.
    SkipDependents,
}

pub struct Orchestrator {
    registry: Arc<TaskConfigRegistry>,
    executor: Arc<TaskExecutor>,
    resolver: DependencyResolver,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    policy: DependencyFailurePolicy,
    max_concurrency: Option<usize>,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<TaskConfigRegistry>,
        executor: Arc<TaskExecutor>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        Self {
            registry,
            executor,
            resolver: DependencyResolver,
            clock,
            ids,
            policy: DependencyFailurePolicy::default(),
            max_concurrency: None,
        }
    }

    pub fn with_policy(mut self, policy: DependencyFailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Bound the number of tasks running at once inside a layer.
    pub fn with_max_concurrency(mut self, max: Option<usize>) -> Self {
        self.max_concurrency = max.filter(|m| *m > 0);
        self
    }

    pub fn policy(&self) -> DependencyFailurePolicy {
        self.policy
    }

    async fn select(&self, selection: &TaskSelection) -> Result<Vec<TaskConfig>, SyncError> {
        match selection {
            TaskSelection::All => Ok(self.registry.load_all().await?.into_iter().filter(|t| t.enabled).collect()),
            TaskSelection::Schedule(schedule) => self.registry.by_schedule(*schedule).await,
            TaskSelection::Ids(ids) => {
                let mut seen = BTreeSet::new();
                let mut configs = Vec::new();
                for id in ids {
                    if !seen.insert(id.as_str()) {
                        continue;
                    }
                    let config = self.registry.get(id).await?;
                    if !config.enabled {
                        return Err(ValidationError::new(id.clone(), "enabled", "task is disabled").into());
                    }
                    configs.push(config);
                }
                Ok(configs)
            }
        }
    }

    /// Run every selected task, layer by layer.
    pub async fn run_flow(
        &self,
        selection: TaskSelection,
        ctx: DateContext,
        cancel: CancelSignal,
    ) -> Result<FlowRun, SyncError> {
        let configs = self.select(&selection).await?;
        let requested: Vec<String> = configs.iter().map(|c| c.task_id.clone()).collect();
        let mut run = FlowRun::new(self.ids.generate_run_id(), requested, ctx, self.clock.now());

        let span = tracing::info_span!("flow", run_id = %run.run_id, tasks = configs.len());
        async {
            if configs.is_empty() {
                tracing::info!("nothing selected");
                run.finalize(self.clock.now());
                return Ok(run);
            }

            let layers = match self.resolver.resolve(&configs) {
                Ok(layers) => layers,
                Err(err @ SyncError::CyclicDependency { .. }) => {
                    tracing::error!(error = %err, "flow aborted before any task ran");
                    run.mark_failed(err.to_string(), self.clock.now());
                    return Ok(run);
                }
                Err(err) => return Err(err),
            };
            run.layers = layers.clone();

            let by_id: HashMap<&str, &TaskConfig> = configs.iter().map(|c| (c.task_id.as_str(), c)).collect();
            let semaphore = self.max_concurrency.map(|n| Arc::new(Semaphore::new(n)));

            for (index, layer) in layers.iter().enumerate() {
                if cancel.is_cancelled() {
                    tracing::warn!(layer = index, "flow cancelled, skipping remaining layers");
                    for task_id in layer {
                        run.outcomes.push(TaskOutcome::not_run(
                            task_id.clone(),
                            index,
                            TaskRunState::Cancelled,
                            "flow cancelled before the layer started",
                        ));
                    }
                    continue;
                }

                run.layers_executed += 1;
                tracing::info!(layer = index, tasks = layer.len(), "layer started");

                let mut handles: Vec<(String, JoinHandle<Result<RunLog, SyncError>>)> = Vec::new();
                for task_id in layer {
                    let Some(config) = by_id.get(task_id.as_str()) else {
                        continue;
                    };
                    if let Some(reason) = self.blocked_reason(config, &run) {
                        tracing::warn!(task_id = %task_id, %reason, "task blocked");
                        run.outcomes
                            .push(TaskOutcome::not_run(task_id.clone(), index, TaskRunState::Blocked, reason));
                        continue;
                    }

                    let executor = Arc::clone(&self.executor);
                    let config = (*config).clone();
                    let signal = cancel.clone();
                    let semaphore = semaphore.clone();
                    let handle = tokio::spawn(
                        async move {
                            let _permit = match semaphore {
                                Some(s) => Some(s.acquire_owned().await.map_err(|_| SyncError::Cancelled)?),
                                None => None,
                            };
                            executor.run(&config, ctx, &signal).await
                        }
                        .in_current_span(),
                    );
                    handles.push((task_id.clone(), handle));
                }

                for (task_id, handle) in handles {
                    let outcome = match handle.await {
                        Ok(Ok(log)) => {
                            let cancelled =
                                !log.is_success() && log.error_message.as_deref() == Some(CANCELLED_MESSAGE);
                            let mut outcome = TaskOutcome::from_run_log(index, log);
                            if cancelled {
                                outcome.state = TaskRunState::Cancelled;
                            }
                            outcome
                        }
                        Ok(Err(err)) => TaskOutcome::not_run(task_id, index, TaskRunState::Failed, err.to_string()),
                        Err(join_err) => {
                            TaskOutcome::not_run(task_id, index, TaskRunState::Failed, format!("task panicked: {join_err}"))
                        }
                    };
                    tracing::info!(task_id = %outcome.task_id, state = ?outcome.state, "task finished");
                    run.outcomes.push(outcome);
                }
            }

            run.finalize(self.clock.now());
            tracing::info!(
                status = ?run.status,
                succeeded = run.succeeded().count(),
                failed = run.failed().count(),
                "flow finished"
            );
            Ok(run)
        }
        .instrument(span)
        .await
    }

    /// Under `SkipDependents`, the first in-flow dependency that did not succeed.
    fn blocked_reason(&self, config: &TaskConfig, run: &FlowRun) -> Option<String> {
        if self.policy != DependencyFailurePolicy::SkipDependents {
            return None;
        }
        config.depends_on.iter().find_map(|dep| {
            run.outcome(dep)
                .filter(|o| !o.state.is_success())
                .map(|o| format!("dependency '{dep}' ended as {:?}", o.state))
        })
    }
}
