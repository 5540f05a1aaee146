//! TaskExecutor: run one task and commit its outcome.
//!
//! # 実行の流れ
//! 1. 日付ウィンドウを決める（checkpoint を読むのは incremental + Latest のときだけ）
//! 2. sync_mode ごとの戦略で取得し、`batch_size` ごとに upsert する
//! 3. 成功したときだけ checkpoint を進め、RunLog を追記する
//!
//! 失敗は RunLog（status = failed）として返す。`Err` になるのは RunLog
//! 自体を書けなかったときだけ。

use std::sync::Arc;

use chrono::NaiveDate;
use serde_json::Value;
use tracing::Instrument;

use crate::domain::dates::{date_range, next_day};
use crate::domain::{
    DateContext, ExecutionPhase, Row, RunLog, RunStatus, SyncError, SyncMode, TaskConfig, TemplateVars,
    format_date, parse_date, render_params,
};
use crate::domain::task_config::DEFAULT_STAMP_COLUMN;
use crate::ports::{Clock, IdGenerator, StockUniverse, Storage, StorageError};

use super::cancel::CancelSignal;
use super::checkpoint::CheckpointStore;
use super::fetcher::PaginatedFetcher;

pub const DEFAULT_STOCK_BATCH_SIZE: usize = 50;

/// Error message of a run stopped by flow cancellation.
pub const CANCELLED_MESSAGE: &str = "cancelled";

/// Inclusive date window of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Window {
    start: NaiveDate,
    end: NaiveDate,
}

impl Window {
    fn label(&self) -> String {
        if self.start == self.end {
            format_date(self.end)
        } else {
            format!("{}-{}", format_date(self.start), format_date(self.end))
        }
    }
}

/// How a strategy ended.
enum Finish {
    /// Everything written; the checkpoint may move to `cursor`.
    Done { rows: u64, cursor: NaiveDate },
    /// Some units failed; written rows stay, the checkpoint does not move.
    Partial { rows: u64, message: String },
}

/// Phase bookkeeping for one run.
struct Phase<'a> {
    task_id: &'a str,
    current: ExecutionPhase,
}

impl<'a> Phase<'a> {
    fn new(task_id: &'a str) -> Self {
        Self {
            task_id,
            current: ExecutionPhase::Pending,
        }
    }

    fn enter(&mut self, next: ExecutionPhase) {
        if self.current == next {
            return;
        }
        debug_assert!(
            self.current.can_transition_to(next),
            "illegal phase change {:?} -> {:?}",
            self.current,
            next
        );
        tracing::trace!(task_id = self.task_id, from = ?self.current, to = ?next, "phase");
        self.current = next;
    }
}

pub struct TaskExecutor {
    fetcher: PaginatedFetcher,
    storage: Arc<dyn Storage>,
    checkpoints: Arc<CheckpointStore>,
    universe: Arc<dyn StockUniverse>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    default_stock_batch_size: usize,
}

impl TaskExecutor {
    pub fn new(
        fetcher: PaginatedFetcher,
        storage: Arc<dyn Storage>,
        checkpoints: Arc<CheckpointStore>,
        universe: Arc<dyn StockUniverse>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        Self {
            fetcher,
            storage,
            checkpoints,
            universe,
            clock,
            ids,
            default_stock_batch_size: DEFAULT_STOCK_BATCH_SIZE,
        }
    }

    pub fn with_default_stock_batch_size(mut self, size: usize) -> Self {
        self.default_stock_batch_size = size.max(1);
        self
    }

    /// Run `config` over `ctx` and record the outcome.
    pub async fn run(&self, config: &TaskConfig, ctx: DateContext, cancel: &CancelSignal) -> Result<RunLog, SyncError> {
        let span = tracing::info_span!(
            "task_run",
            task_id = %config.task_id,
            mode = %config.sync_mode,
            sync_type = config.sync_type.as_str(),
        );
        self.run_inner(config, ctx, cancel).instrument(span).await
    }

    async fn run_inner(&self, config: &TaskConfig, ctx: DateContext, cancel: &CancelSignal) -> Result<RunLog, SyncError> {
        let mut phase = Phase::new(&config.task_id);
        let today = self.clock.today();

        let (label, result) = match config.sync_mode {
            SyncMode::Full => {
                let run_date = ctx.run_date(today);
                (format_date(run_date), self.run_full(config, run_date, cancel, &mut phase).await)
            }
            SyncMode::ByDate | SyncMode::ByStock => match self.window(config, ctx, today).await {
                Ok(Some(window)) => {
                    let result = if config.sync_mode == SyncMode::ByDate {
                        self.run_by_date(config, window, cancel, &mut phase).await
                    } else {
                        self.run_by_stock(config, window, cancel, &mut phase).await
                    };
                    (window.label(), result)
                }
                Ok(None) => {
                    tracing::info!("already up to date");
                    phase.enter(ExecutionPhase::Fetching);
                    phase.enter(ExecutionPhase::Succeeded);
                    let log = self.log(config, format_date(today), 0, RunStatus::Success, None);
                    self.checkpoints.append_log(&log).await?;
                    return Ok(log);
                }
                Err(e) => (format_date(today), Err(e)),
            },
        };

        match result {
            Ok(Finish::Done { rows, cursor }) => {
                phase.enter(ExecutionPhase::Succeeded);
                let log = self.log(config, label, rows, RunStatus::Success, None);
                self.checkpoints.commit_success(&log, Some(&format_date(cursor))).await?;
                tracing::info!(rows, "task succeeded");
                Ok(log)
            }
            Ok(Finish::Partial { rows, message }) => {
                phase.enter(ExecutionPhase::Failed);
                let log = self.log(config, label, rows, RunStatus::Partial, Some(message));
                self.checkpoints.append_log(&log).await?;
                tracing::warn!(rows, "task partially succeeded");
                Ok(log)
            }
            Err(err) => {
                phase.enter(ExecutionPhase::Failed);
                let message = match err {
                    SyncError::Cancelled => CANCELLED_MESSAGE.to_string(),
                    ref other => other.to_string(),
                };
                tracing::error!(error = %message, "task failed, checkpoint left unchanged");
                let log = self.log(config, label, 0, RunStatus::Failed, Some(message));
                self.checkpoints.append_log(&log).await?;
                Ok(log)
            }
        }
    }

    fn log(&self, config: &TaskConfig, run_date: String, rows: u64, status: RunStatus, error: Option<String>) -> RunLog {
        RunLog {
            log_id: self.ids.generate_log_id(),
            task_id: config.task_id.clone(),
            run_date,
            rows_affected: rows,
            status,
            error_message: error,
            created_at: self.clock.now(),
        }
    }

    /// Dates to cover; `None` when the task is already up to date.
    async fn window(&self, config: &TaskConfig, ctx: DateContext, today: NaiveDate) -> Result<Option<Window>, SyncError> {
        let window = match ctx {
            DateContext::On { date } => Window { start: date, end: date },
            DateContext::Range { start, end } => Window { start, end },
            DateContext::Latest if !config.tracks_checkpoint() => Window { start: today, end: today },
            DateContext::Latest => {
                let start = match self.checkpoints.get(&config.task_id).await? {
                    Some(cp) => match parse_date(&cp.last_synced_cursor) {
                        Some(last) => next_day(last).unwrap_or(last),
                        None => {
                            tracing::warn!(cursor = %cp.last_synced_cursor, "checkpoint is not a date, syncing today");
                            today
                        }
                    },
                    None => today,
                };
                Window { start, end: today }
            }
        };
        Ok((window.start <= window.end).then_some(window))
    }

    async fn run_full(
        &self,
        config: &TaskConfig,
        run_date: NaiveDate,
        cancel: &CancelSignal,
        phase: &mut Phase<'_>,
    ) -> Result<Finish, SyncError> {
        phase.enter(ExecutionPhase::Fetching);
        let params = render_params(&config.params, &TemplateVars::for_date(run_date));
        let mut rows = self
            .fetcher
            .fetch_all(&config.source_api, &params, config.api_limit, cancel)
            .await?;

        if config.auto_add_trade_date {
            let stamp = Value::String(format_date(run_date));
            let column = config.date_field.as_deref().unwrap_or(DEFAULT_STAMP_COLUMN);
            for row in &mut rows {
                row.insert(column.to_string(), stamp.clone());
            }
        }
        if rows.is_empty() {
            // an empty answer never wipes what is already stored
            tracing::warn!("no data returned");
            return Ok(Finish::Done {
                rows: 0,
                cursor: run_date,
            });
        }

        let written = if !config.tracks_checkpoint() && config.primary_keys.is_empty() {
            self.replace_table(config, &rows, phase).await?
        } else {
            let mut writer = Writer::new(self.storage.as_ref(), config);
            let mut written = 0u64;
            for chunk in rows.chunks(config.batch_size) {
                phase.enter(ExecutionPhase::Writing);
                written += writer.write(chunk).await?;
            }
            written
        };
        Ok(Finish::Done {
            rows: written,
            cursor: run_date,
        })
    }

    /// Keyless full replace: write everything into a staging table, then swap it in.
    /// The target keeps its old rows until the swap succeeds.
    async fn replace_table(&self, config: &TaskConfig, rows: &[Row], phase: &mut Phase<'_>) -> Result<u64, SyncError> {
        let staging_name = staging_table(&config.target_table);
        let mut staging = Writer::staging(self.storage.as_ref(), config, staging_name.clone());
        staging.clear().await?;

        let mut written = 0u64;
        for chunk in rows.chunks(config.batch_size) {
            phase.enter(ExecutionPhase::Writing);
            written += staging.write(chunk).await?;
        }

        Writer::new(self.storage.as_ref(), config).ensure_table().await?;
        let swapped = self.storage.swap_in(&staging_name, &config.target_table).await?;
        if swapped as u64 != written {
            return Err(SyncError::PartialWrite {
                table: config.target_table.clone(),
                written: swapped,
                expected: rows.len(),
            });
        }
        tracing::debug!(table = %config.target_table, rows = swapped, "table replaced");
        Ok(written)
    }

    async fn run_by_date(
        &self,
        config: &TaskConfig,
        window: Window,
        cancel: &CancelSignal,
        phase: &mut Phase<'_>,
    ) -> Result<Finish, SyncError> {
        let mut writer = Writer::new(self.storage.as_ref(), config);
        let mut buffer: Vec<Row> = Vec::new();
        let mut written = 0u64;

        for date in date_range(window.start, window.end) {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            phase.enter(ExecutionPhase::Fetching);
            let params = render_params(&config.params, &TemplateVars::for_date(date));
            let rows = self
                .fetcher
                .fetch_all(&config.source_api, &params, config.api_limit, cancel)
                .await?;
            tracing::info!(date = %format_date(date), rows = rows.len(), "date fetched");
            buffer.extend(rows);

            while buffer.len() >= config.batch_size {
                let chunk: Vec<Row> = buffer.drain(..config.batch_size).collect();
                phase.enter(ExecutionPhase::Writing);
                written += writer.write(&chunk).await?;
            }
        }

        if !buffer.is_empty() {
            phase.enter(ExecutionPhase::Writing);
            written += writer.write(&buffer).await?;
        }
        Ok(Finish::Done {
            rows: written,
            cursor: window.end,
        })
    }

    async fn run_by_stock(
        &self,
        config: &TaskConfig,
        window: Window,
        cancel: &CancelSignal,
        phase: &mut Phase<'_>,
    ) -> Result<Finish, SyncError> {
        phase.enter(ExecutionPhase::Fetching);
        let codes = self.universe.list_codes(config.stock_filter.as_deref()).await?;
        if codes.is_empty() {
            return Err(SyncError::Config("stock universe is empty".into()));
        }

        let stock_batch = config.stock_batch_size.unwrap_or(self.default_stock_batch_size).max(1);
        let vars = TemplateVars::for_range(window.start, window.end);
        let mut writer = Writer::new(self.storage.as_ref(), config);
        let mut written = 0u64;
        let mut failed: Vec<(String, String)> = Vec::new();
        let mut first_error: Option<SyncError> = None;

        for (batch_no, batch) in codes.chunks(stock_batch).enumerate() {
            let mut rows: Vec<Row> = Vec::new();
            for code in batch {
                if cancel.is_cancelled() {
                    return Err(SyncError::Cancelled);
                }
                phase.enter(ExecutionPhase::Fetching);
                let params = render_params(&config.params, &vars.clone().with_stock(code.clone()));
                match self
                    .fetcher
                    .fetch_all(&config.source_api, &params, config.api_limit, cancel)
                    .await
                {
                    Ok(stock_rows) => rows.extend(stock_rows),
                    Err(SyncError::Cancelled) => return Err(SyncError::Cancelled),
                    Err(e) => {
                        tracing::warn!(stock_code = %code, error = %e, "stock fetch failed, skipping");
                        failed.push((code.clone(), e.to_string()));
                        first_error.get_or_insert(e);
                    }
                }
            }

            for chunk in rows.chunks(config.batch_size) {
                phase.enter(ExecutionPhase::Writing);
                written += writer.write(chunk).await?;
            }
            tracing::info!(batch = batch_no, stocks = batch.len(), rows = rows.len(), "stock batch written");
        }

        if failed.is_empty() {
            return Ok(Finish::Done {
                rows: written,
                cursor: window.end,
            });
        }
        if failed.len() == codes.len() {
            tracing::error!(stocks = codes.len(), "every stock fetch failed");
            if let Some(err) = first_error {
                return Err(err);
            }
        }
        let sample: Vec<&str> = failed.iter().take(5).map(|(c, _)| c.as_str()).collect();
        Ok(Finish::Partial {
            rows: written,
            message: format!("{} of {} stocks failed: {}", failed.len(), codes.len(), sample.join(", ")),
        })
    }
}

fn staging_table(target: &str) -> String {
    format!("{target}__staging")
}

/// Writes rows into one table, creating it on first use.
struct Writer<'a> {
    storage: &'a dyn Storage,
    config: &'a TaskConfig,
    table: String,
    table_ready: bool,
}

impl<'a> Writer<'a> {
    fn new(storage: &'a dyn Storage, config: &'a TaskConfig) -> Self {
        Self::staging(storage, config, config.target_table.clone())
    }

    /// Writer for `table` laid out like the task's target table.
    fn staging(storage: &'a dyn Storage, config: &'a TaskConfig, table: String) -> Self {
        Self {
            storage,
            config,
            table,
            table_ready: false,
        }
    }

    async fn ensure_table(&mut self) -> Result<(), SyncError> {
        if self.table_ready {
            return Ok(());
        }
        let table = &self.table;
        if !self.storage.table_exists(table).await? {
            tracing::info!(table = %table, "creating table");
            match self
                .storage
                .create_table(table, &self.config.schema, &self.config.primary_keys)
                .await
            {
                Ok(()) | Err(StorageError::TableExists(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }
        self.table_ready = true;
        Ok(())
    }

    /// Drop every existing row, e.g. leftovers of an interrupted staging run.
    async fn clear(&mut self) -> Result<(), SyncError> {
        self.ensure_table().await?;
        let removed = self.storage.delete(&self.table, &Row::new()).await?;
        if removed > 0 {
            tracing::debug!(table = %self.table, removed, "table cleared");
        }
        Ok(())
    }

    /// One upsert; a short count fails the whole batch.
    async fn write(&mut self, rows: &[Row]) -> Result<u64, SyncError> {
        if rows.is_empty() {
            return Ok(0);
        }
        self.ensure_table().await?;
        let table = &self.table;
        let written = self.storage.upsert(table, rows, &self.config.primary_keys).await?;
        if written != rows.len() {
            return Err(SyncError::PartialWrite {
                table: table.clone(),
                written,
                expected: rows.len(),
            });
        }
        tracing::debug!(table = %table, rows = written, "batch written");
        Ok(written as u64)
    }
}
