//! End-to-end flows through `SyncService` against in-process fakes.

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use serde_json::json;
use syncflow_core::app::{SyncService, SyncServiceBuilder, SyncSettings};
use syncflow_core::domain::{
    DateContext, FlowStatus, Params, Row, RunStatus, Schedule, SyncError, SyncMode, SyncType, TaskConfig,
    TaskRunState, TaskSelection,
};
use syncflow_core::impls::{InMemoryStorage, JsonFileStorage, ScriptedApi};
use syncflow_core::ports::{FixedClock, Storage};
use syncflow_core::sync::DependencyFailurePolicy;

const STOCKS: [&str; 3] = ["000001.SZ", "000002.SZ", "600000.SH"];

fn clock() -> Arc<FixedClock> {
    Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2024, 1, 3, 8, 0, 0).unwrap()))
}

fn fast_settings() -> SyncSettings {
    let mut settings = SyncSettings::default();
    settings.retry.max_attempts = 1;
    settings.retry.base_delay_ms = 1;
    settings
}

async fn service_with(storage: Arc<dyn Storage>, api: Arc<ScriptedApi>, settings: SyncSettings) -> SyncService {
    SyncServiceBuilder::new()
        .storage(storage)
        .data_api(api)
        .clock(clock())
        .settings(settings)
        .build()
        .await
        .unwrap()
}

fn params(pairs: &[(&str, &str)]) -> Params {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

fn row(pairs: &[(&str, serde_json::Value)]) -> Row {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

fn quotes(date: &str, count: usize) -> Vec<Row> {
    (0..count)
        .map(|i| {
            row(&[
                ("ts_code", json!(format!("{i:06}.SZ"))),
                ("trade_date", json!(date)),
                ("close", json!(10.0 + i as f64)),
            ])
        })
        .collect()
}

fn stock_basic() -> TaskConfig {
    let mut t = TaskConfig::new("stock_basic", SyncMode::Full, "stock_basic", "sync_stock_basic");
    t.sync_type = SyncType::Full;
    t.primary_keys = vec!["ts_code".into()];
    t
}

fn daily() -> TaskConfig {
    let mut t = TaskConfig::new("daily", SyncMode::ByDate, "daily", "sync_daily");
    t.params = params(&[("trade_date", "{date}")]);
    t.primary_keys = vec!["ts_code".into(), "trade_date".into()];
    t.api_limit = Some(5000);
    t.depends_on = vec!["stock_basic".into()];
    t
}

fn adj_factor() -> TaskConfig {
    let mut t = TaskConfig::new("adj_factor", SyncMode::ByStock, "adj_factor", "sync_adj_factor");
    t.params = params(&[
        ("ts_code", "{stock_code}"),
        ("start_date", "{start_date}"),
        ("end_date", "{end_date}"),
    ]);
    t.primary_keys = vec!["ts_code".into(), "trade_date".into()];
    t.stock_batch_size = Some(2);
    t.depends_on = vec!["stock_basic".into()];
    t
}

#[tokio::test]
async fn daily_flow_runs_layers_in_dependency_order() {
    let storage = Arc::new(InMemoryStorage::new());
    let api = Arc::new(ScriptedApi::new());
    api.push_unbounded(
        "stock_basic",
        STOCKS.iter().map(|c| row(&[("ts_code", json!(c))])).collect(),
    );
    api.push_page_for("daily", &[("trade_date", "20240102")], 0, quotes("20240102", 7));
    for code in STOCKS {
        api.push_unbounded_for(
            "adj_factor",
            &[("ts_code", code)],
            vec![row(&[("ts_code", json!(code)), ("trade_date", json!("20240102")), ("adj_factor", json!(1.0))])],
        );
    }

    let service = service_with(storage.clone(), api.clone(), fast_settings()).await;
    service.upsert_tasks(vec![adj_factor(), daily(), stock_basic()]).await.unwrap();

    let ctx = DateContext::from_args(Some("20240102"), None, None).unwrap();
    let run = service.run_flow(TaskSelection::All, ctx).await.unwrap();

    assert_eq!(run.status, FlowStatus::Completed);
    assert_eq!(
        run.layers,
        vec![vec!["stock_basic".to_string()], vec!["adj_factor".to_string(), "daily".to_string()]]
    );
    assert_eq!(run.layers_executed, 2);

    // stock_basic finished before any per-stock call was made.
    let recorded = api.recorded();
    let basic_at = recorded.iter().position(|c| c.endpoint == "stock_basic").unwrap();
    let first_adj = recorded.iter().position(|c| c.endpoint == "adj_factor").unwrap();
    assert!(basic_at < first_adj);

    assert_eq!(storage.row_count("sync_stock_basic"), 3);
    assert_eq!(storage.row_count("sync_daily"), 7);
    assert_eq!(storage.row_count("sync_adj_factor"), 3);
    assert_eq!(api.calls("adj_factor"), 3);

    for task in ["daily", "adj_factor"] {
        let status = service.get_task_status(task).await.unwrap();
        assert_eq!(status.last_synced_cursor.as_deref(), Some("20240102"));
        assert_eq!(status.last_run.map(|l| l.status), Some(RunStatus::Success));
    }
}

#[tokio::test]
async fn paginated_date_is_merged_and_checkpointed() {
    let storage = Arc::new(InMemoryStorage::new());
    let api = Arc::new(ScriptedApi::new());
    let all = quotes("20240101", 12000);
    api.push_page("daily", 0, all[..5000].to_vec());
    api.push_page("daily", 5000, all[5000..10000].to_vec());
    api.push_page("daily", 10000, all[10000..].to_vec());

    let service = service_with(storage.clone(), api.clone(), fast_settings()).await;
    let mut task = daily();
    task.depends_on.clear();
    service.upsert_tasks(vec![task]).await.unwrap();

    let ctx = DateContext::from_args(Some("20240101"), None, None).unwrap();
    let log = service.run_task("daily", ctx).await.unwrap();

    assert_eq!(log.status, RunStatus::Success);
    assert_eq!(log.rows_affected, 12000);
    assert_eq!(api.offsets("daily"), vec![Some(0), Some(5000), Some(10000)]);
    assert_eq!(storage.row_count("sync_daily"), 12000);
    let status = service.get_task_status("daily").await.unwrap();
    assert_eq!(status.last_synced_cursor.as_deref(), Some("20240101"));
}

#[tokio::test]
async fn failed_run_leaves_checkpoint_and_next_run_resumes() {
    let storage = Arc::new(InMemoryStorage::new());
    let api = Arc::new(ScriptedApi::new());
    api.push_page_for("daily", &[("trade_date", "20240101")], 0, quotes("20240101", 2));
    api.push_page_for("daily", &[("trade_date", "20240102")], 0, quotes("20240102", 2));
    api.push_page_for("daily", &[("trade_date", "20240103")], 0, quotes("20240103", 2));

    let service = service_with(storage.clone(), api.clone(), fast_settings()).await;
    let mut task = daily();
    task.depends_on.clear();
    service.upsert_tasks(vec![task]).await.unwrap();

    let range = DateContext::from_args(None, Some("20240101"), Some("20240102")).unwrap();

    api.fail_next("daily", 1);
    let failed = service.run_task("daily", range).await.unwrap();
    assert_eq!(failed.status, RunStatus::Failed);
    assert!(service.get_task_status("daily").await.unwrap().last_synced_cursor.is_none());

    let ok = service.run_task("daily", range).await.unwrap();
    assert_eq!(ok.status, RunStatus::Success);
    assert_eq!(ok.run_date, "20240101-20240102");
    assert_eq!(storage.row_count("sync_daily"), 4);

    // Latest resumes the day after the checkpoint, up to "today".
    let latest = service.run_task("daily", DateContext::Latest).await.unwrap();
    assert_eq!(latest.run_date, "20240103");
    assert_eq!(latest.rows_affected, 2);

    let history = service.get_run_history("daily", 10).await.unwrap();
    let statuses: Vec<RunStatus> = history.iter().map(|l| l.status).collect();
    assert_eq!(statuses, vec![RunStatus::Success, RunStatus::Success, RunStatus::Failed]);
}

#[tokio::test]
async fn skip_dependents_blocks_tasks_behind_a_failure() {
    let api = Arc::new(ScriptedApi::new());
    api.fail_next("stock_basic", 1);

    let mut settings = fast_settings();
    settings.dependency_failure_policy = DependencyFailurePolicy::SkipDependents;
    let service = service_with(Arc::new(InMemoryStorage::new()), api.clone(), settings).await;
    service.upsert_tasks(vec![stock_basic(), daily()]).await.unwrap();

    let ctx = DateContext::from_args(Some("20240102"), None, None).unwrap();
    let run = service.run_flow(TaskSelection::All, ctx).await.unwrap();

    assert_eq!(run.status, FlowStatus::Partial);
    assert_eq!(run.outcome("stock_basic").unwrap().state, TaskRunState::Failed);
    assert_eq!(run.outcome("daily").unwrap().state, TaskRunState::Blocked);
    assert_eq!(api.calls("daily"), 0);
}

#[tokio::test]
async fn empty_schedule_is_reported_as_empty() {
    let service = service_with(Arc::new(InMemoryStorage::new()), Arc::new(ScriptedApi::new()), fast_settings()).await;
    service.upsert_tasks(vec![stock_basic()]).await.unwrap();

    let run = service
        .run_flow(TaskSelection::Schedule(Schedule::Weekly), DateContext::Latest)
        .await
        .unwrap();
    assert_eq!(run.status, FlowStatus::Empty);
    assert!(run.outcomes.is_empty());
}

#[tokio::test]
async fn unknown_task_in_selection_is_rejected_before_running() {
    let api = Arc::new(ScriptedApi::new());
    let service = service_with(Arc::new(InMemoryStorage::new()), api.clone(), fast_settings()).await;
    service.upsert_tasks(vec![stock_basic()]).await.unwrap();

    let selection = TaskSelection::Ids(vec!["stock_basic".into(), "missing".into()]);
    let err = service.run_flow(selection, DateContext::Latest).await.unwrap_err();
    assert!(matches!(err, SyncError::NotFound { ref task_id } if task_id == "missing"));
    assert!(api.recorded().is_empty());
}

#[tokio::test]
async fn cyclic_import_is_rejected_as_a_whole() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tasks.json");
    let mut a = stock_basic();
    a.task_id = "a".into();
    a.depends_on = vec!["b".into()];
    let mut b = stock_basic();
    b.task_id = "b".into();
    b.depends_on = vec!["a".into()];
    std::fs::write(&path, serde_json::to_vec(&vec![a, b]).unwrap()).unwrap();

    let service = service_with(Arc::new(InMemoryStorage::new()), Arc::new(ScriptedApi::new()), fast_settings()).await;
    let err = service.import_tasks(&path).await.unwrap_err();

    assert!(matches!(err, SyncError::Validation(ref v) if v.field == "depends_on"));
    assert!(service.list_tasks().await.unwrap().is_empty());
}

#[tokio::test]
async fn state_survives_a_restart_on_file_storage() {
    let dir = tempfile::tempdir().unwrap();
    let api = Arc::new(ScriptedApi::new());
    api.push_page("daily", 0, quotes("20240102", 3));

    {
        let storage = Arc::new(JsonFileStorage::open(dir.path()).await.unwrap());
        let service = service_with(storage, api.clone(), fast_settings()).await;
        let mut task = daily();
        task.depends_on.clear();
        service.upsert_tasks(vec![task]).await.unwrap();
        let ctx = DateContext::from_args(Some("20240102"), None, None).unwrap();
        service.run_task("daily", ctx).await.unwrap();
    }

    let storage = Arc::new(JsonFileStorage::open(dir.path()).await.unwrap());
    let service = service_with(storage, api, fast_settings()).await;
    let status = service.get_task_status("daily").await.unwrap();
    assert_eq!(status.last_synced_cursor.as_deref(), Some("20240102"));
    assert_eq!(service.get_run_history("daily", 5).await.unwrap().len(), 1);
    assert_eq!(service.get_task("daily").await.unwrap().api_limit, Some(5000));
}

#[tokio::test]
async fn demo_task_file_imports_and_resolves() {
    let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("../../demos/tasks.json");
    let api = Arc::new(ScriptedApi::new());
    let service = service_with(Arc::new(InMemoryStorage::new()), api.clone(), fast_settings()).await;

    assert_eq!(service.import_tasks(&path).await.unwrap(), 6);
    assert!(!service.get_task("sync_fina_indicator").await.unwrap().enabled);

    // No scripted data: every enabled task succeeds with zero rows.
    let run = service.run_flow(TaskSelection::All, DateContext::Latest).await.unwrap();
    assert_eq!(run.status, FlowStatus::Completed);
    assert_eq!(
        run.layers,
        vec![
            vec!["sync_stock_basic".to_string(), "sync_trade_cal".to_string()],
            vec!["sync_adj_factor".to_string(), "sync_daily".to_string()],
            vec!["sync_daily_basic".to_string()],
        ]
    );
    assert_eq!(api.calls("fina_indicator"), 0);
}
