//! Sync engine.
//!
//! # 構成（葉から根へ）
//! - **RateLimiter**: 外部 API への呼び出しをスライディングウィンドウで制限
//! - **RetryPolicy**: 指数バックオフ付きのリトライ
//! - **PaginatedFetcher**: offset を進めながらページを取得してつなげる
//! - **CheckpointStore**: task ごとのカーソルと RunLog
//! - **TaskConfigRegistry**: TaskConfig の検証と永続化
//! - **DependencyResolver**: depends_on から並行実行できる layer を作る
//! - **TaskExecutor**: full / by_date / by_stock の実行と commit
//! - **Orchestrator**: flow 全体（layer ごとに並行実行）
//!
//! どれもグローバルな状態を持たない。起動時に組み立てて注入する（`app::builder`）。

pub mod cancel;
pub mod checkpoint;
pub mod executor;
pub mod fetcher;
pub mod orchestrator;
pub mod rate_limiter;
pub mod registry;
pub mod resolver;
pub mod retry;

pub use self::cancel::{CancelSignal, FlowCancel};
pub use self::checkpoint::CheckpointStore;
pub use self::executor::TaskExecutor;
pub use self::fetcher::{Page, PaginatedFetcher};
pub use self::orchestrator::{DependencyFailurePolicy, Orchestrator};
pub use self::rate_limiter::RateLimiter;
pub use self::registry::TaskConfigRegistry;
pub use self::resolver::{DependencyGraph, DependencyResolver};
pub use self::retry::{RetryExhausted, RetryPolicy};
