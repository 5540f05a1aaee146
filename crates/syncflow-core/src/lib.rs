//! syncflow-core
//!
//! Incremental data sync from a paginated, rate-limited external API into
//! relational tables, with checkpoints and dependency-ordered flows.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（TaskConfig, Checkpoint, RunLog, FlowRun, DateContext, errors）
//! - **ports**: 抽象化レイヤー（DataApi, Storage, StockUniverse, Clock, IdGenerator）
//! - **sync**: 同期エンジン（RateLimiter, RetryPolicy, PaginatedFetcher, CheckpointStore,
//!   TaskConfigRegistry, DependencyResolver, TaskExecutor, Orchestrator）
//! - **impls**: ports の実装（InMemoryStorage, JsonFileStorage, ScriptedApi, TushareClient など）
//! - **app**: 組み立てとファサード（SyncServiceBuilder, SyncService, SyncSettings）

pub mod app;
pub mod domain;
pub mod impls;
pub mod ports;
pub mod sync;

#[cfg(test)]
mod testing;
