//! SyncServiceBuilder - SyncService の組み立てとワイヤリング
//!
//! # 学習ポイント
//! - Builder パターンの実装
//! - 起動時検証（Fail-fast 設計）
//! - グローバルな状態を持たない（Storage / DataApi / RateLimiter はここで作って注入する）

use std::sync::Arc;

use crate::domain::SyncError;
use crate::impls::TableStockUniverse;
use crate::ports::{Clock, DataApi, IdGenerator, StockUniverse, Storage, SystemClock, UlidGenerator};
use crate::sync::{CheckpointStore, Orchestrator, PaginatedFetcher, TaskConfigRegistry, TaskExecutor};

use super::service::SyncService;
use super::settings::SyncSettings;

/// SyncServiceBuilder は SyncService を構築
///
/// # 使用例
/// ```ignore
/// let service = SyncServiceBuilder::new()
///     .storage(storage)
///     .data_api(api)
///     .settings(settings)
///     .build()
///     .await?;
/// ```
///
/// # Fail-fast 設計
/// - Storage と DataApi は必須。足りなければ BuildError を返す
/// - 設定値は build() 時に検証する
/// - build() で登録済みの TaskConfig を読み込む（壊れた行があればここで失敗する）
pub struct SyncServiceBuilder {
    storage: Option<Arc<dyn Storage>>,
    api: Option<Arc<dyn DataApi>>,
    universe: Option<Arc<dyn StockUniverse>>,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
    settings: SyncSettings,
}

/// BuildError はサービス構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("missing component: {0}. Call SyncServiceBuilder::{0}() before build().")]
    Missing(&'static str),

    #[error("invalid settings: {0}")]
    Settings(#[source] SyncError),

    #[error("loading task configs failed: {0}")]
    Registry(#[source] SyncError),
}

impl SyncServiceBuilder {
    pub fn new() -> Self {
        Self {
            storage: None,
            api: None,
            universe: None,
            clock: None,
            ids: None,
            settings: SyncSettings::default(),
        }
    }

    pub fn storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn data_api(mut self, api: Arc<dyn DataApi>) -> Self {
        self.api = Some(api);
        self
    }

    /// Defaults to a `TableStockUniverse` over the configured table.
    pub fn stock_universe(mut self, universe: Arc<dyn StockUniverse>) -> Self {
        self.universe = Some(universe);
        self
    }

    /// Defaults to `SystemClock`.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Defaults to a `UlidGenerator` driven by the builder's clock.
    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn settings(mut self, settings: SyncSettings) -> Self {
        self.settings = settings;
        self
    }

    pub async fn build(self) -> Result<SyncService, BuildError> {
        let storage = self.storage.ok_or(BuildError::Missing("storage"))?;
        let api = self.api.ok_or(BuildError::Missing("data_api"))?;
        self.settings.check().map_err(BuildError::Settings)?;
        let settings = self.settings;

        let clock: Arc<dyn Clock> = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let ids: Arc<dyn IdGenerator> = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(Arc::clone(&clock))));
        let universe: Arc<dyn StockUniverse> = self.universe.unwrap_or_else(|| {
            Arc::new(TableStockUniverse::new(
                Arc::clone(&storage),
                settings.stock_universe.table.clone(),
                settings.stock_universe.column.clone(),
            ))
        });

        let registry = Arc::new(TaskConfigRegistry::new(Arc::clone(&storage)));
        let loaded = registry.reload().await.map_err(BuildError::Registry)?;

        let checkpoints = Arc::new(CheckpointStore::new(Arc::clone(&storage)));
        let fetcher = PaginatedFetcher::new(api, Arc::new(settings.rate_limiter()), settings.retry_policy())
            .with_call_timeout(settings.api_timeout());
        let executor = Arc::new(
            TaskExecutor::new(
                fetcher,
                Arc::clone(&storage),
                Arc::clone(&checkpoints),
                universe,
                Arc::clone(&clock),
                Arc::clone(&ids),
            )
            .with_default_stock_batch_size(settings.default_stock_batch_size),
        );
        let orchestrator = Orchestrator::new(Arc::clone(&registry), Arc::clone(&executor), clock, ids)
            .with_policy(settings.dependency_failure_policy)
            .with_max_concurrency(settings.max_concurrency);

        tracing::info!(
            tasks = loaded,
            max_calls = settings.rate_limit.max_calls,
            window_secs = settings.rate_limit.window_secs,
            policy = ?settings.dependency_failure_policy,
            "sync service ready"
        );
        Ok(SyncService::new(registry, checkpoints, executor, orchestrator))
    }
}

impl Default for SyncServiceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{InMemoryStorage, ScriptedApi};

    #[tokio::test]
    async fn build_success() {
        let service = SyncServiceBuilder::new()
            .storage(Arc::new(InMemoryStorage::new()))
            .data_api(Arc::new(ScriptedApi::new()))
            .build()
            .await;
        assert!(service.is_ok());
    }

    #[tokio::test]
    async fn build_missing_storage() {
        let result = SyncServiceBuilder::new()
            .data_api(Arc::new(ScriptedApi::new()))
            .build()
            .await;
        assert!(matches!(result, Err(BuildError::Missing("storage"))));
    }

    #[tokio::test]
    async fn build_missing_data_api() {
        let result = SyncServiceBuilder::new()
            .storage(Arc::new(InMemoryStorage::new()))
            .build()
            .await;
        assert!(matches!(result, Err(BuildError::Missing("data_api"))));
    }

    #[tokio::test]
    async fn build_rejects_bad_settings() {
        let mut settings = SyncSettings::default();
        settings.rate_limit.max_calls = 0;
        let result = SyncServiceBuilder::new()
            .storage(Arc::new(InMemoryStorage::new()))
            .data_api(Arc::new(ScriptedApi::new()))
            .settings(settings)
            .build()
            .await;
        assert!(matches!(result, Err(BuildError::Settings(SyncError::Config(_)))));
    }
}
