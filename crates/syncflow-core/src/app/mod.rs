//! App - アプリケーション層
//!
//! sync の部品を組み合わせて、外向きの操作を提供します。
//!
//! # 主要コンポーネント
//! - **SyncServiceBuilder**: ports と設定から SyncService を組み立てる
//! - **SyncService**: UI / API 層・CLI 向けのファサード
//! - **SyncSettings**: レート制限、リトライ、並行数などの設定

pub mod builder;
pub mod service;
pub mod settings;

pub use self::builder::{BuildError, SyncServiceBuilder};
pub use self::service::{SyncService, TaskStatus};
pub use self::settings::SyncSettings;
