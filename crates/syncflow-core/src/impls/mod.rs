//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **InMemoryStorage**: 開発用・テスト用の行ストア（障害注入つき）
//! - **JsonFileStorage**: 1 テーブル 1 JSON ファイルの行ストア（CLI 用）
//! - **ScriptedApi**: 応答を事前登録する DataApi（テスト・デモ用）
//! - **TushareClient**: HTTP の DataApi
//! - **StaticUniverse** / **TableStockUniverse**: StockUniverse
//!
//! Clock と IdGenerator の実装は小さいので `ports` 側に置いている。

pub mod inmem_storage;
pub mod json_file_storage;
pub mod scripted_api;
pub mod tushare;
pub mod universe;

pub use self::inmem_storage::{InMemoryStorage, Table};
pub use self::json_file_storage::JsonFileStorage;
pub use self::scripted_api::{RecordedCall, ScriptedApi};
pub use self::tushare::{TushareClient, TushareConfig};
pub use self::universe::{StaticUniverse, TableStockUniverse};
