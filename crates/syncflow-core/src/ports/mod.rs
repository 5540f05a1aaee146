//! Ports - 抽象化レイヤー
//!
//! このモジュールは Hexagonal Architecture の「ポート」を定義します。
//! 各 trait は外部システム（データ API、ストレージ、銘柄一覧）への
//! インターフェースを提供し、実装の詳細を隠蔽します。
//!
//! どの実装もグローバルには置かず、起動時に組み立てて注入する。

pub mod clock;
pub mod data_api;
pub mod id_generator;
pub mod stock_universe;
pub mod storage;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::data_api::{ApiError, DataApi, PageRequest};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::stock_universe::StockUniverse;
pub use self::storage::{Storage, StorageError};
