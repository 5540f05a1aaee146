//! IdGenerator port - ID 生成の抽象化
//!
//! # 実装
//! - **UlidGenerator**: ULID ベース（本番用）

use std::sync::Mutex;

use crate::domain::ids::{RunId, RunLogId};
use crate::ports::Clock;
use ulid::Ulid;

/// IdGenerator は run / run log の ID を生成
///
/// # Thread Safety
/// - `Send + Sync` を要求（同じ layer の並行タスクから使われる）
pub trait IdGenerator: Send + Sync {
    fn generate_run_id(&self) -> RunId;

    fn generate_log_id(&self) -> RunLogId;
}

/// UlidGenerator は Clock を使って現在時刻ベースの ULID を生成します。
///
/// 同じミリ秒内（FixedClock を含む）では直前の値を increment するので、
/// 生成順 = ソート順が保たれる。
pub struct UlidGenerator<C> {
    clock: C,
    last: Mutex<Option<Ulid>>,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self {
            clock,
            last: Mutex::new(None),
        }
    }

    fn next_ulid(&self) -> Ulid {
        let timestamp_ms = self.clock.now().timestamp_millis().max(0) as u64;
        let fresh = Ulid::from_parts(timestamp_ms, rand::random());
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        let next = match *last {
            Some(prev) if fresh <= prev => prev.increment().unwrap_or(fresh),
            _ => fresh,
        };
        *last = Some(next);
        next
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_run_id(&self) -> RunId {
        RunId::from(self.next_ulid())
    }

    fn generate_log_id(&self) -> RunLogId {
        RunLogId::from(self.next_ulid())
    }
}
