//! Identifiers (strongly-typed, ULID based).
//!
//! # ULID ベースの ID + ジェネリック実装
//! - **時刻でソート可能**: 生成順に並ぶので run history をそのまま時系列で扱える
//! - **分散生成可能**: 調整なしで複数プロセスから生成できる
//!
//! `Id<T>` は Phantom type パターンで、`RunId` と `RunLogId` を
//! コンパイル時に区別します。

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;
use ulid::Ulid;

/// IdMarker は各 ID 型のマーカー trait
///
/// Display で使うプレフィックス（"run-", "log-"）を提供します。
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

/// ジェネリック ID 型
///
/// Serialize 時は `"{prefix}{ulid}"` の文字列になります。
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

/// Parse error for a prefixed id string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid id '{0}'")]
pub struct ParseIdError(pub String);

impl<T: IdMarker> FromStr for Id<T> {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s
            .strip_prefix(T::prefix())
            .ok_or_else(|| ParseIdError(s.to_string()))?;
        let ulid = Ulid::from_string(raw).map_err(|_| ParseIdError(s.to_string()))?;
        Ok(Self::from_ulid(ulid))
    }
}

impl<T: IdMarker> Serialize for Id<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de, T: IdMarker> Deserialize<'de> for Id<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ========================================
// マーカー型の定義
// ========================================

/// FlowRun のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Run {}

impl IdMarker for Run {
    fn prefix() -> &'static str {
        "run-"
    }
}

/// RunLog エントリのマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Log {}

impl IdMarker for Log {
    fn prefix() -> &'static str {
        "log-"
    }
}

/// Identifier of one orchestrated flow run.
pub type RunId = Id<Run>;

/// Identifier of one append-only RunLog row.
pub type RunLogId = Id<Log>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_display_with_prefix() {
        let run = RunId::from_ulid(Ulid::new());
        let log = RunLogId::from_ulid(Ulid::new());

        assert!(run.to_string().starts_with("run-"));
        assert!(log.to_string().starts_with("log-"));
        // let _: RunId = log; // <- does not compile
    }

    #[test]
    fn ids_serialize_as_prefixed_string() {
        let run = RunId::from_ulid(Ulid::new());

        let json = serde_json::to_string(&run).unwrap();
        assert_eq!(json, format!("\"{run}\""));

        let back: RunId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, run);
    }

    #[test]
    fn parse_rejects_wrong_prefix() {
        let log = RunLogId::from_ulid(Ulid::new());
        let err = log.to_string().parse::<RunId>().unwrap_err();
        assert!(err.to_string().contains("log-"));
    }

    #[test]
    fn ulid_ids_are_sortable() {
        let id1 = RunLogId::from_ulid(Ulid::new());
        std::thread::sleep(std::time::Duration::from_millis(2));
        let id2 = RunLogId::from_ulid(Ulid::new());

        assert!(id1 < id2);
    }

    #[test]
    fn phantom_data_does_not_consume_memory() {
        use std::mem::size_of;
        assert_eq!(size_of::<RunId>(), size_of::<Ulid>());
    }
}
