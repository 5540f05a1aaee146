//! Shared helpers for unit tests.

use std::ops::Range;

use serde_json::json;

use crate::domain::Row;

pub use crate::impls::{InMemoryStorage, ScriptedApi, StaticUniverse};

/// Rows `{"id": "{prefix}-{i}"}` for every `i` in `range`.
pub fn rows(prefix: &str, range: Range<usize>) -> Vec<Row> {
    range
        .map(|i| {
            let mut row = Row::new();
            row.insert("id".into(), json!(format!("{prefix}-{i}")));
            row
        })
        .collect()
}

/// Rows keyed by `ts_code` + `trade_date`, the shape of the daily quote tables.
pub fn quotes(date: &str, range: Range<usize>) -> Vec<Row> {
    range
        .map(|i| {
            let mut row = Row::new();
            row.insert("ts_code".into(), json!(format!("{i:06}.SZ")));
            row.insert("trade_date".into(), json!(date));
            row.insert("close".into(), json!(10.0 + i as f64));
            row
        })
        .collect()
}
