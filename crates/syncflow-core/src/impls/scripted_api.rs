//! ScriptedApi - 開発用・テスト用の DataApi
//!
//! # 学習ポイント
//! - 応答は (endpoint, params 条件, offset) ごとに事前登録する
//! - 登録がない呼び出しは空ページを返す（= データなし）
//! - 呼び出しはすべて記録され、テストから検証できる

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::{Params, Row};
use crate::ports::{ApiError, DataApi, PageRequest};

/// One recorded call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub endpoint: String,
    pub params: Params,
    pub page: Option<PageRequest>,
}

struct Response {
    /// Every pair must be present in the call params.
    matching: Params,
    /// `None` answers unbounded calls.
    offset: Option<usize>,
    rows: Vec<Row>,
}

#[derive(Default)]
struct Script {
    responses: Vec<Response>,
    fail_next: u32,
    always_fail: Vec<Params>,
    delay_next: Vec<Duration>,
}

#[derive(Default)]
struct State {
    scripts: HashMap<String, Script>,
    calls: Vec<RecordedCall>,
}

/// DataApi that answers from registered responses.
#[derive(Default)]
pub struct ScriptedApi {
    state: Mutex<State>,
}

fn to_params(pairs: &[(&str, &str)]) -> Params {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

fn matches(matching: &Params, params: &Params) -> bool {
    matching.iter().all(|(k, v)| params.get(k) == Some(v))
}

impl ScriptedApi {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_script<R>(&self, endpoint: &str, f: impl FnOnce(&mut Script) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f(state.scripts.entry(endpoint.to_string()).or_default())
    }

    fn push(&self, endpoint: &str, matching: Params, offset: Option<usize>, rows: Vec<Row>) {
        self.with_script(endpoint, |s| {
            s.responses.push(Response {
                matching,
                offset,
                rows,
            })
        });
    }

    /// Answer a paged call at `offset` regardless of params.
    pub fn push_page(&self, endpoint: &str, offset: usize, rows: Vec<Row>) {
        self.push(endpoint, Params::new(), Some(offset), rows);
    }

    /// Answer a paged call at `offset` when the params contain `pairs`.
    pub fn push_page_for(&self, endpoint: &str, pairs: &[(&str, &str)], offset: usize, rows: Vec<Row>) {
        self.push(endpoint, to_params(pairs), Some(offset), rows);
    }

    /// Answer an unbounded call regardless of params.
    pub fn push_unbounded(&self, endpoint: &str, rows: Vec<Row>) {
        self.push(endpoint, Params::new(), None, rows);
    }

    /// Answer an unbounded call when the params contain `pairs`.
    pub fn push_unbounded_for(&self, endpoint: &str, pairs: &[(&str, &str)], rows: Vec<Row>) {
        self.push(endpoint, to_params(pairs), None, rows);
    }

    /// The next `n` calls to `endpoint` fail with a transient error.
    pub fn fail_next(&self, endpoint: &str, n: u32) {
        self.with_script(endpoint, |s| s.fail_next += n);
    }

    /// Every call whose params contain `pairs` fails.
    pub fn fail_when(&self, endpoint: &str, pairs: &[(&str, &str)]) {
        self.with_script(endpoint, |s| s.always_fail.push(to_params(pairs)));
    }

    /// The next `n` calls to `endpoint` stall for `delay` before answering.
    pub fn delay_next(&self, endpoint: &str, n: usize, delay: Duration) {
        self.with_script(endpoint, |s| s.delay_next.extend(std::iter::repeat_n(delay, n)));
    }

    pub fn recorded(&self) -> Vec<RecordedCall> {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).calls.clone()
    }

    pub fn calls(&self, endpoint: &str) -> usize {
        self.recorded().iter().filter(|c| c.endpoint == endpoint).count()
    }

    /// Offsets of every call to `endpoint`, `None` for unbounded calls.
    pub fn offsets(&self, endpoint: &str) -> Vec<Option<usize>> {
        self.recorded()
            .iter()
            .filter(|c| c.endpoint == endpoint)
            .map(|c| c.page.map(|p| p.offset))
            .collect()
    }

    fn answer(&self, endpoint: &str, params: &Params, page: Option<PageRequest>) -> (Option<Duration>, Result<Vec<Row>, ApiError>) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.calls.push(RecordedCall {
            endpoint: endpoint.to_string(),
            params: params.clone(),
            page,
        });

        let Some(script) = state.scripts.get_mut(endpoint) else {
            return (None, Ok(Vec::new()));
        };
        let delay = if script.delay_next.is_empty() {
            None
        } else {
            Some(script.delay_next.remove(0))
        };
        if script.fail_next > 0 {
            script.fail_next -= 1;
            return (delay, Err(ApiError::Transient(format!("scripted failure on {endpoint}"))));
        }
        if script.always_fail.iter().any(|m| matches(m, params)) {
            return (delay, Err(ApiError::Transient(format!("scripted failure on {endpoint}"))));
        }

        let offset = page.map(|p| p.offset);
        let rows = script
            .responses
            .iter()
            .find(|r| r.offset == offset && matches(&r.matching, params))
            .map(|r| r.rows.clone())
            .unwrap_or_default();
        (delay, Ok(rows))
    }
}

#[async_trait]
impl DataApi for ScriptedApi {
    async fn call(&self, endpoint: &str, params: &Params, page: Option<PageRequest>) -> Result<Vec<Row>, ApiError> {
        let (delay, result) = self.answer(endpoint, params, page);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        result
    }
}
