//! TushareClient - HTTP の DataApi 実装
//!
//! リクエスト: `POST {url}` に `{"api_name", "token", "params", "fields"}`。
//! ページングは `limit` / `offset` を params に入れて渡す。
//!
//! レスポンス: `{"code", "msg", "data": {"fields": [...], "items": [[...], ...]}}`。
//! `items` の各行を `fields` と組にして Row にする。
//!
//! # エラーの分類
//! - 通信エラー / HTTP 5xx / 429 / code != 0 → `ApiError::Transient`（リトライ対象）
//! - その他の HTTP 4xx → `ApiError::Rejected`

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{Params, Row, SyncError};
use crate::ports::{ApiError, DataApi, PageRequest};

pub const DEFAULT_URL: &str = "http://api.tushare.pro";

#[derive(Debug, Clone)]
pub struct TushareConfig {
    pub url: String,
    pub token: String,
    /// Per-request timeout enforced by the HTTP client.
    pub timeout: Duration,
}

impl TushareConfig {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            token: token.into(),
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Serialize)]
struct ApiRequest<'a> {
    api_name: &'a str,
    token: &'a str,
    params: BTreeMap<&'a str, &'a str>,
    fields: &'a str,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    code: i64,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    data: Option<ApiData>,
}

#[derive(Debug, Deserialize)]
struct ApiData {
    fields: Vec<String>,
    #[serde(default)]
    items: Vec<Vec<Value>>,
}

/// Zip every item with the field names.
fn decode(response: ApiResponse) -> Result<Vec<Row>, ApiError> {
    if response.code != 0 {
        return Err(ApiError::Transient(format!(
            "code {}: {}",
            response.code,
            response.msg.unwrap_or_default()
        )));
    }
    let Some(data) = response.data else {
        return Ok(Vec::new());
    };
    data.items
        .into_iter()
        .map(|item| {
            if item.len() != data.fields.len() {
                return Err(ApiError::Rejected(format!(
                    "row has {} values for {} fields",
                    item.len(),
                    data.fields.len()
                )));
            }
            Ok(data.fields.iter().cloned().zip(item).collect::<Row>())
        })
        .collect()
}

pub struct TushareClient {
    client: Client,
    config: TushareConfig,
}

impl TushareClient {
    pub fn new(config: TushareConfig) -> Result<Self, SyncError> {
        if config.token.trim().is_empty() {
            return Err(SyncError::Config("tushare token is empty".into()));
        }
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| SyncError::Config(format!("http client: {e}")))?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl DataApi for TushareClient {
    async fn call(&self, endpoint: &str, params: &Params, page: Option<PageRequest>) -> Result<Vec<Row>, ApiError> {
        let limit;
        let offset;
        let mut body_params: BTreeMap<&str, &str> = params.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        if let Some(page) = page {
            limit = page.limit.to_string();
            offset = page.offset.to_string();
            body_params.insert("limit", &limit);
            body_params.insert("offset", &offset);
        }
        let request = ApiRequest {
            api_name: endpoint,
            token: &self.config.token,
            params: body_params,
            fields: "",
        };

        let response = self
            .client
            .post(&self.config.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| ApiError::Transient(format!("{endpoint}: {e}")))?;

        let status = response.status();
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ApiError::Transient(format!("{endpoint}: http {status}")));
        }
        if !status.is_success() {
            return Err(ApiError::Rejected(format!("{endpoint}: http {status}")));
        }

        let body: ApiResponse = response
            .json()
            .await
            .map_err(|e| ApiError::Transient(format!("{endpoint}: bad response body: {e}")))?;
        let rows = decode(body)?;
        tracing::debug!(endpoint, rows = rows.len(), "tushare call finished");
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(v: Value) -> ApiResponse {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn items_are_zipped_with_fields() {
        let rows = decode(parse(json!({
            "code": 0,
            "msg": "",
            "data": {
                "fields": ["ts_code", "trade_date", "close"],
                "items": [["000001.SZ", "20240102", 9.39], ["000002.SZ", "20240102", 10.1]]
            }
        })))
        .unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["ts_code"], "000001.SZ");
        assert_eq!(rows[1]["close"], json!(10.1));
    }

    #[test]
    fn non_zero_code_is_transient() {
        let err = decode(parse(json!({"code": 40203, "msg": "too many calls per minute"}))).unwrap_err();
        assert!(matches!(err, ApiError::Transient(ref m) if m.contains("40203")));
    }

    #[test]
    fn missing_data_is_an_empty_page() {
        assert!(decode(parse(json!({"code": 0}))).unwrap().is_empty());
    }

    #[test]
    fn ragged_item_is_rejected() {
        let err = decode(parse(json!({
            "code": 0,
            "data": {"fields": ["a", "b"], "items": [[1]]}
        })))
        .unwrap_err();
        assert!(matches!(err, ApiError::Rejected(_)));
    }

    #[test]
    fn request_body_shape() {
        let mut params = BTreeMap::new();
        params.insert("trade_date", "20240102");
        params.insert("limit", "5000");
        let body = serde_json::to_value(ApiRequest {
            api_name: "daily",
            token: "t",
            params,
            fields: "",
        })
        .unwrap();
        assert_eq!(
            body,
            json!({
                "api_name": "daily",
                "token": "t",
                "params": {"limit": "5000", "trade_date": "20240102"},
                "fields": ""
            })
        );
    }

    #[test]
    fn empty_token_is_a_config_error() {
        assert!(matches!(TushareClient::new(TushareConfig::new(" ")), Err(SyncError::Config(_))));
    }
}
