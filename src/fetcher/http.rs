//! HTTP content source (reqwest)
//!
//! Implements [`ContentSource`] against a Notion-style REST API:
//! - `POST {base}/databases/{id}/query` for paginated queries
//! - `GET {base}/pages/{id}` for single records
//! - `GET {base}/blocks/{id}/children` for paginated child blocks
//!
//! This layer only translates transport outcomes into [`FetcherError`]s.
//! Retries, backoff and the rate-limit circuit live in
//! [`crate::fetcher::resilient`].

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::{Client, RequestBuilder};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::fetcher::shared_resources::global_http_client;
use crate::fetcher::{ContentSource, FetcherError, FetcherResult, QueryRequest};

/// Default API base URL
pub const DEFAULT_BASE_URL: &str = "https://api.notion.com/v1";

/// Default API version sent with every request
pub const DEFAULT_API_VERSION: &str = "2022-06-28";

/// Header carrying the API version
pub const API_VERSION_HEADER: &str = "Notion-Version";

/// Page size requested from paginated endpoints (the API maximum)
const PAGE_SIZE: u32 = 100;

/// reqwest-backed content source
pub struct HttpContentSource {
    client: Arc<Client>,
    base_url: String,
    token: String,
    api_version: String,
}

impl HttpContentSource {
    /// Create a source using the shared global client
    ///
    /// # Arguments
    /// * `base_url` - API root (e.g., "<https://api.notion.com/v1>")
    /// * `token` - Integration token sent as a bearer token
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self::with_client(global_http_client(), base_url, token)
    }

    /// Create a source with an explicit client
    pub fn with_client(client: Arc<Client>, base_url: impl Into<String>, token: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.into(),
            api_version: DEFAULT_API_VERSION.to_string(),
        }
    }

    /// Override the API version header
    pub fn with_api_version(mut self, api_version: impl Into<String>) -> Self {
        self.api_version = api_version.into();
        self
    }

    async fn send(&self, request: RequestBuilder, endpoint: &str) -> FetcherResult<Value> {
        debug!("Sending request to: {}", endpoint);

        let response = request
            .bearer_auth(&self.token)
            .header(API_VERSION_HEADER, &self.api_version)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers());
            let body = response.text().await.unwrap_or_default();
            let message = error_message(&body)
                .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string());

            warn!(
                endpoint = endpoint,
                status = status.as_u16(),
                retry_after_secs = retry_after.map(|d| d.as_secs()),
                "Content API returned an error: {}",
                message
            );
            return Err(match retry_after {
                Some(retry_after) => FetcherError::Throttled {
                    status: status.as_u16(),
                    message,
                    retry_after,
                },
                None => FetcherError::Http {
                    status: status.as_u16(),
                    message,
                },
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| FetcherError::Parse(format!("Failed to deserialize response: {e}")))
    }
}

#[async_trait]
impl ContentSource for HttpContentSource {
    async fn query(&self, database_id: &str, request: &QueryRequest) -> FetcherResult<Value> {
        let endpoint = format!("{}/databases/{}/query", self.base_url, database_id);
        let mut body = request.clone();
        body.page_size.get_or_insert(PAGE_SIZE);
        self.send(self.client.post(&endpoint).json(&body), &endpoint).await
    }

    async fn retrieve(&self, id: &str) -> FetcherResult<Value> {
        let endpoint = format!("{}/pages/{}", self.base_url, id);
        self.send(self.client.get(&endpoint), &endpoint).await
    }

    async fn list_children(&self, block_id: &str, cursor: Option<&str>) -> FetcherResult<Value> {
        let endpoint = format!("{}/blocks/{}/children", self.base_url, block_id);
        let mut params = vec![("page_size", PAGE_SIZE.to_string())];
        if let Some(cursor) = cursor {
            params.push(("start_cursor", cursor.to_string()));
        }
        self.send(self.client.get(&endpoint).query(&params), &endpoint).await
    }
}

/// Translate a reqwest failure into a [`FetcherError`].
fn map_transport_error(err: reqwest::Error) -> FetcherError {
    if err.is_timeout() {
        FetcherError::Timeout(err.to_string())
    } else if err.is_connect() || err.is_request() {
        FetcherError::Network(err.to_string())
    } else if err.is_decode() || err.is_body() {
        FetcherError::Parse(err.to_string())
    } else {
        FetcherError::Other(err.to_string())
    }
}

/// Pull `code: message` out of a JSON error body, if there is one.
fn error_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    let message = value.get("message").and_then(Value::as_str)?;
    match value.get("code").and_then(Value::as_str) {
        Some(code) => Some(format!("{code}: {message}")),
        None => Some(message.to_string()),
    }
}

/// Parse the `Retry-After` header (seconds form only).
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let raw = headers.get(reqwest::header::RETRY_AFTER)?.to_str().ok()?;
    match raw.trim().parse::<u64>() {
        Ok(secs) => Some(Duration::from_secs(secs)),
        Err(e) => {
            debug!("Ignoring non-numeric Retry-After '{}': {}", raw, e);
            None
        }
    }
}
