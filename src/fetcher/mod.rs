//! Remote fetch primitives
//!
//! Everything that talks to the content API goes through here:
//! - [`classify`] maps failures to transient / permanent / unknown
//! - [`retry`] decides whether and how long to back off
//! - [`circuit`] fails fast once rate limiting becomes sustained
//! - [`resilient`] combines the three around a single remote operation
//! - [`pagination`] walks cursor-paginated endpoints with anomaly detection
//! - [`http`] is the reqwest-backed [`ContentSource`]

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

pub mod circuit;
pub mod classify;
pub mod http;
pub mod pagination;
pub mod parser;
pub mod resilient;
pub mod retry;
pub mod shared_resources;

/// Fetcher errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetcherError {
    /// Non-success HTTP response
    #[error("HTTP {status}: {message}")]
    Http {
        /// Response status code
        status: u16,
        /// Response body or reason phrase
        message: String,
    },

    /// Non-success HTTP response that named a `Retry-After` delay
    #[error("HTTP {status}: {message} (retry after {}s)", retry_after.as_secs())]
    Throttled {
        /// Response status code
        status: u16,
        /// Response body or reason phrase
        message: String,
        /// Server-requested wait before the next attempt
        retry_after: Duration,
    },

    /// Connection-level failure
    #[error("network error: {0}")]
    Network(String),

    /// Request or connect timeout
    #[error("request timed out: {0}")]
    Timeout(String),

    /// Response body could not be decoded
    #[error("parse error: {0}")]
    Parse(String),

    /// Response decoded but has the wrong shape
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Rate-limit circuit is open; callers should abort the batch
    #[error("rate limit circuit open: {hits} rate-limit hits within {}ms", window.as_millis())]
    CircuitOpen {
        /// Hits counted inside the window
        hits: usize,
        /// Window length
        window: Duration,
    },

    /// Anything else the transport reports
    #[error("{0}")]
    Other(String),
}

impl FetcherError {
    /// HTTP status carried by this failure, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            FetcherError::Http { status, .. } | FetcherError::Throttled { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Wait the server asked for before retrying, if any
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            FetcherError::Throttled { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }

    /// Whether this is the circuit-open signal
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, FetcherError::CircuitOpen { .. })
    }
}

/// Result type for fetcher operations
pub type FetcherResult<T> = Result<T, FetcherError>;

/// Body of a paginated query request.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryRequest {
    /// Opaque filter object passed through to the API
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<Value>,
    /// Opaque sort specification passed through to the API
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sorts: Option<Value>,
    /// Cursor for the page to fetch
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_cursor: Option<String>,
    /// Requested page size
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_size: Option<u32>,
}

impl QueryRequest {
    /// Request filtered by `filter`
    pub fn filtered(filter: Value) -> Self {
        Self {
            filter: Some(filter),
            ..Self::default()
        }
    }

    /// Copy of this request positioned at `cursor`
    pub fn at_cursor(&self, cursor: Option<String>) -> Self {
        Self {
            start_cursor: cursor,
            ..self.clone()
        }
    }
}

/// Transport seam for the content API.
///
/// Implementations return raw JSON; normalization happens in [`parser`] so
/// the retry and pagination layers never see half-shaped responses.
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Query one page of a database
    async fn query(&self, database_id: &str, request: &QueryRequest) -> FetcherResult<Value>;

    /// Retrieve a single record by id
    async fn retrieve(&self, id: &str) -> FetcherResult<Value>;

    /// List one page of a block's children
    async fn list_children(&self, block_id: &str, cursor: Option<&str>) -> FetcherResult<Value>;
}
