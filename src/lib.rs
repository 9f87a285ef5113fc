//! # Content Sync Library
//!
//! Resilient data acquisition for syncing structured content out of a remote,
//! cursor-paginated content API into a local document tree.
//!
//! ## Features
//!
//! - **Failure Classification**: Every remote failure is classified as transient, permanent or unknown
//! - **Bounded Retry**: Capped exponential backoff, with a smaller budget for failures we don't understand
//! - **Rate-Limit Circuit**: Fails fast once the API keeps throttling us inside a sliding window
//! - **Anomaly-Aware Pagination**: Detects duplicate pages, missing or stalled cursors and empty progress
//! - **Relation Expansion**: Resolves child records concurrently in batches with per-item timeouts
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use content_sync::config::SyncConfig;
//! use content_sync::expander::RelationExpander;
//! use content_sync::fetcher::http::HttpContentSource;
//! use content_sync::fetcher::pagination::PaginatedFetcher;
//! use content_sync::fetcher::resilient::ResilientCaller;
//! use content_sync::fetcher::QueryRequest;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SyncConfig::from_env()?;
//! let source = Arc::new(HttpContentSource::new(
//!     "https://api.notion.com/v1",
//!     std::env::var("CONTENT_API_TOKEN")?,
//! ));
//! let caller = Arc::new(ResilientCaller::from_config(&config));
//!
//! let fetcher = PaginatedFetcher::new(caller.clone(), source.clone(), config.max_query_pages);
//! let report = fetcher
//!     .fetch_database("database-id", &QueryRequest::default())
//!     .await?;
//!
//! let expander = RelationExpander::new(caller, source, &config);
//! let expanded = expander.expand(report.records).await?;
//! println!("{} records", expanded.records.len());
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`config`] - Retry, circuit and expansion settings with environment overrides
//! - [`fetcher`] - Failure classification, retry policy, rate-limit circuit, resilient caller and pagination
//! - [`expander`] - Child-relation expansion and display ordering
//! - [`output`] - Writing synced records to disk
//! - [`metrics`] - Counters for retries, anomalies and skipped children
//! - [`cli`] - The `content-sync` command line

#![warn(missing_docs)]
#![warn(clippy::all)]

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// CLI command implementations
pub mod cli;

/// Pipeline configuration
pub mod config;

/// Relation expansion
pub mod expander;

/// Remote fetch primitives
pub mod fetcher;

/// Observability counters
pub mod metrics;

/// Output writers
pub mod output;

/// Property holding the numeric ordering key
pub const ORDER_PROPERTY: &str = "Order";

/// Property holding child-relation ids
pub const CHILD_RELATION_PROPERTY: &str = "Sub-item";

/// Property holding the display title
pub const TITLE_PROPERTY: &str = "Title";

/// Fallback property for the display title
pub const NAME_PROPERTY: &str = "Name";

/// Label used in diagnostics when a record carries no title
pub const UNKNOWN_LABEL: &str = "Unknown";

/// One item returned by the remote content API.
///
/// Only `id` is typed. Everything else is carried through untouched so that
/// downstream consumers see the record exactly as the API returned it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Unique record identifier
    pub id: String,
    /// All remaining fields, unparsed
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Record {
    /// Create a record with no fields besides its id.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fields: Map::new(),
        }
    }

    /// Builder-style helper that sets `properties.<name>` to `value`.
    pub fn with_property(mut self, name: &str, value: Value) -> Self {
        let properties = self
            .fields
            .entry("properties")
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(map) = properties {
            map.insert(name.to_string(), value);
        }
        self
    }

    /// Build a record from a raw JSON value.
    ///
    /// Returns `None` unless the value is an object with a non-empty string `id`.
    pub fn from_value(value: Value) -> Option<Self> {
        let Value::Object(mut fields) = value else {
            return None;
        };
        let id = match fields.remove("id") {
            Some(Value::String(id)) if !id.is_empty() => id,
            _ => return None,
        };
        Some(Self { id, fields })
    }

    /// Look up a property, first under `properties`, then at the top level.
    pub fn property(&self, name: &str) -> Option<&Value> {
        self.fields
            .get("properties")
            .and_then(|props| props.get(name))
            .or_else(|| self.fields.get(name))
    }

    /// Numeric ordering key. `None` means unordered, which sorts last.
    pub fn order(&self) -> Option<f64> {
        let value = self.property(ORDER_PROPERTY)?;
        match value {
            Value::Number(n) => n.as_f64(),
            Value::Object(map) => map.get("number").and_then(Value::as_f64),
            _ => None,
        }
    }

    /// Child-relation ids in the order the API listed them (duplicates kept).
    pub fn child_ids(&self) -> Vec<String> {
        let items = match self.property(CHILD_RELATION_PROPERTY) {
            Some(Value::Array(items)) => items,
            Some(Value::Object(map)) => match map.get("relation") {
                Some(Value::Array(items)) => items,
                _ => return Vec::new(),
            },
            _ => return Vec::new(),
        };

        items
            .iter()
            .filter_map(|item| match item {
                Value::String(id) => Some(id.clone()),
                Value::Object(obj) => obj.get("id").and_then(Value::as_str).map(str::to_string),
                _ => None,
            })
            .filter(|id| !id.is_empty())
            .collect()
    }

    /// Display title, falling back to the name property.
    pub fn title(&self) -> Option<String> {
        [TITLE_PROPERTY, NAME_PROPERTY]
            .iter()
            .filter_map(|name| self.property(name))
            .find_map(plain_text)
    }

    /// Diagnostic label: the title, or [`UNKNOWN_LABEL`].
    pub fn label(&self) -> String {
        self.title().unwrap_or_else(|| UNKNOWN_LABEL.to_string())
    }
}

/// Extract plain text from a bare string, a rich-text array, or a `{"title": [...]}` envelope.
fn plain_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.clone(),
        Value::Array(parts) => parts
            .iter()
            .filter_map(|part| {
                part.get("plain_text")
                    .or_else(|| part.get("text").and_then(|t| t.get("content")))
                    .and_then(Value::as_str)
            })
            .collect::<String>(),
        Value::Object(map) => return map.get("title").and_then(plain_text),
        _ => return None,
    };

    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}

/// One paginated response batch, after normalization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    /// Records on this page, in API order
    pub results: Vec<Record>,
    /// Whether the endpoint claims more pages follow
    pub has_more: bool,
    /// Cursor for the next page, if any
    pub next_cursor: Option<String>,
}
