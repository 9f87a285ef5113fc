//! Response normalization at the API boundary.
//!
//! Raw responses can be missing fields, carry nulls, or have the wrong types.
//! Everything is normalized here, with safe defaults, so the pagination state
//! machine and the relation expander only ever see well-formed values.

use serde_json::Value;
use tracing::warn;

use crate::fetcher::{FetcherError, FetcherResult};
use crate::{Page, Record};

/// Stateless parser for content API responses
pub struct ResponseParser;

impl ResponseParser {
    /// Parse one paginated response with defaults.
    ///
    /// - `results` missing or not an array → empty
    /// - entries that aren't objects with a string `id` → dropped with a warning
    /// - `has_more` → `true` only if literally `true`
    /// - `next_cursor` → `None` unless a non-empty string
    pub fn parse_page(value: &Value) -> Page {
        let results = match value.get("results") {
            Some(Value::Array(items)) => {
                let mut records = Vec::with_capacity(items.len());
                for (index, item) in items.iter().enumerate() {
                    match Record::from_value(item.clone()) {
                        Some(record) => records.push(record),
                        None => warn!(
                            index = index,
                            "Dropping malformed result without a string id"
                        ),
                    }
                }
                records
            }
            Some(Value::Null) | None => Vec::new(),
            Some(other) => {
                warn!(
                    kind = json_kind(other),
                    "Response 'results' is not an array - treating as empty"
                );
                Vec::new()
            }
        };

        let has_more = matches!(value.get("has_more"), Some(Value::Bool(true)));

        let next_cursor = value
            .get("next_cursor")
            .and_then(Value::as_str)
            .filter(|cursor| !cursor.is_empty())
            .map(str::to_string);

        Page {
            results,
            has_more,
            next_cursor,
        }
    }

    /// Parse a single-record response.
    ///
    /// # Errors
    /// [`FetcherError::InvalidResponse`] naming `operation` for null or malformed responses
    pub fn parse_record(value: Value, operation: &str) -> FetcherResult<Record> {
        let kind = json_kind(&value);
        Record::from_value(value).ok_or_else(|| {
            FetcherError::InvalidResponse(format!(
                "invalid response from {operation}: expected an object with an id, got {kind}"
            ))
        })
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
