//! Cursor pagination with anomaly detection
//!
//! Walks a `has_more` / `next_cursor` endpoint page by page through the
//! [`ResilientCaller`], accumulating records in API order.
//!
//! Includes safety mechanisms:
//! - Anomaly detection after every page (duplicate ids, missing cursor,
//!   stalled cursor, empty page that claims more)
//! - A single retry of the same cursor per anomaly, then graceful degradation
//! - A hard ceiling on endpoint calls so a looping endpoint can't spin forever
//!
//! Anomalies are not errors: they end up in [`FetchReport::termination`] and
//! the logs. Only hard endpoint failures propagate as
//! [`FetcherError`](crate::fetcher::FetcherError)s.

use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::fetcher::parser::ResponseParser;
use crate::fetcher::resilient::ResilientCaller;
use crate::fetcher::{ContentSource, FetcherResult, QueryRequest};
use crate::{metrics, Page, Record};

/// Largest number of duplicate ids echoed into a log line
const MAX_LOGGED_IDS: usize = 5;

/// An internally inconsistent page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaginationAnomaly {
    /// Page contained ids already accumulated from earlier pages
    DuplicateIds {
        /// The repeated ids, in page order
        ids: Vec<String>,
    },
    /// `has_more` was true but no `next_cursor` came back
    MissingCursor,
    /// `next_cursor` equals the cursor that produced the page
    StalledCursor {
        /// The repeated cursor
        cursor: String,
    },
    /// Zero results while `has_more` was true
    EmptyProgress,
}

impl PaginationAnomaly {
    /// Short label for log fields and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DuplicateIds { .. } => "duplicate_ids",
            Self::MissingCursor => "missing_cursor",
            Self::StalledCursor { .. } => "stalled_cursor",
            Self::EmptyProgress => "empty_progress",
        }
    }
}

impl fmt::Display for PaginationAnomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateIds { ids } => {
                let shown: Vec<_> = ids.iter().take(MAX_LOGGED_IDS).map(String::as_str).collect();
                write!(f, "{} duplicate id(s) on page: {}", ids.len(), shown.join(", "))?;
                if ids.len() > MAX_LOGGED_IDS {
                    write!(f, ", ...")?;
                }
                Ok(())
            }
            Self::MissingCursor => write!(f, "has_more is true but next_cursor is missing"),
            Self::StalledCursor { cursor } => write!(f, "next_cursor '{cursor}' did not advance"),
            Self::EmptyProgress => write!(f, "empty page while has_more is true"),
        }
    }
}

/// How a fetch ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchTermination {
    /// The endpoint reported `has_more: false`
    Exhausted,
    /// An anomaly survived its retry; results are partial
    AnomalyPersisted {
        /// Anomalies seen on the retry page
        anomalies: Vec<PaginationAnomaly>,
    },
    /// The call ceiling was reached with more pages pending; results are partial
    SafetyLimit {
        /// Endpoint calls made
        iterations: usize,
        /// Anomalies on the last page whose retry the ceiling cut off
        pending: Vec<PaginationAnomaly>,
    },
}

impl FetchTermination {
    /// Whether the result set may be incomplete
    pub fn is_partial(&self) -> bool {
        !matches!(self, FetchTermination::Exhausted)
    }

    /// Short label for summaries and metrics
    pub fn label(&self) -> &'static str {
        match self {
            Self::Exhausted => "exhausted",
            Self::AnomalyPersisted { .. } => "anomaly_persisted",
            Self::SafetyLimit { .. } => "safety_limit",
        }
    }
}

/// Records gathered by one [`PaginatedFetcher::fetch_all`] plus how it ended.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchReport {
    /// Accumulated records in page order
    pub records: Vec<Record>,
    /// Why pagination stopped
    pub termination: FetchTermination,
    /// Endpoint calls made (anomaly retries included; transport retries not)
    pub calls: usize,
}

/// Mutable state owned by one fetch call.
#[derive(Debug, Default)]
struct FetchSession {
    accumulated: Vec<Record>,
    seen_ids: HashSet<String>,
    cursor: Option<String>,
    iteration: usize,
    consecutive_anomaly_retries: u32,
    /// `seen_ids` as they were before the page that triggered the pending retry
    retry_baseline: Option<HashSet<String>>,
    /// Anomalies awaiting their retry
    pending_anomalies: Vec<PaginationAnomaly>,
}

impl FetchSession {
    fn append(&mut self, records: Vec<Record>) {
        for record in records {
            self.seen_ids.insert(record.id.clone());
            self.accumulated.push(record);
        }
    }

    fn append_unseen(&mut self, records: Vec<Record>) {
        for record in records {
            if self.seen_ids.insert(record.id.clone()) {
                self.accumulated.push(record);
            }
        }
    }

    fn finish(self, termination: FetchTermination) -> FetchReport {
        FetchReport {
            records: self.accumulated,
            termination,
            calls: self.iteration,
        }
    }
}

/// Run every anomaly check against a freshly received page.
///
/// # Arguments
/// * `page` - The normalized page
/// * `request_cursor` - Cursor sent to obtain this page (`None` for the first page)
/// * `seen_before` - Ids accumulated before this page
pub fn detect_anomalies(
    page: &Page,
    request_cursor: Option<&str>,
    seen_before: &HashSet<String>,
) -> Vec<PaginationAnomaly> {
    let mut anomalies = Vec::new();

    let duplicates: Vec<String> = page
        .results
        .iter()
        .filter(|record| seen_before.contains(&record.id))
        .map(|record| record.id.clone())
        .collect();
    if !duplicates.is_empty() {
        anomalies.push(PaginationAnomaly::DuplicateIds { ids: duplicates });
    }

    if page.has_more {
        match page.next_cursor.as_deref() {
            None => anomalies.push(PaginationAnomaly::MissingCursor),
            Some(next) if Some(next) == request_cursor => {
                anomalies.push(PaginationAnomaly::StalledCursor {
                    cursor: next.to_string(),
                })
            }
            Some(_) => {}
        }

        if page.results.is_empty() {
            anomalies.push(PaginationAnomaly::EmptyProgress);
        }
    }

    anomalies
}

/// Drives a cursor-paginated endpoint to completion (or graceful degradation).
pub struct PaginatedFetcher {
    caller: Arc<ResilientCaller>,
    source: Arc<dyn ContentSource>,
    max_iterations: usize,
}

impl PaginatedFetcher {
    /// Create a fetcher that makes at most `max_iterations` endpoint calls per fetch
    pub fn new(caller: Arc<ResilientCaller>, source: Arc<dyn ContentSource>, max_iterations: usize) -> Self {
        Self {
            caller,
            source,
            max_iterations: max_iterations.max(1),
        }
    }

    /// Fetch every record of a database matching `request`'s filter.
    pub async fn fetch_database(&self, database_id: &str, request: &QueryRequest) -> FetcherResult<FetchReport> {
        let source = &self.source;
        self.fetch_all("query_database", |cursor| {
            let request = request.at_cursor(cursor);
            async move { source.query(database_id, &request).await }
        })
        .await
    }

    /// Fetch every child block of `block_id`.
    pub async fn fetch_children(&self, block_id: &str) -> FetcherResult<FetchReport> {
        let source = &self.source;
        self.fetch_all("list_block_children", |cursor| async move {
            source.list_children(block_id, cursor.as_deref()).await
        })
        .await
    }

    /// Walk a paginated endpoint.
    ///
    /// # Arguments
    /// * `name` - Operation name for logs
    /// * `query_fn` - Fetches one raw page for the given cursor (`None` = first page)
    ///
    /// # Errors
    /// Hard endpoint failures after retries, or a circuit-open failure.
    /// Anomalies and the call ceiling never produce errors.
    pub async fn fetch_all<F, Fut>(&self, name: &str, query_fn: F) -> FetcherResult<FetchReport>
    where
        F: Fn(Option<String>) -> Fut,
        Fut: Future<Output = FetcherResult<Value>>,
    {
        let mut session = FetchSession::default();

        loop {
            // Safety check: prevent infinite loops
            if session.iteration >= self.max_iterations {
                let pending = std::mem::take(&mut session.pending_anomalies);
                let pending_kinds: Vec<_> = pending.iter().map(PaginationAnomaly::kind).collect();
                warn!(
                    operation = name,
                    iterations = session.iteration,
                    max_iterations = self.max_iterations,
                    records = session.accumulated.len(),
                    pending_anomalies = ?pending_kinds,
                    "pagination safety limit exceeded, returning partial results"
                );
                metrics::record_pagination_partial(name, "safety_limit");
                let iterations = session.iteration;
                return Ok(session.finish(FetchTermination::SafetyLimit { iterations, pending }));
            }

            let cursor = session.cursor.clone();
            let context = cursor.as_deref().unwrap_or("<first page>").to_string();

            debug!(
                operation = name,
                cursor = %context,
                "Fetching page {}",
                session.iteration + 1
            );

            let raw = self
                .caller
                .call(name, &context, || query_fn(cursor.clone()))
                .await?;
            session.iteration += 1;
            metrics::record_page_fetched(name);

            let page = ResponseParser::parse_page(&raw);
            let baseline = session.retry_baseline.take();
            let anomalies = detect_anomalies(
                &page,
                cursor.as_deref(),
                baseline.as_ref().unwrap_or(&session.seen_ids),
            );

            debug!(
                operation = name,
                results = page.results.len(),
                has_more = page.has_more,
                "Received page {}",
                session.iteration
            );

            let Page {
                results,
                has_more,
                next_cursor,
            } = page;

            if anomalies.is_empty() {
                if session.consecutive_anomaly_retries > 0 {
                    info!(
                        operation = name,
                        cursor = %context,
                        "Pagination anomaly cleared after retry"
                    );
                    session.append_unseen(results);
                } else {
                    session.append(results);
                }
                session.consecutive_anomaly_retries = 0;
                session.pending_anomalies.clear();

                if !has_more {
                    info!(
                        operation = name,
                        pages = session.iteration,
                        records = session.accumulated.len(),
                        "Pagination complete"
                    );
                    return Ok(session.finish(FetchTermination::Exhausted));
                }

                session.cursor = next_cursor;
                continue;
            }

            for anomaly in &anomalies {
                warn!(
                    operation = name,
                    cursor = %context,
                    page = session.iteration,
                    anomaly = anomaly.kind(),
                    retry = session.consecutive_anomaly_retries + 1,
                    "Pagination anomaly: {}",
                    anomaly
                );
                metrics::record_anomaly(name, anomaly.kind());
            }

            if session.consecutive_anomaly_retries >= 1 {
                warn!(
                    operation = name,
                    cursor = %context,
                    records = session.accumulated.len(),
                    "anomaly persisted after retry, returning partial results"
                );
                metrics::record_pagination_partial(name, "anomaly_persisted");
                return Ok(session.finish(FetchTermination::AnomalyPersisted { anomalies }));
            }

            // The anomalous page stays in the accumulator; the retry is judged
            // against the ids seen before it.
            let seen_before = session.seen_ids.clone();
            session.append(results);
            session.retry_baseline = Some(seen_before);
            session.pending_anomalies = anomalies;
            session.consecutive_anomaly_retries += 1;
        }
    }
}
