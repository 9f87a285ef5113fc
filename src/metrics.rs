//! Observability counters for the sync pipeline
//!
//! Uses the `metrics` facade so recording is a no-op until a recorder is
//! installed. The CLI installs a Prometheus exporter when `--metrics-addr`
//! is given.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::OnceCell;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{debug, info};

use crate::fetcher::classify::FailureClass;

static METRICS_INITIALIZED: OnceCell<SocketAddr> = OnceCell::new();

/// Initialize the Prometheus exporter on `addr`.
///
/// Idempotent: later calls are ignored once an exporter is installed.
pub fn init_metrics(addr: SocketAddr) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    if let Some(existing) = METRICS_INITIALIZED.get() {
        debug!("Metrics already initialized on {}, skipping", existing);
        return Ok(());
    }

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(
        "content_sync_retries_total",
        Unit::Count,
        "Retry attempts scheduled by the resilient caller"
    );
    describe_histogram!(
        "content_sync_retry_backoff_seconds",
        Unit::Seconds,
        "Backoff slept before each retry"
    );
    describe_counter!(
        "content_sync_rate_limit_hits_total",
        Unit::Count,
        "Rate-limit failures recorded into the circuit"
    );
    describe_counter!(
        "content_sync_circuit_open_total",
        Unit::Count,
        "Calls refused because the rate-limit circuit was open"
    );
    describe_counter!(
        "content_sync_pages_fetched_total",
        Unit::Count,
        "Paginated endpoint calls that returned a page"
    );
    describe_counter!(
        "content_sync_pagination_anomalies_total",
        Unit::Count,
        "Pagination anomalies detected"
    );
    describe_counter!(
        "content_sync_partial_fetches_total",
        Unit::Count,
        "Fetches that returned partial results"
    );
    describe_counter!(
        "content_sync_children_skipped_total",
        Unit::Count,
        "Child records omitted from expansion"
    );

    let _ = METRICS_INITIALIZED.set(addr);
    info!("Metrics system initialized successfully on {}", addr);
    Ok(())
}

/// Record a scheduled retry and its backoff
pub fn record_retry_backoff(operation: &str, class: FailureClass, delay: Duration) {
    counter!(
        "content_sync_retries_total",
        "operation" => operation.to_string(),
        "class" => class.as_str()
    )
    .increment(1);

    histogram!(
        "content_sync_retry_backoff_seconds",
        "operation" => operation.to_string()
    )
    .record(delay.as_secs_f64());
}

/// Record a rate-limit failure
pub fn record_rate_limit_hit(operation: &str) {
    counter!("content_sync_rate_limit_hits_total", "operation" => operation.to_string()).increment(1);
}

/// Record a call refused by the open circuit
pub fn record_circuit_open(operation: &str) {
    counter!("content_sync_circuit_open_total", "operation" => operation.to_string()).increment(1);
}

/// Record one page received from a paginated endpoint
pub fn record_page_fetched(operation: &str) {
    counter!("content_sync_pages_fetched_total", "operation" => operation.to_string()).increment(1);
}

/// Record a detected pagination anomaly
pub fn record_anomaly(operation: &str, kind: &'static str) {
    counter!(
        "content_sync_pagination_anomalies_total",
        "operation" => operation.to_string(),
        "kind" => kind
    )
    .increment(1);
}

/// Record a fetch that stopped early
pub fn record_pagination_partial(operation: &str, reason: &'static str) {
    counter!(
        "content_sync_partial_fetches_total",
        "operation" => operation.to_string(),
        "reason" => reason
    )
    .increment(1);
}

/// Record a child omitted from expansion
pub fn record_child_skipped(reason: &'static str) {
    counter!("content_sync_children_skipped_total", "reason" => reason).increment(1);
}
