//! Integration tests for diagnostic logging
//!
//! Operators debug failed syncs from these lines, so the key messages and
//! fields are asserted on captured subscriber output.

use content_sync::config::SyncConfig;
use content_sync::expander::RelationExpander;
use content_sync::fetcher::pagination::PaginatedFetcher;
use content_sync::fetcher::resilient::ResilientCaller;
use content_sync::fetcher::{FetcherError, QueryRequest};
use content_sync::Record;
use std::io;
use std::sync::{Arc, Mutex};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

use crate::support::scripted_source::{page, parent, ChildBehavior, ScriptedSource};

/// Shared in-memory log sink
#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedLogs;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

fn subscriber(logs: &CapturedLogs, json: bool) -> Box<dyn tracing::Subscriber + Send + Sync> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("content_sync=debug"))
        .with_writer(logs.clone())
        .with_ansi(false);
    if json {
        Box::new(builder.json().finish())
    } else {
        Box::new(builder.finish())
    }
}

#[tokio::test(start_paused = true)]
async fn test_retry_and_anomaly_lines() {
    let logs = CapturedLogs::default();
    let _guard = tracing::subscriber::set_default(subscriber(&logs, false));

    let source = Arc::new(ScriptedSource::with_page_fn(|n, _| match n {
        0 => Err(FetcherError::Http {
            status: 503,
            message: "Service Unavailable".to_string(),
        }),
        _ => Ok(page(&["a"], true, None)),
    }));
    let caller = Arc::new(ResilientCaller::from_config(&SyncConfig::for_tests()));
    let fetcher = PaginatedFetcher::new(caller, source, 100);

    let report = fetcher
        .fetch_database("db", &QueryRequest::default())
        .await
        .unwrap();
    assert!(report.termination.is_partial());

    let output = logs.contents();
    assert!(output.contains("Retrying (attempt 1/5)"), "{output}");
    assert!(output.contains("operation=\"query_database\"") || output.contains("operation=query_database"));
    assert!(output.contains("classification=transient"));
    assert!(output.contains("missing_cursor"));
    assert!(output.contains("anomaly persisted after retry"));
}

#[tokio::test]
async fn test_permanent_failure_logged_at_error() {
    let logs = CapturedLogs::default();
    let _guard = tracing::subscriber::set_default(subscriber(&logs, false));

    let caller = ResilientCaller::from_config(&SyncConfig::for_tests());
    let _: Result<(), _> = caller
        .call("retrieve_page", "page-1", || async {
            Err(FetcherError::Http {
                status: 400,
                message: "validation_error".to_string(),
            })
        })
        .await;

    let output = logs.contents();
    assert!(output.contains("ERROR"));
    assert!(output.contains("Permanent failure"));
    assert!(!output.contains("Retrying"));
}

#[tokio::test]
async fn test_skipped_child_and_summary_json() {
    let logs = CapturedLogs::default();
    let _guard = tracing::subscriber::set_default(subscriber(&logs, true));

    let source = Arc::new(ScriptedSource::children_only().with_child("broken", ChildBehavior::Null));
    let config = SyncConfig::for_tests();
    let caller = Arc::new(ResilientCaller::from_config(&config));
    let parent = Record::from_value(parent("p", None, &["broken", "absent"])).unwrap();

    let report = RelationExpander::new(caller, source, &config)
        .expand(vec![parent])
        .await
        .unwrap();
    assert_eq!(report.failed, 2);

    let output = logs.contents();
    assert!(output.contains("skipping sub-page absent"));
    assert!(output.contains("invalid response from retrieve_page"));
    assert!(output.contains("Expansion complete"));

    // JSON lines parse and carry structured fields
    let warning = output
        .lines()
        .filter_map(|line| serde_json::from_str::<serde_json::Value>(line).ok())
        .find(|v| v["level"] == "WARN")
        .expect("a JSON warning line");
    assert_eq!(warning["fields"]["child"], "broken");
}
