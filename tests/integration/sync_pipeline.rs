//! End-to-end pipeline tests: HTTP source, resilient pagination, expansion, output

use content_sync::config::SyncConfig;
use content_sync::expander::RelationExpander;
use content_sync::fetcher::http::HttpContentSource;
use content_sync::fetcher::pagination::{FetchTermination, PaginatedFetcher};
use content_sync::fetcher::resilient::ResilientCaller;
use content_sync::fetcher::QueryRequest;
use content_sync::output::write_records;
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::tempdir;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::support::scripted_source::{parent, record};

async fn mount_database(server: &MockServer) {
    // Cursor-specific mocks first so they win over the first-page mock
    Mock::given(method("POST"))
        .and(path("/databases/db/query"))
        .and(body_partial_json(json!({"start_cursor": "c1"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [parent("p1", Some(1.0), &["c-b", "c-a", "c-b"])],
            "has_more": false,
            "next_cursor": null
        })))
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/databases/db/query"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [parent("p2", Some(2.0), &[]), parent("p0", None, &["c-z"])],
            "has_more": true,
            "next_cursor": "c1"
        })))
        .mount(server)
        .await;
}

async fn mount_page(server: &MockServer, id: &str, body: Value) {
    Mock::given(method("GET"))
        .and(path(format!("/pages/{id}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_sync_and_expand_end_to_end() {
    let server = MockServer::start().await;

    // First query attempt is throttled once
    Mock::given(method("POST"))
        .and(path("/databases/db/query"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({
            "code": "rate_limited",
            "message": "Slow down."
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_database(&server).await;
    mount_page(&server, "c-a", record("c-a", Some(1.0), "Child A")).await;
    mount_page(&server, "c-b", record("c-b", None, "Child B")).await;
    Mock::given(method("GET"))
        .and(path("/pages/c-z"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "code": "object_not_found",
            "message": "gone"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let config = SyncConfig::for_tests();
    let source = Arc::new(HttpContentSource::new(server.uri(), "secret"));
    let caller = Arc::new(ResilientCaller::from_config(&config));

    let fetcher = PaginatedFetcher::new(caller.clone(), source.clone(), config.max_query_pages);
    let report = fetcher
        .fetch_database("db", &QueryRequest::default())
        .await
        .unwrap();

    assert_eq!(report.termination, FetchTermination::Exhausted);
    assert_eq!(report.calls, 2);
    assert_eq!(caller.circuit().recorded_hits(), 1);

    let expansion = RelationExpander::new(caller, source, &config)
        .expand(report.records)
        .await
        .unwrap();

    let ids: Vec<_> = expansion.records.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["p1", "c-a", "c-b", "p2", "p0"]);
    assert_eq!(expansion.resolved, 2);
    assert_eq!(expansion.failed, 1);

    let dir = tempdir().unwrap();
    let out = dir.path().join("sync").join("db.json");
    write_records(&out, &expansion.records).unwrap();

    let written: Value = serde_json::from_str(&std::fs::read_to_string(&out).unwrap()).unwrap();
    assert_eq!(written.as_array().unwrap().len(), 5);
    assert_eq!(written[1]["properties"]["Title"], "Child A");
}
