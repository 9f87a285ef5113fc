//! Unit tests for RelationExpander

use content_sync::config::SyncConfig;
use content_sync::expander::RelationExpander;
use content_sync::fetcher::resilient::ResilientCaller;
use content_sync::fetcher::FetcherError;
use content_sync::Record;
use std::sync::Arc;
use std::time::Duration;

use crate::support::scripted_source::{parent, record, ChildBehavior, ScriptedSource};

fn expander(source: &Arc<ScriptedSource>, config: &SyncConfig) -> RelationExpander {
    let caller = Arc::new(ResilientCaller::from_config(config));
    RelationExpander::new(caller, source.clone(), config)
}

fn parse(value: serde_json::Value) -> Record {
    Record::from_value(value).unwrap()
}

fn ids(records: &[Record]) -> Vec<&str> {
    records.iter().map(|r| r.id.as_str()).collect()
}

#[tokio::test]
async fn test_repeated_child_ids_resolved_once() {
    let source = Arc::new(
        ScriptedSource::children_only()
            .with_child("a", ChildBehavior::Found(record("a", None, "A")))
            .with_child("b", ChildBehavior::Found(record("b", None, "B"))),
    );
    let config = SyncConfig::for_tests();

    let report = expander(&source, &config)
        .expand(vec![parse(parent("p", Some(1.0), &["a", "a", "b"]))])
        .await
        .unwrap();

    assert_eq!(source.retrieved().len(), 2);
    assert_eq!(ids(&report.records), vec!["p", "a", "b"]);
    assert_eq!(report.resolved, 2);
    assert!(!report.is_partial());
}

#[tokio::test(start_paused = true)]
async fn test_hung_child_skipped_siblings_survive() {
    let source = Arc::new(
        ScriptedSource::children_only()
            .with_child("fast-1", ChildBehavior::Found(record("fast-1", Some(1.0), "Fast 1")))
            .with_child("stuck", ChildBehavior::Hangs)
            .with_child("fast-2", ChildBehavior::Found(record("fast-2", Some(2.0), "Fast 2"))),
    );
    let config = SyncConfig::for_tests().with_child_timeout(Duration::from_millis(500));

    let report = expander(&source, &config)
        .expand(vec![parse(parent("p", None, &["fast-1", "stuck", "fast-2"]))])
        .await
        .unwrap();

    assert_eq!(ids(&report.records), vec!["p", "fast-1", "fast-2"]);
    assert_eq!(report.timed_out, 1);
    assert_eq!(report.resolved, 2);
    assert!(report.is_partial());
}

#[tokio::test]
async fn test_children_sorted_explicit_order_first() {
    let source = Arc::new(
        ScriptedSource::children_only()
            .with_child("c1", ChildBehavior::Found(record("c1", None, "Child 1")))
            .with_child("c2", ChildBehavior::Found(record("c2", Some(2.0), "Child 2"))),
    );
    let config = SyncConfig::for_tests();

    let report = expander(&source, &config)
        .expand(vec![parse(parent("parent", Some(1.0), &["c1", "c2"]))])
        .await
        .unwrap();

    assert_eq!(ids(&report.records), vec!["parent", "c2", "c1"]);
}

#[tokio::test]
async fn test_parents_sorted_and_children_follow_their_parent() {
    let source = Arc::new(
        ScriptedSource::children_only()
            .with_child("x1", ChildBehavior::Found(record("x1", Some(1.0), "X1")))
            .with_child("y1", ChildBehavior::Found(record("y1", Some(1.0), "Y1"))),
    );
    let config = SyncConfig::for_tests();

    let report = expander(&source, &config)
        .expand(vec![
            parse(parent("unordered", None, &[])),
            parse(parent("second", Some(2.0), &["y1"])),
            parse(parent("first", Some(1.0), &["x1"])),
        ])
        .await
        .unwrap();

    assert_eq!(
        ids(&report.records),
        vec!["first", "x1", "second", "y1", "unordered"]
    );
    assert_eq!(report.parents, 3);
}

#[tokio::test]
async fn test_failed_and_malformed_children_are_skipped() {
    let source = Arc::new(
        ScriptedSource::children_only()
            .with_child("ok", ChildBehavior::Found(record("ok", None, "Ok")))
            .with_child("null", ChildBehavior::Null)
            .with_child(
                "forbidden",
                ChildBehavior::Fails(FetcherError::Http {
                    status: 403,
                    message: "restricted_resource".to_string(),
                }),
            ),
    );
    let config = SyncConfig::for_tests();

    let report = expander(&source, &config)
        .expand(vec![parse(parent("p", None, &["null", "forbidden", "missing", "ok"]))])
        .await
        .unwrap();

    assert_eq!(ids(&report.records), vec!["p", "ok"]);
    assert_eq!(report.failed, 3);
    assert_eq!(report.skipped(), 3);
}

fn slow_children(count: usize, delay: Duration) -> (Arc<ScriptedSource>, Vec<String>) {
    let children: Vec<String> = (0..count).map(|i| format!("c{i:02}")).collect();
    let mut source = ScriptedSource::children_only();
    for id in &children {
        source = source.with_child(id, ChildBehavior::Slow(delay, record(id, None, id)));
    }
    (Arc::new(source), children)
}

#[tokio::test(start_paused = true)]
async fn test_children_resolved_in_batches() {
    let (source, children) = slow_children(25, Duration::from_millis(100));
    let child_refs: Vec<&str> = children.iter().map(String::as_str).collect();

    let config = SyncConfig::for_tests();
    assert_eq!(config.child_batch_size, 10);
    let start = tokio::time::Instant::now();
    let report = expander(&source, &config)
        .expand(vec![parse(parent("p", None, &child_refs))])
        .await
        .unwrap();

    assert_eq!(report.resolved, 25);
    // Each batch runs concurrently, batches run one after another: 10 + 10 + 5
    assert_eq!(source.max_in_flight(), 10);
    assert_eq!(start.elapsed(), Duration::from_millis(300));
    // Unordered children keep relation order
    assert_eq!(&ids(&report.records)[1..], child_refs.as_slice());
}

#[tokio::test(start_paused = true)]
async fn test_batch_size_bounds_concurrency() {
    let (source, children) = slow_children(9, Duration::from_millis(100));
    let child_refs: Vec<&str> = children.iter().map(String::as_str).collect();

    let config = SyncConfig::for_tests().with_child_batch_size(4);
    let start = tokio::time::Instant::now();
    let report = expander(&source, &config)
        .expand(vec![parse(parent("p", None, &child_refs))])
        .await
        .unwrap();

    assert_eq!(report.resolved, 9);
    assert_eq!(source.max_in_flight(), 4);
    assert_eq!(start.elapsed(), Duration::from_millis(300));
}

#[tokio::test(start_paused = true)]
async fn test_circuit_open_aborts_expansion() {
    let source = Arc::new(
        ScriptedSource::children_only()
            .with_child(
                "throttled",
                ChildBehavior::Fails(FetcherError::Http {
                    status: 429,
                    message: "rate_limited".to_string(),
                }),
            )
            .with_child("ok", ChildBehavior::Found(record("ok", None, "Ok"))),
    );
    let config = SyncConfig::for_tests()
        .with_child_timeout(Duration::from_secs(30))
        .with_rate_limit(2, Duration::from_secs(60));

    let err = expander(&source, &config)
        .expand(vec![
            parse(parent("p1", Some(1.0), &["throttled"])),
            parse(parent("p2", Some(2.0), &["ok"])),
        ])
        .await
        .unwrap_err();

    assert!(err.is_circuit_open());
    assert!(!source.retrieved().contains(&"ok".to_string()));
}

#[tokio::test]
async fn test_empty_input() {
    let source = Arc::new(ScriptedSource::children_only());
    let report = expander(&source, &SyncConfig::for_tests())
        .expand(Vec::new())
        .await
        .unwrap();

    assert!(report.records.is_empty());
    assert_eq!(report.parents, 0);
}
