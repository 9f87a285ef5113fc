//! Unit tests for ResilientCaller retry timing and the rate-limit circuit
//!
//! All tests run on a paused clock so backoff delays can be measured exactly.

use content_sync::config::SyncConfig;
use content_sync::fetcher::circuit::RateLimitCircuit;
use content_sync::fetcher::resilient::ResilientCaller;
use content_sync::fetcher::FetcherError;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

fn http(status: u16) -> FetcherError {
    FetcherError::Http {
        status,
        message: format!("status {status}"),
    }
}

/// Gaps between consecutive attempt timestamps
fn gaps(stamps: &[Instant]) -> Vec<Duration> {
    stamps.windows(2).map(|w| w[1] - w[0]).collect()
}

#[tokio::test(start_paused = true)]
async fn test_permanent_failure_single_attempt_no_delay() {
    let caller = ResilientCaller::from_config(&SyncConfig::for_tests());
    let calls = AtomicU32::new(0);
    let start = Instant::now();

    let calls = &calls;
    let result: Result<(), _> = caller
        .call("query_database", "db", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(http(400))
        })
        .await;

    assert_eq!(result.unwrap_err().status(), Some(400));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(start.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn test_sustained_transient_failure_follows_backoff_schedule() {
    let config = SyncConfig::for_tests();
    let caller = ResilientCaller::from_config(&config);
    let stamps = Mutex::new(Vec::new());

    let stamps_ref = &stamps;
    let result: Result<(), _> = caller
        .call("query_database", "db", move || async move {
            stamps_ref.lock().unwrap().push(Instant::now());
            Err(http(503))
        })
        .await;

    assert_eq!(result.unwrap_err().status(), Some(503));

    let stamps = stamps.into_inner().unwrap();
    assert_eq!(stamps.len() as u32, config.max_retries + 1);
    assert_eq!(
        gaps(&stamps),
        vec![
            Duration::from_millis(50),
            Duration::from_millis(100),
            Duration::from_millis(200),
            Duration::from_millis(400),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_backoff_is_capped() {
    let config = SyncConfig::for_tests()
        .with_max_retries(6)
        .with_backoff(Duration::from_millis(50), Duration::from_millis(150));
    let caller = ResilientCaller::from_config(&config);
    let stamps = Mutex::new(Vec::new());

    let stamps_ref = &stamps;
    let _: Result<(), _> = caller
        .call("retrieve_page", "page-1", move || async move {
            stamps_ref.lock().unwrap().push(Instant::now());
            Err(FetcherError::Timeout("operation timed out".to_string()))
        })
        .await;

    let stamps = stamps.into_inner().unwrap();
    assert_eq!(stamps.len(), 7);
    let expected: Vec<Duration> = [50, 100, 150, 150, 150, 150]
        .into_iter()
        .map(Duration::from_millis)
        .collect();
    assert_eq!(gaps(&stamps), expected);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_failure_retried_at_most_twice() {
    let caller = ResilientCaller::from_config(&SyncConfig::for_tests().with_max_retries(10));
    let calls = AtomicU32::new(0);

    let calls_ref = &calls;
    let result: Result<(), _> = caller
        .call("query_database", "db", move || async move {
            calls_ref.fetch_add(1, Ordering::SeqCst);
            Err(FetcherError::Other("something odd happened".to_string()))
        })
        .await;

    assert!(result.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_recovers_and_returns_value() {
    let caller = ResilientCaller::from_config(&SyncConfig::for_tests());
    let calls = AtomicU32::new(0);

    let calls_ref = &calls;
    let result = caller
        .call("query_database", "db", move || async move {
            match calls_ref.fetch_add(1, Ordering::SeqCst) {
                0 | 1 => Err(http(500)),
                _ => Ok("page"),
            }
        })
        .await;

    assert_eq!(result.unwrap(), "page");
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_sustained_rate_limiting_opens_circuit_mid_sequence() {
    let config = SyncConfig::for_tests()
        .with_max_retries(10)
        .with_rate_limit(3, Duration::from_secs(10));
    let caller = ResilientCaller::from_config(&config);
    let calls = AtomicU32::new(0);

    let calls_ref = &calls;
    let err = caller
        .call::<(), _, _>("query_database", "db", move || async move {
            calls_ref.fetch_add(1, Ordering::SeqCst);
            Err(http(429))
        })
        .await
        .unwrap_err();

    assert!(err.is_circuit_open());
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    // Other calls sharing the circuit fail fast without touching the API
    let err = caller
        .call::<(), _, _>("retrieve_page", "page-1", move || async move {
            calls_ref.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .await
        .unwrap_err();
    assert!(err.is_circuit_open());
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    // Hits age out of the window
    tokio::time::advance(Duration::from_secs(11)).await;
    let ok = caller
        .call("retrieve_page", "page-1", move || async move {
            calls_ref.fetch_add(1, Ordering::SeqCst);
            Ok::<_, FetcherError>(())
        })
        .await;
    assert!(ok.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_circuit_threshold_and_spacing() {
    let circuit = RateLimitCircuit::new(3, Duration::from_secs(10));

    for _ in 0..3 {
        circuit.record_hit();
        tokio::time::advance(Duration::from_secs(1)).await;
    }
    assert!(circuit.check_open().is_open());

    circuit.reset();
    for _ in 0..10 {
        circuit.record_hit();
        assert!(!circuit.check_open().is_open());
        tokio::time::advance(Duration::from_millis(10_001)).await;
    }
}
