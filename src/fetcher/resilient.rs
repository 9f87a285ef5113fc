//! Resilient caller: retry policy + rate-limit circuit around one remote operation
//!
//! Every remote call in the pipeline goes through [`ResilientCaller::call`]:
//! - the circuit is checked before *every* attempt, so it can open mid-sequence
//! - failures are classified and rate-limit hits are fed back into the circuit
//! - permanent failures are logged at error level and returned immediately
//! - everything else is retried per [`RetryPolicy`] with a cooperative sleep

use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::config::SyncConfig;
use crate::fetcher::circuit::RateLimitCircuit;
use crate::fetcher::classify::{failure_kind, FailureClass, FailureKind};
use crate::fetcher::retry::RetryPolicy;
use crate::fetcher::FetcherResult;
use crate::metrics;

/// Wraps remote operations with retry, backoff and the rate-limit circuit.
#[derive(Debug, Clone)]
pub struct ResilientCaller {
    policy: RetryPolicy,
    circuit: Arc<RateLimitCircuit>,
}

impl ResilientCaller {
    /// Create a caller from an explicit policy and a (possibly shared) circuit
    pub fn new(policy: RetryPolicy, circuit: Arc<RateLimitCircuit>) -> Self {
        Self { policy, circuit }
    }

    /// Caller with its own circuit, both built from `config`
    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(
            RetryPolicy::from_config(config),
            Arc::new(RateLimitCircuit::from_config(config)),
        )
    }

    /// The retry policy in use
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// The circuit shared by this caller
    pub fn circuit(&self) -> &Arc<RateLimitCircuit> {
        &self.circuit
    }

    /// Clear the circuit's hit log
    pub fn reset(&self) {
        self.circuit.reset();
    }

    /// Run `op` until it succeeds, fails permanently, exhausts its retries, or
    /// the circuit opens.
    ///
    /// # Arguments
    /// * `name` - Operation name for logs (e.g., "query_database")
    /// * `context` - What the call is about (e.g., a record id or cursor)
    /// * `op` - Produces a fresh future for each attempt
    ///
    /// # Errors
    /// The last underlying failure, or [`crate::fetcher::FetcherError::CircuitOpen`]
    pub async fn call<T, F, Fut>(&self, name: &str, context: &str, mut op: F) -> FetcherResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = FetcherResult<T>>,
    {
        let max_attempts = self.policy.max_retries() + 1;
        let mut attempt: u32 = 0;

        loop {
            if let Some(err) = self.circuit.check_open().into_error() {
                error!(
                    operation = name,
                    context = context,
                    attempt = attempt + 1,
                    reason = %err,
                    "Rate limit circuit open - failing fast"
                );
                metrics::record_circuit_open(name);
                return Err(err);
            }

            let err = match op().await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(
                            operation = name,
                            context = context,
                            "Retry attempt {}/{} succeeded",
                            attempt + 1,
                            max_attempts
                        );
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            let kind = failure_kind(&err);
            let class = kind.class();

            if kind == FailureKind::RateLimit {
                self.circuit.record_hit();
                metrics::record_rate_limit_hit(name);
            }

            let decision = self
                .policy
                .with_retry_after(self.policy.decide(class, attempt), err.retry_after());

            if class == FailureClass::Permanent {
                error!(
                    operation = name,
                    context = context,
                    attempt = attempt + 1,
                    classification = %class,
                    error = %err,
                    "Permanent failure ({}) - not retrying",
                    kind.description()
                );
                return Err(err);
            }

            if !decision.retry {
                error!(
                    operation = name,
                    context = context,
                    attempt = attempt + 1,
                    classification = %class,
                    error = %err,
                    reason = %decision.reason,
                    suggestion = kind.suggestion(),
                    "[FAILED] {} failed after {} attempts",
                    name,
                    attempt + 1
                );
                return Err(err);
            }

            warn!(
                operation = name,
                context = context,
                attempt = attempt + 1,
                classification = %class,
                delay_ms = decision.delay.as_millis() as u64,
                reason = %decision.reason,
                error = %err,
                "Retrying (attempt {}/{}) after {} - waiting {:.1} seconds...",
                attempt + 1,
                max_attempts,
                kind.description(),
                decision.delay.as_secs_f64()
            );
            metrics::record_retry_backoff(name, class, decision.delay);

            tokio::time::sleep(decision.delay).await;
            attempt += 1;
        }
    }
}

impl Default for ResilientCaller {
    fn default() -> Self {
        Self::from_config(&SyncConfig::default())
    }
}
