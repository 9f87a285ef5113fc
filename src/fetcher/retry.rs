//! Retry policy: whether to retry a classified failure, and after how long.
//!
//! The policy only computes a [`RetryDecision`]; waiting is the caller's job.

use std::time::Duration;

use crate::config::{calculate_backoff, SyncConfig};
use crate::fetcher::classify::FailureClass;

/// Retries allowed for failures we could not classify, regardless of `max_retries`.
pub const UNKNOWN_FAILURE_MAX_RETRIES: u32 = 2;

/// Outcome of consulting the policy after a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryDecision {
    /// Whether to try again
    pub retry: bool,
    /// How long to wait first (zero when not retrying)
    pub delay: Duration,
    /// Human-readable explanation for logs
    pub reason: String,
}

impl RetryDecision {
    fn retry(delay: Duration, reason: impl Into<String>) -> Self {
        Self {
            retry: true,
            delay,
            reason: reason.into(),
        }
    }

    fn stop(reason: impl Into<String>) -> Self {
        Self {
            retry: false,
            delay: Duration::ZERO,
            reason: reason.into(),
        }
    }
}

/// Capped exponential backoff policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl RetryPolicy {
    /// Create a policy
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
        }
    }

    /// Policy from the pipeline configuration
    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(config.max_retries, config.base_delay, config.max_delay)
    }

    /// Retries allowed after the first attempt
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Delay before retry number `attempt + 1`
    pub fn backoff(&self, attempt: u32) -> Duration {
        calculate_backoff(attempt, self.base_delay, self.max_delay)
    }

    /// Stretch a retry's delay to a server-requested wait, bounded by `max_delay`.
    ///
    /// Decisions that stop, or hints shorter than the backoff, are returned unchanged.
    pub fn with_retry_after(&self, decision: RetryDecision, retry_after: Option<Duration>) -> RetryDecision {
        match retry_after {
            Some(hint) if decision.retry && hint.min(self.max_delay) > decision.delay => RetryDecision {
                delay: hint.min(self.max_delay),
                reason: format!("{}, server asked to wait {}s", decision.reason, hint.as_secs()),
                ..decision
            },
            _ => decision,
        }
    }

    /// Decide what to do after attempt `attempt` (0-based) failed with `class`.
    pub fn decide(&self, class: FailureClass, attempt: u32) -> RetryDecision {
        match class {
            FailureClass::Permanent => RetryDecision::stop("permanent failure, not retrying"),
            _ if attempt >= self.max_retries => RetryDecision::stop(format!(
                "retry budget exhausted after {} attempts",
                attempt + 1
            )),
            FailureClass::Unknown => {
                let budget = UNKNOWN_FAILURE_MAX_RETRIES.min(self.max_retries);
                if attempt >= budget {
                    RetryDecision::stop(format!(
                        "unrecognized failure, giving up after {budget} retries"
                    ))
                } else {
                    RetryDecision::retry(
                        self.backoff(attempt),
                        format!("unrecognized failure, retry {}/{budget}", attempt + 1),
                    )
                }
            }
            FailureClass::Transient => RetryDecision::retry(
                self.backoff(attempt),
                format!("transient failure, retry {}/{}", attempt + 1, self.max_retries),
            ),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&SyncConfig::default())
    }
}
