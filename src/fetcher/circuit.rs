//! Rate-limit circuit breaker
//!
//! Counts rate-limit failures in a sliding window. The open state is derived
//! on read: once `threshold` hits sit inside the window every call fails fast
//! until enough of them age out. There is no reset timer; [`RateLimitCircuit::reset`]
//! exists for test isolation and explicit operator resets.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::SyncConfig;
use crate::fetcher::FetcherError;

/// Circuit state as of one check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls may proceed
    Closed,
    /// Too many recent rate-limit hits
    Open {
        /// Hits inside the window
        hits: usize,
        /// Window length
        window: Duration,
    },
}

impl CircuitState {
    /// Whether calls should fail fast
    pub fn is_open(&self) -> bool {
        matches!(self, CircuitState::Open { .. })
    }

    /// Convert an open state into the error callers propagate
    pub fn into_error(self) -> Option<FetcherError> {
        match self {
            CircuitState::Closed => None,
            CircuitState::Open { hits, window } => Some(FetcherError::CircuitOpen { hits, window }),
        }
    }
}

/// Sliding-window circuit over rate-limit failures.
///
/// Shared between every caller in a pipeline through an `Arc`.
#[derive(Debug)]
pub struct RateLimitCircuit {
    threshold: usize,
    window: Duration,
    hits: Mutex<VecDeque<Instant>>,
}

impl RateLimitCircuit {
    /// Create a circuit that opens at `threshold` hits within `window`
    pub fn new(threshold: usize, window: Duration) -> Self {
        Self {
            threshold,
            window,
            hits: Mutex::new(VecDeque::new()),
        }
    }

    /// Circuit from the pipeline configuration
    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(config.rate_limit_threshold, config.rate_limit_window)
    }

    /// Configured threshold
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Configured window
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Record one rate-limit failure at the current instant.
    pub fn record_hit(&self) {
        let mut hits = self.lock();
        hits.push_back(Instant::now());
    }

    /// Prune expired hits and report whether the circuit is open.
    pub fn check_open(&self) -> CircuitState {
        let now = Instant::now();
        let mut hits = self.lock();

        while let Some(oldest) = hits.front() {
            if now.duration_since(*oldest) > self.window {
                hits.pop_front();
            } else {
                break;
            }
        }

        if self.threshold > 0 && hits.len() >= self.threshold {
            CircuitState::Open {
                hits: hits.len(),
                window: self.window,
            }
        } else {
            CircuitState::Closed
        }
    }

    /// Hits currently logged (including any not yet pruned)
    pub fn recorded_hits(&self) -> usize {
        self.lock().len()
    }

    /// Forget every recorded hit.
    pub fn reset(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<Instant>> {
        // A poisoned log is still a valid list of timestamps
        self.hits.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for RateLimitCircuit {
    fn default() -> Self {
        Self::from_config(&SyncConfig::default())
    }
}
