//! Pipeline configuration
//!
//! Defaults are production values. Every knob can be overridden from the
//! environment at construction time, and [`SyncConfig::for_tests`] swaps in a
//! drastically shortened schedule so tests never wait on real backoff.

use std::time::Duration;

/// Maximum number of retries after the first attempt.
/// 4 retries at 1s/2s/4s/8s rides out short API incidents in ~15s.
pub const MAX_RETRIES: u32 = 4;

/// Initial backoff delay in milliseconds.
pub const INITIAL_BACKOFF_MS: u64 = 1000;

/// Maximum backoff delay in milliseconds.
pub const MAX_BACKOFF_MS: u64 = 30000;

/// Rate-limit failures inside the window that open the circuit.
pub const RATE_LIMIT_THRESHOLD: usize = 5;

/// Sliding window for counting rate-limit failures, in milliseconds.
pub const RATE_LIMIT_WINDOW_MS: u64 = 60_000;

/// Client-side timeout for a single child resolution, in milliseconds.
/// Independent of the API's own timeout so a hung connection can't stall a run.
pub const CHILD_TIMEOUT_MS: u64 = 10_000;

/// Children resolved concurrently per batch.
pub const CHILD_BATCH_SIZE: usize = 10;

/// Log expansion progress every N settled children.
pub const PROGRESS_INTERVAL: usize = 10;

/// Page ceiling for database queries.
pub const MAX_QUERY_PAGES: usize = 10_000;

/// Page ceiling for child-block listings.
pub const MAX_CHILDREN_PAGES: usize = 500;

/// Environment keys read by [`SyncConfig::from_env`].
pub mod env {
    /// Retry ceiling
    pub const MAX_RETRIES: &str = "CONTENT_SYNC_MAX_RETRIES";
    /// Base backoff delay (ms)
    pub const BASE_DELAY_MS: &str = "CONTENT_SYNC_BASE_DELAY_MS";
    /// Backoff cap (ms)
    pub const MAX_DELAY_MS: &str = "CONTENT_SYNC_MAX_DELAY_MS";
    /// Circuit threshold
    pub const RATE_LIMIT_THRESHOLD: &str = "CONTENT_SYNC_RATE_LIMIT_THRESHOLD";
    /// Circuit window (ms)
    pub const RATE_LIMIT_WINDOW_MS: &str = "CONTENT_SYNC_RATE_LIMIT_WINDOW_MS";
    /// Per-child timeout (ms)
    pub const CHILD_TIMEOUT_MS: &str = "CONTENT_SYNC_CHILD_TIMEOUT_MS";
    /// Child batch size
    pub const BATCH_SIZE: &str = "CONTENT_SYNC_BATCH_SIZE";
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Environment value could not be parsed
    #[error("invalid value for {key}: '{value}' ({reason})")]
    InvalidValue {
        /// Environment key
        key: &'static str,
        /// Raw value
        value: String,
        /// Why it was rejected
        reason: String,
    },
}

/// Settings for the retry engine, the rate-limit circuit and relation expansion.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Backoff ceiling
    pub max_delay: Duration,
    /// Rate-limit hits inside `rate_limit_window` that open the circuit
    pub rate_limit_threshold: usize,
    /// Sliding window for rate-limit hits
    pub rate_limit_window: Duration,
    /// Timeout for one child resolution
    pub child_timeout: Duration,
    /// Children resolved concurrently per batch
    pub child_batch_size: usize,
    /// Progress log cadence, in settled children
    pub progress_interval: usize,
    /// Page ceiling for database queries
    pub max_query_pages: usize,
    /// Page ceiling for child-block listings
    pub max_children_pages: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            base_delay: Duration::from_millis(INITIAL_BACKOFF_MS),
            max_delay: Duration::from_millis(MAX_BACKOFF_MS),
            rate_limit_threshold: RATE_LIMIT_THRESHOLD,
            rate_limit_window: Duration::from_millis(RATE_LIMIT_WINDOW_MS),
            child_timeout: Duration::from_millis(CHILD_TIMEOUT_MS),
            child_batch_size: CHILD_BATCH_SIZE,
            progress_interval: PROGRESS_INTERVAL,
            max_query_pages: MAX_QUERY_PAGES,
            max_children_pages: MAX_CHILDREN_PAGES,
        }
    }
}

impl SyncConfig {
    /// Shortened schedule for tests: 50/100/200/400 ms backoff.
    pub fn for_tests() -> Self {
        Self {
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_millis(400),
            child_timeout: Duration::from_millis(500),
            ..Self::default()
        }
    }

    /// Defaults overridden by any `CONTENT_SYNC_*` variables that are set.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each key.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = parse_key::<u32, _>(&lookup, env::MAX_RETRIES)? {
            config.max_retries = v;
        }
        if let Some(v) = parse_key::<u64, _>(&lookup, env::BASE_DELAY_MS)? {
            config.base_delay = Duration::from_millis(v);
        }
        if let Some(v) = parse_key::<u64, _>(&lookup, env::MAX_DELAY_MS)? {
            config.max_delay = Duration::from_millis(v);
        }
        if let Some(v) = parse_key::<usize, _>(&lookup, env::RATE_LIMIT_THRESHOLD)? {
            config.rate_limit_threshold = v;
        }
        if let Some(v) = parse_key::<u64, _>(&lookup, env::RATE_LIMIT_WINDOW_MS)? {
            config.rate_limit_window = Duration::from_millis(v);
        }
        if let Some(v) = parse_key::<u64, _>(&lookup, env::CHILD_TIMEOUT_MS)? {
            config.child_timeout = Duration::from_millis(v);
        }
        if let Some(v) = parse_key::<usize, _>(&lookup, env::BATCH_SIZE)? {
            if v == 0 {
                return Err(ConfigError::InvalidValue {
                    key: env::BATCH_SIZE,
                    value: v.to_string(),
                    reason: "batch size must be at least 1".to_string(),
                });
            }
            config.child_batch_size = v;
        }

        Ok(config)
    }

    /// Set the retry ceiling
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the backoff schedule
    pub fn with_backoff(mut self, base_delay: Duration, max_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self.max_delay = max_delay;
        self
    }

    /// Set the circuit threshold and window
    pub fn with_rate_limit(mut self, threshold: usize, window: Duration) -> Self {
        self.rate_limit_threshold = threshold;
        self.rate_limit_window = window;
        self
    }

    /// Set how many children are resolved concurrently
    pub fn with_child_batch_size(mut self, batch_size: usize) -> Self {
        self.child_batch_size = batch_size;
        self
    }

    /// Set the per-child timeout
    pub fn with_child_timeout(mut self, timeout: Duration) -> Self {
        self.child_timeout = timeout;
        self
    }

    /// Set the page ceilings
    pub fn with_page_limits(mut self, max_query_pages: usize, max_children_pages: usize) -> Self {
        self.max_query_pages = max_query_pages;
        self.max_children_pages = max_children_pages;
        self
    }
}

fn parse_key<T, F>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    trimmed
        .parse::<T>()
        .map(Some)
        .map_err(|e| ConfigError::InvalidValue {
            key,
            value: raw.clone(),
            reason: e.to_string(),
        })
}

/// Capped exponential backoff: `min(base * 2^attempt, max)`.
pub fn calculate_backoff(attempt: u32, base: Duration, max: Duration) -> Duration {
    let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
    base.checked_mul(factor).unwrap_or(max).min(max)
}
