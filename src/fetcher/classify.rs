//! Failure classification for remote calls.
//!
//! Every failure coming back from the content API is reduced to a
//! [`FailureKind`] (what went wrong, for messages) and a [`FailureClass`]
//! (whether retrying can help, for the retry policy). Status codes win when
//! present; otherwise the lower-cased error name and message are matched
//! against known tokens. Transient tokens are checked first so an ambiguous
//! message favors a retry.

use std::fmt;

use crate::fetcher::FetcherError;

/// Whether a failure is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureClass {
    /// Likely to succeed later (timeouts, 429, 5xx)
    Transient,
    /// Will not succeed on retry (4xx, not found, invalid)
    Permanent,
    /// Not recognized; retried a small bounded number of times
    Unknown,
}

impl FailureClass {
    /// Lowercase label used in log fields and metric labels
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::Permanent => "permanent",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What went wrong, at a granularity useful for operator messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Request or connect timeout
    NetworkTimeout,
    /// Connection refused, reset, DNS failure
    NetworkOffline,
    /// HTTP 429 or an explicit rate-limit message
    RateLimit,
    /// HTTP 5xx
    ServerError(Option<u16>),
    /// HTTP 400 or an "invalid ..." message
    InvalidRequest,
    /// HTTP 401/403
    AuthFailed(Option<u16>),
    /// HTTP 404
    NotFound,
    /// Other HTTP 4xx
    ClientError(u16),
    /// Our own rate-limit circuit refused the call
    CircuitOpen,
    /// Nothing matched
    Unrecognized,
}

impl FailureKind {
    /// Retry class for this kind
    pub fn class(&self) -> FailureClass {
        match self {
            Self::NetworkTimeout | Self::NetworkOffline | Self::RateLimit | Self::ServerError(_) => {
                FailureClass::Transient
            }
            Self::InvalidRequest
            | Self::AuthFailed(_)
            | Self::NotFound
            | Self::ClientError(_)
            | Self::CircuitOpen => FailureClass::Permanent,
            Self::Unrecognized => FailureClass::Unknown,
        }
    }

    /// User-friendly description used inside retry log messages.
    pub fn description(&self) -> &'static str {
        match self {
            Self::NetworkTimeout => "network timeout",
            Self::NetworkOffline => "connection failed",
            Self::RateLimit => "rate limit exceeded",
            Self::ServerError(code) => match code {
                Some(500) => "internal server error",
                Some(502) => "bad gateway",
                Some(503) => "service unavailable",
                Some(504) => "gateway timeout",
                _ => "server error",
            },
            Self::InvalidRequest => "invalid request",
            Self::AuthFailed(code) => match code {
                Some(401) => "authentication failed (401)",
                Some(403) => "authentication failed (403)",
                _ => "authentication failed",
            },
            Self::NotFound => "resource not found",
            Self::ClientError(_) => "client error",
            Self::CircuitOpen => "rate limit circuit open",
            Self::Unrecognized => "unrecognized error",
        }
    }

    /// Suggested remediation shown once retries are exhausted.
    pub fn suggestion(&self) -> &'static str {
        match self {
            Self::NetworkTimeout => "Check your network connection and firewall settings",
            Self::NetworkOffline => "Verify internet connectivity and DNS resolution",
            Self::RateLimit | Self::CircuitOpen => {
                "Reduce concurrency or wait for the API rate limit window to pass"
            }
            Self::ServerError(_) => "The content API may be degraded, try again later",
            Self::InvalidRequest => "Check the database id and filter for typos",
            Self::AuthFailed(_) => "Verify the API token and that the integration has access",
            Self::NotFound => "Check that the record still exists and is shared with the integration",
            Self::ClientError(_) => "Review request parameters against the API documentation",
            Self::Unrecognized => "Re-run with RUST_LOG=content_sync=debug for details",
        }
    }
}

const TIMEOUT_TOKENS: &[&str] = &["timeout", "timed out", "etimedout", "esockettimedout"];
const CONNECTION_TOKENS: &[&str] = &[
    "econnreset",
    "econnrefused",
    "enotfound",
    "eai_again",
    "socket hang up",
    "connection",
    "network",
];
const RATE_LIMIT_TOKENS: &[&str] = &["429", "rate limit", "rate_limited", "ratelimit", "too many requests"];
const SERVER_TOKENS: &[&str] = &[
    "500",
    "502",
    "503",
    "504",
    "internal server error",
    "bad gateway",
    "service unavailable",
    "gateway timeout",
];
const INVALID_TOKENS: &[&str] = &["400", "bad request", "invalid", "validation"];
const AUTH_TOKENS: &[&str] = &["401", "403", "unauthorized", "forbidden"];
const NOT_FOUND_TOKENS: &[&str] = &["404", "not found", "object_not_found"];

/// Classify a failure into its retry class.
pub fn classify(err: &FetcherError) -> FailureClass {
    failure_kind(err).class()
}

/// Whether a failure is a rate-limit failure that should count toward the circuit.
pub fn is_rate_limit(err: &FetcherError) -> bool {
    failure_kind(err) == FailureKind::RateLimit
}

/// Derive the [`FailureKind`] of a failure.
pub fn failure_kind(err: &FetcherError) -> FailureKind {
    if err.is_circuit_open() {
        return FailureKind::CircuitOpen;
    }

    if let Some(status) = err.status() {
        if let Some(kind) = kind_from_status(status) {
            return kind;
        }
    }

    let message = err.to_string();
    if message.trim().is_empty() {
        return FailureKind::Unrecognized;
    }

    kind_from_text(&format!("{} {}", error_name(err), message).to_lowercase())
}

/// Map an HTTP status to a kind. Statuses outside 4xx/5xx fall through to text matching.
pub fn kind_from_status(status: u16) -> Option<FailureKind> {
    match status {
        429 => Some(FailureKind::RateLimit),
        408 => Some(FailureKind::NetworkTimeout),
        400 => Some(FailureKind::InvalidRequest),
        401 | 403 => Some(FailureKind::AuthFailed(Some(status))),
        404 => Some(FailureKind::NotFound),
        500..=599 => Some(FailureKind::ServerError(Some(status))),
        402..=499 => Some(FailureKind::ClientError(status)),
        _ => None,
    }
}

fn kind_from_text(haystack: &str) -> FailureKind {
    let has = |tokens: &[&str]| tokens.iter().any(|t| haystack.contains(t));

    // Transient first: an ambiguous message should favor retry
    if has(RATE_LIMIT_TOKENS) {
        return FailureKind::RateLimit;
    }
    if has(TIMEOUT_TOKENS) {
        return FailureKind::NetworkTimeout;
    }
    if has(SERVER_TOKENS) {
        return FailureKind::ServerError(None);
    }
    if has(CONNECTION_TOKENS) {
        return FailureKind::NetworkOffline;
    }

    if has(AUTH_TOKENS) {
        return FailureKind::AuthFailed(None);
    }
    if has(NOT_FOUND_TOKENS) {
        return FailureKind::NotFound;
    }
    if has(INVALID_TOKENS) {
        return FailureKind::InvalidRequest;
    }

    FailureKind::Unrecognized
}

fn error_name(err: &FetcherError) -> &'static str {
    match err {
        FetcherError::Http { .. } | FetcherError::Throttled { .. } => "HttpError",
        FetcherError::Network(_) => "NetworkError",
        FetcherError::Timeout(_) => "TimeoutError",
        FetcherError::Parse(_) => "ParseError",
        FetcherError::InvalidResponse(_) => "InvalidResponseError",
        FetcherError::CircuitOpen { .. } => "CircuitOpenError",
        FetcherError::Other(_) => "Error",
    }
}
