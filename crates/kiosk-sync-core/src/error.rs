//! Request error taxonomy
//!
//! Every outcome of an outbound call that is not parsed data ends up as a
//! [`RequestError`] carrying one [`ErrorKind`]. The kind decides how callers
//! retry: backoff, wait for the bucket, or give up.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Classification of a failed request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// No response was received (connect failure, timeout, reset)
    TransientNetwork,
    /// HTTP 429, or the server reported an exhausted quota
    RateLimited,
    /// 4xx other than 429
    ClientError,
    /// 5xx
    ServerError,
    /// The response body could not be decoded
    ParseError,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::TransientNetwork => "transient-network",
            ErrorKind::RateLimited => "rate-limited",
            ErrorKind::ClientError => "client-error",
            ErrorKind::ServerError => "server-error",
            ErrorKind::ParseError => "parse-error",
        }
    }

    /// Whether a later attempt at the same request can succeed
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::TransientNetwork | ErrorKind::RateLimited | ErrorKind::ServerError
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// Reset values at or above this are absolute timestamps (2001-09-09)
const EPOCH_THRESHOLD: u64 = 1_000_000_000;

/// Rate-limit metadata reported by the server
///
/// Parsed from `X-RateLimit-Limit`, `X-RateLimit-Remaining` and
/// `X-RateLimit-Reset`. `reset` is either seconds until the quota refills
/// or, for values that look like one, a Unix timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RateLimitInfo {
    pub limit: Option<u64>,
    pub remaining: Option<u64>,
    pub reset: Option<u64>,
}

impl RateLimitInfo {
    pub fn is_exhausted(&self) -> bool {
        self.remaining == Some(0)
    }

    pub fn reset_after(&self) -> Option<Duration> {
        let reset = self.reset?;
        if reset >= EPOCH_THRESHOLD {
            let now = u64::try_from(chrono::Utc::now().timestamp()).unwrap_or(0);
            Some(Duration::from_secs(reset.saturating_sub(now)))
        } else {
            Some(Duration::from_secs(reset))
        }
    }
}

/// What a caller should do before trying again
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryHint {
    /// Retry with exponential backoff
    Backoff,
    /// Wait for the quota to refill; `None` means one refill interval
    AfterRefill(Option<Duration>),
    /// Do not retry
    Never,
}

/// A classified request failure
#[derive(Debug, Clone, Error)]
#[error("{kind}{}: {message}", .status.map(|s| format!(" ({s})")).unwrap_or_default())]
pub struct RequestError {
    pub kind: ErrorKind,
    /// HTTP status, when a response was received
    pub status: Option<u16>,
    /// Server-supplied message, or a description of the local failure
    pub message: String,
    pub rate_limit: Option<RateLimitInfo>,
}

impl RequestError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status: None,
            message: message.into(),
            rate_limit: None,
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TransientNetwork, message)
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_rate_limit(mut self, info: Option<RateLimitInfo>) -> Self {
        self.rate_limit = info;
        self
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    pub fn retry_hint(&self) -> RetryHint {
        match self.kind {
            ErrorKind::TransientNetwork | ErrorKind::ServerError => RetryHint::Backoff,
            ErrorKind::RateLimited => {
                RetryHint::AfterRefill(self.rate_limit.and_then(|info| info.reset_after()))
            }
            ErrorKind::ClientError | ErrorKind::ParseError => RetryHint::Never,
        }
    }
}
