//! Error types for tagsync-backfill
//!
//! [`ApiError`] is the outcome type of every call routed through the
//! request coordinator. It is `Clone` because one deduplicated call hands
//! the same outcome to every attached caller.
//!
//! Classification:
//! - Retryable: rate limited, network, timeout, circuit open, HTTP 5xx
//! - Terminal: malformed response, other HTTP 4xx, domain errors

use thiserror::Error;

/// External API call error
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// Remote endpoint signalled rate limiting (HTTP 429)
    #[error("Rate limited (retry after {retry_after_ms:?} ms)")]
    RateLimited { retry_after_ms: Option<u64> },

    /// Connection reset, DNS failure, generic transport failure
    #[error("Network error: {0}")]
    Network(String),

    /// Call exceeded its bounded lifetime
    #[error("Request timed out after {after_ms} ms")]
    Timeout { after_ms: u64 },

    /// Rejected locally while the circuit breaker is tripped
    #[error("Circuit breaker open, retry after {retry_after_ms} ms")]
    CircuitOpen { retry_after_ms: u64 },

    /// Non-success HTTP status other than 408/429
    #[error("API error {status}: {message}")]
    Http { status: u16, message: String },

    /// Response did not match the expected structure
    #[error("Malformed response: {0}")]
    Malformed(String),

    /// Any other non-retryable failure
    #[error("{0}")]
    Terminal(String),
}

/// Retry classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Worth another attempt after a delay
    Retryable,
    /// Give up on the record for this run
    Terminal,
}

impl ApiError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ApiError::RateLimited { .. }
            | ApiError::Network(_)
            | ApiError::Timeout { .. }
            | ApiError::CircuitOpen { .. } => ErrorClass::Retryable,
            ApiError::Http { status, .. } if *status >= 500 => ErrorClass::Retryable,
            ApiError::Http { .. } | ApiError::Malformed(_) | ApiError::Terminal(_) => {
                ErrorClass::Terminal
            }
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Retryable
    }

    /// Server- or breaker-provided hint for how long to wait
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            ApiError::RateLimited { retry_after_ms } => *retry_after_ms,
            ApiError::CircuitOpen { retry_after_ms } => Some(*retry_after_ms),
            _ => None,
        }
    }

    /// Map a non-success HTTP status to an error
    ///
    /// `retry_after` is the raw `Retry-After` header value in seconds.
    pub fn from_status(status: u16, retry_after: Option<&str>, body: impl Into<String>) -> Self {
        match status {
            429 => ApiError::RateLimited {
                retry_after_ms: retry_after
                    .and_then(|v| v.trim().parse::<u64>().ok())
                    .map(|secs| secs.saturating_mul(1000)),
            },
            408 => ApiError::Timeout { after_ms: 0 },
            _ => ApiError::Http {
                status,
                message: body.into(),
            },
        }
    }

    /// Classify an error that only carries a message
    pub fn from_opaque(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();

        if lower.contains("429") || lower.contains("rate limit") || lower.contains("too many requests") {
            ApiError::RateLimited { retry_after_ms: None }
        } else if lower.contains("timeout") || lower.contains("timed out") {
            ApiError::Timeout { after_ms: 0 }
        } else if ["network", "connection", "fetch", "dns"]
            .iter()
            .any(|needle| lower.contains(needle))
        {
            ApiError::Network(message)
        } else {
            ApiError::Terminal(message)
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ApiError::Timeout { after_ms: 0 }
        } else if err.is_decode() {
            ApiError::Malformed(err.to_string())
        } else if let Some(status) = err.status() {
            ApiError::from_status(status.as_u16(), None, err.to_string())
        } else {
            ApiError::Network(err.to_string())
        }
    }
}
