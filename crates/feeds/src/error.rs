//! Error types for upstream fetch operations.

use monitor_core::MonitorError;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while fetching upstream JSON.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Rate limit exceeded")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Failed to parse response: {0}")]
    ParseError(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Session closed")]
    SessionClosed,
}

impl From<reqwest::Error> for FeedError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FeedError::Timeout(err.to_string())
        } else if err.is_decode() {
            FeedError::ParseError(err.to_string())
        } else if err.is_builder() {
            FeedError::InvalidRequest(err.to_string())
        } else {
            FeedError::ConnectionFailed(err.to_string())
        }
    }
}

impl From<serde_json::Error> for FeedError {
    fn from(err: serde_json::Error) -> Self {
        FeedError::ParseError(err.to_string())
    }
}

impl From<url::ParseError> for FeedError {
    fn from(err: url::ParseError) -> Self {
        FeedError::InvalidRequest(err.to_string())
    }
}

impl FeedError {
    /// Minimum wait the upstream asked for. A 429 without `Retry-After`
    /// waits one minute.
    pub fn suggested_retry_delay(&self) -> Option<Duration> {
        match self {
            FeedError::RateLimited { retry_after } => {
                Some(retry_after.unwrap_or(Duration::from_secs(60)))
            }
            _ => None,
        }
    }
}

impl From<FeedError> for MonitorError {
    fn from(err: FeedError) -> Self {
        match err {
            FeedError::RateLimited { .. } => MonitorError::RateLimited {
                retry_after: err.suggested_retry_delay(),
            },
            FeedError::ParseError(msg) => MonitorError::UpstreamDataMalformed(msg),
            other => MonitorError::UpstreamUnavailable(other.to_string()),
        }
    }
}
