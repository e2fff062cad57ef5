//! Error taxonomy shared by every monitor and the control surface.

use std::time::Duration;
use thiserror::Error;

/// Errors raised by monitors, the supervisor and the command layer.
#[derive(Debug, Error)]
pub enum MonitorError {
    /// Fatal at startup only (missing token, unreadable config).
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Malformed upstream data: {0}")]
    UpstreamDataMalformed(String),

    #[error("Rate limited by upstream")]
    RateLimited {
        /// Server-provided hint from the `Retry-After` header.
        retry_after: Option<Duration>,
    },

    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("{monitor} has no setting named `{key}`")]
    InvalidKey { monitor: String, key: String },

    #[error("Cannot convert `{value}` to {expected} for `{key}`")]
    TypeCoercion {
        key: String,
        value: String,
        expected: &'static str,
    },

    #[error("Invalid value for `{key}`: {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("{monitor} does not support {operation}")]
    Unsupported {
        monitor: String,
        operation: &'static str,
    },

    #[error("Monitor not found: {0}")]
    NotFound(String),

    #[error("{0} is already checking, try again shortly")]
    Busy(String),

    #[error("Failed to construct monitor {monitor}: {reason}")]
    Construction { monitor: String, reason: String },

    #[error("Monitor panicked: {0}")]
    Panicked(String),
}

impl MonitorError {
    /// Returns true for the upstream failures the run-loop absorbs and retries.
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            MonitorError::UpstreamUnavailable(_)
                | MonitorError::UpstreamDataMalformed(_)
                | MonitorError::RateLimited { .. }
        )
    }

    /// Returns true for errors that should be reported back to a command issuer.
    pub fn is_command_error(&self) -> bool {
        matches!(
            self,
            MonitorError::InvalidCommand(_)
                | MonitorError::InvalidKey { .. }
                | MonitorError::TypeCoercion { .. }
                | MonitorError::InvalidValue { .. }
                | MonitorError::Unsupported { .. }
                | MonitorError::NotFound(_)
                | MonitorError::Busy(_)
        )
    }

    /// Minimum delay the upstream asked for, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            MonitorError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

impl From<serde_json::Error> for MonitorError {
    fn from(err: serde_json::Error) -> Self {
        MonitorError::UpstreamDataMalformed(err.to_string())
    }
}

/// Result type for monitor operations.
pub type MonitorResult<T> = Result<T, MonitorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_classification() {
        assert!(MonitorError::UpstreamUnavailable("timeout".into()).is_upstream());
        assert!(MonitorError::RateLimited { retry_after: None }.is_upstream());
        assert!(!MonitorError::NotFound("x".into()).is_upstream());
    }

    #[test]
    fn test_command_error_classification() {
        let err = MonitorError::InvalidKey {
            monitor: "funding_rate".into(),
            key: "nope".into(),
        };
        assert!(err.is_command_error());
        assert_eq!(err.to_string(), "funding_rate has no setting named `nope`");
        assert!(!MonitorError::Panicked("boom".into()).is_command_error());
        assert!(MonitorError::Busy("spike".into()).is_command_error());
    }

    #[test]
    fn test_retry_after() {
        let err = MonitorError::RateLimited {
            retry_after: Some(Duration::from_secs(7)),
        };
        assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));
        assert_eq!(MonitorError::Configuration("x".into()).retry_after(), None);
    }
}
