//! Outbound notification contract.

use async_trait::async_trait;
use monitor_core::{ChatTarget, MonitorError};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::format::{format_error, split_message, MAX_MESSAGE_LEN};

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Telegram API error: {0}")]
    Telegram(#[from] teloxide::RequestError),

    #[error("Notifier unavailable: {0}")]
    Unavailable(String),
}

impl NotifyError {
    /// Delay Telegram asked for before the next send, if any.
    pub fn suggested_retry_delay(&self) -> Option<Duration> {
        match self {
            NotifyError::Telegram(teloxide::RequestError::RetryAfter(secs)) => Some(secs.duration()),
            _ => None,
        }
    }
}

impl From<NotifyError> for MonitorError {
    fn from(err: NotifyError) -> Self {
        match err.suggested_retry_delay() {
            Some(delay) => MonitorError::RateLimited {
                retry_after: Some(delay),
            },
            None => MonitorError::UpstreamUnavailable(format!("notifier: {}", err)),
        }
    }
}

/// Rendered chart attached to an alert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChartImage {
    pub bytes: Vec<u8>,
    /// File name; its extension selects photo vs document upload.
    pub file_name: String,
}

impl ChartImage {
    pub fn new(bytes: Vec<u8>, file_name: impl Into<String>) -> Self {
        Self {
            bytes,
            file_name: file_name.into(),
        }
    }
}

/// Chat transport used by monitors and the supervisor.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Send one HTML message to `target`.
    async fn send_message(&self, target: ChatTarget, text: &str) -> Result<(), NotifyError>;

    /// Send an image with an HTML caption.
    async fn send_photo(
        &self,
        target: ChatTarget,
        image: ChartImage,
        caption: &str,
    ) -> Result<(), NotifyError>;

    /// Send `items` under `header`, split at item boundaries.
    ///
    /// Returns the number of messages sent.
    async fn send_alert(
        &self,
        target: ChatTarget,
        header: &str,
        items: &[String],
    ) -> Result<usize, NotifyError> {
        let parts = split_message(header, items, MAX_MESSAGE_LEN);
        for part in &parts {
            self.send_message(target, part).await?;
        }
        debug!(chat_id = target.chat_id, parts = parts.len(), items = items.len(), "Alert sent");
        Ok(parts.len())
    }

    /// Best-effort error report; failures are only logged.
    async fn notify_error(&self, target: ChatTarget, monitor: &str, error: &str) {
        let text = format_error(monitor, error);
        if let Err(e) = self.send_message(target, &text).await {
            warn!(monitor = monitor, error = %e, "Failed to deliver error notification");
        }
    }
}
