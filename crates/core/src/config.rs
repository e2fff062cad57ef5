//! Per-monitor configuration as handed over by the config loader.

use crate::{MonitorError, MonitorResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Kinds of monitor the factory knows how to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorKind {
    FundingRate,
    OpenInterest,
    PriceSpike,
    SpotVolume,
    SocialPost,
    AccountPosition,
}

impl MonitorKind {
    pub const ALL: [MonitorKind; 6] = [
        MonitorKind::FundingRate,
        MonitorKind::OpenInterest,
        MonitorKind::PriceSpike,
        MonitorKind::SpotVolume,
        MonitorKind::SocialPost,
        MonitorKind::AccountPosition,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MonitorKind::FundingRate => "funding_rate",
            MonitorKind::OpenInterest => "open_interest",
            MonitorKind::PriceSpike => "price_spike",
            MonitorKind::SpotVolume => "spot_volume",
            MonitorKind::SocialPost => "social_post",
            MonitorKind::AccountPosition => "account_position",
        }
    }

    /// Polling interval used when the config entry does not set one.
    pub fn default_interval_secs(self) -> u64 {
        match self {
            MonitorKind::SpotVolume => 86_400,
            MonitorKind::AccountPosition => 3_600,
            _ => 60,
        }
    }
}

impl fmt::Display for MonitorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MonitorKind {
    type Err = MonitorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        match normalized.as_str() {
            "funding_rate" | "funding" => Ok(MonitorKind::FundingRate),
            "open_interest" | "oi" => Ok(MonitorKind::OpenInterest),
            "price_spike" | "spike" => Ok(MonitorKind::PriceSpike),
            "spot_volume" | "volume" => Ok(MonitorKind::SpotVolume),
            "social_post" | "twitter" | "social" => Ok(MonitorKind::SocialPost),
            "account_position" | "position" => Ok(MonitorKind::AccountPosition),
            _ => Err(MonitorError::Configuration(format!("unknown monitor kind: {s}"))),
        }
    }
}

/// Destination of a monitor's messages: a chat plus an optional forum thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatTarget {
    pub chat_id: i64,
    pub thread_id: Option<i32>,
}

impl ChatTarget {
    pub fn new(chat_id: i64, thread_id: Option<i32>) -> Self {
        Self { chat_id, thread_id }
    }
}

/// Configuration of a single monitor instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Unique registry key.
    pub name: String,
    pub kind: MonitorKind,
    pub enabled: bool,
    /// Seconds between check cycles, must be positive.
    pub interval_secs: u64,
    pub target: ChatTarget,
    /// Upstream proxy for this monitor's HTTP session.
    pub proxy: Option<String>,
    /// Type-specific parameters (threshold, top_n, watchlist, ...).
    pub params: serde_json::Map<String, serde_json::Value>,
}

impl MonitorConfig {
    /// Create a config with the kind's default interval and no parameters.
    pub fn new(name: impl Into<String>, kind: MonitorKind, target: ChatTarget) -> Self {
        Self {
            name: name.into(),
            kind,
            enabled: true,
            interval_secs: kind.default_interval_secs(),
            target,
            proxy: None,
            params: serde_json::Map::new(),
        }
    }

    pub fn with_interval(mut self, secs: u64) -> Self {
        self.interval_secs = secs;
        self
    }

    pub fn with_param(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Check the invariants the supervisor relies on.
    pub fn validate(&self) -> MonitorResult<()> {
        if self.name.trim().is_empty() {
            return Err(MonitorError::Construction {
                monitor: self.kind.to_string(),
                reason: "monitor name must not be empty".to_string(),
            });
        }
        if self.interval_secs == 0 {
            return Err(MonitorError::Construction {
                monitor: self.name.clone(),
                reason: "interval must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}
