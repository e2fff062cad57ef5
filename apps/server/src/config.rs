//! Application configuration.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use monitor_core::{ChatTarget, MonitorConfig, MonitorError, MonitorKind};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Environment variable overriding `bot_token`.
pub const BOT_TOKEN_ENV: &str = "TELEGRAM_BOT_TOKEN";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("No bot token: set `bot_token` or {BOT_TOKEN_ENV}")]
    MissingToken,
}

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Telegram bot token.
    #[serde(default)]
    pub bot_token: Option<String>,
    /// Default chat for monitors that do not name one.
    #[serde(default)]
    pub chat_id: Option<i64>,
    /// Default proxy for monitor HTTP sessions.
    #[serde(default)]
    pub proxy_url: Option<String>,
    /// Logging level.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Directory for daily log files; stdout only when unset.
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
    /// Grace period for monitors to stop on shutdown.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
    /// Chats allowed to send commands; empty allows all.
    #[serde(default)]
    pub allowed_chats: Vec<i64>,
    #[serde(default)]
    pub monitors: BTreeMap<String, MonitorEntry>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_shutdown_timeout() -> u64 {
    10
}

fn default_enabled() -> bool {
    true
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            chat_id: None,
            proxy_url: None,
            log_level: default_log_level(),
            log_dir: None,
            shutdown_timeout_secs: default_shutdown_timeout(),
            allowed_chats: Vec::new(),
            monitors: BTreeMap::new(),
        }
    }
}

/// One `monitors.<name>` entry. Keys not listed here are monitor parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorEntry {
    /// Defaults to the entry name.
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default, alias = "interval_secs")]
    pub interval: Option<u64>,
    #[serde(default)]
    pub thread_id: Option<i32>,
    #[serde(default)]
    pub chat_id: Option<i64>,
    #[serde(default)]
    pub proxy: Option<String>,
    #[serde(flatten)]
    pub params: Map<String, Value>,
}

impl AppConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Bot token, preferring `env_token` (the value of [`BOT_TOKEN_ENV`]).
    pub fn resolve_token(&self, env_token: Option<String>) -> Result<String, ConfigError> {
        env_token
            .into_iter()
            .chain(self.bot_token.clone())
            .map(|t| t.trim().to_string())
            .find(|t| !t.is_empty())
            .ok_or(ConfigError::MissingToken)
    }

    /// Resolve one entry against the global defaults.
    pub fn monitor_config(&self, name: &str, entry: &MonitorEntry) -> Result<MonitorConfig, MonitorError> {
        let kind: MonitorKind = entry.kind.as_deref().unwrap_or(name).parse()?;
        let chat_id = entry.chat_id.or(self.chat_id).ok_or_else(|| MonitorError::Construction {
            monitor: name.to_string(),
            reason: "no chat_id for this monitor and no global chat_id".to_string(),
        })?;

        let mut config = MonitorConfig::new(name, kind, ChatTarget::new(chat_id, entry.thread_id));
        config.enabled = entry.enabled;
        if let Some(interval) = entry.interval {
            config = config.with_interval(interval);
        }
        config.proxy = entry.proxy.clone().or_else(|| self.proxy_url.clone());
        config.params = entry.params.clone();
        config.validate()?;
        Ok(config)
    }

    /// Every entry resolved, in name order.
    pub fn monitor_configs(&self) -> Vec<(String, Result<MonitorConfig, MonitorError>)> {
        self.monitors
            .iter()
            .map(|(name, entry)| (name.clone(), self.monitor_config(name, entry)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn sample() -> AppConfig {
        serde_json::from_value(json!({
            "bot_token": "file-token",
            "chat_id": -1001,
            "proxy_url": "http://127.0.0.1:7890",
            "allowed_chats": [-1001],
            "monitors": {
                "funding_rate": {
                    "interval": 120,
                    "thread_id": 4,
                    "threshold": 0.002,
                    "watchlist": ["BTCUSDT"]
                },
                "majors_oi": {
                    "kind": "open_interest",
                    "enabled": false,
                    "chat_id": -2002,
                    "proxy": "http://10.0.0.1:8080"
                },
                "mystery": { "kind": "weather" },
                "volume": { "interval": 0 }
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_defaults() {
        let config: AppConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.shutdown_timeout_secs, 10);
        assert!(config.monitors.is_empty());
    }

    #[test]
    fn test_kind_defaults_to_entry_name() {
        let config = sample();
        let funding = config
            .monitor_config("funding_rate", &config.monitors["funding_rate"])
            .unwrap();
        assert_eq!(funding.kind, MonitorKind::FundingRate);
        assert_eq!(funding.interval_secs, 120);
        assert_eq!(funding.target, ChatTarget::new(-1001, Some(4)));
        assert_eq!(funding.proxy.as_deref(), Some("http://127.0.0.1:7890"));
        assert_eq!(funding.params["threshold"], json!(0.002));
        assert_eq!(funding.params["watchlist"], json!(["BTCUSDT"]));
        assert!(!funding.params.contains_key("thread_id"));
    }

    #[test]
    fn test_entry_overrides() {
        let config = sample();
        let oi = config.monitor_config("majors_oi", &config.monitors["majors_oi"]).unwrap();
        assert_eq!(oi.kind, MonitorKind::OpenInterest);
        assert!(!oi.enabled);
        assert_eq!(oi.interval_secs, MonitorKind::OpenInterest.default_interval_secs());
        assert_eq!(oi.target.chat_id, -2002);
        assert_eq!(oi.proxy.as_deref(), Some("http://10.0.0.1:8080"));
    }

    #[test]
    fn test_bad_entries_are_reported() {
        let resolved = sample().monitor_configs();
        let names: Vec<&str> = resolved.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["funding_rate", "majors_oi", "mystery", "volume"]);
        assert!(matches!(resolved[2].1, Err(MonitorError::Configuration(_))));
        assert!(matches!(resolved[3].1, Err(MonitorError::Construction { .. })));
    }

    #[test]
    fn test_missing_chat_id() {
        let mut config = sample();
        config.chat_id = None;
        let err = config
            .monitor_config("funding_rate", &config.monitors["funding_rate"])
            .unwrap_err();
        assert!(matches!(err, MonitorError::Construction { .. }));
    }

    #[test]
    fn test_token_resolution() {
        let config = sample();
        assert_eq!(config.resolve_token(Some("env-token".into())).unwrap(), "env-token");
        assert_eq!(config.resolve_token(Some("  ".into())).unwrap(), "file-token");
        assert_eq!(config.resolve_token(None).unwrap(), "file-token");
        assert!(matches!(
            AppConfig::default().resolve_token(None),
            Err(ConfigError::MissingToken)
        ));
    }

    #[test]
    fn test_load_missing_file() {
        let err = AppConfig::load("/nonexistent/monitor-config.json").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
