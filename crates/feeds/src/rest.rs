//! Pooled REST session used by monitors to fetch JSON.
//!
//! Each monitor owns one `HttpSession`; the supervisor owns one more for
//! ad-hoc queries. The underlying `reqwest::Client` is built lazily on first
//! use and released exactly once by `close()`.

use crate::error::FeedError;
use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::StatusCode;
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, warn};

/// Longest response body excerpt carried in an error.
const BODY_SNIPPET_LEN: usize = 200;

/// A GET request for a JSON document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonRequest {
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
}

impl JsonRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            query: Vec::new(),
            headers: Vec::new(),
        }
    }

    pub fn query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    pub fn header(mut self, key: &str, value: impl Into<String>) -> Self {
        self.headers.push((key.to_string(), value.into()));
        self
    }

    pub fn bearer(self, token: &str) -> Self {
        self.header("Authorization", format!("Bearer {}", token))
    }

    /// Value of a query parameter, if present.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

impl fmt::Display for JsonRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)?;
        for (i, (k, v)) in self.query.iter().enumerate() {
            let sep = if i == 0 { '?' } else { '&' };
            // Never print signatures or keys into logs
            if k == "signature" {
                write!(f, "{}{}=***", sep, k)?;
            } else {
                write!(f, "{}{}={}", sep, k, v)?;
            }
        }
        Ok(())
    }
}

/// Anything that can fetch a JSON document.
///
/// Monitors depend on this trait rather than on `HttpSession` so tests can
/// inject fixtures.
#[async_trait]
pub trait JsonFetcher: Send + Sync {
    /// Perform the request and decode the body as JSON.
    async fn fetch(&self, request: JsonRequest) -> Result<Value, FeedError>;

    /// Release pooled connections. Returns true only for the call that
    /// actually closed the session.
    fn close(&self) -> bool;

    fn is_closed(&self) -> bool;
}

/// Configuration for an HTTP session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Label used in logs (usually the owning monitor's name).
    pub label: String,
    /// Total request timeout.
    pub timeout: Duration,
    /// Optional upstream proxy URL (http, https or socks5).
    pub proxy: Option<String>,
    pub user_agent: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            label: "session".to_string(),
            timeout: Duration::from_secs(20),
            proxy: None,
            user_agent: concat!("market-monitor/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl SessionConfig {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Default::default()
        }
    }

    pub fn with_proxy(mut self, proxy: Option<String>) -> Self {
        self.proxy = proxy.filter(|p| !p.trim().is_empty());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Lazily created, connection-pooled reqwest session.
pub struct HttpSession {
    config: SessionConfig,
    client: Mutex<Option<reqwest::Client>>,
    closed: AtomicBool,
}

impl HttpSession {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            client: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    pub fn label(&self) -> &str {
        &self.config.label
    }

    /// Whether the underlying client has been built yet.
    pub fn is_initialized(&self) -> bool {
        self.client
            .lock()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }

    fn build_client(&self) -> Result<reqwest::Client, FeedError> {
        let mut builder = reqwest::Client::builder()
            .timeout(self.config.timeout)
            .user_agent(self.config.user_agent.clone());

        if let Some(ref proxy) = self.config.proxy {
            let proxy = reqwest::Proxy::all(proxy.as_str())
                .map_err(|e| FeedError::InvalidRequest(format!("invalid proxy {}: {}", proxy, e)))?;
            builder = builder.proxy(proxy);
        }

        debug!(session = %self.config.label, proxy = ?self.config.proxy, "Creating HTTP session");
        Ok(builder.build()?)
    }

    fn client(&self) -> Result<reqwest::Client, FeedError> {
        if self.is_closed() {
            return Err(FeedError::SessionClosed);
        }
        let mut guard = self.client.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(client) = guard.as_ref() {
            return Ok(client.clone());
        }
        let client = self.build_client()?;
        *guard = Some(client.clone());
        Ok(client)
    }
}

fn snippet(body: &str) -> String {
    let trimmed = body.trim();
    match trimmed.char_indices().nth(BODY_SNIPPET_LEN) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}

fn retry_after(response: &reqwest::Response) -> Option<Duration> {
    response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[async_trait]
impl JsonFetcher for HttpSession {
    async fn fetch(&self, request: JsonRequest) -> Result<Value, FeedError> {
        let client = self.client()?;

        let mut builder = client.get(&request.url);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (key, value) in &request.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }

        let response = builder.send().await?;
        let status = response.status();

        // Binance answers 418 once an IP keeps hammering after a 429
        if status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::IM_A_TEAPOT {
            let retry_after = retry_after(&response);
            warn!(session = %self.config.label, url = %request, ?retry_after, "Rate limited");
            return Err(FeedError::RateLimited { retry_after });
        }

        let body = response.text().await?;
        if !status.is_success() {
            return Err(FeedError::Http {
                status: status.as_u16(),
                body: snippet(&body),
            });
        }

        serde_json::from_str(&body)
            .map_err(|e| FeedError::ParseError(format!("{} (body: {})", e, snippet(&body))))
    }

    fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        let client = self.client.lock().unwrap_or_else(|e| e.into_inner()).take();
        debug!(
            session = %self.config.label,
            initialized = client.is_some(),
            "HTTP session closed"
        );
        true
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
