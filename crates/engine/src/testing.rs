//! In-memory doubles for the notifier and the HTTP session.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use monitor_alerts::{ChartImage, Notifier, NotifyError};
use monitor_core::{ChatTarget, MonitorConfig, MonitorKind};
use monitor_feeds::{FeedError, JsonFetcher, JsonRequest};
use serde_json::Value;

use crate::monitor::MonitorContext;

/// A message captured by [`RecordingNotifier`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sent {
    pub target: ChatTarget,
    pub text: String,
    pub image: Option<String>,
}

/// Notifier that records everything it is asked to send.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Sent>>,
    failing: AtomicBool,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn messages(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.messages().into_iter().map(|m| m.text).collect()
    }

    pub fn count_containing(&self, needle: &str) -> usize {
        self.texts().iter().filter(|t| t.contains(needle)).count()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_message(&self, target: ChatTarget, text: &str) -> Result<(), NotifyError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(NotifyError::Unavailable("recording notifier set to fail".into()));
        }
        self.sent.lock().unwrap().push(Sent {
            target,
            text: text.to_string(),
            image: None,
        });
        Ok(())
    }

    async fn send_photo(
        &self,
        target: ChatTarget,
        image: ChartImage,
        caption: &str,
    ) -> Result<(), NotifyError> {
        self.sent.lock().unwrap().push(Sent {
            target,
            text: caption.to_string(),
            image: Some(image.file_name),
        });
        Ok(())
    }
}

#[derive(Clone)]
enum Reply {
    Json(Value),
    RateLimited(Option<Duration>),
    Unavailable(u16),
}

struct Route {
    path: String,
    param: Option<(String, String)>,
    reply: Reply,
}

/// Session double answering from canned routes.
///
/// A route matches when the request URL ends with its path and, if given,
/// the query parameter matches. Later routes win over earlier ones.
#[derive(Default)]
pub struct FixtureFetcher {
    routes: Mutex<Vec<Route>>,
    requests: Mutex<Vec<JsonRequest>>,
    delay: Mutex<Option<Duration>>,
    failing: AtomicBool,
    close_calls: AtomicUsize,
    closed: AtomicBool,
}

impl FixtureFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn push(&self, path: &str, param: Option<(&str, &str)>, reply: Reply) {
        self.routes.lock().unwrap().push(Route {
            path: path.to_string(),
            param: param.map(|(k, v)| (k.to_string(), v.to_string())),
            reply,
        });
    }

    pub fn route(&self, path: &str, body: Value) {
        self.push(path, None, Reply::Json(body));
    }

    pub fn route_with(&self, path: &str, key: &str, value: &str, body: Value) {
        self.push(path, Some((key, value)), Reply::Json(body));
    }

    pub fn rate_limit(&self, path: &str, retry_after: Option<Duration>) {
        self.push(path, None, Reply::RateLimited(retry_after));
    }

    pub fn unavailable(&self, path: &str, status: u16) {
        self.push(path, None, Reply::Unavailable(status));
    }

    pub fn unavailable_with(&self, path: &str, key: &str, value: &str, status: u16) {
        self.push(path, Some((key, value)), Reply::Unavailable(status));
    }

    /// Make every request fail as if the upstream were down.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Sleep this long before answering.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn requests(&self) -> Vec<JsonRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self, path: &str) -> usize {
        self.requests().iter().filter(|r| r.url.ends_with(path)).count()
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JsonFetcher for FixtureFetcher {
    async fn fetch(&self, request: JsonRequest) -> Result<Value, FeedError> {
        if self.is_closed() {
            return Err(FeedError::SessionClosed);
        }
        self.requests.lock().unwrap().push(request.clone());

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(FeedError::ConnectionFailed("fixture upstream down".into()));
        }

        let reply = {
            let routes = self.routes.lock().unwrap();
            routes
                .iter()
                .rev()
                .find(|r| {
                    request.url.ends_with(&r.path)
                        && r.param
                            .as_ref()
                            .map_or(true, |(k, v)| request.param(k) == Some(v.as_str()))
                })
                .map(|r| r.reply.clone())
        };

        match reply {
            Some(Reply::Json(body)) => Ok(body),
            Some(Reply::RateLimited(retry_after)) => Err(FeedError::RateLimited { retry_after }),
            Some(Reply::Unavailable(status)) => Err(FeedError::Http {
                status,
                body: "fixture".into(),
            }),
            None => Err(FeedError::Http {
                status: 404,
                body: format!("no fixture for {}", request.url),
            }),
        }
    }

    fn close(&self) -> bool {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        !self.closed.swap(true, Ordering::SeqCst)
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

pub fn target() -> ChatTarget {
    ChatTarget::new(-100, Some(9))
}

pub fn config(name: &str, kind: MonitorKind) -> MonitorConfig {
    MonitorConfig::new(name, kind, target())
}

pub fn context(notifier: &Arc<RecordingNotifier>, fetcher: &Arc<FixtureFetcher>) -> MonitorContext {
    MonitorContext {
        notifier: notifier.clone(),
        session: fetcher.clone(),
        target: target(),
    }
}

/// Kline row in the exchange's array layout.
pub fn kline(open_time: i64, open: f64, high: f64, low: f64, close: f64) -> Value {
    serde_json::json!([
        open_time,
        open.to_string(),
        high.to_string(),
        low.to_string(),
        close.to_string(),
        "100",
        open_time + 59_999,
        "1000",
        10,
        "50",
        "500",
        "0"
    ])
}
