//! Per-monitor periodic loop.
//!
//! A [`MonitorHandle`] owns one monitor, its HTTP session and its cancellation
//! token. The loop alternates checking and sleeping until cancelled, absorbs
//! every failure of a cycle (including panics) and applies exponential
//! backoff while failures repeat.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use monitor_alerts::{escape_html, Notifier};
use monitor_core::{Backoff, MonitorError, MonitorResult};
use monitor_feeds::JsonFetcher;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::monitor::{lock, CheckOutcome, Monitor, MonitorContext};

/// Lifecycle of a monitor loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LoopState {
    Created = 0,
    Checking = 1,
    Sleeping = 2,
    Stopping = 3,
    Stopped = 4,
}

impl LoopState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => LoopState::Checking,
            2 => LoopState::Sleeping,
            3 => LoopState::Stopping,
            4 => LoopState::Stopped,
            _ => LoopState::Created,
        }
    }

    pub fn is_running(self) -> bool {
        matches!(self, LoopState::Checking | LoopState::Sleeping)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LoopState::Created => "created",
            LoopState::Checking => "checking",
            LoopState::Sleeping => "sleeping",
            LoopState::Stopping => "stopping",
            LoopState::Stopped => "stopped",
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Runtime wrapper around one monitor.
pub struct MonitorHandle {
    monitor: Arc<dyn Monitor>,
    session: Arc<dyn JsonFetcher>,
    notifier: Arc<dyn Notifier>,
    cancel: CancellationToken,
    state: AtomicU8,
    started: AtomicBool,
    session_closed: AtomicBool,
    /// Serializes scheduled and manual checks.
    check_lock: tokio::sync::Mutex<()>,
    cycles: AtomicU64,
    failures: AtomicU32,
    last_check: Mutex<Option<DateTime<Utc>>>,
    last_error: Mutex<Option<String>>,
}

impl MonitorHandle {
    /// `parent` cancels this handle together with its siblings.
    pub fn new(
        monitor: Arc<dyn Monitor>,
        session: Arc<dyn JsonFetcher>,
        notifier: Arc<dyn Notifier>,
        parent: &CancellationToken,
    ) -> Self {
        Self {
            monitor,
            session,
            notifier,
            cancel: parent.child_token(),
            state: AtomicU8::new(LoopState::Created as u8),
            started: AtomicBool::new(false),
            session_closed: AtomicBool::new(false),
            check_lock: tokio::sync::Mutex::new(()),
            cycles: AtomicU64::new(0),
            failures: AtomicU32::new(0),
            last_check: Mutex::new(None),
            last_error: Mutex::new(None),
        }
    }

    pub fn monitor(&self) -> &Arc<dyn Monitor> {
        &self.monitor
    }

    pub fn name(&self) -> &str {
        self.monitor.name()
    }

    pub fn state(&self) -> LoopState {
        LoopState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: LoopState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    /// Record that the loop task was aborted without reaching its own exit.
    pub(crate) fn mark_aborted(&self) {
        self.set_state(LoopState::Stopped);
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::SeqCst)
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.failures.load(Ordering::SeqCst)
    }

    pub fn last_error(&self) -> Option<String> {
        lock(&self.last_error).clone()
    }

    pub fn context(&self) -> MonitorContext {
        MonitorContext {
            notifier: Arc::clone(&self.notifier),
            session: Arc::clone(&self.session),
            target: self.monitor.core().target(),
        }
    }

    /// Request a cooperative stop; the loop exits at its next sleep.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Close the session; only the first call reaches it.
    pub fn close_session(&self) -> bool {
        if self.session_closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.session.close();
        true
    }

    /// Run one check under the per-monitor lock, converting panics to errors.
    pub async fn run_cycle(&self) -> MonitorResult<CheckOutcome> {
        let _guard = self.check_lock.lock().await;
        let ctx = self.context();

        let result = match AssertUnwindSafe(self.monitor.check(&ctx)).catch_unwind().await {
            Ok(result) => result,
            Err(payload) => Err(MonitorError::Panicked(panic_message(payload))),
        };

        self.cycles.fetch_add(1, Ordering::SeqCst);
        *lock(&self.last_check) = Some(Utc::now());
        match &result {
            Ok(_) => {
                self.failures.store(0, Ordering::SeqCst);
                *lock(&self.last_error) = None;
            }
            Err(e) => {
                self.failures.fetch_add(1, Ordering::SeqCst);
                *lock(&self.last_error) = Some(e.to_string());
            }
        }
        result
    }

    /// On-demand check requested from chat.
    ///
    /// Fails with [`MonitorError::Busy`] instead of waiting while another
    /// check holds the lock.
    pub async fn manual_check(&self, args: &str) -> MonitorResult<String> {
        let Ok(_guard) = self.check_lock.try_lock() else {
            return Err(MonitorError::Busy(self.name().to_string()));
        };
        let ctx = self.context();
        match AssertUnwindSafe(self.monitor.manual_check(&ctx, args))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(payload) => Err(MonitorError::Panicked(panic_message(payload))),
        }
    }

    /// The owning loop. A handle runs at most once.
    pub async fn run(self: Arc<Self>) -> MonitorResult<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(MonitorError::InvalidCommand(format!(
                "{} has already been started",
                self.name()
            )));
        }

        let name = self.name().to_string();
        let target = self.monitor.core().target();
        let mut backoff = Backoff::new();
        info!(monitor = %name, kind = %self.monitor.kind(), "Monitor started");

        while !self.cancel.is_cancelled() {
            let core = self.monitor.core();
            let interval = core.interval();

            let delay = if core.enabled() {
                self.set_state(LoopState::Checking);
                match self.run_cycle().await {
                    Ok(outcome) => {
                        backoff.record_success();
                        debug!(monitor = %name, alerts = outcome.alerts, "Check finished");
                        interval
                    }
                    Err(e) => {
                        backoff.record_failure();
                        let delay = match e.retry_after() {
                            Some(hint) => backoff.next_delay(interval).max(hint),
                            None => backoff.next_delay(interval),
                        };
                        if e.is_upstream() {
                            warn!(
                                monitor = %name,
                                error = %e,
                                failures = backoff.failures(),
                                retry_in_secs = delay.as_secs(),
                                "Check failed"
                            );
                        } else {
                            error!(
                                monitor = %name,
                                error = %e,
                                failures = backoff.failures(),
                                retry_in_secs = delay.as_secs(),
                                "Check failed"
                            );
                        }
                        self.notifier
                            .notify_error(target, &name, &e.to_string())
                            .await;
                        delay
                    }
                }
            } else {
                debug!(monitor = %name, "Monitor disabled, skipping check");
                interval
            };

            self.set_state(LoopState::Sleeping);
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.set_state(LoopState::Stopping);
        self.close_session();
        self.set_state(LoopState::Stopped);
        info!(monitor = %name, cycles = self.cycles(), "Monitor stopped");
        Ok(())
    }

    /// Status with loop details appended.
    pub fn status(&self) -> String {
        let mut out = self.monitor.status();
        out.push_str(&format!("\nstate: <code>{}</code>", self.state().as_str()));
        if let Some(at) = *lock(&self.last_check) {
            out.push_str(&format!(
                "\nlast check: <code>{}</code>",
                at.format("%Y-%m-%d %H:%M:%S UTC")
            ));
        }
        if let Some(error) = self.last_error() {
            out.push_str(&format!(
                "\nlast error ({} in a row): <code>{}</code>",
                self.consecutive_failures(),
                escape_html(&error)
            ));
        }
        out
    }
}

/// Spawn the loop of `handle` on the runtime.
pub fn spawn(handle: Arc<MonitorHandle>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let name = handle.name().to_string();
        if let Err(e) = handle.run().await {
            warn!(monitor = %name, error = %e, "Monitor loop refused to start");
        }
    })
}
