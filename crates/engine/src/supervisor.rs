//! Registry and lifecycle of every monitor, plus the chat command backend.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use monitor_alerts::{
    escape_html, format_amount, format_price, format_time_utc8, CommandHandler, Notifier,
};
use monitor_core::{MonitorConfig, MonitorError, MonitorKind, MonitorResult};
use monitor_feeds::{BinanceApi, HttpSession, JsonFetcher, SessionConfig};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::control::{parse_config_command, ConfigAction, CONFIG_USAGE};
use crate::factory::{http_session_factory, MonitorFactory, SessionFactory};
use crate::monitor::{lock, Monitor};
use crate::runner::{spawn, MonitorHandle};

const QUOTE_SUFFIXES: [&str; 3] = ["USDT", "USDC", "BUSD"];

/// Owns every monitor loop.
pub struct MonitorSupervisor {
    handles: DashMap<String, Arc<MonitorHandle>>,
    notifier: Arc<dyn Notifier>,
    factory: MonitorFactory,
    sessions: SessionFactory,
    /// Shared session for `/symbol` lookups.
    adhoc: Arc<dyn JsonFetcher>,
    api: BinanceApi,
    tasks: Mutex<Vec<(String, JoinHandle<()>)>>,
    root: CancellationToken,
    shut_down: AtomicBool,
}

impl MonitorSupervisor {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self {
            handles: DashMap::new(),
            notifier,
            factory: MonitorFactory::with_defaults(),
            sessions: http_session_factory(),
            adhoc: Arc::new(HttpSession::new(SessionConfig::new("adhoc"))),
            api: BinanceApi::new(),
            tasks: Mutex::new(Vec::new()),
            root: CancellationToken::new(),
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn with_factory(mut self, factory: MonitorFactory) -> Self {
        self.factory = factory;
        self
    }

    pub fn with_sessions(mut self, sessions: SessionFactory) -> Self {
        self.sessions = sessions;
        self
    }

    pub fn with_adhoc_session(mut self, session: Arc<dyn JsonFetcher>) -> Self {
        self.adhoc = session;
        self
    }

    pub fn with_api(mut self, api: BinanceApi) -> Self {
        self.api = api;
        self
    }

    /// Build and register every enabled entry; returns how many were registered.
    ///
    /// Entries that fail to build are logged and left out.
    pub fn initialize(&self, configs: Vec<MonitorConfig>) -> usize {
        let mut registered = 0;
        for config in configs {
            if !config.enabled {
                info!(monitor = %config.name, "Monitor disabled in config, skipping");
                continue;
            }
            let result = self
                .factory
                .build(&config)
                .and_then(|monitor| self.register(&config, monitor));
            match result {
                Ok(()) => registered += 1,
                Err(e) => error!(monitor = %config.name, kind = %config.kind, error = %e, "Failed to create monitor"),
            }
        }
        info!(registered = registered, "Monitors initialized");
        registered
    }

    /// Add a built monitor under its config name.
    pub fn register(&self, config: &MonitorConfig, monitor: Arc<dyn Monitor>) -> MonitorResult<()> {
        match self.handles.entry(config.name.clone()) {
            Entry::Occupied(_) => Err(MonitorError::Construction {
                monitor: config.name.clone(),
                reason: "a monitor with this name is already registered".to_string(),
            }),
            Entry::Vacant(slot) => {
                let session = (self.sessions)(config);
                let handle = MonitorHandle::new(monitor, session, Arc::clone(&self.notifier), &self.root);
                slot.insert(Arc::new(handle));
                debug!(monitor = %config.name, kind = %config.kind, "Monitor registered");
                Ok(())
            }
        }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handles.iter().map(|h| h.key().clone()).collect();
        names.sort();
        names
    }

    pub fn handle(&self, name: &str) -> Option<Arc<MonitorHandle>> {
        self.handles.get(name).map(|h| Arc::clone(h.value()))
    }

    fn sorted_handles(&self) -> Vec<Arc<MonitorHandle>> {
        self.names()
            .into_iter()
            .filter_map(|name| self.handle(&name))
            .collect()
    }

    fn first_of_kind(&self, kind: MonitorKind) -> Option<Arc<MonitorHandle>> {
        self.sorted_handles()
            .into_iter()
            .find(|h| h.monitor().kind() == kind)
    }

    /// Spawn a loop for every registered monitor not yet running.
    pub fn start_all(&self) -> usize {
        if self.shut_down.load(Ordering::SeqCst) {
            warn!("Supervisor already shut down, not starting monitors");
            return 0;
        }

        let mut tasks = lock(&self.tasks);
        let running: HashSet<String> = tasks.iter().map(|(name, _)| name.clone()).collect();
        let mut started = 0;
        for handle in self.sorted_handles() {
            if running.contains(handle.name()) || handle.is_started() {
                continue;
            }
            tasks.push((handle.name().to_string(), spawn(Arc::clone(&handle))));
            started += 1;
        }
        info!(started = started, total = self.handles.len(), "Monitors started");
        started
    }

    /// All statuses, or the one named.
    pub fn status(&self, name: Option<&str>) -> String {
        match name {
            Some(name) => match self.handle(name) {
                Some(handle) => handle.status(),
                None => self.not_found(name),
            },
            None => {
                let handles = self.sorted_handles();
                if handles.is_empty() {
                    return "ℹ️ No monitors registered".to_string();
                }
                handles
                    .iter()
                    .map(|h| h.status())
                    .collect::<Vec<_>>()
                    .join("\n\n")
            }
        }
    }

    fn not_found(&self, name: &str) -> String {
        let names = self.names();
        let available = if names.is_empty() {
            "none".to_string()
        } else {
            names.join(", ")
        };
        format!(
            "❌ Monitor <code>{}</code> not found\nAvailable: <code>{}</code>",
            escape_html(name),
            escape_html(&available)
        )
    }

    pub fn dispatch_config(&self, name: &str, action: ConfigAction) -> MonitorResult<String> {
        let handle = self
            .handle(name)
            .ok_or_else(|| MonitorError::NotFound(name.to_string()))?;
        let monitor = handle.monitor();
        match action {
            ConfigAction::Get => Ok(handle.status()),
            ConfigAction::Set { key, value } => monitor.update_config(&key, &value),
            ConfigAction::Add(item) => monitor.add_to_watchlist(&item),
            ConfigAction::Remove(item) => monitor.remove_from_watchlist(&item),
        }
    }

    /// `/config` entry point; every failure becomes a reply.
    pub fn handle_config_command(&self, args: &str) -> String {
        let (name, action) = match parse_config_command(args) {
            Ok(parsed) => parsed,
            Err(e) => return format!("❌ {}\n{}", escape_html(&e.to_string()), CONFIG_USAGE),
        };
        match self.dispatch_config(&name, action) {
            Ok(reply) => reply,
            Err(MonitorError::NotFound(name)) => self.not_found(&name),
            Err(e) => {
                debug!(monitor = %name, error = %e, "Config command rejected");
                format!("❌ {}", escape_html(&e.to_string()))
            }
        }
    }

    /// Run a monitor now; refused while its scheduled check is running.
    pub async fn manual_trigger(&self, name: &str, args: &str) -> String {
        let Some(handle) = self.handle(name) else {
            return self.not_found(name);
        };
        info!(monitor = %name, "Manual check requested");
        match handle.manual_check(args).await {
            Ok(reply) => reply,
            Err(e) if e.is_command_error() => {
                debug!(monitor = %name, error = %e, "Manual check refused");
                format!("ℹ️ {}", escape_html(&e.to_string()))
            }
            Err(e) => {
                warn!(monitor = %name, error = %e, "Manual check failed");
                format!("❌ <b>{}</b>: {}", escape_html(name), escape_html(&e.to_string()))
            }
        }
    }

    async fn trigger_kind(&self, kind: MonitorKind, args: &str) -> String {
        match self.first_of_kind(kind) {
            Some(handle) => self.manual_trigger(handle.name(), args).await,
            None => format!("❌ No {} monitor registered", kind),
        }
    }

    /// Snapshot of one perpetual contract.
    pub async fn symbol_lookup(&self, symbol: &str) -> String {
        let mut symbol = symbol.trim().to_uppercase();
        if !QUOTE_SUFFIXES.iter().any(|q| symbol.ends_with(q)) {
            symbol.push_str("USDT");
        }

        let session = self.adhoc.as_ref();
        let (premium, ticker, open_interest) = tokio::join!(
            self.api.premium_index_for(session, &symbol),
            self.api.futures_ticker_24h(session, &symbol),
            self.api.open_interest(session, &symbol),
        );

        let premium = match premium {
            Ok(premium) => premium,
            Err(e) => {
                debug!(symbol = %symbol, error = %e, "Symbol lookup failed");
                return format!(
                    "❌ No data for <code>{}</code>: {}",
                    escape_html(&symbol),
                    escape_html(&e.to_string())
                );
            }
        };

        let mut out = format!(
            "🔎 <b>{}</b>\n💰 Mark: <code>{}</code> | Index: <code>{}</code>\n💸 Funding: <code>{:+.4}%</code> | Next: <code>{}</code>",
            escape_html(&symbol),
            format_price(premium.mark_price),
            format_price(premium.index_price),
            premium.last_funding_rate * 100.0,
            format_time_utc8(premium.next_funding_time)
        );
        match ticker {
            Ok(t) => out.push_str(&format!(
                "\n📈 24h: <code>{:+.2}%</code> | Volume: <code>{}</code>",
                t.price_change_percent,
                format_amount(t.quote_volume)
            )),
            Err(_) => out.push_str("\n📈 24h: <code>-</code>"),
        }
        match open_interest {
            Ok(oi) => out.push_str(&format!("\n🧾 Open interest: <code>{}</code>", format_amount(oi))),
            Err(_) => out.push_str("\n🧾 Open interest: <code>-</code>"),
        }
        out
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Cancel every loop, wait up to `timeout`, abort stragglers and close
    /// every session once. Later calls do nothing.
    pub async fn shutdown_all(&self, timeout: Duration) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            debug!("Shutdown already performed");
            return;
        }
        info!(monitors = self.handles.len(), timeout_secs = timeout.as_secs(), "Shutting down monitors");
        self.root.cancel();

        let tasks = std::mem::take(&mut *lock(&self.tasks));
        let deadline = Instant::now() + timeout;
        for (name, mut task) in tasks {
            match tokio::time::timeout_at(deadline, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(monitor = %name, error = %e, "Monitor task ended abnormally"),
                Err(_) => {
                    warn!(monitor = %name, "Monitor did not stop in time, aborting");
                    task.abort();
                    if let Some(handle) = self.handle(&name) {
                        handle.mark_aborted();
                    }
                }
            }
        }

        let mut closed = 0;
        for handle in self.sorted_handles() {
            if handle.close_session() {
                closed += 1;
            }
        }
        self.adhoc.close();
        info!(sessions_closed = closed, "All monitors stopped");
    }
}

#[async_trait]
impl CommandHandler for MonitorSupervisor {
    async fn status(&self, name: Option<&str>) -> String {
        MonitorSupervisor::status(self, name)
    }

    async fn config(&self, args: &str) -> String {
        self.handle_config_command(args)
    }

    async fn check(&self, name: &str) -> String {
        self.manual_trigger(name, "").await
    }

    async fn funding(&self) -> String {
        self.trigger_kind(MonitorKind::FundingRate, "").await
    }

    async fn position(&self, args: &str) -> String {
        self.trigger_kind(MonitorKind::AccountPosition, args).await
    }

    async fn symbol(&self, symbol: &str) -> String {
        self.symbol_lookup(symbol).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitors::fixtures::{open_interest, ticker};
    use crate::monitors::{FundingRateMonitor, SpotVolumeMonitor};
    use crate::runner::LoopState;
    use crate::testing::{config, kline, FixtureFetcher, RecordingNotifier};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::collections::HashMap;

    /// Hand each monitor the fixture registered under its name.
    fn sessions(fixtures: &[(&str, Arc<FixtureFetcher>)]) -> SessionFactory {
        let map: HashMap<String, Arc<FixtureFetcher>> = fixtures
            .iter()
            .map(|(name, f)| (name.to_string(), Arc::clone(f)))
            .collect();
        Arc::new(move |config: &MonitorConfig| {
            let fetcher = map
                .get(&config.name)
                .cloned()
                .unwrap_or_else(FixtureFetcher::new);
            fetcher as Arc<dyn JsonFetcher>
        })
    }

    fn supervisor(notifier: &Arc<RecordingNotifier>, fixtures: &[(&str, Arc<FixtureFetcher>)]) -> MonitorSupervisor {
        MonitorSupervisor::new(notifier.clone())
            .with_sessions(sessions(fixtures))
            .with_adhoc_session(FixtureFetcher::new())
    }

    fn funding_fixture() -> Arc<FixtureFetcher> {
        let fetcher = FixtureFetcher::new();
        fetcher.route(
            "/fapi/v1/premiumIndex",
            json!([{
                "symbol": "XYZUSDT",
                "markPrice": "1.5",
                "indexPrice": "1.49",
                "lastFundingRate": "-0.0030",
                "nextFundingTime": 1_700_000_000_000i64
            }]),
        );
        fetcher.route("/fapi/v1/ticker/24hr", json!([ticker("XYZUSDT", 1.5, -4.0, 2e7)]));
        fetcher.route("/api/v3/ticker/price", json!([]));
        fetcher.route("/fapi/v1/openInterest", open_interest("XYZUSDT", 1e6));
        fetcher.route(
            "/fapi/v1/klines",
            json!([kline(0, 1.6, 1.6, 1.5, 1.55), kline(1, 1.55, 1.55, 1.5, 1.5)]),
        );
        fetcher
    }

    fn volume_fixture() -> Arc<FixtureFetcher> {
        let fetcher = FixtureFetcher::new();
        fetcher.route("/api/v3/ticker/24hr", json!([ticker("BTCUSDT", 1.0, 1.0, 1e9)]));
        fetcher
    }

    fn funding_config() -> MonitorConfig {
        config("funding", MonitorKind::FundingRate).with_interval(1)
    }

    fn volume_config(name: &str) -> MonitorConfig {
        config(name, MonitorKind::SpotVolume).with_interval(1)
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_trigger_alerts_once() {
        let fetcher = funding_fixture();
        let notifier = RecordingNotifier::new();
        let supervisor = supervisor(&notifier, &[("funding", fetcher.clone())]);
        assert_eq!(supervisor.initialize(vec![funding_config()]), 1);
        assert_eq!(supervisor.start_all(), 1);

        tokio::time::sleep(Duration::from_millis(3500)).await;

        assert!(fetcher.request_count("/fapi/v1/premiumIndex") >= 3);
        assert_eq!(notifier.count_containing("XYZUSDT"), 1);

        supervisor.shutdown_all(Duration::from_secs(2)).await;
        assert_eq!(fetcher.close_calls(), 1);
        assert_eq!(supervisor.handle("funding").unwrap().state(), LoopState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_monitor_does_not_delay_others() {
        let stuck = FixtureFetcher::new();
        stuck.set_delay(Duration::from_secs(3600));
        let healthy = volume_fixture();
        let notifier = RecordingNotifier::new();
        let supervisor = supervisor(&notifier, &[("a", stuck.clone()), ("b", healthy.clone())]);
        supervisor.initialize(vec![volume_config("a"), volume_config("b")]);
        supervisor.start_all();

        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert!(supervisor.handle("b").unwrap().cycles() >= 3);
        assert_eq!(supervisor.handle("a").unwrap().cycles(), 0);

        // Status, config and manual checks stay responsive while `a` is mid-check
        assert!(supervisor.status(Some("a")).contains("state: <code>checking</code>"));
        assert!(supervisor
            .handle_config_command("a set top_n 5")
            .contains("set to <code>5</code>"));
        let asked = Instant::now();
        let reply = supervisor.manual_trigger("a", "").await;
        assert_eq!(reply, "ℹ️ a is already checking, try again shortly");
        assert_eq!(asked.elapsed(), Duration::ZERO);

        supervisor.shutdown_all(Duration::from_secs(1)).await;
        assert_eq!(stuck.close_calls(), 1);
        assert_eq!(healthy.close_calls(), 1);
        assert_eq!(supervisor.handle("a").unwrap().state(), LoopState::Stopped);
        assert_eq!(supervisor.handle("b").unwrap().state(), LoopState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_monitor_keeps_others_alerting() {
        let broken = FixtureFetcher::new();
        broken.set_failing(true);
        let notifier = RecordingNotifier::new();
        let supervisor = supervisor(&notifier, &[("a", broken), ("b", volume_fixture())]);
        supervisor.initialize(vec![volume_config("a"), volume_config("b")]);
        supervisor.start_all();

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert!(notifier.count_containing("BTCUSDT") >= 2);
        assert!(notifier.count_containing("check failed") >= 1);
        assert!(supervisor.status(Some("a")).contains("last error"));
        supervisor.shutdown_all(Duration::from_secs(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_twice_closes_once() {
        let fetcher = volume_fixture();
        let notifier = RecordingNotifier::new();
        let supervisor = supervisor(&notifier, &[("vol", fetcher.clone())]);
        supervisor.initialize(vec![volume_config("vol")]);
        supervisor.start_all();
        tokio::time::sleep(Duration::from_millis(100)).await;

        supervisor.shutdown_all(Duration::from_secs(1)).await;
        supervisor.shutdown_all(Duration::from_secs(1)).await;
        assert!(supervisor.is_shut_down());
        assert_eq!(fetcher.close_calls(), 1);
        assert_eq!(supervisor.start_all(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_without_start() {
        let fetcher = volume_fixture();
        let supervisor = supervisor(&RecordingNotifier::new(), &[("vol", fetcher.clone())]);
        supervisor.initialize(vec![volume_config("vol")]);
        supervisor.shutdown_all(Duration::from_secs(1)).await;
        assert_eq!(fetcher.close_calls(), 1);
    }

    #[test]
    fn test_initialize_skips_disabled_and_broken() {
        let supervisor = supervisor(&RecordingNotifier::new(), &[]);
        let mut disabled = volume_config("off");
        disabled.enabled = false;
        let configs = vec![
            volume_config("vol"),
            disabled,
            config("position", MonitorKind::AccountPosition),
            volume_config("vol"),
        ];
        assert_eq!(supervisor.initialize(configs), 1);
        assert_eq!(supervisor.names(), vec!["vol"]);
    }

    #[test]
    fn test_status_not_found() {
        let supervisor = supervisor(&RecordingNotifier::new(), &[]);
        assert!(supervisor.status(None).contains("No monitors"));
        supervisor.initialize(vec![volume_config("vol")]);
        let reply = supervisor.status(Some("nonexistent"));
        assert!(reply.contains("not found"));
        assert!(reply.contains("vol"));
    }

    #[test]
    fn test_config_commands() {
        let supervisor = supervisor(&RecordingNotifier::new(), &[]);
        let monitor = FundingRateMonitor::new(&funding_config()).unwrap();
        supervisor.register(&funding_config(), Arc::new(monitor)).unwrap();

        let reply = supervisor.handle_config_command("funding set threshold 0.002");
        assert!(reply.contains("set to <code>0.002</code>"));
        assert!(supervisor.status(Some("funding")).contains("threshold: <code>0.002</code>"));

        let reply = supervisor.handle_config_command("funding set nope 1");
        assert!(reply.contains("no setting named"));
        let reply = supervisor.handle_config_command("funding set threshold abc");
        assert!(reply.contains("Cannot convert"));
        assert!(supervisor.status(Some("funding")).contains("threshold: <code>0.002</code>"));

        assert!(supervisor.handle_config_command("funding add SOLUSDT").contains("Added"));
        assert!(supervisor.handle_config_command("funding remove SOLUSDT").contains("Removed"));
        assert!(supervisor.handle_config_command("funding").contains("watchlist: <code>all</code>"));
        assert!(supervisor.handle_config_command("").contains("Usage"));
        assert!(supervisor.handle_config_command("ghost get").contains("not found"));
    }

    #[test]
    fn test_watchlist_unsupported_reply() {
        let supervisor = supervisor(&RecordingNotifier::new(), &[]);
        let monitor = SpotVolumeMonitor::new(&volume_config("vol")).unwrap();
        supervisor.register(&volume_config("vol"), Arc::new(monitor)).unwrap();
        assert!(supervisor
            .handle_config_command("vol add BTCUSDT")
            .contains("does not support"));
    }

    #[test]
    fn test_duplicate_register_rejected() {
        let supervisor = supervisor(&RecordingNotifier::new(), &[]);
        let cfg = volume_config("vol");
        supervisor
            .register(&cfg, Arc::new(SpotVolumeMonitor::new(&cfg).unwrap()))
            .unwrap();
        let err = supervisor
            .register(&cfg, Arc::new(SpotVolumeMonitor::new(&cfg).unwrap()))
            .unwrap_err();
        assert!(matches!(err, MonitorError::Construction { .. }));
        assert_eq!(supervisor.len(), 1);
    }

    #[tokio::test]
    async fn test_manual_trigger_and_kind_shortcuts() {
        let fetcher = funding_fixture();
        let notifier = RecordingNotifier::new();
        let supervisor = supervisor(&notifier, &[("funding", fetcher)]);
        supervisor.initialize(vec![funding_config()]);

        let reply = CommandHandler::funding(&supervisor).await;
        assert!(reply.contains("XYZUSDT"));
        assert!(CommandHandler::position(&supervisor, "").await.contains("No account_position monitor"));
        assert!(supervisor.manual_trigger("ghost", "").await.contains("not found"));

        let reply = CommandHandler::check(&supervisor, "funding").await;
        assert!(reply.contains("Funding rate alert"));
        assert!(notifier.texts().is_empty());
    }

    #[tokio::test]
    async fn test_manual_trigger_reports_failure() {
        let broken = FixtureFetcher::new();
        broken.set_failing(true);
        let supervisor = supervisor(&RecordingNotifier::new(), &[("vol", broken)]);
        supervisor.initialize(vec![volume_config("vol")]);
        let reply = supervisor.manual_trigger("vol", "").await;
        assert!(reply.starts_with("❌ <b>vol</b>"));
    }

    #[tokio::test]
    async fn test_symbol_lookup() {
        let adhoc = FixtureFetcher::new();
        adhoc.route_with(
            "/fapi/v1/premiumIndex",
            "symbol",
            "BTCUSDT",
            json!({
                "symbol": "BTCUSDT",
                "markPrice": "65000.5",
                "indexPrice": "64990.1",
                "lastFundingRate": "0.0001",
                "nextFundingTime": 1_700_000_000_000i64
            }),
        );
        adhoc.route("/fapi/v1/ticker/24hr", ticker("BTCUSDT", 65000.5, 2.5, 3e9));
        adhoc.route("/fapi/v1/openInterest", open_interest("BTCUSDT", 80_000.0));
        let supervisor = MonitorSupervisor::new(RecordingNotifier::new()).with_adhoc_session(adhoc.clone());

        let reply = supervisor.symbol_lookup("btc").await;
        assert!(reply.contains("<b>BTCUSDT</b>"));
        assert!(reply.contains("+0.0100%"));
        assert!(reply.contains("+2.50%"));
        assert!(reply.contains("80.00K"));
        assert_eq!(adhoc.requests()[0].param("symbol"), Some("BTCUSDT"));

        let reply = supervisor.symbol_lookup("ethusdt").await;
        assert!(reply.starts_with("❌ No data for <code>ETHUSDT</code>"));
    }
}
