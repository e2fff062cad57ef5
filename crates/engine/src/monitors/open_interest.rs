//! Open-interest swings over a sliding window.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use monitor_alerts::{escape_html, format_amount, format_price, format_ratio_pct};
use monitor_core::{
    non_negative, positive, ratio_change, MonitorConfig, MonitorError, MonitorResult, Settings,
};
use monitor_feeds::{BinanceApi, FeedError};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::gate::AlertGate;
use crate::monitor::{lock, CheckOutcome, Monitor, MonitorContext, MonitorCore};
use crate::monitors::UniverseCache;

const HEADER: &str = "📉 <b>Open interest alert</b>\n\n";
const FETCH_CONCURRENCY: usize = 10;

#[derive(Debug, Clone, Copy)]
struct Snapshot {
    at: Instant,
    open_interest: f64,
    price: f64,
}

#[derive(Debug, Clone)]
struct Swing {
    symbol: String,
    open_interest: f64,
    oi_change: f64,
    price: f64,
    price_change: f64,
    window: Duration,
}

pub struct OpenInterestMonitor {
    core: MonitorCore,
    api: BinanceApi,
    universe: UniverseCache,
    history: Mutex<HashMap<String, VecDeque<Snapshot>>>,
    gate: Mutex<AlertGate>,
}

impl OpenInterestMonitor {
    pub fn new(config: &MonitorConfig) -> MonitorResult<Self> {
        Self::with_api(config, BinanceApi::new())
    }

    pub fn with_api(config: &MonitorConfig, api: BinanceApi) -> MonitorResult<Self> {
        let schema = Settings::new(&config.name, config.enabled, config.interval_secs)
            .float("threshold", 0.05)
            .validate_with(positive)
            .int("window_secs", 300)
            .validate_with(positive)
            .int("renotify_secs", 0)
            .validate_with(non_negative)
            .text("quote_asset", "USDT")
            .int("universe_refresh_secs", 3600)
            .validate_with(positive);

        Ok(Self {
            core: MonitorCore::new(config, schema)?,
            api,
            universe: UniverseCache::default(),
            history: Mutex::new(HashMap::new()),
            gate: Mutex::new(AlertGate::new()),
        })
    }

    pub fn build(config: &MonitorConfig) -> MonitorResult<Arc<dyn Monitor>> {
        Ok(Arc::new(Self::new(config)?))
    }

    /// Record the readings and return the swings at or above `threshold`.
    ///
    /// History is kept for every `listed` symbol, so one failed fetch does not
    /// reset its baseline.
    fn evaluate(
        &self,
        listed: &HashSet<String>,
        readings: Vec<(String, f64, f64)>,
        window: Duration,
        threshold: f64,
        now: Instant,
    ) -> Vec<Swing> {
        let mut history = lock(&self.history);
        history.retain(|symbol, _| listed.contains(symbol));

        let mut swings = Vec::new();
        for (symbol, open_interest, price) in &readings {
            let snapshots = history.entry(symbol.clone()).or_default();
            while snapshots
                .front()
                .is_some_and(|s| now.saturating_duration_since(s.at) > window)
            {
                snapshots.pop_front();
            }

            if let Some(base) = snapshots.front().copied() {
                let oi_change = ratio_change(base.open_interest, *open_interest);
                if base.open_interest > 0.0 && oi_change.abs() >= threshold {
                    swings.push(Swing {
                        symbol: symbol.clone(),
                        open_interest: *open_interest,
                        oi_change,
                        price: *price,
                        price_change: ratio_change(base.price, *price),
                        window: now.saturating_duration_since(base.at),
                    });
                }
            }

            snapshots.push_back(Snapshot {
                at: now,
                open_interest: *open_interest,
                price: *price,
            });
        }

        swings.sort_by(|a, b| b.oi_change.abs().total_cmp(&a.oi_change.abs()));
        swings
    }
}

fn format_swing(swing: &Swing) -> String {
    let icon = if swing.oi_change > 0.0 { "🔺" } else { "🔻" };
    format!(
        "{} <b>{}</b>\n🧾 Open interest: <code>{}</code>\n📈 OI change: <code>{}</code>\n💰 Price: <code>{}</code>\n💹 Price change ({}m): <code>{}</code>\n",
        icon,
        escape_html(&swing.symbol),
        format_amount(swing.open_interest),
        format_ratio_pct(swing.oi_change),
        format_price(swing.price),
        swing.window.as_secs() / 60,
        format_ratio_pct(swing.price_change)
    )
}

#[async_trait]
impl Monitor for OpenInterestMonitor {
    fn core(&self) -> &MonitorCore {
        &self.core
    }

    async fn check(&self, ctx: &MonitorContext) -> MonitorResult<CheckOutcome> {
        let settings = self.core.settings();
        let session = ctx.session.as_ref();

        let symbols = self
            .universe
            .resolve(
                &self.api,
                session,
                &self.core.watchlist(),
                settings.get_text("quote_asset"),
                Duration::from_secs(settings.get_u64("universe_refresh_secs")),
            )
            .await?;
        if symbols.is_empty() {
            return Ok(CheckOutcome::quiet());
        }

        let prices: HashMap<String, f64> = self
            .api
            .futures_tickers_24h(session)
            .await?
            .into_iter()
            .map(|t| (t.symbol, t.last_price))
            .collect();

        let api = &self.api;
        let results: Vec<(String, Result<f64, FeedError>)> = stream::iter(symbols)
            .map(|symbol| async move {
                let oi = api.open_interest(session, &symbol).await;
                (symbol, oi)
            })
            .buffer_unordered(FETCH_CONCURRENCY)
            .collect()
            .await;

        let total = results.len();
        let listed: HashSet<String> = results.iter().map(|(symbol, _)| symbol.clone()).collect();
        let mut readings = Vec::with_capacity(total);
        let mut last_error = None;
        for (symbol, result) in results {
            match result {
                Ok(oi) => {
                    let price = prices.get(&symbol).copied().unwrap_or_default();
                    readings.push((symbol, oi, price));
                }
                Err(e) => {
                    debug!(monitor = %self.core.name(), symbol = %symbol, error = %e, "Open interest fetch failed");
                    last_error = Some(e);
                }
            }
        }
        if readings.is_empty() {
            if let Some(e) = last_error {
                return Err(MonitorError::from(e));
            }
        }

        let now = Instant::now();
        let evaluated: Vec<String> = readings.iter().map(|(symbol, _, _)| symbol.clone()).collect();
        let swings = self.evaluate(
            &listed,
            readings,
            Duration::from_secs(settings.get_u64("window_secs")),
            settings.get_float("threshold"),
            now,
        );
        let fire = lock(&self.gate).due(
            &evaluated,
            swings.iter().map(|s| &s.symbol),
            Duration::from_secs(settings.get_u64("renotify_secs")),
            now,
        );
        if fire.is_empty() {
            return Ok(CheckOutcome::quiet());
        }

        let items: Vec<String> = swings
            .iter()
            .filter(|s| fire.contains(&s.symbol))
            .map(format_swing)
            .collect();
        ctx.notifier.send_alert(ctx.target, HEADER, &items).await?;
        lock(&self.gate).commit(&fire, now);
        info!(monitor = %self.core.name(), alerts = items.len(), scanned = total, "Open interest alerts sent");
        Ok(CheckOutcome::alerted(items.len()))
    }

    fn status_details(&self) -> Vec<String> {
        vec![
            format!("tracked: <code>{}</code>", lock(&self.history).len()),
            format!("universe: <code>{}</code>", self.universe.len()),
        ]
    }

    fn add_to_watchlist(&self, item: &str) -> MonitorResult<String> {
        self.core.watchlist_add(item)
    }

    fn remove_from_watchlist(&self, item: &str) -> MonitorResult<String> {
        self.core.watchlist_remove(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitors::fixtures::{exchange_info, open_interest, ticker};
    use crate::testing::{config, context, FixtureFetcher, RecordingNotifier};
    use monitor_core::MonitorKind;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const OI: &str = "/fapi/v1/openInterest";

    fn fixtures() -> Arc<FixtureFetcher> {
        let fetcher = FixtureFetcher::new();
        fetcher.route("/fapi/v1/exchangeInfo", exchange_info(&["BTCUSDT", "ETHUSDT"]));
        fetcher.route(
            "/fapi/v1/ticker/24hr",
            json!([ticker("BTCUSDT", 100.0, 1.0, 1e9), ticker("ETHUSDT", 10.0, 1.0, 1e8)]),
        );
        fetcher.route_with(OI, "symbol", "BTCUSDT", open_interest("BTCUSDT", 1_000_000.0));
        fetcher.route_with(OI, "symbol", "ETHUSDT", open_interest("ETHUSDT", 500_000.0));
        fetcher
    }

    fn monitor() -> OpenInterestMonitor {
        OpenInterestMonitor::new(&config("open_interest", MonitorKind::OpenInterest)).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_cycle_only_records_baseline() {
        let fetcher = fixtures();
        let notifier = RecordingNotifier::new();
        let outcome = monitor().check(&context(&notifier, &fetcher)).await.unwrap();
        assert_eq!(outcome, CheckOutcome::quiet());
        assert_eq!(fetcher.request_count(OI), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_swing_against_window_baseline() {
        let fetcher = fixtures();
        let notifier = RecordingNotifier::new();
        let ctx = context(&notifier, &fetcher);
        let monitor = monitor();
        monitor.check(&ctx).await.unwrap();

        tokio::time::advance(Duration::from_secs(60)).await;
        fetcher.route_with(OI, "symbol", "BTCUSDT", open_interest("BTCUSDT", 1_100_000.0));
        fetcher.route_with(OI, "symbol", "ETHUSDT", open_interest("ETHUSDT", 510_000.0));
        fetcher.route(
            "/fapi/v1/ticker/24hr",
            json!([ticker("BTCUSDT", 102.0, 1.0, 1e9), ticker("ETHUSDT", 10.0, 1.0, 1e8)]),
        );

        let outcome = monitor.check(&ctx).await.unwrap();
        assert_eq!(outcome.alerts, 1);
        let text = &notifier.texts()[0];
        assert!(text.contains("BTCUSDT"));
        assert!(!text.contains("ETHUSDT"));
        assert!(text.contains("+10.00%"));
        assert!(text.contains("+2.00%"));
        assert_eq!(fetcher.request_count("/fapi/v1/exchangeInfo"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_baseline_expires_after_window() {
        let fetcher = fixtures();
        let notifier = RecordingNotifier::new();
        let ctx = context(&notifier, &fetcher);
        let monitor = monitor();
        monitor.update_config("window_secs", "120").unwrap();
        monitor.check(&ctx).await.unwrap();

        // Jump past the window, then record a new baseline at the raised level
        tokio::time::advance(Duration::from_secs(180)).await;
        fetcher.route_with(OI, "symbol", "BTCUSDT", open_interest("BTCUSDT", 2_000_000.0));
        assert_eq!(monitor.check(&ctx).await.unwrap().alerts, 0);

        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(monitor.check(&ctx).await.unwrap().alerts, 0);
        assert!(notifier.texts().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_failures_are_tolerated() {
        let fetcher = FixtureFetcher::new();
        fetcher.route("/fapi/v1/exchangeInfo", exchange_info(&["BTCUSDT", "NOPEUSDT"]));
        fetcher.route("/fapi/v1/ticker/24hr", json!([ticker("BTCUSDT", 100.0, 1.0, 1e9)]));
        fetcher.route_with(OI, "symbol", "BTCUSDT", open_interest("BTCUSDT", 1.0));

        let notifier = RecordingNotifier::new();
        let monitor = monitor();
        assert!(monitor.check(&context(&notifier, &fetcher)).await.is_ok());
        assert!(monitor.status().contains("tracked: <code>1</code>"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreadable_symbol_keeps_alert_state() {
        let fetcher = fixtures();
        let notifier = RecordingNotifier::new();
        let ctx = context(&notifier, &fetcher);
        let monitor = monitor();
        monitor.update_config("renotify_secs", "3600").unwrap();
        monitor.check(&ctx).await.unwrap();

        tokio::time::advance(Duration::from_secs(60)).await;
        fetcher.route_with(OI, "symbol", "BTCUSDT", open_interest("BTCUSDT", 1_100_000.0));
        assert_eq!(monitor.check(&ctx).await.unwrap().alerts, 1);

        // BTCUSDT cannot be read for one cycle
        tokio::time::advance(Duration::from_secs(60)).await;
        fetcher.unavailable_with(OI, "symbol", "BTCUSDT", 503);
        assert_eq!(monitor.check(&ctx).await.unwrap().alerts, 0);

        tokio::time::advance(Duration::from_secs(60)).await;
        fetcher.route_with(OI, "symbol", "BTCUSDT", open_interest("BTCUSDT", 1_100_000.0));
        assert_eq!(monitor.check(&ctx).await.unwrap().alerts, 0);
        assert_eq!(notifier.count_containing("BTCUSDT"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_send_alerts_again_next_cycle() {
        let fetcher = fixtures();
        let notifier = RecordingNotifier::new();
        let ctx = context(&notifier, &fetcher);
        let monitor = monitor();
        monitor.update_config("renotify_secs", "3600").unwrap();
        monitor.check(&ctx).await.unwrap();

        tokio::time::advance(Duration::from_secs(60)).await;
        fetcher.route_with(OI, "symbol", "BTCUSDT", open_interest("BTCUSDT", 1_100_000.0));
        notifier.set_failing(true);
        assert!(monitor.check(&ctx).await.is_err());

        tokio::time::advance(Duration::from_secs(60)).await;
        notifier.set_failing(false);
        assert_eq!(monitor.check(&ctx).await.unwrap().alerts, 1);
        assert_eq!(notifier.count_containing("BTCUSDT"), 1);
    }

    #[tokio::test]
    async fn test_all_fetches_failing_is_an_error() {
        let fetcher = FixtureFetcher::new();
        fetcher.route("/fapi/v1/exchangeInfo", exchange_info(&["BTCUSDT"]));
        fetcher.route("/fapi/v1/ticker/24hr", json!([]));
        fetcher.rate_limit(OI, Some(Duration::from_secs(30)));

        let err = monitor()
            .check(&context(&RecordingNotifier::new(), &fetcher))
            .await
            .unwrap_err();
        assert_eq!(err.retry_after(), Some(Duration::from_secs(30)));
    }
}
