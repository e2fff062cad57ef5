//! One-minute price spikes with candle charts.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use monitor_alerts::{escape_html, format_amount, format_price, format_ratio_pct};
use monitor_core::{
    non_negative, positive, ratio_change, Candle, MonitorConfig, MonitorError, MonitorResult,
    SettingValue, Settings,
};
use monitor_feeds::{BinanceApi, FeedError};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::chart::{ChartRenderer, SvgCandleChart};
use crate::gate::AlertGate;
use crate::monitor::{lock, CheckOutcome, Monitor, MonitorContext, MonitorCore};
use crate::monitors::UniverseCache;

const HEADER: &str = "🚨 <b>Price spike alert</b>\n\n";
const FETCH_CONCURRENCY: usize = 10;
const MIN_CANDLES: usize = 3;

/// Trigger thresholds, all ratios.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpikeRule {
    pub consecutive_amplitude: f64,
    pub amplitude_threshold: f64,
    pub close_change_threshold: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Spike {
    pub price: f64,
    pub close_change: f64,
    pub last_amplitude: f64,
}

impl SpikeRule {
    /// Evaluate the latest candles; `None` when there are too few or nothing fired.
    pub fn detect(&self, candles: &[Candle]) -> Option<Spike> {
        if candles.len() < MIN_CANDLES {
            return None;
        }
        let last = candles[candles.len() - 1];
        let prev = candles[candles.len() - 2];

        let last_amplitude = last.amplitude();
        let close_change = ratio_change(prev.close, last.close);
        let triggered = (last_amplitude >= self.consecutive_amplitude
            && prev.amplitude() >= self.consecutive_amplitude)
            || last_amplitude >= self.amplitude_threshold
            || close_change.abs() >= self.close_change_threshold;

        triggered.then_some(Spike {
            price: last.close,
            close_change,
            last_amplitude,
        })
    }
}

/// The klines endpoint serves at most 1500 rows.
fn kline_limit_range(value: &SettingValue) -> Result<(), String> {
    match value {
        SettingValue::Int(n) if (MIN_CANDLES as i64..=1500).contains(n) => Ok(()),
        _ => Err(format!("must be between {} and 1500", MIN_CANDLES)),
    }
}

pub struct PriceSpikeMonitor {
    core: MonitorCore,
    api: BinanceApi,
    chart: Box<dyn ChartRenderer>,
    universe: UniverseCache,
    last_open_interest: Mutex<HashMap<String, f64>>,
    gate: Mutex<AlertGate>,
}

impl PriceSpikeMonitor {
    pub fn new(config: &MonitorConfig) -> MonitorResult<Self> {
        Self::with_parts(config, BinanceApi::new(), Box::new(SvgCandleChart::default()))
    }

    pub fn with_parts(
        config: &MonitorConfig,
        api: BinanceApi,
        chart: Box<dyn ChartRenderer>,
    ) -> MonitorResult<Self> {
        let schema = Settings::new(&config.name, config.enabled, config.interval_secs)
            .float("consecutive_amplitude", 0.01253)
            .validate_with(positive)
            .float("amplitude_threshold", 0.02)
            .validate_with(positive)
            .float("close_change_threshold", 0.015)
            .validate_with(positive)
            .int("kline_limit", 20)
            .validate_with(kline_limit_range)
            .bool("charts", true)
            .int("max_charts", 5)
            .validate_with(non_negative)
            .int("renotify_secs", 0)
            .validate_with(non_negative)
            .text("quote_asset", "USDT")
            .int("universe_refresh_secs", 3600)
            .validate_with(positive);

        Ok(Self {
            core: MonitorCore::new(config, schema)?,
            api,
            chart,
            universe: UniverseCache::default(),
            last_open_interest: Mutex::new(HashMap::new()),
            gate: Mutex::new(AlertGate::new()),
        })
    }

    pub fn build(config: &MonitorConfig) -> MonitorResult<Arc<dyn Monitor>> {
        Ok(Arc::new(Self::new(config)?))
    }

    fn rule(settings: &Settings) -> SpikeRule {
        SpikeRule {
            consecutive_amplitude: settings.get_float("consecutive_amplitude"),
            amplitude_threshold: settings.get_float("amplitude_threshold"),
            close_change_threshold: settings.get_float("close_change_threshold"),
        }
    }

    /// Change since the previous spike of `symbol`; the first spike reports zero.
    fn oi_change(&self, symbol: &str, current: f64) -> f64 {
        let previous = lock(&self.last_open_interest).insert(symbol.to_string(), current);
        previous.map_or(0.0, |p| ratio_change(p, current))
    }
}

fn format_spike(symbol: &str, spike: &Spike, open_interest: Option<(f64, f64)>) -> String {
    let icon = if spike.close_change > 0.0 { "📈" } else { "📉" };
    let mut out = format!(
        "{} <b>{}</b>\n💰 Price: <code>{}</code>\n📊 1m change: <code>{}</code>\n📶 Amplitude: <code>{:.2}%</code>",
        icon,
        escape_html(symbol),
        format_price(spike.price),
        format_ratio_pct(spike.close_change),
        spike.last_amplitude * 100.0
    );
    if let Some((oi, change)) = open_interest {
        out.push_str(&format!(
            "\n🧾 Open interest: <code>{}</code>\n🔁 OI change: <code>{}</code>",
            format_amount(oi),
            format_ratio_pct(change)
        ));
    }
    out.push('\n');
    out
}

#[async_trait]
impl Monitor for PriceSpikeMonitor {
    fn core(&self) -> &MonitorCore {
        &self.core
    }

    async fn check(&self, ctx: &MonitorContext) -> MonitorResult<CheckOutcome> {
        let settings = self.core.settings();
        let session = ctx.session.as_ref();
        let rule = Self::rule(&settings);
        let limit = u32::try_from(settings.get_u64("kline_limit")).unwrap_or(20);

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

        let api = &self.api;
        let results: Vec<(String, Result<Vec<Candle>, FeedError>)> = stream::iter(symbols)
            .map(|symbol| async move {
                let candles = api.klines(session, &symbol, "1m", limit).await;
                (symbol, candles)
            })
            .buffer_unordered(FETCH_CONCURRENCY)
            .collect()
            .await;

        let mut evaluated = Vec::with_capacity(results.len());
        let mut last_error = None;
        let mut spikes = Vec::new();
        for (symbol, result) in results {
            match result {
                Ok(candles) => {
                    evaluated.push(symbol.clone());
                    if let Some(spike) = rule.detect(&candles) {
                        spikes.push((symbol, spike, candles));
                    }
                }
                Err(e) => {
                    debug!(monitor = %self.core.name(), symbol = %symbol, error = %e, "Kline fetch failed");
                    last_error = Some(e);
                }
            }
        }
        if evaluated.is_empty() {
            if let Some(e) = last_error {
                return Err(MonitorError::from(e));
            }
        }
        spikes.sort_by(|a, b| b.1.close_change.abs().total_cmp(&a.1.close_change.abs()));

        let now = Instant::now();
        let fire = lock(&self.gate).due(
            &evaluated,
            spikes.iter().map(|(symbol, _, _)| symbol),
            Duration::from_secs(settings.get_u64("renotify_secs")),
            now,
        );
        if fire.is_empty() {
            return Ok(CheckOutcome::quiet());
        }
        let spikes: Vec<_> = spikes
            .into_iter()
            .filter(|(symbol, _, _)| fire.contains(symbol))
            .collect();

        let mut items = Vec::with_capacity(spikes.len());
        for (symbol, spike, _) in &spikes {
            let oi = match self.api.open_interest(session, symbol).await {
                Ok(oi) => Some((oi, self.oi_change(symbol, oi))),
                Err(e) => {
                    debug!(monitor = %self.core.name(), symbol = %symbol, error = %e, "Open interest unavailable");
                    None
                }
            };
            items.push(format_spike(symbol, spike, oi));
        }
        ctx.notifier.send_alert(ctx.target, HEADER, &items).await?;
        lock(&self.gate).commit(&fire, now);

        if settings.get_bool("charts") {
            let max_charts = settings.get_u64("max_charts") as usize;
            for (symbol, _, candles) in spikes.iter().take(max_charts) {
                let title = format!("{} 1m", symbol);
                let Some(image) = self.chart.render(&title, candles) else {
                    continue;
                };
                let caption = format!("📊 <b>{}</b> 1m candles", escape_html(symbol));
                if let Err(e) = ctx.notifier.send_photo(ctx.target, image, &caption).await {
                    warn!(monitor = %self.core.name(), symbol = %symbol, error = %e, "Failed to send chart");
                }
            }
        }

        info!(monitor = %self.core.name(), alerts = items.len(), "Price spike alerts sent");
        Ok(CheckOutcome::alerted(items.len()))
    }

    fn status_details(&self) -> Vec<String> {
        vec![
            format!("active alerts: <code>{}</code>", lock(&self.gate).active_count()),
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
