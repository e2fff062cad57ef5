//! Funding-rate extremes on USDⓈ-M perpetuals.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use monitor_alerts::{escape_html, format_amount, format_price, format_time_utc8};
use monitor_core::{
    non_negative, positive, window_change_pct, MonitorConfig, MonitorResult, Settings, Watchlist,
};
use monitor_feeds::{BinanceApi, JsonFetcher, PremiumIndex, Ticker24h};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::gate::AlertGate;
use crate::monitor::{lock, CheckOutcome, Monitor, MonitorContext, MonitorCore};

const HEADER: &str = "⚠️ <b>Funding rate alert</b>\n\n";
const CHANGE_WINDOWS: [&str; 3] = ["30m", "1h", "4h"];
const MANUAL_REPORT_LIMIT: usize = 20;

pub struct FundingRateMonitor {
    core: MonitorCore,
    api: BinanceApi,
    gate: Mutex<AlertGate>,
}

/// Extra context for one alerted contract.
#[derive(Debug, Default)]
struct Enrichment {
    open_interest: Option<f64>,
    changes: Vec<(&'static str, Option<f64>)>,
}

impl FundingRateMonitor {
    pub fn new(config: &MonitorConfig) -> MonitorResult<Self> {
        Self::with_api(config, BinanceApi::new())
    }

    pub fn with_api(config: &MonitorConfig, api: BinanceApi) -> MonitorResult<Self> {
        let schema = Settings::new(&config.name, config.enabled, config.interval_secs)
            .float("threshold", 0.001)
            .validate_with(positive)
            .text("quote_asset", "USDT")
            .int("renotify_secs", 3600)
            .validate_with(non_negative)
            .bool("enrich", true);

        Ok(Self {
            core: MonitorCore::new(config, schema)?,
            api,
            gate: Mutex::new(AlertGate::new()),
        })
    }

    pub fn build(config: &MonitorConfig) -> MonitorResult<Arc<dyn Monitor>> {
        Ok(Arc::new(Self::new(config)?))
    }

    async fn enrich(&self, session: &dyn JsonFetcher, symbol: &str) -> Enrichment {
        let open_interest = match self.api.open_interest(session, symbol).await {
            Ok(oi) => Some(oi),
            Err(e) => {
                debug!(monitor = %self.core.name(), symbol = symbol, error = %e, "Open interest unavailable");
                None
            }
        };

        let mut changes = Vec::with_capacity(CHANGE_WINDOWS.len());
        for window in CHANGE_WINDOWS {
            let change = self
                .api
                .klines(session, symbol, window, 2)
                .await
                .ok()
                .filter(|candles| candles.len() >= 2)
                .map(|candles| window_change_pct(&candles));
            changes.push((window, change));
        }

        Enrichment {
            open_interest,
            changes,
        }
    }
}

/// Contracts whose funding rate magnitude reaches `threshold`, largest first.
pub(crate) fn extremes(
    entries: Vec<PremiumIndex>,
    threshold: f64,
    quote_asset: &str,
    watchlist: &Watchlist,
) -> Vec<PremiumIndex> {
    let mut hits: Vec<PremiumIndex> = entries
        .into_iter()
        .filter(|e| e.symbol.ends_with(quote_asset))
        .filter(|e| watchlist.allows(&e.symbol))
        .filter(|e| e.last_funding_rate.abs() >= threshold)
        .collect();
    hits.sort_by(|a, b| b.last_funding_rate.abs().total_cmp(&a.last_funding_rate.abs()));
    hits
}

fn format_entry(
    entry: &PremiumIndex,
    ticker: Option<&Ticker24h>,
    spot: Option<f64>,
    extra: Option<&Enrichment>,
) -> String {
    let icon = if entry.last_funding_rate > 0.0 { "🔴" } else { "🟢" };
    let mut out = format!(
        "🚨 <b>{}</b> {}\n💰 Funding: <code>{:+.4}%</code>\n📊 Mark: <code>{}</code>",
        escape_html(&entry.symbol),
        icon,
        entry.last_funding_rate * 100.0,
        format_price(entry.mark_price)
    );
    match spot {
        Some(price) if price > 0.0 => out.push_str(&format!(" | Spot: <code>{}</code>", format_price(price))),
        _ => out.push_str(" | Spot: <code>none</code>"),
    }
    if let Some(t) = ticker {
        out.push_str(&format!(
            "\n📈 24h: <code>{:+.2}%</code> | Volume: <code>{}</code>",
            t.price_change_percent,
            format_amount(t.quote_volume)
        ));
    }
    if let Some(extra) = extra {
        let changes: Vec<String> = extra
            .changes
            .iter()
            .map(|(window, change)| match change {
                Some(c) => format!("{}: <code>{:+.2}%</code>", window, c),
                None => format!("{}: <code>-</code>", window),
            })
            .collect();
        out.push_str(&format!("\n⏰ {}", changes.join(" | ")));
        if let Some(oi) = extra.open_interest {
            out.push_str(&format!("\n🧾 Open interest: <code>{}</code>", format_amount(oi)));
        }
    }
    out.push_str(&format!(
        "\n📅 Next settlement: <code>{}</code>\n",
        format_time_utc8(entry.next_funding_time)
    ));
    out
}

#[async_trait]
impl Monitor for FundingRateMonitor {
    fn core(&self) -> &MonitorCore {
        &self.core
    }

    async fn check(&self, ctx: &MonitorContext) -> MonitorResult<CheckOutcome> {
        let settings = self.core.settings();
        let watchlist = self.core.watchlist();
        let session = ctx.session.as_ref();

        let entries = self.api.premium_index(session).await?;
        let evaluated: Vec<String> = entries.iter().map(|e| e.symbol.clone()).collect();
        let hits = extremes(
            entries,
            settings.get_float("threshold"),
            settings.get_text("quote_asset"),
            &watchlist,
        );

        let renotify = Duration::from_secs(settings.get_u64("renotify_secs"));
        let now = Instant::now();
        let fire = lock(&self.gate).due(&evaluated, hits.iter().map(|e| &e.symbol), renotify, now);
        if fire.is_empty() {
            debug!(monitor = %self.core.name(), extremes = hits.len(), "No new funding alerts");
            return Ok(CheckOutcome::quiet());
        }

        let tickers: HashMap<String, Ticker24h> = match self.api.futures_tickers_24h(session).await {
            Ok(tickers) => tickers.into_iter().map(|t| (t.symbol.clone(), t)).collect(),
            Err(e) => {
                warn!(monitor = %self.core.name(), error = %e, "Futures tickers unavailable");
                HashMap::new()
            }
        };
        let spot = match self.api.spot_prices(session).await {
            Ok(prices) => prices,
            Err(e) => {
                warn!(monitor = %self.core.name(), error = %e, "Spot prices unavailable");
                HashMap::new()
            }
        };

        let enrich = settings.get_bool("enrich");
        let mut items = Vec::with_capacity(fire.len());
        for entry in hits.iter().filter(|e| fire.contains(&e.symbol)) {
            let extra = if enrich {
                Some(self.enrich(session, &entry.symbol).await)
            } else {
                None
            };
            items.push(format_entry(
                entry,
                tickers.get(&entry.symbol),
                spot.get(&entry.symbol).copied(),
                extra.as_ref(),
            ));
        }

        ctx.notifier.send_alert(ctx.target, HEADER, &items).await?;
        lock(&self.gate).commit(&fire, now);
        info!(monitor = %self.core.name(), alerts = items.len(), "Funding alerts sent");
        Ok(CheckOutcome::alerted(items.len()))
    }

    fn status_details(&self) -> Vec<String> {
        vec![format!("active alerts: <code>{}</code>", lock(&self.gate).active_count())]
    }

    fn add_to_watchlist(&self, item: &str) -> MonitorResult<String> {
        self.core.watchlist_add(item)
    }

    fn remove_from_watchlist(&self, item: &str) -> MonitorResult<String> {
        self.core.watchlist_remove(item)
    }

    /// Current extremes regardless of what was already alerted.
    async fn manual_check(&self, ctx: &MonitorContext, _args: &str) -> MonitorResult<String> {
        let settings = self.core.settings();
        let session = ctx.session.as_ref();
        let entries = self.api.premium_index(session).await?;
        let hits = extremes(
            entries,
            settings.get_float("threshold"),
            settings.get_text("quote_asset"),
            &self.core.watchlist(),
        );
        if hits.is_empty() {
            return Ok(format!(
                "✅ No funding rate at or above <code>{:.4}%</code>",
                settings.get_float("threshold") * 100.0
            ));
        }

        let tickers: HashMap<String, Ticker24h> = self
            .api
            .futures_tickers_24h(session)
            .await
            .map(|tickers| tickers.into_iter().map(|t| (t.symbol.clone(), t)).collect())
            .unwrap_or_default();

        let mut report = String::from(HEADER);
        for entry in hits.iter().take(MANUAL_REPORT_LIMIT) {
            report.push_str(&format_entry(entry, tickers.get(&entry.symbol), None, None));
            report.push('\n');
        }
        if hits.len() > MANUAL_REPORT_LIMIT {
            report.push_str(&format!("… and {} more", hits.len() - MANUAL_REPORT_LIMIT));
        }
        Ok(report.trim_end().to_string())
    }
}
