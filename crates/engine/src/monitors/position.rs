//! Account position report from signed Binance endpoints.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use monitor_alerts::{escape_html, format_time_utc8, split_message, timestamp_footer};
use monitor_core::{
    positive, MonitorConfig, MonitorError, MonitorResult, SettingValue, Settings,
};
use monitor_feeds::{BinanceApi, Credentials, JsonFetcher, PositionRisk, SpotBalance, TradeSide, UserTrade};
use tracing::{debug, info};

use crate::monitor::{lock, require_text, CheckOutcome, Monitor, MonitorContext, MonitorCore};

/// Size of one history message; leaves room for the HTML envelope.
const HISTORY_PART_LIMIT: usize = 3500;
/// The trade history endpoint only serves a seven day window.
const MAX_HISTORY_DAYS: u32 = 7;
const DAY_MS: i64 = 86_400_000;
const QTY_EPSILON: f64 = 1e-12;

/// Accepts an empty string (report every cycle) or `HH:MM`.
fn report_time_format(value: &SettingValue) -> Result<(), String> {
    match value {
        SettingValue::Text(t) if t.trim().is_empty() => Ok(()),
        SettingValue::Text(t) if NaiveTime::parse_from_str(t.trim(), "%H:%M").is_ok() => Ok(()),
        _ => Err("expected HH:MM (UTC) or empty".to_string()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Long => "LONG",
            Direction::Short => "SHORT",
        }
    }
}

/// Closed quantity of one symbol and direction, FIFO-matched.
#[derive(Debug, Clone, PartialEq)]
pub struct RealizedPnl {
    pub symbol: String,
    pub direction: Direction,
    pub qty: f64,
    pub avg_open: f64,
    pub avg_close: f64,
    pub pnl: f64,
    /// Time of the last closing fill, epoch milliseconds.
    pub last_close_ms: i64,
}

#[derive(Debug, Clone, Copy)]
struct Lot {
    qty: f64,
    price: f64,
}

#[derive(Debug, Default)]
struct Totals {
    qty: f64,
    open_notional: f64,
    close_notional: f64,
    pnl: f64,
    last_close_ms: i64,
}

/// Match fills first-in first-out and aggregate closed quantity per symbol and direction.
///
/// Buys close open shorts before opening longs; sells close longs before
/// opening shorts. Output is newest close first.
pub fn realized_pnl(trades: &[UserTrade]) -> Vec<RealizedPnl> {
    let mut ordered: Vec<&UserTrade> = trades.iter().collect();
    ordered.sort_by_key(|t| t.time);

    let mut open: HashMap<(&str, Direction), VecDeque<Lot>> = HashMap::new();
    let mut totals: HashMap<(String, Direction), Totals> = HashMap::new();

    for trade in ordered {
        let (closes, opens) = match trade.side {
            TradeSide::Buy => (Direction::Short, Direction::Long),
            TradeSide::Sell => (Direction::Long, Direction::Short),
        };

        let mut remaining = trade.qty;
        let queue = open.entry((trade.symbol.as_str(), closes)).or_default();
        while remaining > QTY_EPSILON {
            let Some(lot) = queue.front_mut() else {
                break;
            };
            let qty = remaining.min(lot.qty);
            let pnl = match closes {
                Direction::Long => (trade.price - lot.price) * qty,
                Direction::Short => (lot.price - trade.price) * qty,
            };

            let entry = totals.entry((trade.symbol.clone(), closes)).or_default();
            entry.qty += qty;
            entry.open_notional += lot.price * qty;
            entry.close_notional += trade.price * qty;
            entry.pnl += pnl;
            entry.last_close_ms = entry.last_close_ms.max(trade.time);

            lot.qty -= qty;
            remaining -= qty;
            if lot.qty <= QTY_EPSILON {
                queue.pop_front();
            }
        }

        if remaining > QTY_EPSILON {
            open.entry((trade.symbol.as_str(), opens))
                .or_default()
                .push_back(Lot {
                    qty: remaining,
                    price: trade.price,
                });
        }
    }

    let mut out: Vec<RealizedPnl> = totals
        .into_iter()
        .filter(|(_, t)| t.qty > QTY_EPSILON)
        .map(|((symbol, direction), t)| RealizedPnl {
            symbol,
            direction,
            qty: t.qty,
            avg_open: t.open_notional / t.qty,
            avg_close: t.close_notional / t.qty,
            pnl: t.pnl,
            last_close_ms: t.last_close_ms,
        })
        .collect();
    out.sort_by(|a, b| {
        b.last_close_ms
            .cmp(&a.last_close_ms)
            .then_with(|| a.symbol.cmp(&b.symbol))
            .then_with(|| a.direction.cmp(&b.direction))
    });
    out
}

fn format_holdings(positions: &[PositionRisk], balances: &[SpotBalance]) -> String {
    let mut out = String::from("📊 <b>Account position report</b>\n\n");

    if positions.is_empty() {
        out.push_str("🎯 <b>Futures positions</b>: none\n\n");
    } else {
        let longs = positions.iter().filter(|p| p.is_long()).count();
        let unrealized: f64 = positions.iter().map(|p| p.unrealized_profit).sum();
        let avg_leverage =
            positions.iter().map(|p| p.leverage).sum::<f64>() / positions.len() as f64;

        out.push_str("🎯 <b>Futures positions</b>\n");
        out.push_str(&format!("Open: {}\n", positions.len()));
        out.push_str(&format!("Long: {} | Short: {}\n", longs, positions.len() - longs));
        out.push_str(&format!("Average leverage: {:.1}x\n", avg_leverage));
        out.push_str(&format!("Unrealized PnL: {:.2} USDT\n\n", unrealized));

        for p in positions {
            let notional = p.size() * p.entry_price;
            let pnl_pct = if notional > 0.0 {
                p.unrealized_profit / notional * 100.0
            } else {
                0.0
            };
            let side = if p.is_long() { Direction::Long } else { Direction::Short };
            out.push_str(&format!(
                "• {} {}\n  Size: {:.4} | Leverage: {}x\n  Entry: {:.4} | Mark: {:.4}\n  PnL: {:.2} USDT ({:+.2}%)\n\n",
                escape_html(&p.symbol),
                side.as_str(),
                p.size(),
                p.leverage,
                p.entry_price,
                p.mark_price,
                p.unrealized_profit,
                pnl_pct
            ));
        }
    }

    if !balances.is_empty() {
        out.push_str("💰 <b>Spot balances</b>\n");
        let mut usdt = 0.0;
        for b in balances {
            if b.asset == "USDT" {
                usdt += b.total();
                out.push_str(&format!("• {}: {:.2}\n", escape_html(&b.asset), b.total()));
            } else {
                out.push_str(&format!("• {}: {:.6}\n", escape_html(&b.asset), b.total()));
            }
        }
        out.push_str(&format!("\nUSDT balance: {:.2}\n\n", usdt));
    }

    out.push_str(&timestamp_footer());
    out
}

fn format_history(records: &[RealizedPnl], days: u32) -> Vec<String> {
    let header = if days == 1 {
        "📈 <b>Realized PnL today</b>\n\n".to_string()
    } else {
        format!("📈 <b>Realized PnL, last {} days</b>\n\n", days)
    };
    let items: Vec<String> = records
        .iter()
        .map(|r| {
            let pnl = if r.pnl >= 0.0 {
                format!("<b><code>+{:.2} USDT</code></b> 🟢", r.pnl)
            } else {
                format!("<b><code>{:.2} USDT</code></b> 🔴", r.pnl)
            };
            format!(
                "• <b>{}</b> <b>{}</b>\n  Qty: <code>{:.4}</code>\n  Avg open: <code>{:.4}</code>  Avg close: <code>{:.4}</code>\n  PnL: {}\n  Time: <code>{}</code>\n",
                escape_html(&r.symbol),
                r.direction.as_str(),
                r.qty,
                r.avg_open,
                r.avg_close,
                pnl,
                format_time_utc8(r.last_close_ms)
            )
        })
        .collect();
    split_message(&header, &items, HISTORY_PART_LIMIT)
}

pub struct PositionMonitor {
    core: MonitorCore,
    api: BinanceApi,
    last_report_day: Mutex<Option<NaiveDate>>,
}

impl PositionMonitor {
    pub fn new(config: &MonitorConfig) -> MonitorResult<Self> {
        let testnet = config
            .params
            .get("testnet")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let api = if testnet { BinanceApi::testnet() } else { BinanceApi::new() };
        Self::with_api(config, api)
    }

    pub fn with_api(config: &MonitorConfig, api: BinanceApi) -> MonitorResult<Self> {
        let schema = Settings::new(&config.name, config.enabled, config.interval_secs)
            .text("api_key", "")
            .secret()
            .text("api_secret", "")
            .secret()
            .bool("testnet", false)
            .bool("auto_report", true)
            .text("report_time", "09:00")
            .validate_with(report_time_format)
            .bool("include_history", true)
            .int("history_days", 1)
            .validate_with(positive);

        let core = MonitorCore::new(config, schema)?;
        require_text(&core, "api_key")?;
        require_text(&core, "api_secret")?;

        Ok(Self {
            core,
            api,
            last_report_day: Mutex::new(None),
        })
    }

    pub fn build(config: &MonitorConfig) -> MonitorResult<Arc<dyn Monitor>> {
        Ok(Arc::new(Self::new(config)?))
    }

    /// Whether the scheduled report is due at `now`; marks the day as reported.
    fn take_report_slot(&self, now: DateTime<Utc>, report_time: &str) -> bool {
        let report_time = report_time.trim();
        if report_time.is_empty() {
            return true;
        }
        let Ok(at) = NaiveTime::parse_from_str(report_time, "%H:%M") else {
            return false;
        };

        let today = now.date_naive();
        let mut last = lock(&self.last_report_day);
        if now.time() < at || *last == Some(today) {
            return false;
        }
        *last = Some(today);
        true
    }

    async fn build_report(
        &self,
        session: &dyn JsonFetcher,
        settings: &Settings,
        days: u32,
    ) -> MonitorResult<Vec<String>> {
        let credentials = Credentials::new(
            settings.get_text("api_key").trim(),
            settings.get_text("api_secret").trim(),
        );
        let now_ms = Utc::now().timestamp_millis();

        let positions = self.api.position_risk(session, &credentials, now_ms).await?;
        let balances = self.api.spot_account(session, &credentials, now_ms).await?;
        let mut parts = vec![format_holdings(&positions, &balances)];

        if settings.get_bool("include_history") {
            let symbols: BTreeSet<String> = positions
                .iter()
                .map(|p| p.symbol.clone())
                .chain(self.core.watchlist().iter().map(str::to_string))
                .collect();

            let start_ms = now_ms - i64::from(days) * DAY_MS;
            let mut trades = Vec::new();
            for symbol in &symbols {
                let fills = self
                    .api
                    .user_trades(session, &credentials, Some(symbol), start_ms, now_ms)
                    .await?;
                debug!(monitor = %self.core.name(), symbol = %symbol, fills = fills.len(), "Fetched trade history");
                trades.extend(fills);
            }
            parts.extend(format_history(&realized_pnl(&trades), days));
        }
        Ok(parts)
    }
}

#[async_trait]
impl Monitor for PositionMonitor {
    fn core(&self) -> &MonitorCore {
        &self.core
    }

    async fn check(&self, ctx: &MonitorContext) -> MonitorResult<CheckOutcome> {
        let settings = self.core.settings();
        if !settings.get_bool("auto_report")
            || !self.take_report_slot(Utc::now(), settings.get_text("report_time"))
        {
            return Ok(CheckOutcome::quiet());
        }

        let days = u32::try_from(settings.get_u64("history_days"))
            .unwrap_or(1)
            .min(MAX_HISTORY_DAYS);
        let parts = self.build_report(ctx.session.as_ref(), &settings, days).await?;
        for part in &parts {
            ctx.notifier.send_message(ctx.target, part).await?;
        }
        info!(monitor = %self.core.name(), parts = parts.len(), "Position report sent");
        Ok(CheckOutcome::alerted(parts.len()))
    }

    fn status_details(&self) -> Vec<String> {
        let last = match *lock(&self.last_report_day) {
            Some(day) => day.to_string(),
            None => "never".to_string(),
        };
        vec![format!("last scheduled report: <code>{}</code>", last)]
    }

    fn add_to_watchlist(&self, item: &str) -> MonitorResult<String> {
        self.core.watchlist_add(item)
    }

    fn remove_from_watchlist(&self, item: &str) -> MonitorResult<String> {
        self.core.watchlist_remove(item)
    }

    /// Report now; `args` may override the history window in days.
    async fn manual_check(&self, ctx: &MonitorContext, args: &str) -> MonitorResult<String> {
        let settings = self.core.settings();
        let days = match args.trim() {
            "" => u32::try_from(settings.get_u64("history_days")).unwrap_or(1),
            raw => match raw.parse::<u32>() {
                Ok(days) if days > 0 => days,
                _ => {
                    return Err(MonitorError::InvalidCommand(format!(
                        "days must be a positive number, got `{}`",
                        raw
                    )))
                }
            },
        }
        .min(MAX_HISTORY_DAYS);

        let parts = self.build_report(ctx.session.as_ref(), &settings, days).await?;
        Ok(parts.join("\n\n"))
    }
}
