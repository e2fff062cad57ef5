//! Daily spot ranking by quote volume.

use std::sync::Arc;

use async_trait::async_trait;
use monitor_alerts::{escape_html, format_price};
use monitor_core::{positive, MonitorConfig, MonitorResult, Settings};
use monitor_feeds::{BinanceApi, Ticker24h};
use tracing::info;

use crate::monitor::{CheckOutcome, Monitor, MonitorContext, MonitorCore};

pub struct SpotVolumeMonitor {
    core: MonitorCore,
    api: BinanceApi,
}

impl SpotVolumeMonitor {
    pub fn new(config: &MonitorConfig) -> MonitorResult<Self> {
        Self::with_api(config, BinanceApi::new())
    }

    pub fn with_api(config: &MonitorConfig, api: BinanceApi) -> MonitorResult<Self> {
        let schema = Settings::new(&config.name, config.enabled, config.interval_secs)
            .int("top_n", 20)
            .validate_with(positive)
            .text("quote_asset", "USDT");

        Ok(Self {
            core: MonitorCore::new(config, schema)?,
            api,
        })
    }

    pub fn build(config: &MonitorConfig) -> MonitorResult<Arc<dyn Monitor>> {
        Ok(Arc::new(Self::new(config)?))
    }
}

/// Pairs quoted in `quote_asset`, largest quote volume first.
pub(crate) fn rank(tickers: Vec<Ticker24h>, quote_asset: &str, top_n: usize) -> Vec<Ticker24h> {
    let mut pairs: Vec<Ticker24h> = tickers
        .into_iter()
        .filter(|t| t.symbol.ends_with(quote_asset))
        .collect();
    pairs.sort_by(|a, b| b.quote_volume.total_cmp(&a.quote_volume));
    pairs.truncate(top_n);
    pairs
}

fn format_row(rank: usize, ticker: &Ticker24h) -> String {
    format!(
        "{:02}. <b>{}</b>\n    💵 Price: <code>{}</code>\n    🔄 Volume: <code>{:.2}M</code>\n    📈 Change: <code>{:+.2}%</code>\n",
        rank,
        escape_html(&ticker.symbol),
        format_price(ticker.last_price),
        ticker.quote_volume / 1e6,
        ticker.price_change_percent
    )
}

#[async_trait]
impl Monitor for SpotVolumeMonitor {
    fn core(&self) -> &MonitorCore {
        &self.core
    }

    async fn check(&self, ctx: &MonitorContext) -> MonitorResult<CheckOutcome> {
        let settings = self.core.settings();
        let top_n = settings.get_u64("top_n") as usize;

        let tickers = self.api.spot_tickers_24h(ctx.session.as_ref()).await?;
        let top = rank(tickers, settings.get_text("quote_asset"), top_n);
        if top.is_empty() {
            return Ok(CheckOutcome::quiet());
        }

        let header = format!("📊 <b>24h quote volume, top {}</b>\n\n", top.len());
        let rows: Vec<String> = top
            .iter()
            .enumerate()
            .map(|(i, t)| format_row(i + 1, t))
            .collect();
        ctx.notifier.send_alert(ctx.target, &header, &rows).await?;
        info!(monitor = %self.core.name(), rows = rows.len(), "Volume ranking sent");
        Ok(CheckOutcome::alerted(rows.len()))
    }
}
