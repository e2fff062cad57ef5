//! Concrete monitors.

pub mod funding;
pub mod open_interest;
pub mod position;
pub mod price_spike;
pub mod social;
pub mod spot_volume;

pub use funding::FundingRateMonitor;
pub use open_interest::OpenInterestMonitor;
pub use position::PositionMonitor;
pub use price_spike::PriceSpikeMonitor;
pub use social::SocialPostMonitor;
pub use spot_volume::SpotVolumeMonitor;

use std::sync::Mutex;
use std::time::Duration;

use monitor_core::Watchlist;
use monitor_feeds::{BinanceApi, FeedError, JsonFetcher};
use tokio::time::Instant;
use tracing::info;

use crate::monitor::lock;

/// Perpetual contracts discovered from exchange info, refreshed lazily.
#[derive(Debug, Default)]
pub(crate) struct UniverseCache {
    cached: Mutex<Option<(Instant, String, Vec<String>)>>,
}

impl UniverseCache {
    /// Symbols to scan this cycle: the watchlist when set, else the universe.
    pub(crate) async fn resolve(
        &self,
        api: &BinanceApi,
        session: &dyn JsonFetcher,
        watchlist: &Watchlist,
        quote_asset: &str,
        refresh: Duration,
    ) -> Result<Vec<String>, FeedError> {
        if !watchlist.is_full_universe() {
            return Ok(watchlist.to_vec());
        }

        let fresh = lock(&self.cached).as_ref().and_then(|(at, quote, symbols)| {
            (quote == quote_asset && at.elapsed() < refresh).then(|| symbols.clone())
        });
        if let Some(symbols) = fresh {
            return Ok(symbols);
        }

        let symbols = api.perpetual_symbols(session, quote_asset).await?;
        info!(quote = quote_asset, symbols = symbols.len(), "Perpetual universe refreshed");
        *lock(&self.cached) = Some((Instant::now(), quote_asset.to_string(), symbols.clone()));
        Ok(symbols)
    }

    pub(crate) fn len(&self) -> usize {
        lock(&self.cached).as_ref().map_or(0, |(_, _, s)| s.len())
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use serde_json::{json, Value};

    /// `exchangeInfo` body listing trading USDT perpetuals.
    pub fn exchange_info(symbols: &[&str]) -> Value {
        let entries: Vec<Value> = symbols
            .iter()
            .map(|s| {
                json!({
                    "symbol": s,
                    "contractType": "PERPETUAL",
                    "status": "TRADING",
                    "quoteAsset": "USDT"
                })
            })
            .collect();
        json!({ "symbols": entries })
    }

    pub fn open_interest(symbol: &str, oi: f64) -> Value {
        json!({ "symbol": symbol, "openInterest": oi.to_string(), "time": 0 })
    }

    pub fn ticker(symbol: &str, last: f64, change_pct: f64, quote_volume: f64) -> Value {
        json!({
            "symbol": symbol,
            "lastPrice": last.to_string(),
            "priceChangePercent": change_pct.to_string(),
            "volume": "1000",
            "quoteVolume": quote_volume.to_string()
        })
    }
}
