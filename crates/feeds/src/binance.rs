//! Binance USDⓈ-M futures and spot REST endpoints.
//!
//! Every call goes through a [`JsonFetcher`] so the same decoders serve the
//! per-monitor sessions, the ad-hoc lookup session and test fixtures.

use std::collections::HashMap;

use monitor_core::Candle;
use serde::de::{self, Deserializer};
use serde::Deserialize;
use serde_json::Value;

use crate::error::FeedError;
use crate::rest::{JsonFetcher, JsonRequest};
use crate::signing::{sign_request, Credentials};

pub const FUTURES_BASE: &str = "https://fapi.binance.com";
pub const SPOT_BASE: &str = "https://api.binance.com";
pub const FUTURES_TESTNET_BASE: &str = "https://testnet.binancefuture.com";
pub const SPOT_TESTNET_BASE: &str = "https://testnet.binance.vision";

/// Binance encodes most decimals as strings; accept both forms.
fn de_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => s.trim().parse::<f64>().map_err(de::Error::custom),
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| de::Error::custom("number out of range")),
        other => Err(de::Error::custom(format!("expected number, got {}", other))),
    }
}

fn de_i64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => s.trim().parse::<i64>().map_err(de::Error::custom),
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| de::Error::custom("integer out of range")),
        other => Err(de::Error::custom(format!("expected integer, got {}", other))),
    }
}

fn decode<T: serde::de::DeserializeOwned>(value: Value, what: &str) -> Result<T, FeedError> {
    serde_json::from_value(value).map_err(|e| FeedError::ParseError(format!("{}: {}", what, e)))
}

/// `GET /fapi/v1/premiumIndex` entry.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PremiumIndex {
    pub symbol: String,
    #[serde(deserialize_with = "de_f64")]
    pub mark_price: f64,
    #[serde(deserialize_with = "de_f64")]
    pub index_price: f64,
    #[serde(deserialize_with = "de_f64")]
    pub last_funding_rate: f64,
    /// Next settlement, milliseconds since the epoch.
    #[serde(deserialize_with = "de_i64")]
    pub next_funding_time: i64,
}

/// 24 hour rolling ticker (futures and spot share the fields we use).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticker24h {
    pub symbol: String,
    #[serde(deserialize_with = "de_f64")]
    pub last_price: f64,
    #[serde(deserialize_with = "de_f64")]
    pub price_change_percent: f64,
    #[serde(deserialize_with = "de_f64")]
    pub volume: f64,
    #[serde(deserialize_with = "de_f64")]
    pub quote_volume: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OpenInterestResponse {
    #[serde(deserialize_with = "de_f64")]
    open_interest: f64,
}

#[derive(Debug, Deserialize)]
struct PriceResponse {
    symbol: String,
    #[serde(deserialize_with = "de_f64")]
    price: f64,
}

#[derive(Debug, Deserialize)]
struct ExchangeInfo {
    symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SymbolInfo {
    symbol: String,
    #[serde(default)]
    contract_type: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    quote_asset: String,
}

/// Futures account summary (`GET /fapi/v2/account`).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FuturesAccount {
    #[serde(deserialize_with = "de_f64")]
    pub total_wallet_balance: f64,
    #[serde(deserialize_with = "de_f64")]
    pub total_unrealized_profit: f64,
    #[serde(deserialize_with = "de_f64")]
    pub total_margin_balance: f64,
    #[serde(deserialize_with = "de_f64")]
    pub available_balance: f64,
}

/// Open position (`GET /fapi/v2/positionRisk`).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionRisk {
    pub symbol: String,
    /// Signed size: positive long, negative short.
    #[serde(deserialize_with = "de_f64")]
    pub position_amt: f64,
    #[serde(deserialize_with = "de_f64")]
    pub entry_price: f64,
    #[serde(deserialize_with = "de_f64")]
    pub mark_price: f64,
    #[serde(rename = "unRealizedProfit", deserialize_with = "de_f64")]
    pub unrealized_profit: f64,
    #[serde(deserialize_with = "de_f64")]
    pub leverage: f64,
    #[serde(default)]
    pub margin_type: String,
}

impl PositionRisk {
    pub fn is_open(&self) -> bool {
        self.position_amt != 0.0
    }

    pub fn is_long(&self) -> bool {
        self.position_amt > 0.0
    }

    pub fn size(&self) -> f64 {
        self.position_amt.abs()
    }
}

/// Non-zero spot balance.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SpotBalance {
    pub asset: String,
    #[serde(deserialize_with = "de_f64")]
    pub free: f64,
    #[serde(deserialize_with = "de_f64")]
    pub locked: f64,
}

impl SpotBalance {
    pub fn total(&self) -> f64 {
        self.free + self.locked
    }
}

#[derive(Debug, Deserialize)]
struct SpotAccount {
    balances: Vec<SpotBalance>,
}

/// Side of a fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeSide {
    Buy,
    Sell,
}

/// Futures fill (`GET /fapi/v1/userTrades`).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserTrade {
    pub symbol: String,
    pub side: TradeSide,
    #[serde(deserialize_with = "de_f64")]
    pub price: f64,
    #[serde(deserialize_with = "de_f64")]
    pub qty: f64,
    #[serde(default, deserialize_with = "de_f64_or_zero")]
    pub realized_pnl: f64,
    #[serde(default, deserialize_with = "de_f64_or_zero")]
    pub commission: f64,
    /// Fill time, milliseconds since the epoch.
    pub time: i64,
}

fn de_f64_or_zero<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(0.0),
        Value::String(s) if s.trim().is_empty() => Ok(0.0),
        Value::String(s) => s.trim().parse::<f64>().map_err(de::Error::custom),
        Value::Number(n) => Ok(n.as_f64().unwrap_or(0.0)),
        other => Err(de::Error::custom(format!("expected number, got {}", other))),
    }
}

/// Decode one kline row: `[openTime, open, high, low, close, volume, ...]`.
fn parse_kline(row: &Value) -> Result<Candle, FeedError> {
    let fields = row
        .as_array()
        .filter(|a| a.len() >= 6)
        .ok_or_else(|| FeedError::ParseError(format!("kline row too short: {}", row)))?;

    let num = |idx: usize| -> Result<f64, FeedError> {
        match &fields[idx] {
            Value::String(s) => s
                .parse::<f64>()
                .map_err(|e| FeedError::ParseError(format!("kline field {}: {}", idx, e))),
            Value::Number(n) => n
                .as_f64()
                .ok_or_else(|| FeedError::ParseError(format!("kline field {} out of range", idx))),
            other => Err(FeedError::ParseError(format!("kline field {}: {}", idx, other))),
        }
    };

    let open_time_ms = fields[0]
        .as_i64()
        .ok_or_else(|| FeedError::ParseError(format!("kline open time: {}", fields[0])))?;

    Ok(Candle {
        open_time_ms,
        open: num(1)?,
        high: num(2)?,
        low: num(3)?,
        close: num(4)?,
        volume: num(5)?,
    })
}

/// Binance REST API facade over a [`JsonFetcher`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinanceApi {
    futures_base: String,
    spot_base: String,
}

impl Default for BinanceApi {
    fn default() -> Self {
        Self::new()
    }
}

impl BinanceApi {
    pub fn new() -> Self {
        Self::with_bases(FUTURES_BASE, SPOT_BASE)
    }

    pub fn testnet() -> Self {
        Self::with_bases(FUTURES_TESTNET_BASE, SPOT_TESTNET_BASE)
    }

    pub fn with_bases(futures_base: impl Into<String>, spot_base: impl Into<String>) -> Self {
        Self {
            futures_base: futures_base.into().trim_end_matches('/').to_string(),
            spot_base: spot_base.into().trim_end_matches('/').to_string(),
        }
    }

    fn futures(&self, path: &str) -> JsonRequest {
        JsonRequest::get(format!("{}{}", self.futures_base, path))
    }

    fn spot(&self, path: &str) -> JsonRequest {
        JsonRequest::get(format!("{}{}", self.spot_base, path))
    }

    // --- public market data ---

    /// Mark price and funding for every perpetual.
    pub async fn premium_index(&self, fetcher: &dyn JsonFetcher) -> Result<Vec<PremiumIndex>, FeedError> {
        let value = fetcher.fetch(self.futures("/fapi/v1/premiumIndex")).await?;
        decode(value, "premiumIndex")
    }

    pub async fn premium_index_for(
        &self,
        fetcher: &dyn JsonFetcher,
        symbol: &str,
    ) -> Result<PremiumIndex, FeedError> {
        let value = fetcher
            .fetch(self.futures("/fapi/v1/premiumIndex").query("symbol", symbol))
            .await?;
        decode(value, "premiumIndex")
    }

    pub async fn futures_tickers_24h(&self, fetcher: &dyn JsonFetcher) -> Result<Vec<Ticker24h>, FeedError> {
        let value = fetcher.fetch(self.futures("/fapi/v1/ticker/24hr")).await?;
        decode(value, "futures ticker/24hr")
    }

    pub async fn futures_ticker_24h(
        &self,
        fetcher: &dyn JsonFetcher,
        symbol: &str,
    ) -> Result<Ticker24h, FeedError> {
        let value = fetcher
            .fetch(self.futures("/fapi/v1/ticker/24hr").query("symbol", symbol))
            .await?;
        decode(value, "futures ticker/24hr")
    }

    pub async fn spot_tickers_24h(&self, fetcher: &dyn JsonFetcher) -> Result<Vec<Ticker24h>, FeedError> {
        let value = fetcher.fetch(self.spot("/api/v3/ticker/24hr")).await?;
        decode(value, "spot ticker/24hr")
    }

    /// Last spot price for every symbol.
    pub async fn spot_prices(&self, fetcher: &dyn JsonFetcher) -> Result<HashMap<String, f64>, FeedError> {
        let value = fetcher.fetch(self.spot("/api/v3/ticker/price")).await?;
        let prices: Vec<PriceResponse> = decode(value, "spot ticker/price")?;
        Ok(prices.into_iter().map(|p| (p.symbol, p.price)).collect())
    }

    pub async fn futures_price(&self, fetcher: &dyn JsonFetcher, symbol: &str) -> Result<f64, FeedError> {
        let value = fetcher
            .fetch(self.futures("/fapi/v1/ticker/price").query("symbol", symbol))
            .await?;
        let price: PriceResponse = decode(value, "futures ticker/price")?;
        Ok(price.price)
    }

    pub async fn open_interest(&self, fetcher: &dyn JsonFetcher, symbol: &str) -> Result<f64, FeedError> {
        let value = fetcher
            .fetch(self.futures("/fapi/v1/openInterest").query("symbol", symbol))
            .await?;
        let oi: OpenInterestResponse = decode(value, "openInterest")?;
        Ok(oi.open_interest)
    }

    /// Futures klines, oldest first.
    pub async fn klines(
        &self,
        fetcher: &dyn JsonFetcher,
        symbol: &str,
        interval: &str,
        limit: u32,
    ) -> Result<Vec<Candle>, FeedError> {
        let value = fetcher
            .fetch(
                self.futures("/fapi/v1/klines")
                    .query("symbol", symbol)
                    .query("interval", interval)
                    .query("limit", limit),
            )
            .await?;
        let rows = value
            .as_array()
            .ok_or_else(|| FeedError::ParseError("klines: expected array".to_string()))?;
        rows.iter().map(parse_kline).collect()
    }

    /// Trading perpetual contracts quoted in `quote_asset`.
    pub async fn perpetual_symbols(
        &self,
        fetcher: &dyn JsonFetcher,
        quote_asset: &str,
    ) -> Result<Vec<String>, FeedError> {
        let value = fetcher.fetch(self.futures("/fapi/v1/exchangeInfo")).await?;
        let info: ExchangeInfo = decode(value, "exchangeInfo")?;
        let mut symbols: Vec<String> = info
            .symbols
            .into_iter()
            .filter(|s| s.contract_type == "PERPETUAL" && s.status == "TRADING")
            .filter(|s| quote_asset.is_empty() || s.quote_asset.eq_ignore_ascii_case(quote_asset))
            .map(|s| s.symbol)
            .collect();
        symbols.sort();
        Ok(symbols)
    }

    // --- signed account endpoints ---

    pub async fn futures_account(
        &self,
        fetcher: &dyn JsonFetcher,
        credentials: &Credentials,
        timestamp_ms: i64,
    ) -> Result<FuturesAccount, FeedError> {
        let request = sign_request(self.futures("/fapi/v2/account"), credentials, timestamp_ms);
        decode(fetcher.fetch(request).await?, "futures account")
    }

    /// Positions with a non-zero size.
    pub async fn position_risk(
        &self,
        fetcher: &dyn JsonFetcher,
        credentials: &Credentials,
        timestamp_ms: i64,
    ) -> Result<Vec<PositionRisk>, FeedError> {
        let request = sign_request(self.futures("/fapi/v2/positionRisk"), credentials, timestamp_ms);
        let positions: Vec<PositionRisk> = decode(fetcher.fetch(request).await?, "positionRisk")?;
        Ok(positions.into_iter().filter(PositionRisk::is_open).collect())
    }

    /// Spot balances with a non-zero total.
    pub async fn spot_account(
        &self,
        fetcher: &dyn JsonFetcher,
        credentials: &Credentials,
        timestamp_ms: i64,
    ) -> Result<Vec<SpotBalance>, FeedError> {
        let request = sign_request(self.spot("/api/v3/account"), credentials, timestamp_ms);
        let account: SpotAccount = decode(fetcher.fetch(request).await?, "spot account")?;
        Ok(account
            .balances
            .into_iter()
            .filter(|b| b.free > 0.0 || b.locked > 0.0)
            .collect())
    }

    /// Futures fills since `start_ms`, optionally restricted to one symbol.
    pub async fn user_trades(
        &self,
        fetcher: &dyn JsonFetcher,
        credentials: &Credentials,
        symbol: Option<&str>,
        start_ms: i64,
        timestamp_ms: i64,
    ) -> Result<Vec<UserTrade>, FeedError> {
        let mut request = self.futures("/fapi/v1/userTrades");
        if let Some(symbol) = symbol {
            request = request.query("symbol", symbol);
        }
        let request = sign_request(
            request.query("startTime", start_ms).query("limit", 1000),
            credentials,
            timestamp_ms,
        );
        decode(fetcher.fetch(request).await?, "userTrades")
    }
}
