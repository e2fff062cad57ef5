//! Market data types shared by decoders, monitors and chart rendering.

use serde::{Deserialize, Serialize};

/// One OHLC candle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Open time in milliseconds since the epoch.
    pub open_time_ms: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    /// High-low range relative to the low.
    pub fn amplitude(&self) -> f64 {
        if self.low > 0.0 {
            (self.high - self.low) / self.low
        } else {
            0.0
        }
    }

    pub fn is_bullish(&self) -> bool {
        self.close >= self.open
    }
}

/// Relative change from `from` to `to`, zero when `from` is not positive.
pub fn ratio_change(from: f64, to: f64) -> f64 {
    if from > 0.0 {
        (to - from) / from
    } else {
        0.0
    }
}

/// Open of the first candle to close of the last, in percent.
pub fn window_change_pct(candles: &[Candle]) -> f64 {
    match (candles.first(), candles.last()) {
        (Some(first), Some(last)) if candles.len() >= 2 => ratio_change(first.open, last.close) * 100.0,
        _ => 0.0,
    }
}
