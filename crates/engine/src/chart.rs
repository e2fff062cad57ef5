//! Candle chart rendering.

use std::fmt::Write as _;

use monitor_alerts::{escape_html, ChartImage};
use monitor_core::Candle;

/// Pure `(title, candles) -> image` renderer.
pub trait ChartRenderer: Send + Sync {
    /// Returns `None` when there is nothing to draw.
    fn render(&self, title: &str, candles: &[Candle]) -> Option<ChartImage>;
}

/// Dependency-free SVG candlestick chart.
#[derive(Debug, Clone)]
pub struct SvgCandleChart {
    pub width: u32,
    pub height: u32,
}

impl Default for SvgCandleChart {
    fn default() -> Self {
        Self {
            width: 600,
            height: 300,
        }
    }
}

const MARGIN: f64 = 30.0;
const UP: &str = "#26a69a";
const DOWN: &str = "#ef5350";

impl ChartRenderer for SvgCandleChart {
    fn render(&self, title: &str, candles: &[Candle]) -> Option<ChartImage> {
        if candles.is_empty() {
            return None;
        }

        let low = candles.iter().map(|c| c.low).fold(f64::INFINITY, f64::min);
        let high = candles.iter().map(|c| c.high).fold(f64::NEG_INFINITY, f64::max);
        if !low.is_finite() || !high.is_finite() {
            return None;
        }
        let span = if high > low { high - low } else { 1.0 };

        let width = f64::from(self.width);
        let height = f64::from(self.height);
        let plot_h = height - 2.0 * MARGIN;
        let step = (width - 2.0 * MARGIN) / candles.len() as f64;
        let body_w = (step * 0.6).max(1.0);
        let y = |price: f64| MARGIN + (high - price) / span * plot_h;

        let mut svg = String::new();
        let _ = write!(
            svg,
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}">"#,
            w = self.width,
            h = self.height
        );
        let _ = write!(svg, r##"<rect width="100%" height="100%" fill="#ffffff"/>"##);
        let _ = write!(
            svg,
            r#"<text x="{}" y="18" font-family="sans-serif" font-size="14">{}</text>"#,
            MARGIN,
            escape_html(title)
        );

        for (i, candle) in candles.iter().enumerate() {
            let color = if candle.is_bullish() { UP } else { DOWN };
            let cx = MARGIN + step * (i as f64 + 0.5);
            let top = y(candle.open.max(candle.close));
            let bottom = y(candle.open.min(candle.close));
            let _ = write!(
                svg,
                r#"<line x1="{cx:.1}" y1="{:.1}" x2="{cx:.1}" y2="{:.1}" stroke="{color}"/>"#,
                y(candle.high),
                y(candle.low),
            );
            let _ = write!(
                svg,
                r#"<rect x="{:.1}" y="{:.1}" width="{:.1}" height="{:.1}" fill="{color}"/>"#,
                cx - body_w / 2.0,
                top,
                body_w,
                (bottom - top).max(1.0),
            );
        }

        let _ = write!(
            svg,
            r#"<text x="{}" y="{:.1}" font-family="sans-serif" font-size="11">{:.4}</text>"#,
            width - MARGIN,
            MARGIN,
            high
        );
        let _ = write!(
            svg,
            r#"<text x="{}" y="{:.1}" font-family="sans-serif" font-size="11">{:.4}</text>"#,
            width - MARGIN,
            height - MARGIN,
            low
        );
        svg.push_str("</svg>");

        let file_name: String = title
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        Some(ChartImage::new(svg.into_bytes(), format!("{}.svg", file_name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(open: f64, close: f64) -> Candle {
        Candle {
            open_time_ms: 0,
            open,
            high: open.max(close) + 1.0,
            low: open.min(close) - 1.0,
            close,
            volume: 1.0,
        }
    }

    #[test]
    fn test_empty_series_renders_nothing() {
        assert!(SvgCandleChart::default().render("X", &[]).is_none());
    }

    #[test]
    fn test_renders_one_body_per_candle() {
        let candles = vec![candle(10.0, 12.0), candle(12.0, 11.0), candle(11.0, 11.0)];
        let image = SvgCandleChart::default().render("BTC <1m>", &candles).unwrap();
        let svg = String::from_utf8(image.bytes).unwrap();

        assert_eq!(image.file_name, "BTC__1m_.svg");
        assert!(svg.starts_with("<svg"));
        assert!(svg.ends_with("</svg>"));
        assert!(svg.contains("BTC &lt;1m&gt;"));
        assert_eq!(svg.matches("<line").count(), 3);
        assert_eq!(svg.matches(UP).count(), 4);
        assert_eq!(svg.matches(DOWN).count(), 2);
    }
}
