//! Message formatting helpers shared by every monitor.

use chrono::{DateTime, FixedOffset, Utc};

/// Telegram rejects messages above 4096 characters; keep a margin.
pub const MAX_MESSAGE_LEN: usize = 4000;

/// Upper bound for the body of an error notification.
pub const ERROR_TEXT_LIMIT: usize = 500;

/// Escape text for Telegram's HTML parse mode.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

/// Cut `text` to at most `max` characters, marking the cut with "...".
pub fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let keep = max.saturating_sub(3);
    let mut out: String = text.chars().take(keep).collect();
    out.push_str("...");
    out
}

/// Cut one HTML line to at most `max` characters, marking the cut with "...".
///
/// Tags and entities are never cut, and tags left open at the cut are closed.
pub fn truncate_html(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }

    let mut out = String::new();
    let mut out_len = 0usize;
    let mut open: Vec<&str> = Vec::new();
    let mut closing = 0usize;

    for token in html_tokens(text) {
        let token_len = token.chars().count();
        let tag = tag_name(token);
        let closes_top = matches!(tag, Some((true, name)) if open.last() == Some(&name));
        let closing_after = match tag {
            Some((false, name)) => closing + name.len() + 3,
            Some((true, name)) if closes_top => closing - (name.len() + 3),
            _ => closing,
        };
        if out_len + token_len + closing_after + 3 > max {
            break;
        }
        match tag {
            Some((false, name)) => open.push(name),
            Some(_) if closes_top => {
                open.pop();
            }
            _ => {}
        }
        out.push_str(token);
        out_len += token_len;
        closing = closing_after;
    }

    out.push_str("...");
    for name in open.iter().rev() {
        out.push_str(&format!("</{}>", name));
    }
    out
}

/// Tags, entities and single characters, in order.
fn html_tokens(text: &str) -> Vec<&str> {
    let mut tokens = Vec::new();
    let mut rest = text;
    while let Some(c) = rest.chars().next() {
        let end = match c {
            '<' => rest.find('>').map_or(1, |i| i + 1),
            '&' => rest
                .find(';')
                .filter(|&i| i <= 10 && rest[1..i].chars().all(|c| c.is_ascii_alphanumeric() || c == '#'))
                .map_or(1, |i| i + 1),
            _ => c.len_utf8(),
        };
        tokens.push(&rest[..end]);
        rest = &rest[end..];
    }
    tokens
}

/// `(is_closing, name)` for a tag token.
fn tag_name(token: &str) -> Option<(bool, &str)> {
    let inner = token.strip_prefix('<')?.strip_suffix('>')?;
    let (closing, inner) = match inner.strip_prefix('/') {
        Some(rest) => (true, rest),
        None => (false, inner),
    };
    let end = inner
        .find(|c: char| !c.is_ascii_alphanumeric())
        .unwrap_or(inner.len());
    (end > 0).then(|| (closing, &inner[..end]))
}

struct Packer<'a> {
    header: &'a str,
    room: usize,
    parts: Vec<String>,
    current: String,
    current_len: usize,
}

impl Packer<'_> {
    fn push(&mut self, item: &str) {
        let item_len = item.chars().count();
        let sep = usize::from(!self.current.is_empty());
        if self.current_len + sep + item_len > self.room {
            self.flush();
        }
        if !self.current.is_empty() {
            self.current.push('\n');
            self.current_len += 1;
        }
        self.current.push_str(item);
        self.current_len += item_len;
    }

    fn flush(&mut self) {
        if !self.current.is_empty() {
            self.parts.push(format!("{}{}", self.header, self.current));
            self.current.clear();
            self.current_len = 0;
        }
    }
}

/// Split an alert into messages of at most `limit` characters.
///
/// Every part starts with `header`; items are joined with newlines and are
/// never split across parts. An item too large for a part on its own is
/// split at its line breaks, and a single line still too large is cut with
/// [`truncate_html`]. Tags must not span lines. Returns no parts when there
/// are no items.
pub fn split_message(header: &str, items: &[String], limit: usize) -> Vec<String> {
    let header_len = header.chars().count();
    let mut packer = Packer {
        header,
        room: limit.saturating_sub(header_len).max(1),
        parts: Vec::new(),
        current: String::new(),
        current_len: 0,
    };

    for item in items {
        if item.chars().count() > packer.room {
            packer.flush();
            for line in item.lines() {
                let line = truncate_html(line, packer.room);
                packer.push(&line);
            }
            packer.flush();
        } else {
            packer.push(item);
        }
    }

    packer.flush();
    packer.parts
}

/// Split free text at line boundaries.
pub fn split_text(text: &str, limit: usize) -> Vec<String> {
    let lines: Vec<String> = text.lines().map(str::to_string).collect();
    split_message("", &lines, limit)
}

/// Body of a best-effort error notification.
pub fn format_error(monitor: &str, error: &str) -> String {
    format!(
        "⚠️ <b>{}</b> check failed\n<pre>{}</pre>",
        escape_html(monitor),
        escape_html(&truncate_chars(error, ERROR_TEXT_LIMIT))
    )
}

/// Format price with appropriate precision based on magnitude.
pub fn format_price(price: f64) -> String {
    if price == 0.0 {
        return "0".to_string();
    }
    let abs_price = price.abs();
    if abs_price >= 1000.0 {
        format!("{:.2}", price)
    } else if abs_price >= 1.0 {
        format!("{:.4}", price)
    } else if abs_price >= 0.01 {
        format!("{:.6}", price)
    } else {
        format!("{:.8}", price)
    }
}

/// Signed percentage with two decimals, from a ratio (0.0125 -> "+1.25%").
pub fn format_ratio_pct(ratio: f64) -> String {
    format!("{:+.2}%", ratio * 100.0)
}

/// Human-readable large amount (1.23B, 45.60M, 7.89K).
pub fn format_amount(value: f64) -> String {
    let abs = value.abs();
    if abs >= 1e9 {
        format!("{:.2}B", value / 1e9)
    } else if abs >= 1e6 {
        format!("{:.2}M", value / 1e6)
    } else if abs >= 1e3 {
        format!("{:.2}K", value / 1e3)
    } else {
        format!("{:.2}", value)
    }
}

/// Epoch milliseconds rendered in UTC+8, the exchange's settlement zone.
pub fn format_time_utc8(ms: i64) -> String {
    let (Some(dt), Some(tz)) = (
        DateTime::<Utc>::from_timestamp_millis(ms),
        FixedOffset::east_opt(8 * 3600),
    ) else {
        return "-".to_string();
    };
    dt.with_timezone(&tz).format("%Y-%m-%d %H:%M (UTC+8)").to_string()
}

/// Current time footer for reports.
pub fn timestamp_footer() -> String {
    format!("⏰ {}", Utc::now().format("%Y-%m-%d %H:%M:%S UTC"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn items(n: usize, len: usize) -> Vec<String> {
        (0..n).map(|i| format!("{:0width$}", i, width = len)).collect()
    }

    #[test]
    fn test_split_keeps_every_item_once() {
        let items = items(50, 100);
        let parts = split_message("H\n", &items, 1000);
        assert!(parts.len() > 1);

        let mut seen = Vec::new();
        for part in &parts {
            assert!(part.chars().count() <= 1000);
            assert!(part.starts_with("H\n"));
            for line in part["H\n".len()..].lines() {
                seen.push(line.to_string());
            }
        }
        assert_eq!(seen, items);
    }

    #[test]
    fn test_split_oversize_item_sent_alone() {
        let items = vec!["a".to_string(), "b".repeat(50), "c".to_string()];
        let parts = split_message("", &items, 20);
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "a");
        assert_eq!(parts[1].chars().count(), 20);
        assert!(parts[1].ends_with("..."));
        assert_eq!(parts[2], "c");
    }

    fn balanced(part: &str) -> bool {
        ["b", "code", "i", "pre", "a"].iter().all(|tag| {
            let opens = part.matches(&format!("<{}>", tag)).count()
                + part.matches(&format!("<{} ", tag)).count();
            opens == part.matches(&format!("</{}>", tag)).count()
        })
    }

    #[test]
    fn test_split_large_html_item_at_lines() {
        let item: String = (0..40)
            .map(|i| format!("• <b>SYM{}USDT</b> <code>{:+.2}%</code>\n", i, i as f64 / 10.0))
            .collect();
        let parts = split_message("📈 <b>Report</b>\n", &[item.clone()], 300);
        assert!(parts.len() > 1);
        for part in &parts {
            assert!(part.chars().count() <= 300);
            assert!(balanced(part), "unbalanced part: {}", part);
        }
        let rejoined: Vec<&str> = parts
            .iter()
            .flat_map(|p| p["📈 <b>Report</b>\n".len()..].lines())
            .collect();
        assert_eq!(rejoined, item.lines().collect::<Vec<_>>());
    }

    #[test]
    fn test_truncate_html_closes_tags() {
        let line = format!("watchlist: <code>{}</code>", "BTCUSDT, ".repeat(100));
        let cut = truncate_html(&line, 60);
        assert!(cut.chars().count() <= 60);
        assert!(cut.ends_with("...</code>"));
        assert!(balanced(&cut));

        let entities = format!("<b>{}</b>", "&amp;".repeat(30));
        let cut = truncate_html(&entities, 20);
        assert_eq!(cut, "<b>&amp;&amp;...</b>");
    }

    #[test]
    fn test_split_text_long_line_stays_balanced() {
        let text = format!(
            "📊 <b>spike</b>\nwatchlist (500): <code>{}</code>\nstate: <code>sleeping</code>",
            "ABCUSDT, ".repeat(500)
        );
        let parts = split_text(&text, MAX_MESSAGE_LEN);
        assert!(parts.iter().all(|p| p.chars().count() <= MAX_MESSAGE_LEN && balanced(p)));
        assert!(parts.last().unwrap().ends_with("state: <code>sleeping</code>"));
    }

    #[test]
    fn test_split_empty_items() {
        assert!(split_message("header", &[], 100).is_empty());
    }

    #[test]
    fn test_split_exact_fit() {
        let items = vec!["12345".to_string(), "67890".to_string()];
        // 5 + newline + 5
        assert_eq!(split_message("", &items, 11), vec!["12345\n67890".to_string()]);
        assert_eq!(split_message("", &items, 10).len(), 2);
    }

    #[test]
    fn test_escape_and_error_bound() {
        assert_eq!(escape_html("<b>&\"</b>"), "&lt;b&gt;&amp;&quot;&lt;/b&gt;");
        let msg = format_error("funding", &"x".repeat(2000));
        assert!(msg.chars().count() < ERROR_TEXT_LIMIT + 100);
        assert!(msg.contains("<pre>"));
    }

    #[test]
    fn test_format_numbers() {
        assert_eq!(format_price(65000.123), "65000.12");
        assert_eq!(format_price(0.5), "0.500000");
        assert_eq!(format_ratio_pct(0.0125), "+1.25%");
        assert_eq!(format_ratio_pct(-0.003), "-0.30%");
        assert_eq!(format_amount(1_234_000_000.0), "1.23B");
        assert_eq!(format_amount(45_600.0), "45.60K");
    }

    #[test]
    fn test_utc8_time() {
        // 2023-11-14 22:13:20 UTC
        assert_eq!(format_time_utc8(1_700_000_000_000), "2023-11-15 06:13 (UTC+8)");
    }
}
