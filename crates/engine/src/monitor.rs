//! The monitor contract and the state every monitor shares.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use monitor_alerts::{escape_html, Notifier};
use monitor_core::{
    ChatTarget, MonitorConfig, MonitorError, MonitorKind, MonitorResult, SettingValue, Settings,
    Watchlist,
};
use monitor_feeds::JsonFetcher;
use serde_json::Value;
use tracing::{info, warn};

/// What a monitor needs from the outside world during a check.
#[derive(Clone)]
pub struct MonitorContext {
    pub notifier: Arc<dyn Notifier>,
    pub session: Arc<dyn JsonFetcher>,
    pub target: ChatTarget,
}

/// Result of one detection cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CheckOutcome {
    /// Alert items emitted this cycle.
    pub alerts: usize,
}

impl CheckOutcome {
    pub fn quiet() -> Self {
        Self::default()
    }

    pub fn alerted(alerts: usize) -> Self {
        Self { alerts }
    }
}

/// Watchlist items shown by `/status` before abbreviating.
const STATUS_WATCHLIST_LIMIT: usize = 50;

/// Lock a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Name, target, settings and watchlist of one monitor.
///
/// Locks are synchronous and never held across an await; monitors take a
/// snapshot at the start of each cycle.
pub struct MonitorCore {
    name: String,
    kind: MonitorKind,
    target: ChatTarget,
    settings: RwLock<Settings>,
    watchlist: RwLock<Watchlist>,
}

impl MonitorCore {
    /// Build the core from a config entry and the monitor's declared schema.
    ///
    /// A `watchlist` parameter seeds the watchlist; other parameters must match
    /// declared settings (unknown ones are logged and ignored).
    pub fn new(config: &MonitorConfig, schema: Settings) -> MonitorResult<Self> {
        let mut settings = schema;
        let mut params = config.params.clone();

        let watchlist = match params.remove("watchlist") {
            None | Some(Value::Null) => Watchlist::new(),
            Some(Value::Array(items)) => {
                Watchlist::from_items(items.iter().filter_map(|v| v.as_str().map(str::to_string)))
            }
            Some(Value::String(items)) => Watchlist::from_items(items.split(',').map(str::to_string)),
            Some(other) => {
                return Err(MonitorError::Construction {
                    monitor: config.name.clone(),
                    reason: format!("watchlist must be a list, got {}", other),
                })
            }
        };

        let unknown = settings
            .apply_json(&params)
            .map_err(|e| MonitorError::Construction {
                monitor: config.name.clone(),
                reason: e.to_string(),
            })?;
        for key in unknown {
            warn!(monitor = %config.name, key = %key, "Ignoring unknown config key");
        }

        Ok(Self {
            name: config.name.clone(),
            kind: config.kind,
            target: config.target,
            settings: RwLock::new(settings),
            watchlist: RwLock::new(watchlist),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> MonitorKind {
        self.kind
    }

    pub fn target(&self) -> ChatTarget {
        self.target
    }

    /// Copy of the current settings.
    pub fn settings(&self) -> Settings {
        self.settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Copy of the current watchlist.
    pub fn watchlist(&self) -> Watchlist {
        self.watchlist
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn enabled(&self) -> bool {
        self.settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .enabled()
    }

    pub fn interval(&self) -> Duration {
        let secs = self
            .settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .interval_secs();
        Duration::from_secs(secs)
    }

    /// Coerce and store one setting; visible to the next cycle.
    pub fn update_setting(&self, key: &str, raw: &str) -> MonitorResult<SettingValue> {
        let mut settings = self.settings.write().unwrap_or_else(PoisonError::into_inner);
        let value = settings.set_raw(key, raw)?;
        info!(monitor = %self.name, key = key, "Setting updated");
        Ok(value)
    }

    pub fn watchlist_add(&self, item: &str) -> MonitorResult<String> {
        let item = item.trim();
        if item.is_empty() {
            return Err(MonitorError::InvalidCommand("watchlist item must not be empty".into()));
        }
        let mut watchlist = self.watchlist.write().unwrap_or_else(PoisonError::into_inner);
        let added = watchlist.add(item);
        let item = escape_html(&item.to_uppercase());
        Ok(if added {
            format!(
                "✅ Added <code>{}</code> to <b>{}</b> watchlist ({} items)",
                item,
                escape_html(&self.name),
                watchlist.len()
            )
        } else {
            format!("ℹ️ <code>{}</code> is already watched by <b>{}</b>", item, escape_html(&self.name))
        })
    }

    pub fn watchlist_remove(&self, item: &str) -> MonitorResult<String> {
        let mut watchlist = self.watchlist.write().unwrap_or_else(PoisonError::into_inner);
        let removed = watchlist.remove(item);
        let item = escape_html(&item.trim().to_uppercase());
        Ok(if removed {
            let rest = if watchlist.is_empty() {
                "now watching all instruments".to_string()
            } else {
                format!("{} items left", watchlist.len())
            };
            format!(
                "✅ Removed <code>{}</code> from <b>{}</b> watchlist ({})",
                item,
                escape_html(&self.name),
                rest
            )
        } else {
            format!("ℹ️ <code>{}</code> is not in the <b>{}</b> watchlist", item, escape_html(&self.name))
        })
    }

    /// Settings and watchlist as HTML lines; long watchlists are abbreviated.
    pub fn render_status(&self, details: &[String]) -> String {
        let settings = self.settings();
        let watchlist = self.watchlist();

        let mut out = format!(
            "📊 <b>{}</b> ({})\n",
            escape_html(&self.name),
            self.kind
        );
        for (key, value) in settings.render() {
            out.push_str(&format!("{}: <code>{}</code>\n", key, escape_html(&value)));
        }
        if watchlist.is_full_universe() {
            out.push_str("watchlist: <code>all</code>\n");
        } else {
            let items: Vec<&str> = watchlist.iter().take(STATUS_WATCHLIST_LIMIT).collect();
            let more = watchlist.len().saturating_sub(items.len());
            out.push_str(&format!(
                "watchlist ({}): <code>{}</code>",
                watchlist.len(),
                escape_html(&items.join(", "))
            ));
            if more > 0 {
                out.push_str(&format!(" +{} more", more));
            }
            out.push('\n');
        }
        for line in details {
            out.push_str(line);
            out.push('\n');
        }
        out.trim_end().to_string()
    }
}

/// Contract implemented by every concrete monitor.
#[async_trait]
pub trait Monitor: Send + Sync {
    fn core(&self) -> &MonitorCore;

    fn name(&self) -> &str {
        self.core().name()
    }

    fn kind(&self) -> MonitorKind {
        self.core().kind()
    }

    /// One detection cycle. Empty upstream results are not errors.
    async fn check(&self, ctx: &MonitorContext) -> MonitorResult<CheckOutcome>;

    /// Extra status lines beyond settings and watchlist.
    fn status_details(&self) -> Vec<String> {
        Vec::new()
    }

    /// Human-readable status; safe to call while a check is in flight.
    fn status(&self) -> String {
        self.core().render_status(&self.status_details())
    }

    /// Set `key` from its textual form.
    fn update_config(&self, key: &str, raw: &str) -> MonitorResult<String> {
        let value = self.core().update_setting(key, raw)?;
        let shown = self
            .core()
            .settings()
            .render_one(key)
            .unwrap_or_else(|| value.to_string());
        Ok(format!(
            "✅ <b>{}</b>: <code>{}</code> set to <code>{}</code>",
            escape_html(self.name()),
            escape_html(key),
            escape_html(&shown)
        ))
    }

    fn add_to_watchlist(&self, _item: &str) -> MonitorResult<String> {
        Err(MonitorError::Unsupported {
            monitor: self.name().to_string(),
            operation: "watchlist changes",
        })
    }

    fn remove_from_watchlist(&self, _item: &str) -> MonitorResult<String> {
        Err(MonitorError::Unsupported {
            monitor: self.name().to_string(),
            operation: "watchlist changes",
        })
    }

    /// On-demand run requested from chat.
    async fn manual_check(&self, ctx: &MonitorContext, _args: &str) -> MonitorResult<String> {
        let outcome = self.check(ctx).await?;
        Ok(match outcome.alerts {
            0 => format!("✅ <b>{}</b>: check finished, nothing to report", escape_html(self.name())),
            n => format!("✅ <b>{}</b>: check finished, {} alert(s) sent", escape_html(self.name()), n),
        })
    }
}

/// Build-time helper: reject settings that must be present.
pub(crate) fn require_text(core: &MonitorCore, key: &str) -> MonitorResult<()> {
    if core.settings().get_text(key).trim().is_empty() {
        return Err(MonitorError::Construction {
            monitor: core.name().to_string(),
            reason: format!("`{}` is required", key),
        });
    }
    Ok(())
}
