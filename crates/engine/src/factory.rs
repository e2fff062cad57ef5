//! Kind to constructor table.

use std::collections::HashMap;
use std::sync::Arc;

use monitor_core::{MonitorConfig, MonitorError, MonitorKind, MonitorResult};
use monitor_feeds::{HttpSession, JsonFetcher, SessionConfig};

use crate::monitor::Monitor;
use crate::monitors::{
    FundingRateMonitor, OpenInterestMonitor, PositionMonitor, PriceSpikeMonitor, SocialPostMonitor,
    SpotVolumeMonitor,
};

pub type MonitorConstructor = fn(&MonitorConfig) -> MonitorResult<Arc<dyn Monitor>>;

/// Builds the HTTP session a monitor will own.
pub type SessionFactory = Arc<dyn Fn(&MonitorConfig) -> Arc<dyn JsonFetcher> + Send + Sync>;

/// One lazily connected [`HttpSession`] per monitor, honouring its proxy.
pub fn http_session_factory() -> SessionFactory {
    Arc::new(|config: &MonitorConfig| {
        let session = SessionConfig::new(config.name.clone()).with_proxy(config.proxy.clone());
        Arc::new(HttpSession::new(session)) as Arc<dyn JsonFetcher>
    })
}

pub struct MonitorFactory {
    constructors: HashMap<MonitorKind, MonitorConstructor>,
}

impl Default for MonitorFactory {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl MonitorFactory {
    /// Empty table.
    pub fn new() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// Table with every built-in monitor.
    pub fn with_defaults() -> Self {
        Self::new()
            .register(MonitorKind::FundingRate, FundingRateMonitor::build)
            .register(MonitorKind::OpenInterest, OpenInterestMonitor::build)
            .register(MonitorKind::PriceSpike, PriceSpikeMonitor::build)
            .register(MonitorKind::SpotVolume, SpotVolumeMonitor::build)
            .register(MonitorKind::SocialPost, SocialPostMonitor::build)
            .register(MonitorKind::AccountPosition, PositionMonitor::build)
    }

    pub fn register(mut self, kind: MonitorKind, constructor: MonitorConstructor) -> Self {
        self.constructors.insert(kind, constructor);
        self
    }

    pub fn supports(&self, kind: MonitorKind) -> bool {
        self.constructors.contains_key(&kind)
    }

    pub fn build(&self, config: &MonitorConfig) -> MonitorResult<Arc<dyn Monitor>> {
        config.validate()?;
        let constructor = self
            .constructors
            .get(&config.kind)
            .ok_or_else(|| MonitorError::Construction {
                monitor: config.name.clone(),
                reason: format!("no constructor registered for {}", config.kind),
            })?;
        constructor(config)
    }
}
