//! Monitoring engine.
//!
//! Concrete monitors, the per-monitor polling loop and the supervisor that
//! owns them and answers chat commands.

pub mod chart;
pub mod control;
pub mod factory;
pub mod gate;
pub mod monitor;
pub mod monitors;
pub mod runner;
pub mod supervisor;

#[cfg(test)]
pub(crate) mod testing;

pub use chart::{ChartRenderer, SvgCandleChart};
pub use control::{parse_config_command, ConfigAction, CONFIG_USAGE};
pub use factory::{http_session_factory, MonitorConstructor, MonitorFactory, SessionFactory};
pub use gate::AlertGate;
pub use monitor::{CheckOutcome, Monitor, MonitorContext, MonitorCore};
pub use monitors::{
    FundingRateMonitor, OpenInterestMonitor, PositionMonitor, PriceSpikeMonitor, SocialPostMonitor,
    SpotVolumeMonitor,
};
pub use runner::{spawn, LoopState, MonitorHandle};
pub use supervisor::MonitorSupervisor;
