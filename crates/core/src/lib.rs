//! Core types for the market monitor.
//!
//! - `config` - per-monitor configuration and monitor kinds
//! - `settings` - declared, runtime-mutable settings schema
//! - `watchlist` - optional explicit instrument subset
//! - `backoff` - retry delay policy for monitor loops
//! - `error` - shared error taxonomy

pub mod backoff;
pub mod config;
pub mod error;
pub mod market;
pub mod settings;
pub mod watchlist;

pub use backoff::*;
pub use config::*;
pub use error::*;
pub use market::*;
pub use settings::*;
pub use watchlist::*;
