//! Upstream data access for the monitors.
//!
//! ## Architecture
//!
//! - `rest` - `JsonFetcher` trait and the pooled `HttpSession`
//! - `binance` - futures/spot market data and signed account endpoints
//! - `twitter` - recent posts of an account
//! - `signing` - HMAC-SHA256 request signing

pub mod binance;
pub mod error;
pub mod rest;
pub mod signing;
pub mod twitter;

pub use binance::*;
pub use error::*;
pub use rest::*;
pub use signing::{Credentials, API_KEY_HEADER};
pub use twitter::{Post, TwitterApi};
