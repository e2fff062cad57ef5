//! Telegram side of the market monitor.
//!
//! This crate provides:
//! - the `Notifier` contract and its teloxide implementation
//! - alert formatting and splitting under the message size ceiling
//! - the inbound command router

pub mod format;
pub mod notifier;
pub mod router;
pub mod telegram;

pub use format::*;
pub use notifier::{ChartImage, Notifier, NotifyError};
pub use router::{handle_command, Command, CommandHandler, CommandRouter};
pub use telegram::TelegramNotifier;
