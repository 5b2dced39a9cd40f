//! subguard library crate.
//!
//! Watches subreddits for new submissions, deduplicates them against a
//! persistent seen set, routes each one to a decision handler, and sends
//! author messages through a single rate-limited dispatcher.

pub mod api;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod monitor;
pub mod panic_hook;
pub mod seen;
pub mod services;
pub mod signals;
pub mod utils;

pub use error::{Error, Result};
