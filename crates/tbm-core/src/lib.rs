//! Core of the multi-bot manager.
//!
//! This crate is intentionally framework-agnostic. The Telegram client lives
//! behind the ports in `messaging::port`, implemented in adapter crates.

pub mod config;
pub mod domain;
pub mod errors;
pub mod logging;
pub mod manager;
pub mod messaging;
pub mod pipeline;
pub mod session;

#[cfg(test)]
mod testing;

pub use errors::{Error, Result};
pub use manager::{BotInstance, BotManager, ManagerConfig};
