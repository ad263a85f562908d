//! Ports between the bot manager and a messaging platform (Telegram today).

pub mod port;
pub mod types;
