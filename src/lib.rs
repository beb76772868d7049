//! Telegram music relay
//!
//! Scans channel histories for music files (voice notes excluded), organizes
//! the finds into fixed-size batches and forwards a selected batch to a
//! target bot, one file at a time, with pause/resume/cancel control.

pub mod batches;
pub mod bot;
pub mod chat;
pub mod classifier;
pub mod commands;
pub mod config;
pub mod error;
pub mod forward;
pub mod paginator;
pub mod registry;
pub mod session;
pub mod transport;

pub use config::Config;
pub use error::{Error, Result};
