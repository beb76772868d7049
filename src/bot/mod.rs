//! Telegram bot front end.
//!
//! One dispatcher serves every user; per-user scan and forward state lives in
//! the shared [`SessionRegistry`]. Handlers never hold the registry lock
//! across delays, only across single operations on it.

pub mod handlers;
pub mod keyboard;

use std::sync::Arc;

use anyhow::{bail, Result};
use teloxide::dispatching::UpdateFilterExt;
use teloxide::prelude::*;
use tokio::sync::Mutex;
use tracing::info;

use crate::config::Config;
use crate::registry::SessionRegistry;

/// Shared state injected into every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub registry: Arc<Mutex<SessionRegistry>>,
}

/// Run the bot until interrupted.
pub async fn run(config: Config) -> Result<()> {
    if config.bot_token.is_empty() {
        bail!("bot token is not configured (BOT_TOKEN or telegram.bot_token)");
    }
    if config.target_bot.is_empty() {
        bail!("target bot is not configured (TARGET_BOT or relay.target_bot)");
    }

    let bot = Bot::new(config.bot_token.clone());
    let state = AppState {
        config,
        registry: Arc::new(Mutex::new(SessionRegistry::new())),
    };

    info!("starting music relay bot");

    let handler = teloxide::dptree::entry()
        .branch(Update::filter_message().endpoint(handlers::handle_message))
        .branch(Update::filter_callback_query().endpoint(handlers::handle_callback));

    Dispatcher::builder(bot, handler)
        .dependencies(teloxide::dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}
