//! Message and callback handlers plus the forward driver loop.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use teloxide::prelude::*;
use teloxide::types::{CallbackQuery, Message};
use tokio::sync::{watch, Mutex};
use tracing::{info, warn};

use crate::batches::{batch_summary, progress_line};
use crate::bot::keyboard::{
    batch_keyboard, cancel_keyboard, continue_fetch_keyboard, forward_control_keyboard,
    main_keyboard, HELP_BUTTON, SCAN_BUTTON, STATUS_BUTTON,
};
use crate::bot::AppState;
use crate::chat::resolve_channel;
use crate::error::Error;
use crate::forward::{DelayCause, ForwardConfig, ForwardState, StepOutcome};
use crate::paginator::{fetch_music, PaginatorConfig};
use crate::registry::{SessionRegistry, UserSession};
use crate::session::get_client;
use crate::transport::ChannelTransport;

const WELCOME_TEXT: &str = "👋 Hi! I collect music from Telegram channels and \
forward it in batches.\n\nSend me a channel (@name or t.me link), optionally \
followed by how many messages to scan.";

const HELP_TEXT: &str = "🎵 How it works:\n\n\
1. Send a channel: @channel_name or https://t.me/channel_name\n\
2. Optionally add a message limit: @channel_name 300\n\
3. I scan the history and split the music into batches\n\
4. Pick a batch and I forward it file by file\n\n\
Voice notes are skipped, only real music files are collected.\n\
You can pause, resume or cancel forwarding at any time.";

const EXPIRED_SESSION_TEXT: &str = "⚠️ The Telegram session has expired.\n\n\
Run `cargo run --bin init_session` on the server and try again.";

const NO_SESSION_TEXT: &str = "You have no active scan. Send a channel to start one.";

/// Edit the scan progress message at most once per this interval.
const PROGRESS_EDIT_INTERVAL: Duration = Duration::from_secs(5);

/// Refresh the forwarding status message every this many sent files.
const FORWARD_EDIT_EVERY: usize = 10;

pub async fn handle_message(bot: Bot, msg: Message, state: AppState) -> Result<()> {
    let Some(text) = msg.text() else {
        return Ok(());
    };
    let user = msg.from().context("no user in message")?;
    let user_id = user.id.0 as i64;
    let chat_id = msg.chat.id;

    match text {
        "/start" => {
            bot.send_message(chat_id, WELCOME_TEXT)
                .reply_markup(main_keyboard())
                .await?;
        }
        "/help" | HELP_BUTTON => {
            bot.send_message(chat_id, HELP_TEXT).await?;
        }
        "/status" | STATUS_BUTTON => {
            let handle = state.registry.lock().await.get(user_id);
            let text = match handle {
                Some(handle) => status_text(&*handle.lock().await),
                None => NO_SESSION_TEXT.to_string(),
            };
            bot.send_message(chat_id, text).await?;
        }
        SCAN_BUTTON => {
            bot.send_message(
                chat_id,
                "Send the channel to scan: @name or t.me link, optionally \
                 followed by a message limit (for example `@my_channel 300`).",
            )
            .await?;
        }
        _ if text.starts_with('/') => {
            bot.send_message(chat_id, "Unknown command. Try /help.")
                .await?;
        }
        _ => {
            start_scan(&bot, chat_id, user_id, text, &state).await?;
        }
    }

    Ok(())
}

pub async fn handle_callback(bot: Bot, query: CallbackQuery, state: AppState) -> Result<()> {
    let user_id = query.from.id.0 as i64;
    let Some(message) = &query.message else {
        bot.answer_callback_query(query.id.clone()).await?;
        return Ok(());
    };
    let chat_id = message.chat.id;
    let data = query.data.clone().unwrap_or_default();

    bot.answer_callback_query(query.id.clone()).await?;

    if let Some(index) = data.strip_prefix("batch_").and_then(|s| s.parse::<usize>().ok()) {
        return select_and_forward(&bot, chat_id, user_id, index, &state).await;
    }

    match data.as_str() {
        "pause" => {
            let handle = state.registry.lock().await.get(user_id);
            let paused = match handle {
                Some(handle) => {
                    let mut session = handle.lock().await;
                    session.forward.pause();
                    Some((
                        session.forward.batch_index(),
                        session.forward.progress(),
                        session.batch_count(),
                    ))
                }
                None => None,
            };
            match paused {
                Some((batch, (sent, total), batch_count)) => {
                    bot.send_message(
                        chat_id,
                        format!("⏸ Paused batch {} at {}/{}", batch, sent, total),
                    )
                    .reply_markup(forward_control_keyboard(batch, batch_count))
                    .await?;
                }
                None => {
                    bot.send_message(chat_id, NO_SESSION_TEXT).await?;
                }
            }
        }
        "resume" => {
            let handle = state.registry.lock().await.get(user_id);
            let resumed = match handle {
                Some(handle) => handle.lock().await.forward.resume(),
                None => false,
            };
            if resumed {
                // If the previous driver loop is still alive (for example
                // sleeping out a flood wait), the spawn claims nothing and
                // the old loop simply carries on.
                spawn_forward_loop(bot.clone(), chat_id, user_id, state.registry.clone());
            } else {
                bot.send_message(chat_id, "Nothing to resume.").await?;
            }
        }
        "cancel" => {
            // Eviction also drops the session's Telegram connection once the
            // running sweep observes the flag and lets go of its handle.
            let removed = state.registry.lock().await.remove(user_id);
            let existed = removed.is_some();
            if let Some(handle) = removed {
                handle.lock().await.request_cancel();
            }
            let text = if existed {
                "❌ Cancelled. Send a channel to start over."
            } else {
                NO_SESSION_TEXT
            };
            bot.send_message(chat_id, text)
                .reply_markup(main_keyboard())
                .await?;
        }
        "continue_fetch" => {
            run_fetch_round(&bot, chat_id, user_id, &state).await?;
        }
        "show_batches" => {
            show_batches(&bot, chat_id, user_id, &state).await?;
        }
        "status" => {
            let handle = state.registry.lock().await.get(user_id);
            let text = match handle {
                Some(handle) => status_text(&*handle.lock().await),
                None => NO_SESSION_TEXT.to_string(),
            };
            bot.send_message(chat_id, text).await?;
        }
        other => {
            warn!(data = other, "unrecognized callback data");
        }
    }

    Ok(())
}

/// Parse "channel [limit]" user input. The limit, when present, must be a
/// positive integer.
pub fn parse_channel_input(text: &str) -> std::result::Result<(String, Option<usize>), String> {
    let mut parts = text.split_whitespace();
    let channel = match parts.next() {
        Some(c) => c.to_string(),
        None => return Err("Send a channel: @name or t.me link.".to_string()),
    };

    let limit = match parts.next() {
        None => None,
        Some(raw) => match raw.parse::<usize>() {
            Ok(0) => {
                return Err("The message limit must be greater than zero.".to_string());
            }
            Ok(n) => Some(n),
            Err(_) => {
                return Err(format!(
                    "'{}' is not a number. Use: @channel_name 300",
                    raw
                ));
            }
        },
    };

    if parts.next().is_some() {
        return Err("Too many words. Use: @channel_name or @channel_name 300".to_string());
    }

    Ok((channel, limit))
}

/// Connect, resolve the channel and the target bot, register a fresh session
/// and run the first fetch round.
async fn start_scan(
    bot: &Bot,
    chat_id: ChatId,
    user_id: i64,
    text: &str,
    state: &AppState,
) -> Result<()> {
    let (channel, limit) = match parse_channel_input(text) {
        Ok(parsed) => parsed,
        Err(reason) => {
            bot.send_message(chat_id, reason).await?;
            return Ok(());
        }
    };

    bot.send_message(chat_id, format!("🔍 Connecting to {}...", channel))
        .await?;

    let client = match get_client().await {
        Ok(client) => client,
        Err(err) => {
            warn!(error = %err, "could not open Telegram session");
            bot.send_message(chat_id, EXPIRED_SESSION_TEXT).await?;
            return Ok(());
        }
    };

    let source = match resolve_channel(&client, &channel).await {
        Ok(peer) => peer,
        Err(err) => {
            warn!(channel = %channel, error = %err, "channel resolution failed");
            bot.send_message(
                chat_id,
                format!("❌ Could not find channel {}. Check the name and try again.", channel),
            )
            .await?;
            return Ok(());
        }
    };

    let target = match resolve_channel(&client, &state.config.target_bot).await {
        Ok(peer) => peer,
        Err(err) => {
            warn!(target = %state.config.target_bot, error = %err, "target bot resolution failed");
            bot.send_message(
                chat_id,
                format!("❌ Could not resolve the target bot {}.", state.config.target_bot),
            )
            .await?;
            return Ok(());
        }
    };

    let overall_limit = limit.unwrap_or(state.config.max_messages);
    info!(user_id, channel = %channel, limit = overall_limit, "scan started");

    let session = UserSession::new(
        channel,
        Arc::new(ChannelTransport::new(client, source, target)),
        Some(overall_limit),
        state.config.round_limit,
        state.config.batch_size,
        ForwardConfig::default(),
    );

    // Stop any leftover activity of a replaced session before it drops.
    if let Some(old) = state.registry.lock().await.remove(user_id) {
        old.lock().await.request_cancel();
    }
    state.registry.lock().await.insert(user_id, session);

    run_fetch_round(bot, chat_id, user_id, state).await
}

/// One pagination round for the user's session, with a live progress message.
async fn run_fetch_round(
    bot: &Bot,
    chat_id: ChatId,
    user_id: i64,
    state: &AppState,
) -> Result<()> {
    let Some(handle) = state.registry.lock().await.get(user_id) else {
        bot.send_message(chat_id, NO_SESSION_TEXT).await?;
        return Ok(());
    };

    let (transport, cursor, budget, cancel_flag) = {
        let session = handle.lock().await;
        match session.next_round_budget() {
            Some(budget) => (
                session.transport.clone(),
                session.cursor(),
                budget,
                session.cancel_flag(),
            ),
            None => {
                drop(session);
                bot.send_message(chat_id, "🏁 The scan limit has been reached.")
                    .await?;
                return show_batches(bot, chat_id, user_id, state).await;
            }
        }
    };

    let progress_msg = bot
        .send_message(chat_id, progress_line(budget, 0))
        .reply_markup(cancel_keyboard())
        .await?;
    let progress_id = progress_msg.id;

    // The fetch reports progress through a watch channel; a side task turns
    // it into throttled message edits.
    let (tx, mut rx) = watch::channel((budget, 0usize));
    let editor_bot = bot.clone();
    let editor = tokio::spawn(async move {
        loop {
            if rx.changed().await.is_err() {
                break;
            }
            tokio::time::sleep(PROGRESS_EDIT_INTERVAL).await;
            let (total, processed) = *rx.borrow_and_update();
            let _ = editor_bot
                .edit_message_text(chat_id, progress_id, progress_line(total, processed))
                .await;
        }
    });

    let config = PaginatorConfig::default();
    let report = fetch_music(
        transport.as_ref(),
        cursor,
        budget,
        &config,
        || cancel_flag.load(Ordering::Relaxed),
        |total, processed| {
            let _ = tx.send((total, processed));
        },
    )
    .await;
    drop(tx);
    editor.abort();

    let report = match report {
        Ok(report) => report,
        Err(Error::AuthorizationRequired) => {
            state.registry.lock().await.remove(user_id);
            bot.edit_message_text(chat_id, progress_id, EXPIRED_SESSION_TEXT)
                .await?;
            return Ok(());
        }
        Err(err) => return Err(err.into()),
    };

    // The round only counts if this very session is still registered; a
    // cancel or a replacing scan makes the result moot.
    let current = state.registry.lock().await.get(user_id);
    let absorbed = match current {
        Some(current) if Arc::ptr_eq(&current, &handle) => {
            let mut session = handle.lock().await;
            let new_files = session.absorb(&report);
            Some((
                new_files,
                session.files().len(),
                session.processed_total(),
                session.has_more() && session.next_round_budget().is_some(),
            ))
        }
        _ => None,
    };

    let Some((new_files, found_total, processed_total, can_continue)) = absorbed else {
        bot.edit_message_text(chat_id, progress_id, "❌ Cancelled.")
            .await?;
        return Ok(());
    };

    info!(user_id, new_files, found_total, processed_total, "fetch round finished");

    if can_continue {
        bot.edit_message_text(
            chat_id,
            progress_id,
            format!(
                "🎵 Found {} music files so far ({} messages processed).\n\
                 Older messages remain in the channel.",
                found_total, processed_total
            ),
        )
        .reply_markup(continue_fetch_keyboard())
        .await?;
        return Ok(());
    }

    if found_total == 0 {
        let mut registry = state.registry.lock().await;
        let still_ours = registry
            .get(user_id)
            .map(|current| Arc::ptr_eq(&current, &handle))
            .unwrap_or(false);
        if still_ours {
            registry.remove(user_id);
        }
        drop(registry);
        bot.edit_message_text(chat_id, progress_id, "😔 No music files found in this channel.")
            .await?;
        return Ok(());
    }

    let (summary, batch_count) = {
        let session = handle.lock().await;
        (batch_summary(&session.batches()), session.batch_count())
    };
    bot.edit_message_text(chat_id, progress_id, summary)
        .reply_markup(batch_keyboard(batch_count))
        .await?;
    Ok(())
}

async fn show_batches(bot: &Bot, chat_id: ChatId, user_id: i64, state: &AppState) -> Result<()> {
    let handle = state.registry.lock().await.get(user_id);
    let summary = match handle {
        Some(handle) => {
            let session = handle.lock().await;
            Some((batch_summary(&session.batches()), session.batch_count()))
        }
        None => None,
    };

    match summary {
        Some((text, batch_count)) if batch_count > 0 => {
            bot.send_message(chat_id, text)
                .reply_markup(batch_keyboard(batch_count))
                .await?;
        }
        Some(_) => {
            bot.send_message(chat_id, "😔 No music files collected yet.")
                .await?;
        }
        None => {
            bot.send_message(chat_id, NO_SESSION_TEXT).await?;
        }
    }
    Ok(())
}

/// Select a batch for the user and start the driver loop.
async fn select_and_forward(
    bot: &Bot,
    chat_id: ChatId,
    user_id: i64,
    index: usize,
    state: &AppState,
) -> Result<()> {
    let handle = state.registry.lock().await.get(user_id);
    let selected = match handle {
        None => Err(NO_SESSION_TEXT.to_string()),
        Some(handle) => {
            let mut session = handle.lock().await;
            match session.batch_ids(index) {
                None => Err(Error::InvalidBatch(index).to_string()),
                Some(ids) => session
                    .forward
                    .select_batch(index, ids)
                    .map_err(|err| err.to_string()),
            }
        }
    };

    match selected {
        Ok(()) => {
            spawn_forward_loop(bot.clone(), chat_id, user_id, state.registry.clone());
        }
        Err(reason) => {
            bot.send_message(chat_id, reason).await?;
        }
    }
    Ok(())
}

/// Drive the forward state machine until it stops. Only this user's session
/// lock is held across the forward call of a step; the registry lock covers
/// map lookups only, and all delays happen with no lock at all. At most one
/// driver loop per session is alive, guarded by the session's driver slot.
fn spawn_forward_loop(
    bot: Bot,
    chat_id: ChatId,
    user_id: i64,
    registry: Arc<Mutex<SessionRegistry>>,
) {
    tokio::spawn(async move {
        let Some(handle) = registry.lock().await.get(user_id) else {
            return;
        };

        let (batch_index, sent, total, batch_count) = {
            let mut session = handle.lock().await;
            if !session.claim_driver() {
                // A live loop will pick the current state up by itself.
                return;
            }
            let (sent, total) = session.forward.progress();
            (session.forward.batch_index(), sent, total, session.batch_count())
        };

        let control = match bot
            .send_message(
                chat_id,
                format!("📤 Forwarding batch {}: {}/{}", batch_index, sent, total),
            )
            .reply_markup(forward_control_keyboard(batch_index, batch_count))
            .await
        {
            Ok(message) => message,
            Err(err) => {
                warn!(error = %err, "could not send forward status message");
                handle.lock().await.release_driver();
                return;
            }
        };

        loop {
            // Eviction or a replacing scan under the same user id ends the
            // loop; the driver slot dies with the evicted session.
            let current = registry.lock().await.get(user_id);
            let still_live = current
                .map(|current| Arc::ptr_eq(&current, &handle))
                .unwrap_or(false);
            if !still_live {
                handle.lock().await.release_driver();
                return;
            }

            let outcome = {
                let mut session = handle.lock().await;
                let transport = session.transport.clone();
                let outcome = session.forward.step(transport.as_ref()).await;
                // Free the slot before a terminal outcome is announced so an
                // immediate retry or resume can start a fresh driver.
                if !matches!(
                    outcome,
                    StepOutcome::Sent { .. } | StepOutcome::Delayed { .. }
                ) {
                    session.release_driver();
                }
                outcome
            };

            match outcome {
                StepOutcome::Sent {
                    sent,
                    total,
                    resume_after,
                } => {
                    if sent % FORWARD_EDIT_EVERY == 0 {
                        let _ = bot
                            .edit_message_text(
                                chat_id,
                                control.id,
                                format!(
                                    "📤 Forwarding batch {}: {}/{}",
                                    batch_index, sent, total
                                ),
                            )
                            .reply_markup(forward_control_keyboard(batch_index, batch_count))
                            .await;
                    }
                    tokio::time::sleep(resume_after).await;
                }
                StepOutcome::Delayed {
                    resume_after,
                    cause,
                } => {
                    if cause == DelayCause::FloodWait {
                        let _ = bot
                            .send_message(
                                chat_id,
                                format!(
                                    "⚠️ Flood control: waiting {} s before the next file.",
                                    resume_after.as_secs()
                                ),
                            )
                            .await;
                    }
                    tokio::time::sleep(resume_after).await;
                }
                StepOutcome::Completed { total } => {
                    let _ = bot
                        .edit_message_text(
                            chat_id,
                            control.id,
                            format!("✅ Batch {} forwarded: {} files.", batch_index, total),
                        )
                        .await;
                    if batch_index < batch_count {
                        let _ = bot
                            .send_message(chat_id, "Pick the next batch:")
                            .reply_markup(batch_keyboard(batch_count))
                            .await;
                    } else {
                        let _ = bot
                            .send_message(chat_id, "🎉 All batches forwarded.")
                            .reply_markup(main_keyboard())
                            .await;
                    }
                    return;
                }
                StepOutcome::Stuck { sent, total } => {
                    let _ = bot
                        .edit_message_text(
                            chat_id,
                            control.id,
                            format!(
                                "⚠️ Forwarding of batch {} stopped at {}/{} after repeated \
                                 failures. Pick a batch to try again.",
                                batch_index, sent, total
                            ),
                        )
                        .reply_markup(batch_keyboard(batch_count))
                        .await;
                    return;
                }
                // Paused or cancelled; those handlers inform the user.
                StepOutcome::NotForwarding => return,
            }
        }
    });
}

/// Human-readable summary of a user's session.
fn status_text(session: &UserSession) -> String {
    let mut text = format!(
        "📊 Scanning {}\n🎵 Music files: {}\n📨 Messages processed: {}",
        session.channel,
        session.files().len(),
        session.processed_total()
    );

    if session.has_more() {
        text.push_str("\n⏳ Older messages remain");
    }

    let (sent, total) = session.forward.progress();
    match session.forward.state() {
        ForwardState::Forwarding => {
            text.push_str(&format!(
                "\n📤 Forwarding batch {}: {}/{}",
                session.forward.batch_index(),
                sent,
                total
            ));
        }
        ForwardState::Paused => {
            text.push_str(&format!(
                "\n⏸ Batch {} paused at {}/{}",
                session.forward.batch_index(),
                sent,
                total
            ));
        }
        ForwardState::Completed => {
            text.push_str(&format!(
                "\n✅ Batch {} forwarded ({} files)",
                session.forward.batch_index(),
                total
            ));
        }
        ForwardState::Stuck => {
            text.push_str(&format!("\n⚠️ Forwarding stuck at {}/{}", sent, total));
        }
        ForwardState::Idle | ForwardState::Cancelled => {}
    }

    text
}
