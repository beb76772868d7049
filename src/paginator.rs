//! Incremental history pagination and classification.
//!
//! Walks a channel's history backwards from a resumable cursor, classifies
//! every message, and stops at the per-round ceiling or the true end of
//! history. Transport failures never escape to the caller (apart from a dead
//! session): the sweep retries with backoff and, when the retry budget is
//! exhausted, returns whatever was accumulated with `more = true`.

use std::cmp;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::classifier::is_music;
use crate::error::{Error, Result};
use crate::transport::{ChannelMessage, Transport, TransportError};

/// Pacing and retry policy for one pagination sweep.
#[derive(Debug, Clone)]
pub struct PaginatorConfig {
    /// Messages requested per history page.
    pub page_size: usize,
    /// Delay before every page request (flood-control pacing).
    pub pre_page_delay: Duration,
    /// Extra rest between consecutive pages.
    pub inter_page_delay: Duration,
    /// Backoff per consecutive failure: wait = min(cap, attempt * step).
    pub retry_step: Duration,
    pub retry_cap: Duration,
    /// Consecutive transient failures before the sweep aborts.
    pub max_retries: u32,
    /// Progress callback cadence in processed messages.
    pub progress_every: usize,
}

impl Default for PaginatorConfig {
    fn default() -> Self {
        Self {
            page_size: crate::config::PAGE_SIZE,
            pre_page_delay: Duration::from_millis(500),
            inter_page_delay: Duration::from_secs(1),
            retry_step: Duration::from_secs(5),
            retry_cap: Duration::from_secs(30),
            max_retries: 10,
            progress_every: 10,
        }
    }
}

/// Outcome of one pagination round.
#[derive(Debug, Clone)]
pub struct FetchReport {
    /// Classified music files in fetch order (most recent first).
    pub files: Vec<ChannelMessage>,
    /// Oldest message id seen; pass back to continue the sweep.
    pub cursor: i32,
    /// Whether older messages remain (or the sweep aborted before knowing).
    pub more: bool,
    /// Messages examined during this round.
    pub processed: usize,
}

/// Sweep the channel history older than `start_cursor`, classifying up to
/// roughly `ceiling` messages (the ceiling is checked at page boundaries, so
/// the final page is always classified in full and the cursor always equals
/// the oldest examined id — resuming is both duplicate-free and skip-free).
///
/// `cancel` is polled once per page; when it turns true the sweep stops at
/// that page boundary and returns what was accumulated so far.
///
/// `progress` is invoked as `(ceiling, processed)` at most once per
/// `progress_every` messages, plus once at the end.
///
/// Only a dead session surfaces as `Err`; everything else degrades to a
/// partial `FetchReport`.
pub async fn fetch_music(
    transport: &dyn Transport,
    start_cursor: i32,
    ceiling: usize,
    cfg: &PaginatorConfig,
    cancel: impl Fn() -> bool,
    mut progress: impl FnMut(usize, usize),
) -> Result<FetchReport> {
    let mut files: Vec<ChannelMessage> = Vec::new();
    let mut cursor = start_cursor;
    let mut processed = 0usize;
    let mut failures: u32 = 0;
    let more;

    loop {
        if cancel() {
            info!(processed, "sweep cancelled at page boundary");
            more = true;
            break;
        }

        if processed >= ceiling {
            info!(processed, ceiling, "round ceiling reached, more messages remain");
            more = true;
            break;
        }

        tokio::time::sleep(cfg.pre_page_delay).await;

        let page = match transport.fetch_history_page(cursor, cfg.page_size).await {
            Ok(page) => {
                failures = 0;
                page
            }
            Err(TransportError::Auth) => {
                return Err(Error::AuthorizationRequired);
            }
            Err(TransportError::RateLimited { retry_after }) => {
                // Flood waits are obeyed but never counted against the
                // retry budget.
                warn!(wait_secs = retry_after.as_secs(), "flood wait during history fetch");
                tokio::time::sleep(retry_after).await;
                continue;
            }
            Err(err) => {
                failures += 1;
                if failures >= cfg.max_retries {
                    warn!(failures, "too many consecutive fetch failures, aborting sweep");
                    more = true;
                    break;
                }
                let wait = cmp::min(cfg.retry_cap, cfg.retry_step * failures);
                warn!(error = %err, attempt = failures, wait_secs = wait.as_secs(), "history fetch failed, retrying");
                tokio::time::sleep(wait).await;
                continue;
            }
        };

        if page.is_empty() {
            info!("end of channel history");
            more = false;
            break;
        }

        let page_len = page.len();
        let matched_before = files.len();
        for message in &page {
            processed += 1;
            if is_music(message) {
                files.push(message.clone());
            }
            if processed % cfg.progress_every == 0 {
                progress(ceiling, processed);
            }
        }
        debug!(
            page = page_len,
            matched = files.len() - matched_before,
            total_matched = files.len(),
            processed,
            "classified page"
        );

        // Cursor moves to the oldest message of the page; the platform
        // returns newest-first within a page.
        cursor = page.last().map(|m| m.id).unwrap_or(cursor);

        if page_len < cfg.page_size {
            info!("short page, end of channel history");
            more = false;
            break;
        }

        tokio::time::sleep(cfg.inter_page_delay).await;
    }

    progress(ceiling, processed);

    if files.is_empty() {
        info!(processed, "no music files found in this round");
    } else {
        info!(found = files.len(), processed, more, "pagination round finished");
    }

    Ok(FetchReport {
        files,
        cursor,
        more,
        processed,
    })
}
