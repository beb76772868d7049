//! One-shot channel scan from the CLI.
//!
//! Fetches the channel history, prints the batch summary and, when the scan
//! stopped early, the cursor to resume from.

use tracing::info;

use crate::batches::{batch_summary, partition, progress_line};
use crate::chat::{peer_name, resolve_channel};
use crate::config::Config;
use crate::error::Result;
use crate::paginator::{fetch_music, PaginatorConfig};
use crate::session::{get_client, SessionLock};
use crate::transport::ChannelTransport;

pub async fn run(
    channel: &str,
    limit: Option<usize>,
    batch_size: Option<usize>,
    offset: Option<i32>,
) -> Result<()> {
    let config = Config::new();

    let _lock = SessionLock::acquire()?;
    let client = get_client().await?;

    let source = resolve_channel(&client, channel).await?;
    println!("Scanning {}...", peer_name(&source));

    // A plain scan never forwards, so the transport target is irrelevant.
    let target = source.clone();
    let transport = ChannelTransport::new(client, source, target);

    let ceiling = limit.unwrap_or(config.max_messages);
    let start_cursor = offset.unwrap_or(0);
    info!(channel, ceiling, start_cursor, "scan started");

    let report = fetch_music(
        &transport,
        start_cursor,
        ceiling,
        &PaginatorConfig::default(),
        || false,
        |total, processed| {
            if processed % 500 == 0 {
                println!("{}", progress_line(total, processed));
            }
        },
    )
    .await?;

    println!(
        "Processed {} messages, found {} music files.",
        report.processed,
        report.files.len()
    );

    if report.files.is_empty() {
        println!("No music found.");
    } else {
        let batches = partition(&report.files, batch_size.unwrap_or(config.batch_size));
        println!("{}", batch_summary(&batches));
    }

    if report.more {
        println!(
            "Older messages remain; resume with --offset {}",
            report.cursor
        );
    }

    Ok(())
}
