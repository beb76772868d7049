//! Music relay CLI entry point.

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use tg_music_relay::commands;

#[derive(Parser)]
#[command(
    name = "tg_music_relay",
    about = "Scan Telegram channels for music and relay it in batches",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the relay bot
    Serve,
    /// Scan a channel once and print the batch summary
    Scan {
        /// Channel username, t.me link or numeric id
        channel: String,
        /// Maximum number of messages to examine
        #[arg(short, long)]
        limit: Option<usize>,
        /// Files per batch
        #[arg(short, long)]
        batch_size: Option<usize>,
        /// Resume the scan below this message id
        #[arg(short, long)]
        offset: Option<i32>,
    },
    /// Authorize the Telegram session interactively
    InitSession,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve => commands::serve::run().await?,
        Commands::Scan {
            channel,
            limit,
            batch_size,
            offset,
        } => commands::scan::run(&channel, limit, batch_size, offset).await?,
        Commands::InitSession => commands::init_session::run().await?,
    }

    Ok(())
}
