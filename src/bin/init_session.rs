//! Session initialization binary.

use tg_music_relay::commands::init_session;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    init_session::run().await?;
    Ok(())
}
