//! Long-running bot service.

use anyhow::Result;

use crate::bot;
use crate::config::Config;
use crate::session::{check_session_exists, SessionLock};

pub async fn run() -> Result<()> {
    let config = Config::new();

    // One process owns the session; user sessions inside it share the lock.
    let _lock = SessionLock::acquire()?;
    check_session_exists()?;

    bot::run(config).await
}
