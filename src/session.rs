//! MTProto session management
//!
//! Provides:
//! - File-based session locking to prevent parallel execution
//! - Session file validation
//! - Client creation with proper configuration
//!
//! Telegram requires sequential use of one session; every relay session
//! therefore opens its own client on top of the shared session file.

use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Arc;

use fs2::FileExt;
use grammers_client::Client;
use grammers_mtsender::{SenderPool, SenderPoolHandle};
use grammers_session::storages::SqliteSession;

use crate::config::{Config, LOCK_FILE, SESSION_NAME};
use crate::error::{Error, Result};

/// Session lock guard that ensures exclusive access to the Telegram session.
pub struct SessionLock {
    lock_file: Option<File>,
}

impl SessionLock {
    /// Acquire an exclusive lock on the session.
    pub fn acquire() -> Result<Self> {
        let lock_file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(LOCK_FILE)
            .map_err(|e| Error::LockError(format!("Failed to open lock file: {}", e)))?;

        match lock_file.try_lock_exclusive() {
            Ok(()) => Ok(Self {
                lock_file: Some(lock_file),
            }),
            Err(_) => {
                eprintln!(
                    r#"
⚠️  The Telegram session is already in use by another process.

Telegram requires sequential use of a session; parallel use of the same
session file leads to conflicts and temporary bans. Wait for the other
process to finish and try again.
"#
                );
                Err(Error::SessionLocked)
            }
        }
    }

    /// Release the lock manually
    pub fn release(&mut self) {
        if let Some(ref file) = self.lock_file {
            let _ = file.unlock();
        }
        self.lock_file = None;
        let _ = std::fs::remove_file(LOCK_FILE);
    }
}

impl Drop for SessionLock {
    fn drop(&mut self) {
        self.release();
    }
}

/// Check if the session file exists.
pub fn check_session_exists() -> Result<()> {
    let session_file = format!("{}.session", SESSION_NAME);

    if !Path::new(&session_file).exists() {
        eprintln!(
            r#"
⚠️  Session file '{}' not found.

To create it:
1. Run: cargo run --bin init_session
2. Enter the confirmation code from Telegram
"#,
            session_file
        );
        return Err(Error::SessionNotFound(session_file));
    }

    Ok(())
}

/// Load an existing session from file.
pub fn load_session() -> Result<Arc<SqliteSession>> {
    let session_file = format!("{}.session", SESSION_NAME);
    let session = SqliteSession::open(&session_file)
        .map_err(|e| Error::SessionNotFound(format!("Failed to load session: {}", e)))?;
    Ok(Arc::new(session))
}

/// Create a new session (for init_session only).
pub fn create_session() -> Result<Arc<SqliteSession>> {
    let session_file = format!("{}.session", SESSION_NAME);
    let session = SqliteSession::open(&session_file)
        .map_err(|e| Error::SessionNotFound(format!("Failed to create session: {}", e)))?;
    Ok(Arc::new(session))
}

/// Holder for SenderPool components and Client. Dropping it aborts the
/// background runner and with it the connection.
pub struct TelegramClient {
    pub client: Client,
    pub handle: SenderPoolHandle,
    session: Arc<SqliteSession>,
    runner: tokio::task::JoinHandle<()>,
}

impl TelegramClient {
    /// Create a new TelegramClient from session
    pub async fn connect(session: Arc<SqliteSession>) -> Result<Self> {
        let config = Config::new();
        let pool = SenderPool::new(session.clone(), config.api_id);

        // Create client from pool (need reference to whole pool)
        let client = Client::new(&pool);

        let SenderPool {
            runner,
            updates: _updates,
            handle,
        } = pool;

        // Spawn the runner in background
        let runner = tokio::spawn(async move {
            runner.run().await;
        });

        Ok(Self {
            client,
            handle,
            session,
            runner,
        })
    }

    /// Save the session to file
    pub fn save(&self) -> Result<()> {
        save_session(&self.session)
    }
}

impl Drop for TelegramClient {
    fn drop(&mut self) {
        self.runner.abort();
    }
}

// Implement Deref to allow using TelegramClient as &Client
impl std::ops::Deref for TelegramClient {
    type Target = Client;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

/// Save session - SqliteSession auto-saves, this is a no-op for compatibility
pub fn save_session(_session: &SqliteSession) -> Result<()> {
    Ok(())
}

/// Create and connect a Telegram client with an existing session.
pub async fn get_client() -> Result<TelegramClient> {
    check_session_exists()?;
    let session = load_session()?;
    TelegramClient::connect(session).await
}

/// Create a Telegram client for initialization (no session check).
pub async fn get_client_for_init() -> Result<TelegramClient> {
    let session = create_session()?;
    TelegramClient::connect(session).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::path::PathBuf;
    use std::sync::{LazyLock, Mutex};
    use tempfile::tempdir;

    static WORKDIR_LOCK: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

    struct DirGuard {
        original: PathBuf,
    }

    impl DirGuard {
        fn change_to(path: &std::path::Path) -> Self {
            let original = env::current_dir().expect("current dir");
            env::set_current_dir(path).expect("set current dir");
            Self { original }
        }
    }

    impl Drop for DirGuard {
        fn drop(&mut self) {
            let _ = env::set_current_dir(&self.original);
        }
    }

    #[test]
    fn session_lock_can_be_acquired_and_released() {
        let _lock = WORKDIR_LOCK.lock().unwrap();
        let temp = tempdir().expect("tempdir");
        let _guard = DirGuard::change_to(temp.path());

        let result = SessionLock::acquire();
        if let Ok(mut lock) = result {
            lock.release();
        }
    }

    #[test]
    fn check_session_exists_reports_missing_and_success() {
        use std::fs::File;

        let _lock = WORKDIR_LOCK.lock().unwrap();
        let temp = tempdir().expect("tempdir");
        let _guard = DirGuard::change_to(temp.path());

        let err = check_session_exists().unwrap_err();
        assert!(matches!(err, Error::SessionNotFound(_)));

        let session_file = format!("{}.session", SESSION_NAME);
        File::create(&session_file).expect("create session file");

        check_session_exists().expect("session should exist");
    }

    #[test]
    fn release_removes_lock_file() {
        let _lock = WORKDIR_LOCK.lock().unwrap();
        let temp = tempdir().expect("tempdir");
        let _guard = DirGuard::change_to(temp.path());

        let mut lock = SessionLock::acquire().expect("lock");
        assert!(PathBuf::from(LOCK_FILE).exists());
        lock.release();
        assert!(!PathBuf::from(LOCK_FILE).exists());
    }

    #[test]
    fn lock_dropped_releases_automatically() {
        let _lock = WORKDIR_LOCK.lock().unwrap();
        let temp = tempdir().expect("tempdir");
        let _guard = DirGuard::change_to(temp.path());

        {
            let _lock = SessionLock::acquire().expect("lock");
            assert!(PathBuf::from(LOCK_FILE).exists());
        }
        // Lock should be released after drop
        assert!(!PathBuf::from(LOCK_FILE).exists());
    }

    #[test]
    fn double_release_is_safe() {
        let _lock = WORKDIR_LOCK.lock().unwrap();
        let temp = tempdir().expect("tempdir");
        let _guard = DirGuard::change_to(temp.path());

        let mut lock = SessionLock::acquire().expect("lock");
        lock.release();
        lock.release(); // Should not panic
    }

    #[test]
    fn check_session_exists_error_names_the_file() {
        let _lock = WORKDIR_LOCK.lock().unwrap();
        let temp = tempdir().expect("tempdir");
        let _guard = DirGuard::change_to(temp.path());

        let result = check_session_exists();
        if let Err(Error::SessionNotFound(path)) = result {
            assert!(path.contains(".session"));
        } else {
            panic!("Expected SessionNotFound error");
        }
    }
}
