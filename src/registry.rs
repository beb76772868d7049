//! Per-user relay sessions and the registry that owns them.
//!
//! The registry is an explicit object injected where needed; there is no
//! global session map. Each session sits behind its own lock so one user's
//! in-flight network call never blocks another user; the registry lock
//! guards only the map itself. Sessions live only as long as the process:
//! no persistence, eviction on cancel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::batches::partition;
use crate::forward::{ForwardConfig, ForwardSession};
use crate::paginator::FetchReport;
use crate::transport::{ChannelMessage, Transport};

/// State of one user's scan-and-relay flow. The file list is append-only
/// and keeps fetch order (most recent first); batches are always derived
/// from it, never stored.
pub struct UserSession {
    /// Channel reference as the user submitted it.
    pub channel: String,
    /// Connection bound to this session's channel and target bot; dropped
    /// together with the session.
    pub transport: Arc<dyn Transport>,
    files: Vec<ChannelMessage>,
    cursor: i32,
    has_more: bool,
    processed_total: usize,
    /// Optional user-supplied overall ceiling across all rounds.
    pub overall_limit: Option<usize>,
    /// Messages processed per "fetch more" round.
    pub round_limit: usize,
    pub batch_size: usize,
    pub forward: ForwardSession,
    /// Set on cancel; a running sweep checks it at every page boundary.
    cancel: Arc<AtomicBool>,
    /// True while a forward driver loop is alive for this session.
    driver_active: bool,
}

impl UserSession {
    pub fn new(
        channel: String,
        transport: Arc<dyn Transport>,
        overall_limit: Option<usize>,
        round_limit: usize,
        batch_size: usize,
        forward_config: ForwardConfig,
    ) -> Self {
        Self {
            channel,
            transport,
            files: Vec::new(),
            cursor: 0,
            has_more: false,
            processed_total: 0,
            overall_limit,
            round_limit,
            batch_size: batch_size.max(1),
            forward: ForwardSession::new(forward_config),
            cancel: Arc::new(AtomicBool::new(false)),
            driver_active: false,
        }
    }

    /// Merge one pagination round into the session. Returns how many new
    /// files the round contributed.
    pub fn absorb(&mut self, report: &FetchReport) -> usize {
        self.files.extend(report.files.iter().cloned());
        self.cursor = report.cursor;
        self.has_more = report.more;
        self.processed_total += report.processed;
        report.files.len()
    }

    pub fn files(&self) -> &[ChannelMessage] {
        &self.files
    }

    pub fn cursor(&self) -> i32 {
        self.cursor
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    /// Messages examined across all rounds so far.
    pub fn processed_total(&self) -> usize {
        self.processed_total
    }

    /// Current repartition of the accumulated files.
    pub fn batches(&self) -> Vec<&[ChannelMessage]> {
        partition(&self.files, self.batch_size)
    }

    pub fn batch_count(&self) -> usize {
        self.batches().len()
    }

    /// Message ids of the 1-indexed batch, if it exists.
    pub fn batch_ids(&self, index: usize) -> Option<Vec<i32>> {
        if index == 0 {
            return None;
        }
        self.batches()
            .get(index - 1)
            .map(|batch| batch.iter().map(|m| m.id).collect())
    }

    /// Ceiling for the next round, or `None` when the overall limit has
    /// been spent.
    pub fn next_round_budget(&self) -> Option<usize> {
        match self.overall_limit {
            None => Some(self.round_limit),
            Some(limit) => {
                let remaining = limit.saturating_sub(self.processed_total);
                if remaining == 0 {
                    None
                } else {
                    Some(remaining.min(self.round_limit))
                }
            }
        }
    }

    /// Shared handle a running sweep polls to learn about cancellation.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    pub fn cancel_requested(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    /// Stop all activity of this session: any running sweep ends at the
    /// next page boundary, forwarding becomes terminal.
    pub fn request_cancel(&mut self) {
        self.cancel.store(true, Ordering::Relaxed);
        self.forward.cancel();
    }

    /// Claim the single forward driver slot. Returns false when a driver
    /// loop is already alive, in which case no second loop must start.
    pub fn claim_driver(&mut self) -> bool {
        if self.driver_active {
            return false;
        }
        self.driver_active = true;
        true
    }

    pub fn release_driver(&mut self) {
        self.driver_active = false;
    }
}

/// Handle to one user's session; lock it to read or mutate the session.
pub type SessionHandle = Arc<Mutex<UserSession>>;

/// Live sessions keyed by Telegram user id. The registry lock is only ever
/// held for map operations, never across session work.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: HashMap<i64, SessionHandle>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the session of a user and return its handle.
    pub fn insert(&mut self, user_id: i64, session: UserSession) -> SessionHandle {
        let handle: SessionHandle = Arc::new(Mutex::new(session));
        self.sessions.insert(user_id, handle.clone());
        handle
    }

    pub fn get(&self, user_id: i64) -> Option<SessionHandle> {
        self.sessions.get(&user_id).cloned()
    }

    /// Evict a session; once the last handle drops, so does its transport
    /// connection.
    pub fn remove(&mut self, user_id: i64) -> Option<SessionHandle> {
        self.sessions.remove(&user_id)
    }

    pub fn contains(&self, user_id: i64) -> bool {
        self.sessions.contains_key(&user_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forward::ForwardState;
    use crate::transport::testing::music;
    use crate::transport::TransportError;
    use async_trait::async_trait;

    struct NullTransport;

    #[async_trait]
    impl Transport for NullTransport {
        async fn fetch_history_page(
            &self,
            _before_id: i32,
            _page_size: usize,
        ) -> Result<Vec<ChannelMessage>, TransportError> {
            Ok(Vec::new())
        }

        async fn forward(&self, _message_id: i32) -> Result<(), TransportError> {
            Ok(())
        }
    }

    fn session(overall_limit: Option<usize>) -> UserSession {
        UserSession::new(
            "@channel".to_string(),
            Arc::new(NullTransport),
            overall_limit,
            5000,
            100,
            ForwardConfig::default(),
        )
    }

    fn report(ids: &[i32], cursor: i32, more: bool, processed: usize) -> FetchReport {
        FetchReport {
            files: ids.iter().map(|id| music(*id)).collect(),
            cursor,
            more,
            processed,
        }
    }

    #[test]
    fn absorb_appends_in_fetch_order() {
        let mut session = session(None);
        session.absorb(&report(&[100, 90, 80], 75, true, 1000));
        session.absorb(&report(&[70, 60], 55, false, 500));

        let ids: Vec<i32> = session.files().iter().map(|f| f.id).collect();
        assert_eq!(ids, vec![100, 90, 80, 70, 60]);
        assert_eq!(session.cursor(), 55);
        assert!(!session.has_more());
        assert_eq!(session.processed_total(), 1500);
    }

    #[test]
    fn batches_are_repartitioned_as_files_grow() {
        let mut session = session(None);
        let first: Vec<i32> = (0..150).map(|i| 1000 - i).collect();
        session.absorb(&report(&first, 850, true, 150));
        assert_eq!(session.batch_count(), 2);

        let second: Vec<i32> = (0..100).map(|i| 800 - i).collect();
        session.absorb(&report(&second, 700, true, 100));
        assert_eq!(session.batch_count(), 3);

        // Repartition is over the whole accumulated list: batch 2 now has
        // 100 files, not the 50 it had before the second round.
        let batches = session.batches();
        assert_eq!(batches[1].len(), 100);
        assert_eq!(batches[2].len(), 50);
    }

    #[test]
    fn batch_ids_are_one_indexed() {
        let mut session = session(None);
        let ids: Vec<i32> = (0..250).map(|i| 500 - i).collect();
        session.absorb(&report(&ids, 250, false, 250));

        assert!(session.batch_ids(0).is_none());
        assert_eq!(session.batch_ids(1).unwrap().len(), 100);
        assert_eq!(session.batch_ids(3).unwrap().len(), 50);
        assert!(session.batch_ids(4).is_none());

        let batch2 = session.batch_ids(2).unwrap();
        assert_eq!(batch2.first(), Some(&400));
    }

    #[test]
    fn round_budget_without_overall_limit() {
        let session = session(None);
        assert_eq!(session.next_round_budget(), Some(5000));
    }

    #[test]
    fn round_budget_with_overall_limit() {
        let mut session = session(Some(12_000));
        assert_eq!(session.next_round_budget(), Some(5000));

        session.absorb(&report(&[], 100, true, 5000));
        session.absorb(&report(&[], 50, true, 5000));
        // 2000 remaining of the overall limit.
        assert_eq!(session.next_round_budget(), Some(2000));

        session.absorb(&report(&[], 25, true, 2000));
        assert_eq!(session.next_round_budget(), None);
    }

    #[test]
    fn cancel_stops_forwarding_and_raises_the_flag() {
        let mut session = session(None);
        session.forward.select_batch(1, vec![1, 2]).expect("select");
        let flag = session.cancel_flag();
        assert!(!flag.load(Ordering::Relaxed));

        session.request_cancel();
        assert!(session.cancel_requested());
        // The shared flag is what a running sweep observes.
        assert!(flag.load(Ordering::Relaxed));
        assert_eq!(session.forward.state(), ForwardState::Cancelled);
    }

    #[test]
    fn driver_slot_is_exclusive_until_released() {
        let mut session = session(None);
        assert!(session.claim_driver());
        // A second driver must not start while the first is alive.
        assert!(!session.claim_driver());

        session.release_driver();
        assert!(session.claim_driver());
    }

    #[tokio::test]
    async fn registry_insert_get_remove() {
        let mut registry = SessionRegistry::new();
        assert!(registry.is_empty());

        registry.insert(42, session(None));
        assert!(registry.contains(42));
        assert_eq!(registry.len(), 1);
        assert!(registry.get(42).is_some());
        assert!(registry.get(7).is_none());

        let handle = registry.get(42).unwrap();
        handle.lock().await.absorb(&report(&[1], 1, false, 1));
        assert_eq!(registry.get(42).unwrap().lock().await.files().len(), 1);

        let removed = registry.remove(42);
        assert!(removed.is_some());
        assert!(registry.is_empty());
        assert!(registry.remove(42).is_none());
    }

    #[tokio::test]
    async fn replacing_a_session_hands_out_a_fresh_handle() {
        let mut registry = SessionRegistry::new();
        let old = registry.insert(1, session(None));
        let new = registry.insert(1, session(None));

        assert_eq!(registry.len(), 1);
        assert!(!Arc::ptr_eq(&old, &new));
        assert!(Arc::ptr_eq(&registry.get(1).unwrap(), &new));
    }

    #[tokio::test]
    async fn sessions_lock_independently() {
        let mut registry = SessionRegistry::new();
        let first = registry.insert(1, session(None));
        registry.insert(2, session(None));

        // Holding one user's session lock must not block another user's.
        let _held = first.lock().await;
        let second = registry.get(2).unwrap();
        let locked = second.try_lock();
        assert!(locked.is_ok());
        locked.unwrap().absorb(&report(&[10], 10, false, 1));
    }
}
