//! Sessions.
//!
//! A session scopes the only mutable policy state: the [`SafetyMode`]. Each
//! session owns a `watch` channel carrying its mode, a confirmation store and
//! the worker pool semaphore that bounds its outbound calls. Requests read the
//! mode once ([`Session::mode_snapshot`]) and keep that value for their whole
//! run, so a mode change never affects a request already in flight.

use crate::confirmation::ConfirmationManager;
use chrono::{DateTime, Utc};
use nimbus_core::config::{ExecutionConfig, SafetyConfig};
use nimbus_core::{AccountRef, SafetyMode};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::{Semaphore, watch};
use uuid::Uuid;

/// One agent session against one account.
pub struct Session {
    id: String,
    account: AccountRef,
    mode: watch::Sender<SafetyMode>,
    confirmations: ConfirmationManager,
    worker_pool: Arc<Semaphore>,
    created_at: DateTime<Utc>,
}

/// Serializable view of a session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: String,
    pub account: AccountRef,
    pub mode: SafetyMode,
    pub pending_confirmations: usize,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn new(
        account: AccountRef,
        initial_mode: SafetyMode,
        confirmation_ttl: Duration,
        worker_pool_size: usize,
    ) -> Self {
        let (mode, _) = watch::channel(initial_mode);
        Self {
            id: Uuid::new_v4().to_string(),
            account,
            mode,
            confirmations: ConfirmationManager::new(confirmation_ttl),
            worker_pool: Arc::new(Semaphore::new(worker_pool_size.max(1))),
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn account(&self) -> &AccountRef {
        &self.account
    }

    /// The mode a request should use for its whole run.
    pub fn mode_snapshot(&self) -> SafetyMode {
        *self.mode.borrow()
    }

    /// Switch the mode. Returns the previous one.
    pub fn set_mode(&self, mode: SafetyMode) -> SafetyMode {
        let previous = self.mode.send_replace(mode);
        if previous != mode {
            tracing::info!(
                session = %self.id,
                account = %self.account,
                from = %previous,
                to = %mode,
                "Safety mode changed"
            );
        }
        previous
    }

    /// Receiver notified on every mode change.
    pub fn subscribe_mode(&self) -> watch::Receiver<SafetyMode> {
        self.mode.subscribe()
    }

    pub fn confirmations(&self) -> &ConfirmationManager {
        &self.confirmations
    }

    /// Semaphore bounding this session's in-flight outbound calls.
    pub fn worker_pool(&self) -> Arc<Semaphore> {
        Arc::clone(&self.worker_pool)
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id.clone(),
            account: self.account.clone(),
            mode: self.mode_snapshot(),
            pending_confirmations: self.confirmations.list_pending().len(),
            created_at: self.created_at,
        }
    }
}

/// All live sessions, keyed by session id.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    default_mode: SafetyMode,
    confirmation_ttl: Duration,
    worker_pool_size: usize,
}

impl SessionRegistry {
    pub fn new(safety: &SafetyConfig, execution: &ExecutionConfig) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            default_mode: safety.default_mode,
            confirmation_ttl: Duration::from_secs(safety.confirmation_ttl_secs),
            worker_pool_size: execution.worker_pool_size,
        }
    }

    fn create(&self, account: AccountRef) -> Arc<Session> {
        let session = Arc::new(Session::new(
            account,
            self.default_mode,
            self.confirmation_ttl,
            self.worker_pool_size,
        ));
        tracing::info!(
            session = %session.id,
            account = %session.account,
            mode = %self.default_mode,
            "Session opened"
        );
        session
    }

    /// Open a session in the configured default mode.
    pub fn open(&self, account: AccountRef) -> Arc<Session> {
        let session = self.create(account);
        self.sessions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(session.id.clone(), Arc::clone(&session));
        session
    }

    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
    }

    /// The oldest session for an account, opening one if there is none.
    ///
    /// Lookup and insert share one write lock so concurrent first calls
    /// agree on a single session.
    pub fn for_account(&self, account: &AccountRef) -> Arc<Session> {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = sessions
            .values()
            .filter(|s| &s.account == account)
            .min_by_key(|s| s.created_at)
        {
            return Arc::clone(existing);
        }
        let session = self.create(account.clone());
        sessions.insert(session.id.clone(), Arc::clone(&session));
        session
    }

    /// Tear a session down, dropping its mode and pending confirmations.
    pub fn close(&self, id: &str) -> bool {
        let removed = self
            .sessions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id)
            .is_some();
        if removed {
            tracing::info!(session = %id, "Session closed");
        }
        removed
    }

    /// Tear every session down. Returns how many were open.
    pub fn close_all(&self) -> usize {
        let closed = {
            let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
            let closed = sessions.len();
            sessions.clear();
            closed
        };
        if closed > 0 {
            tracing::info!(sessions = closed, "All sessions closed");
        }
        closed
    }

    pub fn len(&self) -> usize {
        self.sessions.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn list(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<SessionInfo> = self
            .sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .map(|s| s.info())
            .collect();
        sessions.sort_by_key(|s| s.created_at);
        sessions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(mode: SafetyMode) -> SessionRegistry {
        let safety = SafetyConfig {
            default_mode: mode,
            ..Default::default()
        };
        SessionRegistry::new(&safety, &ExecutionConfig::default())
    }

    #[test]
    fn test_sessions_are_isolated() {
        let registry = registry(SafetyMode::ReadOnly);
        let prod = registry.open(AccountRef::new("111"));
        let dev = registry.open(AccountRef::new("222"));

        dev.set_mode(SafetyMode::Unrestricted);
        assert_eq!(prod.mode_snapshot(), SafetyMode::ReadOnly);
        assert_eq!(dev.mode_snapshot(), SafetyMode::Unrestricted);
        assert_eq!(registry.list().len(), 2);
    }

    #[test]
    fn test_snapshot_is_stable_across_mode_change() {
        let session = registry(SafetyMode::Standard).open(AccountRef::new("1"));
        let snapshot = session.mode_snapshot();
        let previous = session.set_mode(SafetyMode::ReadOnly);

        assert_eq!(previous, SafetyMode::Standard);
        assert_eq!(snapshot, SafetyMode::Standard);
        assert_eq!(session.mode_snapshot(), SafetyMode::ReadOnly);
    }

    #[test]
    fn test_close_resets_to_default_mode() {
        let registry = registry(SafetyMode::ReadOnly);
        let account = AccountRef::new("1");
        let session = registry.for_account(&account);
        session.set_mode(SafetyMode::Unrestricted);
        assert_eq!(registry.for_account(&account).id(), session.id());

        assert!(registry.close(session.id()));
        assert!(!registry.close(session.id()));
        let fresh = registry.for_account(&account);
        assert_ne!(fresh.id(), session.id());
        assert_eq!(fresh.mode_snapshot(), SafetyMode::ReadOnly);
    }

    #[test]
    fn test_concurrent_first_calls_share_one_session() {
        use std::sync::Barrier;

        for _ in 0..50 {
            let registry = Arc::new(registry(SafetyMode::Standard));
            let barrier = Arc::new(Barrier::new(8));
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let registry = Arc::clone(&registry);
                    let barrier = Arc::clone(&barrier);
                    std::thread::spawn(move || {
                        barrier.wait();
                        registry.for_account(&AccountRef::new("1")).id().to_string()
                    })
                })
                .collect();
            let ids: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();

            assert_eq!(registry.len(), 1);
            assert!(ids.iter().all(|id| id == &ids[0]));
        }
    }

    #[test]
    fn test_close_all_drops_every_session() {
        let registry = registry(SafetyMode::ReadOnly);
        registry.open(AccountRef::new("1")).set_mode(SafetyMode::Unrestricted);
        registry.open(AccountRef::new("2"));

        assert_eq!(registry.close_all(), 2);
        assert!(registry.is_empty());
        assert_eq!(
            registry.for_account(&AccountRef::new("1")).mode_snapshot(),
            SafetyMode::ReadOnly
        );
    }

    #[tokio::test]
    async fn test_mode_watch_notifies() {
        let session = registry(SafetyMode::ReadOnly).open(AccountRef::new("1"));
        let mut rx = session.subscribe_mode();
        session.set_mode(SafetyMode::Standard);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), SafetyMode::Standard);
    }
}
