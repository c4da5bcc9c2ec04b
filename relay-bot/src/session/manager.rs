//! Shared access to the registry and its snapshot file.

use super::registry::SessionRegistry;
use super::store::HistoryStore;
use super::types::{PendingFlow, SessionError, Transcript, Turn};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

/// Registry + store, shared by every handler task.
///
/// The registry lock is never held across an await on the network. Snapshot
/// writes are serialized by `persist_lock`, and the snapshot is taken while
/// that lock is held, so the file always ends at the newest state.
pub struct SessionManager {
    registry: RwLock<SessionRegistry>,
    store: HistoryStore,
    persist_lock: Mutex<()>,
    turn_locks: DashMap<(String, String), Arc<Mutex<()>>>,
}

impl SessionManager {
    pub fn new(registry: SessionRegistry, store: HistoryStore) -> Self {
        Self {
            registry: RwLock::new(registry),
            store,
            persist_lock: Mutex::new(()),
            turn_locks: DashMap::new(),
        }
    }

    /// Load the snapshot from `store` and wrap it.
    pub fn open(store: HistoryStore, default_session: &str) -> Self {
        let registry = SessionRegistry::from_histories(store.load(), default_session);
        Self::new(registry, store)
    }

    /// Write the full registry to disk.
    pub async fn persist(&self) -> relay_common::Result<()> {
        let _guard = self.persist_lock.lock().await;
        let histories = self.registry.read().await.to_histories();
        self.store.save(&histories).await
    }

    /// Serialize turns for one (user, session) pair.
    pub async fn lock_turn(&self, user_id: &str, session: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .turn_locks
            .entry((user_id.to_string(), session.to_string()))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Lock the user's selected session for one turn.
    ///
    /// Re-checks the selection once the lock is held, since a delete or
    /// `/use` may have changed it while this task waited.
    pub async fn lock_selected(&self, user_id: &str) -> (String, OwnedMutexGuard<()>) {
        loop {
            let session = self.selected_session(user_id).await;
            let guard = self.lock_turn(user_id, &session).await;
            if self.selected_session(user_id).await == session {
                return (session, guard);
            }
        }
    }

    pub async fn ensure_user(&self, user_id: &str) {
        self.registry.write().await.ensure_user(user_id);
    }

    pub async fn list_sessions(&self, user_id: &str) -> Vec<String> {
        self.registry.read().await.list_sessions(user_id)
    }

    /// Create a session and persist the registry.
    pub async fn create_session(&self, user_id: &str, name: &str) -> Result<(), SessionError> {
        self.registry.write().await.create_session(user_id, name)?;
        self.persist().await?;
        Ok(())
    }

    /// Delete a session and persist the registry.
    ///
    /// Waits for a turn in flight on the session to finish first.
    pub async fn delete_session(&self, user_id: &str, name: &str) -> Result<(), SessionError> {
        let _turn = self.lock_turn(user_id, name.trim()).await;
        self.registry.write().await.delete_session(user_id, name.trim())?;
        self.persist().await?;
        Ok(())
    }

    pub async fn selected_session(&self, user_id: &str) -> String {
        self.registry.read().await.selected_session(user_id)
    }

    pub async fn select_session(&self, user_id: &str, name: &str) -> Result<(), SessionError> {
        self.registry.write().await.select_session(user_id, name)
    }

    pub async fn default_session(&self) -> String {
        self.registry.read().await.default_session().to_string()
    }

    /// Append a turn and return the full transcript after the append.
    pub async fn append_turn(&self, user_id: &str, session: &str, turn: Turn) -> Transcript {
        let mut registry = self.registry.write().await;
        registry.append_turn(user_id, session, turn);
        registry
            .transcript(user_id, session)
            .cloned()
            .unwrap_or_default()
    }

    /// Append to a session that must still exist. Returns `false` if it
    /// was deleted.
    pub async fn append_existing(&self, user_id: &str, session: &str, turn: Turn) -> bool {
        self.registry
            .write()
            .await
            .append_existing(user_id, session, turn)
    }

    pub async fn transcript(&self, user_id: &str, session: &str) -> Option<Transcript> {
        self.registry.read().await.transcript(user_id, session).cloned()
    }

    pub async fn pending(&self, user_id: &str) -> PendingFlow {
        self.registry.read().await.pending(user_id)
    }

    pub async fn set_pending(&self, user_id: &str, flow: PendingFlow) -> PendingFlow {
        self.registry.write().await.set_pending(user_id, flow)
    }

    /// Claim the pending flow so only one message can complete it.
    pub async fn take_pending(&self, user_id: &str) -> PendingFlow {
        self.registry.write().await.take_pending(user_id)
    }

    pub async fn restore_pending(&self, user_id: &str, flow: PendingFlow) -> bool {
        self.registry.write().await.restore_pending(user_id, flow)
    }

    pub fn store(&self) -> &HistoryStore {
        &self.store
    }
}
