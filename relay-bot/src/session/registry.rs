//! In-memory session registry.
//!
//! Keyed by user id, then session name. Each user entry also carries the
//! selected session and the pending lifecycle flow, so every per-user piece
//! of state goes through the same lock as the transcripts.

use super::types::{Histories, PendingFlow, SessionError, Transcript, Turn};
use std::collections::{BTreeMap, HashMap};

/// Everything the bot knows about one user.
#[derive(Debug, Clone, Default)]
pub struct UserEntry {
    pub sessions: BTreeMap<String, Transcript>,
    /// Explicitly selected session; `None` means the registry default
    pub selected: Option<String>,
    pub pending: PendingFlow,
}

/// User → session name → transcript.
#[derive(Debug, Clone)]
pub struct SessionRegistry {
    users: HashMap<String, UserEntry>,
    default_session: String,
}

impl SessionRegistry {
    /// Create an empty registry.
    pub fn new(default_session: impl Into<String>) -> Self {
        Self {
            users: HashMap::new(),
            default_session: default_session.into(),
        }
    }

    /// Rebuild a registry from a persisted snapshot.
    pub fn from_histories(histories: Histories, default_session: impl Into<String>) -> Self {
        let users = histories
            .into_iter()
            .map(|(user_id, sessions)| {
                (
                    user_id,
                    UserEntry {
                        sessions,
                        ..UserEntry::default()
                    },
                )
            })
            .collect();

        Self {
            users,
            default_session: default_session.into(),
        }
    }

    /// Full snapshot of every user's transcripts.
    pub fn to_histories(&self) -> Histories {
        self.users
            .iter()
            .map(|(user_id, entry)| (user_id.clone(), entry.sessions.clone()))
            .collect()
    }

    pub fn default_session(&self) -> &str {
        &self.default_session
    }

    /// Create an empty entry for the user if absent.
    pub fn ensure_user(&mut self, user_id: &str) -> &mut UserEntry {
        self.users.entry(user_id.to_string()).or_default()
    }

    pub fn contains_user(&self, user_id: &str) -> bool {
        self.users.contains_key(user_id)
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    /// Session names for the user in sorted order.
    pub fn list_sessions(&self, user_id: &str) -> Vec<String> {
        self.users
            .get(user_id)
            .map(|entry| entry.sessions.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn has_session(&self, user_id: &str, name: &str) -> bool {
        self.users
            .get(user_id)
            .is_some_and(|entry| entry.sessions.contains_key(name))
    }

    /// Create an empty session.
    pub fn create_session(&mut self, user_id: &str, name: &str) -> Result<(), SessionError> {
        let name = validate_name(name)?;
        let entry = self.ensure_user(user_id);
        if entry.sessions.contains_key(name) {
            return Err(SessionError::AlreadyExists(name.to_string()));
        }
        entry.sessions.insert(name.to_string(), Vec::new());
        Ok(())
    }

    /// Delete a session and its transcript.
    ///
    /// Deleting the selected session falls back to the default session.
    pub fn delete_session(&mut self, user_id: &str, name: &str) -> Result<Transcript, SessionError> {
        let entry = self
            .users
            .get_mut(user_id)
            .ok_or_else(|| SessionError::NotFound(name.to_string()))?;

        let removed = entry
            .sessions
            .remove(name)
            .ok_or_else(|| SessionError::NotFound(name.to_string()))?;

        if entry.selected.as_deref() == Some(name) {
            entry.selected = None;
        }
        Ok(removed)
    }

    /// Name of the session `/ask` writes to.
    pub fn selected_session(&self, user_id: &str) -> String {
        self.users
            .get(user_id)
            .and_then(|entry| entry.selected.clone())
            .unwrap_or_else(|| self.default_session.clone())
    }

    /// Make `name` the active session.
    ///
    /// The default session is always selectable, even before its first turn.
    pub fn select_session(&mut self, user_id: &str, name: &str) -> Result<(), SessionError> {
        let is_default = name == self.default_session;
        let entry = self.ensure_user(user_id);

        if is_default {
            entry.selected = None;
            return Ok(());
        }
        if !entry.sessions.contains_key(name) {
            return Err(SessionError::NotFound(name.to_string()));
        }
        entry.selected = Some(name.to_string());
        Ok(())
    }

    /// Append a turn, creating the transcript if it does not exist yet.
    pub fn append_turn(&mut self, user_id: &str, session: &str, turn: Turn) {
        self.ensure_user(user_id)
            .sessions
            .entry(session.to_string())
            .or_default()
            .push(turn);
    }

    /// Append to an existing transcript only. Returns `false` if the session
    /// is gone.
    pub fn append_existing(&mut self, user_id: &str, session: &str, turn: Turn) -> bool {
        match self
            .users
            .get_mut(user_id)
            .and_then(|entry| entry.sessions.get_mut(session))
        {
            Some(transcript) => {
                transcript.push(turn);
                true
            }
            None => false,
        }
    }

    pub fn transcript(&self, user_id: &str, session: &str) -> Option<&Transcript> {
        self.users.get(user_id)?.sessions.get(session)
    }

    pub fn pending(&self, user_id: &str) -> PendingFlow {
        self.users
            .get(user_id)
            .map(|entry| entry.pending)
            .unwrap_or_default()
    }

    /// Replace the user's pending flow, returning the previous one.
    pub fn set_pending(&mut self, user_id: &str, flow: PendingFlow) -> PendingFlow {
        std::mem::replace(&mut self.ensure_user(user_id).pending, flow)
    }

    /// Claim the user's pending flow, leaving the slot idle.
    pub fn take_pending(&mut self, user_id: &str) -> PendingFlow {
        match self.users.get_mut(user_id) {
            Some(entry) => std::mem::take(&mut entry.pending),
            None => PendingFlow::Idle,
        }
    }

    /// Put a claimed flow back, unless something else armed the slot since.
    pub fn restore_pending(&mut self, user_id: &str, flow: PendingFlow) -> bool {
        let entry = self.ensure_user(user_id);
        if entry.pending.is_idle() {
            entry.pending = flow;
            true
        } else {
            false
        }
    }
}

fn validate_name(name: &str) -> Result<&str, SessionError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(SessionError::InvalidName("name must not be empty".into()));
    }
    if trimmed.starts_with('/') {
        return Err(SessionError::InvalidName(
            "name must not start with '/'".into(),
        ));
    }
    Ok(trimmed)
}
