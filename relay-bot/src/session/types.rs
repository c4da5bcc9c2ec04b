//! Session types.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Message role in a conversation transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Question sent by the chat user
    User,
    /// Answer produced by the model
    Assistant,
}

impl Role {
    /// Wire representation used by both the snapshot file and `/api/chat`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One role-tagged message within a transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Ordered, append-only list of turns for one session.
pub type Transcript = Vec<Turn>;

/// Persisted form of the registry: user id → session name → transcript.
pub type Histories = BTreeMap<String, BTreeMap<String, Transcript>>;

/// Multi-step interaction a user is in the middle of.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PendingFlow {
    #[default]
    Idle,
    /// Next plain message is the name of a session to create
    AwaitingCreateName,
    /// Next plain message is the name of a session to delete
    AwaitingDeleteName,
}

impl PendingFlow {
    pub fn is_idle(self) -> bool {
        matches!(self, Self::Idle)
    }
}

/// Session registry errors.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Session '{0}' not found")]
    NotFound(String),

    #[error("Session '{0}' already exists")]
    AlreadyExists(String),

    #[error("Invalid session name: {0}")]
    InvalidName(String),

    #[error(transparent)]
    Persistence(#[from] relay_common::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn turn_serializes_lowercase_role() {
        let json = serde_json::to_string(&Turn::assistant("4")).unwrap();
        assert_eq!(json, r#"{"role":"assistant","content":"4"}"#);
    }

    #[test]
    fn turn_deserializes_from_snapshot_shape() {
        let turn: Turn = serde_json::from_str(r#"{"role":"user","content":"hi"}"#).unwrap();
        assert_eq!(turn, Turn::user("hi"));
    }

    #[test]
    fn unknown_role_is_rejected() {
        let res: Result<Turn, _> = serde_json::from_str(r#"{"role":"tool","content":"x"}"#);
        assert!(res.is_err());
    }

    #[test]
    fn pending_defaults_to_idle() {
        assert!(PendingFlow::default().is_idle());
        assert!(!PendingFlow::AwaitingCreateName.is_idle());
    }
}
