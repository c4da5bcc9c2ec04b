//! Interactive session create/delete flows.
//!
//! Each user has one pending-flow slot in the registry. A button press arms
//! the slot; the dispatcher routes that user's next plain message here. No
//! per-interaction listeners exist, so abandoned flows cost nothing.
//!
//! Replies are Telegram HTML; user-supplied names are escaped.

use crate::message::{CallbackQuery, ChatMessage, InlineButton, Keyboard};
use crate::session::{PendingFlow, SessionError, SessionManager};
use crate::telegram::format::escape_html;
use crate::traits::{ChannelResult, ChatTransport};
use std::sync::Arc;

pub const CREATE_SESSION: &str = "create_session";
pub const DELETE_SESSION: &str = "delete_session";

/// Buttons shown under the session list.
pub fn sessions_keyboard() -> Keyboard {
    vec![vec![
        InlineButton::new("Create New Session", CREATE_SESSION),
        InlineButton::new("Delete Session", DELETE_SESSION),
    ]]
}

/// Text of the `/sessions` menu.
pub fn sessions_text(names: &[String], selected: &str) -> String {
    let list = if names.is_empty() {
        "No sessions found.".to_string()
    } else {
        names
            .iter()
            .map(|name| {
                if name == selected {
                    format!("{} (active)", escape_html(name))
                } else {
                    escape_html(name)
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!(
        "Your sessions:\n{list}\n\nActive session: {}. Switch with /use &lt;name&gt;.\n\
         Use the buttons below to create or delete a session.",
        escape_html(selected)
    )
}

pub struct SessionLifecycle {
    sessions: Arc<SessionManager>,
    transport: Arc<dyn ChatTransport>,
}

impl SessionLifecycle {
    pub fn new(sessions: Arc<SessionManager>, transport: Arc<dyn ChatTransport>) -> Self {
        Self {
            sessions,
            transport,
        }
    }

    /// `/sessions`: list the user's sessions with create/delete buttons.
    pub async fn show_sessions(&self, chat_id: &str, user_id: &str) -> ChannelResult<()> {
        self.sessions.ensure_user(user_id).await;
        let names = self.sessions.list_sessions(user_id).await;
        let selected = self.sessions.selected_session(user_id).await;

        self.transport
            .respond_with_buttons(chat_id, &sessions_text(&names, &selected), sessions_keyboard())
            .await?;
        Ok(())
    }

    /// Arm the user's flow slot after a create/delete button press.
    pub async fn begin(&self, query: &CallbackQuery, flow: PendingFlow) -> ChannelResult<()> {
        let prompt = match flow {
            PendingFlow::AwaitingCreateName => "Please send the name of the new session:",
            PendingFlow::AwaitingDeleteName => {
                "Please send the name of the session you want to delete:"
            }
            PendingFlow::Idle => return Ok(()),
        };

        let previous = self.sessions.set_pending(&query.from_user_id, flow).await;
        if !previous.is_idle() && previous != flow {
            tracing::debug!(
                user_id = %query.from_user_id,
                ?previous,
                ?flow,
                "Pending session flow superseded"
            );
        }

        self.transport.answer(&query.id, None, false).await?;
        self.transport.respond(&query.chat_id, prompt).await?;
        Ok(())
    }

    /// Handle a plain message. Only the first message after a button press
    /// claims the flow; text with no flow armed is ignored.
    pub async fn continue_flow(&self, msg: &ChatMessage) -> ChannelResult<()> {
        let name = msg.text.trim();
        match self.sessions.take_pending(&msg.user_id).await {
            PendingFlow::AwaitingCreateName => self.finish_create(msg, name).await,
            PendingFlow::AwaitingDeleteName => self.finish_delete(msg, name).await,
            PendingFlow::Idle => {
                tracing::debug!(user_id = %msg.user_id, "Ignoring plain text outside a flow");
                Ok(())
            }
        }
    }

    /// Re-arm the create flow after a name the user can correct.
    async fn retry_create(&self, user_id: &str) {
        if !self
            .sessions
            .restore_pending(user_id, PendingFlow::AwaitingCreateName)
            .await
        {
            tracing::debug!(user_id = %user_id, "Newer session flow armed; not re-arming create");
        }
    }

    async fn finish_create(&self, msg: &ChatMessage, name: &str) -> ChannelResult<()> {
        match self.sessions.create_session(&msg.user_id, name).await {
            Ok(()) => {
                tracing::info!(user_id = %msg.user_id, session = %name, "Session created");
                self.transport
                    .respond(
                        &msg.chat_id,
                        &format!("Session '{}' created successfully!", escape_html(name)),
                    )
                    .await?;
                self.show_sessions(&msg.chat_id, &msg.user_id).await
            }
            // Stay in the flow so the user can pick another name.
            Err(SessionError::AlreadyExists(_)) => {
                self.retry_create(&msg.user_id).await;
                self.transport
                    .respond(
                        &msg.chat_id,
                        "Session already exists! Choose a different name.",
                    )
                    .await?;
                Ok(())
            }
            Err(SessionError::InvalidName(reason)) => {
                self.retry_create(&msg.user_id).await;
                self.transport
                    .respond(
                        &msg.chat_id,
                        &format!(
                            "Invalid session name ({}). Please send another name:",
                            escape_html(&reason)
                        ),
                    )
                    .await?;
                Ok(())
            }
            Err(e) => {
                tracing::error!(
                    user_id = %msg.user_id,
                    session = %name,
                    error = %e,
                    "Failed to persist new session"
                );
                self.transport
                    .respond(
                        &msg.chat_id,
                        &format!(
                            "❗ Session '{}' was created but could not be saved: {}",
                            escape_html(name),
                            escape_html(&e.to_string())
                        ),
                    )
                    .await?;
                Ok(())
            }
        }
    }

    async fn finish_delete(&self, msg: &ChatMessage, name: &str) -> ChannelResult<()> {
        let reply = match self.sessions.delete_session(&msg.user_id, name).await {
            Ok(()) => {
                tracing::info!(user_id = %msg.user_id, session = %name, "Session deleted");
                format!("Session '{}' deleted successfully!", escape_html(name))
            }
            Err(SessionError::NotFound(_) | SessionError::InvalidName(_)) => {
                "Session not found!".to_string()
            }
            Err(e) => {
                tracing::error!(
                    user_id = %msg.user_id,
                    session = %name,
                    error = %e,
                    "Failed to persist session deletion"
                );
                format!(
                    "❗ Session '{}' was deleted but the change could not be saved: {}",
                    escape_html(name),
                    escape_html(&e.to_string())
                )
            }
        };

        self.transport.respond(&msg.chat_id, &reply).await?;
        self.show_sessions(&msg.chat_id, &msg.user_id).await
    }

    /// Drop any pending flow. Returns whether one was pending.
    pub async fn supersede(&self, user_id: &str) -> bool {
        let previous = self.sessions.set_pending(user_id, PendingFlow::Idle).await;
        if !previous.is_idle() {
            tracing::debug!(user_id = %user_id, ?previous, "Pending session flow abandoned");
        }
        !previous.is_idle()
    }

    /// `/cancel`
    pub async fn cancel(&self, msg: &ChatMessage) -> ChannelResult<()> {
        let text = if self.supersede(&msg.user_id).await {
            "Cancelled."
        } else {
            "Nothing to cancel."
        };
        self.transport.respond(&msg.chat_id, text).await?;
        Ok(())
    }

    /// `/use <name>`
    pub async fn select(&self, msg: &ChatMessage, name: &str) -> ChannelResult<()> {
        let name = name.trim();
        if name.is_empty() {
            let current = self.sessions.selected_session(&msg.user_id).await;
            self.transport
                .respond(
                    &msg.chat_id,
                    &format!(
                        "Active session: {}. Usage: /use &lt;session name&gt;",
                        escape_html(&current)
                    ),
                )
                .await?;
            return Ok(());
        }

        let reply = match self.sessions.select_session(&msg.user_id, name).await {
            Ok(()) => {
                tracing::info!(user_id = %msg.user_id, session = %name, "Session selected");
                format!("Now using session '{}'.", escape_html(name))
            }
            Err(_) => "Session not found!".to_string(),
        };
        self.transport.respond(&msg.chat_id, &reply).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::{Outbound, RecordingTransport};
    use crate::session::HistoryStore;
    use tempfile::TempDir;

    struct Fixture {
        _tmp: TempDir,
        sessions: Arc<SessionManager>,
        transport: Arc<RecordingTransport>,
        lifecycle: SessionLifecycle,
    }

    fn fixture() -> Fixture {
        let tmp = TempDir::new().unwrap();
        let sessions = Arc::new(SessionManager::open(
            HistoryStore::new(tmp.path().join("h.json")),
            "default",
        ));
        let transport = Arc::new(RecordingTransport::new());
        let lifecycle = SessionLifecycle::new(sessions.clone(), transport.clone());
        Fixture {
            _tmp: tmp,
            sessions,
            transport,
            lifecycle,
        }
    }

    fn msg(user: &str, text: &str) -> ChatMessage {
        ChatMessage {
            id: 1,
            chat_id: format!("chat-{user}"),
            user_id: user.into(),
            username: None,
            text: text.into(),
            timestamp: 0,
        }
    }

    fn press(user: &str, data: &str) -> CallbackQuery {
        CallbackQuery {
            id: "cb".into(),
            from_user_id: user.into(),
            from_username: None,
            chat_id: format!("chat-{user}"),
            message_id: 5,
            data: data.into(),
        }
    }

    #[test]
    fn menu_text_marks_active_session() {
        let text = sessions_text(&["default".into(), "work".into()], "work");
        assert!(text.contains("default\nwork (active)"));
        assert!(sessions_text(&[], "default").contains("No sessions found."));
    }

    #[test]
    fn menu_text_escapes_names() {
        let text = sessions_text(&["a<b".into()], "default");
        assert!(text.contains("a&lt;b"));
        assert!(text.contains("/use &lt;name&gt;"));
    }

    #[tokio::test]
    async fn show_sessions_renders_two_buttons() {
        let f = fixture();
        f.lifecycle.show_sessions("chat-1", "1").await.unwrap();

        match &f.transport.calls()[0] {
            Outbound::Respond { buttons: Some(b), text, .. } => {
                assert_eq!(b[0].len(), 2);
                assert_eq!(b[0][0].callback_data, CREATE_SESSION);
                assert_eq!(b[0][1].callback_data, DELETE_SESSION);
                assert!(text.starts_with("Your sessions:\nNo sessions found."));
            }
            other => panic!("unexpected call {other:?}"),
        }
    }

    #[tokio::test]
    async fn create_flow_happy_path() {
        let f = fixture();
        f.lifecycle
            .begin(&press("1", CREATE_SESSION), PendingFlow::AwaitingCreateName)
            .await
            .unwrap();
        assert_eq!(f.sessions.pending("1").await, PendingFlow::AwaitingCreateName);

        f.lifecycle
            .continue_flow(&msg("1", " work "))
            .await
            .unwrap();

        assert!(f.sessions.pending("1").await.is_idle());
        assert_eq!(f.sessions.list_sessions("1").await, vec!["work"]);
        let texts = f.transport.texts();
        assert!(texts.contains(&"Please send the name of the new session:".to_string()));
        assert!(texts.contains(&"Session 'work' created successfully!".to_string()));
        assert!(texts.last().unwrap().starts_with("Your sessions:"));
        assert!(f.sessions.store().load()["1"].contains_key("work"));
    }

    #[tokio::test]
    async fn create_collision_stays_in_flow() {
        let f = fixture();
        f.sessions.create_session("1", "work").await.unwrap();
        f.sessions
            .set_pending("1", PendingFlow::AwaitingCreateName)
            .await;

        f.lifecycle
            .continue_flow(&msg("1", "work"))
            .await
            .unwrap();

        assert_eq!(f.sessions.pending("1").await, PendingFlow::AwaitingCreateName);
        assert_eq!(
            f.transport.last_text().unwrap(),
            "Session already exists! Choose a different name."
        );

        f.lifecycle
            .continue_flow(&msg("1", "play"))
            .await
            .unwrap();
        assert!(f.sessions.pending("1").await.is_idle());
        assert_eq!(f.sessions.list_sessions("1").await, vec!["play", "work"]);
    }

    #[tokio::test]
    async fn invalid_name_keeps_create_flow_armed() {
        let f = fixture();
        f.sessions
            .set_pending("1", PendingFlow::AwaitingCreateName)
            .await;

        f.lifecycle.continue_flow(&msg("1", "   ")).await.unwrap();

        assert_eq!(f.sessions.pending("1").await, PendingFlow::AwaitingCreateName);
        assert!(f
            .transport
            .last_text()
            .unwrap()
            .starts_with("Invalid session name"));
    }

    #[tokio::test]
    async fn text_without_flow_is_ignored() {
        let f = fixture();
        f.lifecycle.continue_flow(&msg("1", "hello")).await.unwrap();
        assert!(f.transport.calls().is_empty());
        assert!(f.sessions.list_sessions("1").await.is_empty());
    }

    #[tokio::test]
    async fn delete_missing_reports_and_returns_idle() {
        let f = fixture();
        f.sessions
            .set_pending("1", PendingFlow::AwaitingDeleteName)
            .await;

        f.lifecycle
            .continue_flow(&msg("1", "ghost"))
            .await
            .unwrap();

        assert!(f.sessions.pending("1").await.is_idle());
        assert!(f.transport.texts().contains(&"Session not found!".to_string()));
    }

    #[tokio::test]
    async fn delete_existing_session() {
        let f = fixture();
        f.sessions.create_session("1", "work").await.unwrap();
        f.sessions
            .set_pending("1", PendingFlow::AwaitingDeleteName)
            .await;

        f.lifecycle
            .continue_flow(&msg("1", "work"))
            .await
            .unwrap();

        assert!(f.sessions.list_sessions("1").await.is_empty());
        assert!(f
            .transport
            .texts()
            .contains(&"Session 'work' deleted successfully!".to_string()));
        assert!(f.sessions.store().load()["1"].is_empty());
    }

    #[tokio::test]
    async fn pressing_delete_supersedes_create() {
        let f = fixture();
        f.lifecycle
            .begin(&press("1", CREATE_SESSION), PendingFlow::AwaitingCreateName)
            .await
            .unwrap();
        f.lifecycle
            .begin(&press("1", DELETE_SESSION), PendingFlow::AwaitingDeleteName)
            .await
            .unwrap();
        assert_eq!(f.sessions.pending("1").await, PendingFlow::AwaitingDeleteName);
    }

    #[tokio::test]
    async fn cancel_reports_whether_anything_was_pending() {
        let f = fixture();
        f.lifecycle.cancel(&msg("1", "/cancel")).await.unwrap();
        assert_eq!(f.transport.last_text().unwrap(), "Nothing to cancel.");

        f.sessions
            .set_pending("1", PendingFlow::AwaitingCreateName)
            .await;
        f.lifecycle.cancel(&msg("1", "/cancel")).await.unwrap();
        assert_eq!(f.transport.last_text().unwrap(), "Cancelled.");
        assert!(f.sessions.pending("1").await.is_idle());
    }

    #[tokio::test]
    async fn select_switches_active_session() {
        let f = fixture();
        f.sessions.create_session("1", "work").await.unwrap();

        f.lifecycle.select(&msg("1", "/use work"), "work").await.unwrap();
        assert_eq!(f.sessions.selected_session("1").await, "work");
        assert_eq!(f.transport.last_text().unwrap(), "Now using session 'work'.");

        f.lifecycle.select(&msg("1", "/use nope"), "nope").await.unwrap();
        assert_eq!(f.transport.last_text().unwrap(), "Session not found!");
        assert_eq!(f.sessions.selected_session("1").await, "work");
    }
}
