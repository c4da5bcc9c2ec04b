//! Single entry point for inbound events.
//!
//! Commands run directly. Plain text is routed to the sender's pending
//! session flow, if any. Button presses are routed by callback data.

use crate::chat::ChatProcessor;
use crate::inference::InferenceClient;
use crate::lifecycle::{SessionLifecycle, CREATE_SESSION, DELETE_SESSION};
use crate::message::{CallbackQuery, ChatMessage, InboundEvent};
use crate::panel::{Settings, SettingsPanel, TOGGLE_STREAM};
use crate::session::{PendingFlow, SessionManager};
use crate::traits::{ChannelResult, ChatTransport};
use std::sync::Arc;

pub const HELP_TEXT: &str = "Hello! Ask me anything using /ask &lt;question&gt;. \
Use /sessions to manage your sessions and /use &lt;name&gt; to switch between them.";

/// A parsed slash command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Ask(String),
    Sessions,
    Use(String),
    Cancel,
    Panel,
    Unknown(String),
    /// `/cmd@otherbot` in a group chat
    AddressedElsewhere,
}

impl Command {
    /// Parse `/name[@bot] args`. Returns `None` for plain text.
    pub fn parse(text: &str, bot_username: Option<&str>) -> Option<Self> {
        let rest = text.trim_start().strip_prefix('/')?;
        let (head, args) = match rest.split_once(char::is_whitespace) {
            Some((head, args)) => (head, args.trim()),
            None => (rest, ""),
        };

        let name = match head.split_once('@') {
            Some((name, target)) => {
                if bot_username.is_some_and(|me| !target.eq_ignore_ascii_case(me)) {
                    return Some(Self::AddressedElsewhere);
                }
                name
            }
            None => head,
        };

        Some(match name.to_ascii_lowercase().as_str() {
            "start" | "help" => Self::Start,
            "ask" => Self::Ask(args.to_string()),
            "sessions" => Self::Sessions,
            "use" => Self::Use(args.to_string()),
            "cancel" => Self::Cancel,
            "panel" => Self::Panel,
            _ => Self::Unknown(name.to_string()),
        })
    }
}

pub struct Dispatcher {
    sessions: Arc<SessionManager>,
    transport: Arc<dyn ChatTransport>,
    chat: ChatProcessor,
    lifecycle: SessionLifecycle,
    panel: SettingsPanel,
    bot_username: Option<String>,
}

impl Dispatcher {
    pub fn new(
        sessions: Arc<SessionManager>,
        inference: Arc<dyn InferenceClient>,
        transport: Arc<dyn ChatTransport>,
        settings: Arc<Settings>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            chat: ChatProcessor::new(
                sessions.clone(),
                inference,
                transport.clone(),
                settings.clone(),
                model,
            ),
            lifecycle: SessionLifecycle::new(sessions.clone(), transport.clone()),
            panel: SettingsPanel::new(settings, transport.clone()),
            sessions,
            transport,
            bot_username: None,
        }
    }

    /// Only accept `/cmd@name` suffixes naming this bot.
    pub fn with_bot_username(mut self, username: Option<String>) -> Self {
        self.bot_username = username;
        self
    }

    /// Handle one event. Failures are logged, never propagated.
    pub async fn dispatch(&self, event: InboundEvent) {
        let user_id = event.user_id().to_string();
        let chat_id = event.chat_id().to_string();

        let result = match event {
            InboundEvent::Message(msg) => self.handle_message(&msg).await,
            InboundEvent::Callback(query) => self.handle_callback(&query).await,
        };

        if let Err(e) = result {
            tracing::error!(
                user_id = %user_id,
                chat_id = %chat_id,
                transport = self.transport.name(),
                error = %e,
                "Failed to handle event"
            );
        }
    }

    async fn handle_message(&self, msg: &ChatMessage) -> ChannelResult<()> {
        match Command::parse(&msg.text, self.bot_username.as_deref()) {
            Some(Command::AddressedElsewhere) => Ok(()),
            Some(command) => {
                self.sessions.ensure_user(&msg.user_id).await;
                if command != Command::Cancel {
                    self.lifecycle.supersede(&msg.user_id).await;
                }
                self.run_command(msg, command).await
            }
            None => self.lifecycle.continue_flow(msg).await,
        }
    }

    async fn run_command(&self, msg: &ChatMessage, command: Command) -> ChannelResult<()> {
        tracing::debug!(user_id = %msg.user_id, ?command, "Command received");

        match command {
            Command::Start => {
                self.transport.respond(&msg.chat_id, HELP_TEXT).await?;
                Ok(())
            }
            Command::Ask(question) => self.chat.ask(msg, &question).await,
            Command::Sessions => {
                self.lifecycle
                    .show_sessions(&msg.chat_id, &msg.user_id)
                    .await
            }
            Command::Use(name) => self.lifecycle.select(msg, &name).await,
            Command::Cancel => self.lifecycle.cancel(msg).await,
            Command::Panel => self.panel.show(msg).await,
            Command::Unknown(name) => {
                tracing::debug!(user_id = %msg.user_id, command = %name, "Unknown command");
                Ok(())
            }
            Command::AddressedElsewhere => Ok(()),
        }
    }

    async fn handle_callback(&self, query: &CallbackQuery) -> ChannelResult<()> {
        tracing::debug!(
            "Received callback query: id={}, data={}, from={}",
            query.id,
            query.data,
            query.from_user_id
        );

        match query.data.as_str() {
            CREATE_SESSION => {
                self.lifecycle
                    .begin(query, PendingFlow::AwaitingCreateName)
                    .await
            }
            DELETE_SESSION => {
                self.lifecycle
                    .begin(query, PendingFlow::AwaitingDeleteName)
                    .await
            }
            TOGGLE_STREAM => self.panel.toggle(query).await,
            other => {
                tracing::warn!(data = %other, user_id = %query.from_user_id, "Invalid callback data");
                self.transport
                    .answer(&query.id, Some("Unknown action."), false)
                    .await
            }
        }
    }
}
