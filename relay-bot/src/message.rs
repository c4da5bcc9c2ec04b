//! Message types exchanged with the chat transport.

use serde::{Deserialize, Serialize};

/// Text message received from a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Platform message id
    pub id: i64,
    /// Chat the message was posted in (replies go here)
    pub chat_id: String,
    /// Sender identifier
    pub user_id: String,
    /// Sender username, if the platform exposes one
    #[serde(default)]
    pub username: Option<String>,
    pub text: String,
    /// Timestamp (Unix millis)
    pub timestamp: i64,
}

/// Inline button press.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from_user_id: String,
    #[serde(default)]
    pub from_username: Option<String>,
    pub chat_id: String,
    /// Message that carried the button
    pub message_id: i64,
    pub data: String,
}

impl CallbackQuery {
    /// The message the pressed button belongs to.
    pub fn message_ref(&self) -> MessageRef {
        MessageRef {
            chat_id: self.chat_id.clone(),
            message_id: self.message_id,
        }
    }
}

/// Everything the dispatcher can receive.
#[derive(Debug, Clone)]
pub enum InboundEvent {
    Message(ChatMessage),
    Callback(CallbackQuery),
}

impl InboundEvent {
    pub fn user_id(&self) -> &str {
        match self {
            Self::Message(m) => &m.user_id,
            Self::Callback(c) => &c.from_user_id,
        }
    }

    pub fn chat_id(&self) -> &str {
        match self {
            Self::Message(m) => &m.chat_id,
            Self::Callback(c) => &c.chat_id,
        }
    }
}

/// A single inline keyboard button.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineButton {
    pub text: String,
    pub callback_data: String,
}

impl InlineButton {
    pub fn new(text: impl Into<String>, callback_data: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            callback_data: callback_data.into(),
        }
    }
}

/// Rows of inline buttons.
pub type Keyboard = Vec<Vec<InlineButton>>;

/// Handle to a message the bot sent, used to edit it later.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageRef {
    pub chat_id: String,
    pub message_id: i64,
}
