//! Transport trait the bot core talks to.

use crate::message::{Keyboard, MessageRef};
use async_trait::async_trait;

/// Result type for channel operations.
pub type ChannelResult<T> = Result<T, ChannelError>;

/// Channel error type.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Message send failed: {0}")]
    SendFailed(String),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Channel not ready")]
    NotReady,
}

/// Outbound operations on a chat platform.
///
/// Implemented by the Telegram adapter; tests use `RecordingTransport`.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Get the transport name.
    fn name(&self) -> &'static str;

    /// Send a text message to a chat.
    async fn respond(&self, chat_id: &str, text: &str) -> ChannelResult<MessageRef>;

    /// Send a text message with inline buttons.
    async fn respond_with_buttons(
        &self,
        chat_id: &str,
        text: &str,
        buttons: Keyboard,
    ) -> ChannelResult<MessageRef>;

    /// Replace the text (and optionally the buttons) of a sent message.
    async fn edit(
        &self,
        message: &MessageRef,
        text: &str,
        buttons: Option<Keyboard>,
    ) -> ChannelResult<()>;

    /// Acknowledge a button press, optionally as a modal alert.
    async fn answer(&self, callback_id: &str, text: Option<&str>, alert: bool)
        -> ChannelResult<()>;
}
