//! Owner-only settings panel.

use crate::message::{CallbackQuery, ChatMessage, InlineButton, Keyboard};
use crate::traits::{ChannelResult, ChatTransport};
use relay_common::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub const TOGGLE_STREAM: &str = "toggle_stream";

const PANEL_TITLE: &str = "Settings Panel:";

/// Process-wide settings the owner can change at runtime.
#[derive(Debug)]
pub struct Settings {
    owner_id: String,
    stream: AtomicBool,
}

impl Settings {
    pub fn new(owner_id: impl Into<String>, stream: bool) -> Self {
        Self {
            owner_id: owner_id.into(),
            stream: AtomicBool::new(stream),
        }
    }

    pub fn is_owner(&self, user_id: &str) -> bool {
        !self.owner_id.is_empty() && self.owner_id == user_id
    }

    /// Whether inference requests ask for streamed output.
    pub fn stream_enabled(&self) -> bool {
        self.stream.load(Ordering::SeqCst)
    }

    /// Flip the stream flag on behalf of `user_id`, returning the new value.
    pub fn toggle_stream(&self, user_id: &str) -> Result<bool> {
        if !self.is_owner(user_id) {
            return Err(Error::Forbidden(format!(
                "user {user_id} may not toggle stream mode"
            )));
        }
        Ok(!self.stream.fetch_xor(true, Ordering::SeqCst))
    }
}

fn on_off(enabled: bool) -> &'static str {
    if enabled {
        "On"
    } else {
        "Off"
    }
}

/// Single-button keyboard reflecting the current stream state.
pub fn panel_keyboard(stream: bool) -> Keyboard {
    vec![vec![InlineButton::new(
        format!("Toggle Stream Response (Currently {})", on_off(stream)),
        TOGGLE_STREAM,
    )]]
}

/// `/panel` command and the toggle button.
pub struct SettingsPanel {
    settings: Arc<Settings>,
    transport: Arc<dyn ChatTransport>,
}

impl SettingsPanel {
    pub fn new(settings: Arc<Settings>, transport: Arc<dyn ChatTransport>) -> Self {
        Self {
            settings,
            transport,
        }
    }

    pub async fn show(&self, msg: &ChatMessage) -> ChannelResult<()> {
        if !self.settings.is_owner(&msg.user_id) {
            tracing::warn!(user_id = %msg.user_id, "Unauthorized access attempt to panel");
            self.transport
                .respond(&msg.chat_id, "You are not authorized to access this panel.")
                .await?;
            return Ok(());
        }

        self.transport
            .respond_with_buttons(
                &msg.chat_id,
                PANEL_TITLE,
                panel_keyboard(self.settings.stream_enabled()),
            )
            .await?;
        Ok(())
    }

    pub async fn toggle(&self, query: &CallbackQuery) -> ChannelResult<()> {
        match self.settings.toggle_stream(&query.from_user_id) {
            Ok(enabled) => {
                tracing::info!(
                    user_id = %query.from_user_id,
                    stream = enabled,
                    "Stream response mode toggled"
                );
                self.transport
                    .edit(&query.message_ref(), PANEL_TITLE, Some(panel_keyboard(enabled)))
                    .await?;
                self.transport
                    .answer(
                        &query.id,
                        Some(&format!(
                            "Stream response mode toggled! Currently {}.",
                            on_off(enabled)
                        )),
                        false,
                    )
                    .await
            }
            Err(e) => {
                tracing::warn!(
                    user_id = %query.from_user_id,
                    error = %e,
                    "Unauthorized toggle attempt"
                );
                self.transport
                    .answer(
                        &query.id,
                        Some("You are not authorized to perform this action."),
                        true,
                    )
                    .await
            }
        }
    }
}
