//! Telegram Bot API adapter.
//!
//! Long-polls `getUpdates` for messages and button presses and implements
//! [`ChatTransport`] on top of `sendMessage`, `editMessageText` and
//! `answerCallbackQuery`. Outgoing text is Telegram HTML; when Telegram
//! rejects the markup the request is retried without `parse_mode`.

pub mod format;

use crate::message::{CallbackQuery, ChatMessage, InboundEvent, Keyboard, MessageRef};
use crate::traits::{ChannelError, ChannelResult, ChatTransport};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::mpsc;

/// Telegram's per-message text limit.
pub const MAX_MESSAGE_LEN: usize = 4096;

const DEFAULT_API_BASE: &str = "https://api.telegram.org";
const RETRY_DELAY: Duration = Duration::from_secs(5);

/// Telegram channel - long-polls the Bot API for updates.
pub struct TelegramChannel {
    bot_token: String,
    api_base: String,
    client: reqwest::Client,
    poll_timeout_secs: u64,
}

impl TelegramChannel {
    /// Create a new Telegram channel.
    pub fn new(bot_token: impl Into<String>, poll_timeout_secs: u64) -> Self {
        let client = reqwest::Client::builder()
            // Must outlive the server-side long-poll window.
            .timeout(Duration::from_secs(poll_timeout_secs + 15))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            bot_token: bot_token.into(),
            api_base: DEFAULT_API_BASE.to_string(),
            client,
            poll_timeout_secs,
        }
    }

    /// Point the client at another Bot API server.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn api_url(&self, method: &str) -> String {
        format!("{}/bot{}/{method}", self.api_base, self.bot_token)
    }

    /// Verify the token with `getMe` and return the bot's username.
    pub async fn get_me(&self) -> ChannelResult<Option<String>> {
        let me = self.call("getMe", &json!({})).await.map_err(|e| match e {
            ChannelError::SendFailed(msg) => ChannelError::Auth(format!("Invalid bot token: {msg}")),
            other => other,
        })?;

        let username = me
            .get("username")
            .and_then(Value::as_str)
            .map(String::from);
        tracing::info!(
            bot = %username.as_deref().unwrap_or("unknown"),
            "Telegram channel initialized"
        );
        Ok(username)
    }

    /// Poll for updates and forward them to `tx` until the receiver closes.
    pub async fn listen(&self, tx: mpsc::Sender<InboundEvent>) -> ChannelResult<()> {
        let mut offset: i64 = 0;

        tracing::info!("Telegram channel listening for messages...");

        loop {
            if tx.is_closed() {
                return Ok(());
            }

            let body = json!({
                "offset": offset,
                "timeout": self.poll_timeout_secs,
                "allowed_updates": ["message", "callback_query"]
            });

            let updates = match self.call("getUpdates", &body).await {
                Ok(Value::Array(updates)) => updates,
                Ok(other) => {
                    tracing::warn!(result = %other, "Unexpected getUpdates result");
                    tokio::time::sleep(RETRY_DELAY).await;
                    continue;
                }
                Err(e @ ChannelError::Auth(_)) => return Err(e),
                Err(e) => {
                    tracing::warn!("Telegram poll error: {e}");
                    tokio::time::sleep(RETRY_DELAY).await;
                    continue;
                }
            };

            for update in &updates {
                if let Some(uid) = update.get("update_id").and_then(Value::as_i64) {
                    offset = offset.max(uid + 1);
                }

                let Some(event) = parse_update(update) else {
                    tracing::debug!("Skipping update without text or button data");
                    continue;
                };

                tracing::info!(
                    channel = "telegram",
                    user_id = %event.user_id(),
                    chat_id = %event.chat_id(),
                    kind = match &event {
                        InboundEvent::Message(_) => "text",
                        InboundEvent::Callback(_) => "callback",
                    },
                    "IM event received"
                );

                if tx.send(event).await.is_err() {
                    return Ok(());
                }
            }
        }
    }

    /// POST a Bot API method and return its `result`.
    async fn call(&self, method: &str, body: &Value) -> ChannelResult<Value> {
        let resp = self
            .client
            .post(self.api_url(method))
            .json(body)
            .send()
            .await
            .map_err(|e| ChannelError::Connection(e.to_string()))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| ChannelError::Connection(e.to_string()))?;

        if status.as_u16() == 401 {
            return Err(ChannelError::Auth(format!("Telegram {method}: {text}")));
        }
        if !status.is_success() {
            return Err(ChannelError::SendFailed(format!(
                "Telegram {method} failed ({}): {text}",
                status.as_u16()
            )));
        }

        let data: Value = serde_json::from_str(&text)
            .map_err(|e| ChannelError::InvalidMessage(format!("Telegram {method}: {e}")))?;
        Ok(data.get("result").cloned().unwrap_or(Value::Null))
    }

    /// Like [`Self::call`] with `parse_mode=HTML`, retried as plain text when
    /// Telegram cannot parse the entities.
    async fn call_html(&self, method: &str, mut body: Value) -> ChannelResult<Value> {
        body["parse_mode"] = json!("HTML");

        match self.call(method, &body).await {
            Err(ChannelError::SendFailed(err)) if err.contains("parse entities") => {
                tracing::warn!(
                    "Telegram HTML parsing failed, retrying without parse_mode: {}",
                    err
                );
                if let Some(fields) = body.as_object_mut() {
                    fields.remove("parse_mode");
                }
                self.call(method, &body).await
            }
            other => other,
        }
    }

    async fn send_chunk(
        &self,
        chat_id: &str,
        text: &str,
        buttons: Option<&Keyboard>,
    ) -> ChannelResult<MessageRef> {
        let mut body = json!({
            "chat_id": chat_id,
            "text": text,
        });
        if let Some(buttons) = buttons {
            body["reply_markup"] = json!({ "inline_keyboard": buttons });
        }

        let sent = self.call_html("sendMessage", body).await?;
        let message_id = sent
            .get("message_id")
            .and_then(Value::as_i64)
            .ok_or_else(|| ChannelError::InvalidMessage("Missing message_id in response".into()))?;

        Ok(MessageRef {
            chat_id: chat_id.to_string(),
            message_id,
        })
    }

    async fn send_text(
        &self,
        chat_id: &str,
        text: &str,
        buttons: Option<Keyboard>,
    ) -> ChannelResult<MessageRef> {
        let chunks = split_message(text, MAX_MESSAGE_LEN);
        let last = chunks.len().saturating_sub(1);

        let mut sent = None;
        for (i, chunk) in chunks.iter().enumerate() {
            // Buttons ride on the final chunk.
            let markup = if i == last { buttons.as_ref() } else { None };
            sent = Some(self.send_chunk(chat_id, chunk, markup).await?);
        }
        sent.ok_or_else(|| ChannelError::InvalidMessage("empty message".into()))
    }
}

/// Turn one raw update into an inbound event.
///
/// Only text messages and button presses with data are relevant; anything
/// else yields `None`.
pub fn parse_update(update: &Value) -> Option<InboundEvent> {
    if let Some(cb) = update.get("callback_query") {
        return parse_callback_query(cb).map(InboundEvent::Callback);
    }

    let message = update.get("message")?;
    let text = message.get("text")?.as_str()?.to_string();
    let chat_id = message.get("chat")?.get("id")?.as_i64()?.to_string();
    let from = message.get("from")?;
    let user_id = from.get("id")?.as_i64()?.to_string();

    Some(InboundEvent::Message(ChatMessage {
        id: message.get("message_id").and_then(Value::as_i64).unwrap_or_default(),
        chat_id,
        user_id,
        username: from
            .get("username")
            .and_then(Value::as_str)
            .map(String::from),
        text,
        timestamp: message
            .get("date")
            .and_then(Value::as_i64)
            .map(|secs| secs * 1000)
            .unwrap_or_else(|| chrono::Utc::now().timestamp_millis()),
    }))
}

fn parse_callback_query(callback: &Value) -> Option<CallbackQuery> {
    let id = callback.get("id")?.as_str()?.to_string();
    let data = callback.get("data")?.as_str()?.to_string();

    let from = callback.get("from")?;
    let from_user_id = from.get("id")?.as_i64()?.to_string();
    let from_username = from
        .get("username")
        .and_then(|u| u.as_str())
        .map(String::from);

    let message = callback.get("message")?;
    let chat_id = message.get("chat")?.get("id")?.as_i64()?.to_string();
    let message_id = message.get("message_id")?.as_i64()?;

    Some(CallbackQuery {
        id,
        from_user_id,
        from_username,
        chat_id,
        message_id,
        data,
    })
}

/// Split a message into chunks that fit within `max_len` bytes.
///
/// Prefers paragraph, line, sentence and word boundaries, and never cuts
/// through a UTF-8 character.
pub fn split_message(message: &str, max_len: usize) -> Vec<String> {
    if message.len() <= max_len {
        return vec![message.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = message;

    while !remaining.is_empty() {
        if remaining.len() <= max_len {
            chunks.push(remaining.to_string());
            break;
        }

        let mut limit = max_len;
        while !remaining.is_char_boundary(limit) {
            limit -= 1;
        }

        let chunk = &remaining[..limit];
        let split_pos = chunk
            .rfind("\n\n")
            .or_else(|| chunk.rfind('\n'))
            .or_else(|| chunk.rfind(". ").map(|p| p + 1))
            .or_else(|| chunk.rfind(' '))
            .unwrap_or(limit);

        let actual_split = if split_pos == 0 { limit } else { split_pos };

        chunks.push(remaining[..actual_split].to_string());
        remaining = remaining[actual_split..].trim_start();
    }

    chunks
}

#[async_trait]
impl ChatTransport for TelegramChannel {
    fn name(&self) -> &'static str {
        "telegram"
    }

    async fn respond(&self, chat_id: &str, text: &str) -> ChannelResult<MessageRef> {
        self.send_text(chat_id, text, None).await
    }

    async fn respond_with_buttons(
        &self,
        chat_id: &str,
        text: &str,
        buttons: Keyboard,
    ) -> ChannelResult<MessageRef> {
        self.send_text(chat_id, text, Some(buttons)).await
    }

    async fn edit(
        &self,
        message: &MessageRef,
        text: &str,
        buttons: Option<Keyboard>,
    ) -> ChannelResult<()> {
        let mut body = json!({
            "chat_id": message.chat_id,
            "message_id": message.message_id,
            "text": text,
        });
        if let Some(buttons) = buttons {
            body["reply_markup"] = json!({ "inline_keyboard": buttons });
        }

        match self.call_html("editMessageText", body).await {
            Ok(_) => Ok(()),
            Err(ChannelError::SendFailed(err)) if err.contains("message is not modified") => {
                tracing::debug!("Edit skipped, message unchanged");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn answer(
        &self,
        callback_id: &str,
        text: Option<&str>,
        alert: bool,
    ) -> ChannelResult<()> {
        let mut body = json!({
            "callback_query_id": callback_id,
            "show_alert": alert
        });
        if let Some(t) = text {
            body["text"] = json!(t);
        }

        self.call("answerCallbackQuery", &body).await?;
        Ok(())
    }
}
