//! In-memory transport that records every outbound call.
//!
//! Lets tests drive the dispatcher without a Telegram connection.

use crate::message::{Keyboard, MessageRef};
use crate::traits::{ChannelError, ChannelResult, ChatTransport};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Mutex;

/// One recorded outbound call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Respond {
        message: MessageRef,
        text: String,
        buttons: Option<Keyboard>,
    },
    Edit {
        message: MessageRef,
        text: String,
        buttons: Option<Keyboard>,
    },
    Answer {
        callback_id: String,
        text: Option<String>,
        alert: bool,
    },
}

impl Outbound {
    /// User-visible text of the call, if any.
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Respond { text, .. } | Self::Edit { text, .. } => Some(text),
            Self::Answer { text, .. } => text.as_deref(),
        }
    }
}

/// Transport that keeps outbound calls in memory.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    calls: Mutex<Vec<Outbound>>,
    next_id: AtomicI64,
    fail_sends: AtomicBool,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with `SendFailed`.
    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<Outbound> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Texts of every call in order.
    pub fn texts(&self) -> Vec<String> {
        self.calls()
            .iter()
            .filter_map(|c| c.text().map(String::from))
            .collect()
    }

    pub fn last_text(&self) -> Option<String> {
        self.texts().pop()
    }

    pub fn clear(&self) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.clear();
        }
    }

    fn record(&self, call: Outbound) -> ChannelResult<()> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(ChannelError::SendFailed("recording transport set to fail".into()));
        }
        self.calls
            .lock()
            .map_err(|e| ChannelError::SendFailed(format!("Lock error: {e}")))?
            .push(call);
        Ok(())
    }

    fn next_ref(&self, chat_id: &str) -> MessageRef {
        MessageRef {
            chat_id: chat_id.to_string(),
            message_id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
        }
    }
}

#[async_trait]
impl ChatTransport for RecordingTransport {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn respond(&self, chat_id: &str, text: &str) -> ChannelResult<MessageRef> {
        let message = self.next_ref(chat_id);
        self.record(Outbound::Respond {
            message: message.clone(),
            text: text.to_string(),
            buttons: None,
        })?;
        Ok(message)
    }

    async fn respond_with_buttons(
        &self,
        chat_id: &str,
        text: &str,
        buttons: Keyboard,
    ) -> ChannelResult<MessageRef> {
        let message = self.next_ref(chat_id);
        self.record(Outbound::Respond {
            message: message.clone(),
            text: text.to_string(),
            buttons: Some(buttons),
        })?;
        Ok(message)
    }

    async fn edit(
        &self,
        message: &MessageRef,
        text: &str,
        buttons: Option<Keyboard>,
    ) -> ChannelResult<()> {
        self.record(Outbound::Edit {
            message: message.clone(),
            text: text.to_string(),
            buttons,
        })
    }

    async fn answer(
        &self,
        callback_id: &str,
        text: Option<&str>,
        alert: bool,
    ) -> ChannelResult<()> {
        self.record(Outbound::Answer {
            callback_id: callback_id.to_string(),
            text: text.map(String::from),
            alert,
        })
    }
}
