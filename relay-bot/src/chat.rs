//! Chat turn processing: transcript bookkeeping around one inference call.

use crate::inference::{ChatRequest, InferenceClient, InferenceError};
use crate::message::{ChatMessage, MessageRef};
use crate::panel::Settings;
use crate::session::{SessionManager, Turn};
use crate::telegram::format::{escape_html, render_reply, RESPONSE_HEADER};
use crate::telegram::{split_message, MAX_MESSAGE_LEN};
use crate::traits::{ChannelResult, ChatTransport};
use std::sync::Arc;

pub const THINKING: &str = "🤔 Thinking...";
pub const ASK_USAGE: &str = "Please provide a question. Usage: /ask &lt;question&gt;";

/// Raw answer text per outgoing message, leaving room for the header and
/// HTML escaping.
const ANSWER_CHUNK_LEN: usize = 3000;

/// Below this, rendered HTML always fits in one message.
const MIN_RESPLIT_LEN: usize = 256;

/// User-facing text for a failed turn.
pub fn failure_text(err: &InferenceError) -> String {
    match err {
        InferenceError::Transport(e) => format!(
            "❗ Epic fail, here's what caused the error: {}",
            escape_html(e)
        ),
        // Ollama answers 500 when generation runs past its own limits.
        InferenceError::Status(500) => {
            "❗ Timeout Error, please ask the AI to provide a shorter answer.".to_string()
        }
        InferenceError::Status(status) => format!("❗ Server error: {status}"),
        InferenceError::Parse(e) => {
            format!("❗ Failed to parse JSON response: {}", escape_html(e))
        }
    }
}

/// Split an answer into rendered HTML messages, header on the first.
pub fn answer_messages(content: &str) -> Vec<String> {
    let mut messages = Vec::new();
    render_chunks(content, ANSWER_CHUNK_LEN, &mut messages);
    if let Some(first) = messages.first_mut() {
        first.insert_str(0, RESPONSE_HEADER);
    }
    messages
}

/// Render `raw` in pieces of at most `max_raw` bytes. A piece whose HTML
/// outgrows one message is re-split from the raw text, so tags and
/// entities are never cut.
fn render_chunks(raw: &str, max_raw: usize, out: &mut Vec<String>) {
    let budget = MAX_MESSAGE_LEN - RESPONSE_HEADER.len();
    for chunk in split_message(raw, max_raw) {
        let html = render_reply(&chunk);
        if html.len() <= budget || chunk.len() <= MIN_RESPLIT_LEN {
            out.push(html);
        } else {
            render_chunks(&chunk, chunk.len() / 2, out);
        }
    }
}

pub struct ChatProcessor {
    sessions: Arc<SessionManager>,
    inference: Arc<dyn InferenceClient>,
    transport: Arc<dyn ChatTransport>,
    settings: Arc<Settings>,
    model: String,
}

impl ChatProcessor {
    pub fn new(
        sessions: Arc<SessionManager>,
        inference: Arc<dyn InferenceClient>,
        transport: Arc<dyn ChatTransport>,
        settings: Arc<Settings>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            sessions,
            inference,
            transport,
            settings,
            model: model.into(),
        }
    }

    /// Run one turn against the user's active session.
    ///
    /// The user turn is recorded and persisted before the call; the
    /// assistant turn only on success. Turns on the same session never
    /// interleave.
    pub async fn run_turn(&self, user_id: &str, question: &str) -> Result<String, InferenceError> {
        let (session, _turn) = self.sessions.lock_selected(user_id).await;

        let transcript = self
            .sessions
            .append_turn(user_id, &session, Turn::user(question))
            .await;
        self.persist_logged(user_id, &session).await;

        let request = ChatRequest {
            model: self.model.clone(),
            messages: transcript,
            stream: self.settings.stream_enabled(),
        };

        tracing::info!(
            user_id = %user_id,
            session = %session,
            backend = %self.inference.name(),
            turns = request.messages.len(),
            stream = request.stream,
            "Sending chat request"
        );

        match self.inference.chat(&request).await {
            Ok(content) => {
                let kept = self
                    .sessions
                    .append_existing(user_id, &session, Turn::assistant(content.clone()))
                    .await;
                if kept {
                    self.persist_logged(user_id, &session).await;
                } else {
                    tracing::warn!(
                        user_id = %user_id,
                        session = %session,
                        "Session deleted during turn; answer not recorded"
                    );
                }
                tracing::info!(
                    user_id = %user_id,
                    session = %session,
                    answer_len = content.len(),
                    "Chat turn completed"
                );
                Ok(content)
            }
            Err(e) => {
                let status = match &e {
                    InferenceError::Status(code) => Some(*code),
                    _ => None,
                };
                tracing::error!(
                    user_id = %user_id,
                    session = %session,
                    status = ?status,
                    error = %e,
                    "Chat turn failed"
                );
                Err(e)
            }
        }
    }

    /// `/ask <question>`: placeholder, turn, then the answer or failure text.
    pub async fn ask(&self, msg: &ChatMessage, question: &str) -> ChannelResult<()> {
        let question = question.trim();
        if question.is_empty() {
            self.transport.respond(&msg.chat_id, ASK_USAGE).await?;
            return Ok(());
        }

        let thinking = self.transport.respond(&msg.chat_id, THINKING).await?;

        match self.run_turn(&msg.user_id, question).await {
            Ok(content) => self.deliver(&thinking, &content).await,
            Err(e) => self.transport.edit(&thinking, &failure_text(&e), None).await,
        }
    }

    async fn deliver(&self, thinking: &MessageRef, content: &str) -> ChannelResult<()> {
        let mut messages = answer_messages(content).into_iter();
        if let Some(first) = messages.next() {
            self.transport.edit(thinking, &first, None).await?;
        }
        for rest in messages {
            self.transport.respond(&thinking.chat_id, &rest).await?;
        }
        Ok(())
    }

    async fn persist_logged(&self, user_id: &str, session: &str) {
        if let Err(e) = self.sessions.persist().await {
            tracing::error!(
                user_id = %user_id,
                session = %session,
                error = %e,
                "Failed to save chat histories"
            );
        }
    }
}
