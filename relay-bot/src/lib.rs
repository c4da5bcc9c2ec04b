//! Relay Bot - Telegram front end for a local Ollama server.
//!
//! Every Telegram user gets named chat sessions whose transcripts are sent
//! to Ollama's `/api/chat` with each question and kept in a JSON snapshot
//! file across restarts.
//!
//! ```text
//! Telegram ── getUpdates ──→ Dispatcher ──→ ChatProcessor ──→ Ollama
//!    ↑                          │                 │
//!    └──── sendMessage/edit ────┴── SessionManager ┴──→ histories.json
//! ```

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod chat;
pub mod dispatcher;
pub mod inference;
pub mod lifecycle;
pub mod message;
pub mod panel;
#[doc(hidden)]
pub mod recording;
pub mod session;
pub mod telegram;
pub mod traits;

pub use chat::ChatProcessor;
pub use dispatcher::{Command, Dispatcher};
pub use inference::{ChatRequest, InferenceClient, InferenceError, OllamaClient};
pub use lifecycle::SessionLifecycle;
pub use message::{CallbackQuery, ChatMessage, InboundEvent, InlineButton, Keyboard, MessageRef};
pub use panel::{Settings, SettingsPanel};
pub use session::{HistoryStore, PendingFlow, SessionError, SessionManager, Turn};
pub use telegram::TelegramChannel;
pub use traits::{ChannelError, ChannelResult, ChatTransport};

use anyhow::Context;
use relay_common::logging::generate_trace_id;
use relay_common::Config;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::Instrument;

const LISTENER_INITIAL_BACKOFF_SECS: u64 = 2;
const LISTENER_MAX_BACKOFF_SECS: u64 = 60;

/// Run the bot until a shutdown signal arrives.
pub async fn run(config: &Config) -> anyhow::Result<()> {
    let store = HistoryStore::new(config.history.resolved_path());
    tracing::info!(path = %store.path().display(), "Loading chat histories");
    let sessions = Arc::new(SessionManager::open(store, &config.history.default_session));

    let settings = Arc::new(Settings::new(
        config.telegram.owner_id.clone(),
        config.ollama.stream,
    ));
    let inference: Arc<dyn InferenceClient> = Arc::new(OllamaClient::new(
        &config.ollama.base_url,
        Duration::from_secs(config.ollama.timeout_secs),
    ));

    let telegram = Arc::new(TelegramChannel::new(
        config.telegram.bot_token.clone(),
        config.telegram.poll_timeout_secs,
    ));
    let bot_username = telegram
        .get_me()
        .await
        .context("Telegram rejected the bot token")?;

    let dispatcher = Arc::new(
        Dispatcher::new(
            sessions.clone(),
            inference,
            telegram.clone(),
            settings,
            config.ollama.model.clone(),
        )
        .with_bot_username(bot_username),
    );

    tracing::info!(
        ollama = %config.ollama.base_url,
        model = %config.ollama.model,
        stream = config.ollama.stream,
        "Relay bot started"
    );

    let (tx, mut rx) = mpsc::channel::<InboundEvent>(100);
    let listener = spawn_supervised_listener(telegram, tx);

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    let mut handlers = JoinSet::new();
    let mut listener_died = false;
    loop {
        tokio::select! {
            () = &mut shutdown => break,
            event = rx.recv() => {
                let Some(event) = event else {
                    listener_died = true;
                    break;
                };
                let dispatcher = dispatcher.clone();
                let span = tracing::info_span!("event", trace_id = %generate_trace_id());
                handlers.spawn(async move { dispatcher.dispatch(event).await }.instrument(span));
            }
            Some(_) = handlers.join_next(), if !handlers.is_empty() => {}
        }
    }

    listener.abort();

    // In-flight turns may still be waiting on Ollama.
    let drain = async { while handlers.join_next().await.is_some() {} };
    let grace = Duration::from_secs(config.ollama.timeout_secs + 5);
    if tokio::time::timeout(grace, drain).await.is_err() {
        tracing::warn!("Abandoning unfinished handlers at shutdown");
    }

    sessions
        .persist()
        .await
        .context("Failed to save chat histories at shutdown")?;
    tracing::info!("Relay bot stopped");

    if listener_died {
        anyhow::bail!("Telegram listener stopped");
    }
    Ok(())
}

/// Keep the long-poll loop alive, backing off between restarts. Gives up
/// on authentication failures.
fn spawn_supervised_listener(
    telegram: Arc<TelegramChannel>,
    tx: mpsc::Sender<InboundEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut backoff = LISTENER_INITIAL_BACKOFF_SECS;

        loop {
            let result = telegram.listen(tx.clone()).await;

            if tx.is_closed() {
                break;
            }

            match result {
                Ok(()) => {
                    tracing::warn!("Channel {} exited unexpectedly; restarting", telegram.name());
                }
                Err(e @ ChannelError::Auth(_)) => {
                    tracing::error!("Channel {} error: {e}; giving up", telegram.name());
                    break;
                }
                Err(e) => {
                    tracing::error!("Channel {} error: {e}; restarting", telegram.name());
                }
            }

            tokio::time::sleep(Duration::from_secs(backoff)).await;
            backoff = backoff.saturating_mul(2).min(LISTENER_MAX_BACKOFF_SECS);
        }
    })
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => tracing::info!("Received SIGTERM, shutting down"),
                    _ = tokio::signal::ctrl_c() => tracing::info!("Received SIGINT, shutting down"),
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Cannot listen for SIGTERM");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Shutting down");
    }
}
