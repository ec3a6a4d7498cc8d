//! Parley - a Telegram front end for Google Gemini.
//!
//! Each Telegram user gets an in-memory session (history, system prompt,
//! temperature, model). Messages are forwarded to Gemini with that context and
//! the replies are converted to Telegram HTML and delivered with fallbacks.
//!
//! ## Architecture
//!
//! ```text
//! Telegram ── getUpdates ──→ TelegramChannel::listen ──→ Bot::handle
//!                                                          │
//!                               SessionStore (per-user lock)│
//!                                                          ↓
//! Telegram ←── MessageSender ←── MarkupConverter ←── GeminiProvider
//! ```
//!
//! A small axum server answers liveness probes next to the poll loop.

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod commands;
pub mod message;
pub mod provider;
pub mod routes;
pub mod session;
pub mod telegram;
pub mod traits;

// Re-export commonly used types
pub use commands::{Bot, Command};
pub use message::{InboundMessage, MessageRef, ParseMode};
pub use provider::{GeminiProvider, GenerateRequest, ModelClient, ProviderError};
pub use routes::build_router;
pub use session::{SessionStore, UserSession};
pub use telegram::{DeliveryReport, DeliveryTier, MessageSender, TelegramChannel};
pub use traits::{ChannelError, ChannelResult, ChatPlatform};

use anyhow::Context;
use parley_common::config::Config;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// Longest pause between idle-session sweeps.
const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Run the bot until the poll loop fails or Ctrl-C is pressed.
pub async fn start_bot(config: &Config) -> anyhow::Result<()> {
    let addr = SocketAddr::from((
        config
            .health
            .bind
            .parse::<std::net::IpAddr>()
            .with_context(|| format!("Invalid health.bind address: {}", config.health.bind))?,
        config.health.port,
    ));

    let telegram = Arc::new(TelegramChannel::from_config(&config.telegram)?);
    telegram.init().await?;

    let provider = Arc::new(GeminiProvider::from_config(&config.gemini)?);
    let store = Arc::new(SessionStore::new(config.session.max_history));
    let bot = Arc::new(Bot::new(
        store.clone(),
        provider,
        telegram.clone(),
        config.gemini.image_model.clone(),
    ));

    let (shutdown_tx, mut shutdown_rx) = tokio::sync::watch::channel(false);
    let health_handle = tokio::spawn(routes::serve(addr, async move {
        let _ = shutdown_rx.changed().await;
    }));

    // Sessions are kept forever unless an idle TTL is configured
    let sweep_handle = config.session.idle_ttl_secs.map(|secs| {
        let ttl = Duration::from_secs(secs);
        let store = store.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(ttl.min(MAX_SWEEP_INTERVAL));
            loop {
                interval.tick().await;
                store.evict_idle(ttl);
            }
        })
    });

    tracing::info!(
        health = %addr,
        max_history = config.session.max_history,
        "Starting Parley"
    );

    let poll = telegram.listen(move |msg| {
        let bot = bot.clone();
        tokio::spawn(async move {
            bot.handle(msg).await;
        });
    });

    let result = tokio::select! {
        result = poll => result.map_err(anyhow::Error::from),
        signal = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
            signal.map_err(anyhow::Error::from)
        }
    };

    let _ = shutdown_tx.send(true);
    if let Some(handle) = sweep_handle {
        handle.abort();
    }
    match health_handle.await {
        Ok(Err(e)) => tracing::warn!("Liveness server stopped with error: {e}"),
        Err(e) => tracing::warn!("Liveness server task failed: {e}"),
        Ok(Ok(())) => {}
    }

    result
}
