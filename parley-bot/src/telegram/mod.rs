//! Telegram channel adapter.
//!
//! Provides the `TelegramChannel` implementation for receiving and sending messages
//! through the Telegram Bot API.

pub mod format;
pub mod sender;

pub use sender::{DeliveryReport, DeliveryTier, MessageSender};

use crate::message::{InboundMessage, MessageRef, ParseMode};
use crate::traits::{ChannelError, ChannelResult, ChatPlatform};
use async_trait::async_trait;
use parley_common::config::TelegramConfig;
use parley_common::util::sanitize_for_log;
use reqwest::multipart::{Form, Part};
use std::time::Duration;

const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Pause before polling again after a failed `getUpdates`.
const POLL_RETRY_DELAY: Duration = Duration::from_secs(5);

// ============================================================================
// Telegram Channel
// ============================================================================

/// Telegram channel - long-polls the Bot API for updates.
pub struct TelegramChannel {
    bot_token: String,
    allowed_users: Vec<String>,
    api_base: String,
    poll_timeout_secs: u64,
    client: reqwest::Client,
}

impl TelegramChannel {
    /// Create a new Telegram channel.
    pub fn new(bot_token: String, allowed_users: Vec<String>) -> Self {
        Self {
            bot_token,
            allowed_users,
            api_base: DEFAULT_API_BASE.to_string(),
            poll_timeout_secs: 30,
            client: reqwest::Client::new(),
        }
    }

    /// Build a channel from the `telegram` config section.
    pub fn from_config(config: &TelegramConfig) -> ChannelResult<Self> {
        let token = config
            .bot_token
            .clone()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ChannelError::Auth("telegram.bot_token is not set".into()))?;

        let mut channel = Self::new(token, config.allowed_users.clone());
        channel.poll_timeout_secs = config.poll_timeout_secs;
        Ok(channel)
    }

    /// Point the channel at a different Bot API host.
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into().trim_end_matches('/').to_string();
        self
    }

    fn api_url(&self, method: &str) -> String {
        format!("{}/bot{}/{method}", self.api_base, self.bot_token)
    }

    fn is_user_allowed(&self, identity: &str) -> bool {
        self.allowed_users.is_empty() || self.allowed_users.iter().any(|u| u == "*" || u == identity)
    }

    fn is_any_user_allowed<'a, I>(&self, identities: I) -> bool
    where
        I: IntoIterator<Item = &'a str>,
    {
        identities.into_iter().any(|id| self.is_user_allowed(id))
    }

    /// Verify the bot token with `getMe`.
    pub async fn init(&self) -> ChannelResult<()> {
        let resp = self
            .client
            .get(self.api_url("getMe"))
            .send()
            .await
            .map_err(|e| ChannelError::Connection(e.to_string()))?;

        if !resp.status().is_success() {
            let err = resp.text().await.unwrap_or_default();
            return Err(ChannelError::Auth(format!("Invalid bot token: {err}")));
        }

        tracing::info!("Telegram channel initialized");
        Ok(())
    }

    /// POST a JSON body and return the `result` field of the reply.
    async fn call(&self, method: &str, body: &serde_json::Value) -> ChannelResult<serde_json::Value> {
        let resp = self
            .client
            .post(self.api_url(method))
            .json(body)
            .send()
            .await
            .map_err(|e| ChannelError::Connection(e.to_string()))?;

        Self::read_result(method, resp).await
    }

    async fn read_result(method: &str, resp: reqwest::Response) -> ChannelResult<serde_json::Value> {
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();

        if status.is_success() {
            let data: serde_json::Value = serde_json::from_str(&text)
                .map_err(|e| ChannelError::SendFailed(format!("{method}: invalid response: {e}")))?;
            return Ok(data.get("result").cloned().unwrap_or(serde_json::Value::Null));
        }

        Err(classify_error(method, status.as_u16(), &text))
    }

    fn message_ref(result: &serde_json::Value) -> ChannelResult<MessageRef> {
        result
            .get("message_id")
            .and_then(serde_json::Value::as_i64)
            .map(MessageRef)
            .ok_or_else(|| ChannelError::SendFailed("response is missing message_id".into()))
    }

    /// Turn one `getUpdates` entry into an inbound message.
    ///
    /// Returns `None` for non-text updates and for users outside the allow-list.
    fn parse_update(&self, update: &serde_json::Value) -> Option<InboundMessage> {
        let message = update.get("message")?;
        let text = message.get("text")?.as_str()?;

        let chat_id = message.get("chat")?.get("id")?.as_i64()?.to_string();
        let from = message.get("from")?;
        let user_id = from.get("id")?.as_i64()?.to_string();
        let username = from.get("username").and_then(|u| u.as_str()).map(String::from);

        let mut identities = vec![user_id.as_str()];
        if let Some(ref name) = username {
            identities.push(name.as_str());
        }

        if !self.is_any_user_allowed(identities) {
            tracing::warn!(
                user_id = %user_id,
                username = username.as_deref().unwrap_or("unknown"),
                "Telegram: ignoring message from unauthorized user"
            );
            return None;
        }

        let mut msg = InboundMessage::new(chat_id, user_id, text);
        msg.username = username;
        Some(msg)
    }

    /// Long-poll `getUpdates` and hand every accepted text message to
    /// `callback`. Runs until the surrounding task is cancelled.
    pub async fn listen<F>(&self, callback: F) -> ChannelResult<()>
    where
        F: Fn(InboundMessage) + Send + Sync,
    {
        let mut offset: i64 = 0;

        tracing::info!("Telegram channel listening for messages...");

        loop {
            let body = serde_json::json!({
                "offset": offset,
                "timeout": self.poll_timeout_secs,
                "allowed_updates": ["message"]
            });

            let results = match self.call("getUpdates", &body).await {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!("Telegram poll error: {}", sanitize_for_log(&e.to_string()));
                    tokio::time::sleep(POLL_RETRY_DELAY).await;
                    continue;
                }
            };

            let Some(updates) = results.as_array() else {
                continue;
            };

            for update in updates {
                if let Some(uid) = update.get("update_id").and_then(serde_json::Value::as_i64) {
                    offset = uid + 1;
                }

                if let Some(msg) = self.parse_update(update) {
                    tracing::info!(
                        trace_id = %msg.trace_id,
                        user_id = %msg.user_id,
                        chat_id = %msg.chat_id,
                        "Telegram message received"
                    );
                    callback(msg);
                }
            }
        }
    }
}

/// Map a failed Bot API reply onto a channel error.
fn classify_error(method: &str, status: u16, body: &str) -> ChannelError {
    let description = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("description").and_then(|d| d.as_str()).map(String::from))
        .unwrap_or_else(|| body.to_string());

    match status {
        // Telegram returns "Bad Request: can't parse entities" for HTML errors
        400 if description.contains("parse entities") => ChannelError::MarkupRejected(description),
        401 | 403 => ChannelError::Auth(description),
        429 => {
            let retry_after_secs = serde_json::from_str::<serde_json::Value>(body)
                .ok()
                .and_then(|v| v.get("parameters")?.get("retry_after")?.as_u64())
                .unwrap_or(1);
            ChannelError::RateLimited { retry_after_secs }
        }
        _ => ChannelError::SendFailed(format!("Telegram {method} failed: {description}")),
    }
}

#[async_trait]
impl ChatPlatform for TelegramChannel {
    fn name(&self) -> &'static str {
        "telegram"
    }

    async fn reply(&self, chat_id: &str, text: &str, mode: ParseMode) -> ChannelResult<MessageRef> {
        let mut body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
        });
        if let Some(parse_mode) = mode.as_api_value() {
            body["parse_mode"] = parse_mode.into();
        }

        let result = self.call("sendMessage", &body).await?;
        Self::message_ref(&result)
    }

    async fn reply_photo(
        &self,
        chat_id: &str,
        image: Vec<u8>,
        caption: &str,
    ) -> ChannelResult<MessageRef> {
        let part = Part::bytes(image).file_name("image.png".to_string());
        let form = Form::new()
            .text("chat_id", chat_id.to_string())
            .text("caption", caption.to_string())
            .part("photo", part);

        let resp = self
            .client
            .post(self.api_url("sendPhoto"))
            .multipart(form)
            .send()
            .await
            .map_err(|e| ChannelError::Connection(e.to_string()))?;

        let result = Self::read_result("sendPhoto", resp).await?;
        tracing::info!(chat_id = %chat_id, "Telegram photo sent");
        Self::message_ref(&result)
    }

    async fn edit(
        &self,
        chat_id: &str,
        message: MessageRef,
        text: &str,
        mode: ParseMode,
    ) -> ChannelResult<()> {
        let mut body = serde_json::json!({
            "chat_id": chat_id,
            "message_id": message.0,
            "text": text,
        });
        if let Some(parse_mode) = mode.as_api_value() {
            body["parse_mode"] = parse_mode.into();
        }

        self.call("editMessageText", &body).await.map(|_| ())
    }

    async fn delete(&self, chat_id: &str, message: MessageRef) -> ChannelResult<()> {
        let body = serde_json::json!({
            "chat_id": chat_id,
            "message_id": message.0,
        });
        self.call("deleteMessage", &body).await.map(|_| ())
    }
}
