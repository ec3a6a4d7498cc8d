//! Messaging-platform contract.

use crate::message::{MessageRef, ParseMode};
use async_trait::async_trait;

/// Result type for platform operations.
pub type ChannelResult<T> = Result<T, ChannelError>;

/// Channel error type.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ChannelError {
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Connection failed: {0}")]
    Connection(String),

    /// The platform refused the markup (Telegram: "can't parse entities")
    #[error("Markup rejected: {0}")]
    MarkupRejected(String),

    #[error("Rate limited: retry after {retry_after_secs} seconds")]
    RateLimited { retry_after_secs: u64 },

    #[error("Message send failed: {0}")]
    SendFailed(String),

    #[error("Channel not ready")]
    NotReady,
}

/// Operations the bot needs from a messaging platform.
///
/// Implemented by [`crate::telegram::TelegramChannel`] against the Bot API and
/// by recording fakes in tests.
#[async_trait]
pub trait ChatPlatform: Send + Sync {
    /// Get the platform name.
    fn name(&self) -> &'static str;

    /// Send a text message.
    async fn reply(&self, chat_id: &str, text: &str, mode: ParseMode) -> ChannelResult<MessageRef>;

    /// Send an image with a caption.
    async fn reply_photo(
        &self,
        chat_id: &str,
        image: Vec<u8>,
        caption: &str,
    ) -> ChannelResult<MessageRef>;

    /// Replace the text of a message the bot sent earlier.
    async fn edit(
        &self,
        chat_id: &str,
        message: MessageRef,
        text: &str,
        mode: ParseMode,
    ) -> ChannelResult<()>;

    /// Delete a message the bot sent earlier.
    async fn delete(&self, chat_id: &str, message: MessageRef) -> ChannelResult<()>;
}
