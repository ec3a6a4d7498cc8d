//! Message types exchanged with the messaging platform.

use serde::{Deserialize, Serialize};

/// How the platform should interpret outgoing text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParseMode {
    /// Telegram's HTML subset (`<b>`, `<i>`, `<code>`, `<pre>`)
    Html,
    /// No markup, text is shown as-is
    Plain,
}

impl ParseMode {
    /// Value for the Bot API `parse_mode` field, if any.
    pub const fn as_api_value(self) -> Option<&'static str> {
        match self {
            Self::Html => Some("HTML"),
            Self::Plain => None,
        }
    }
}

/// Reference to a message the bot has sent, for later edits or deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageRef(pub i64);

/// A text message received from a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Chat the message arrived in (replies go here)
    pub chat_id: String,
    /// Stable user identifier, used as the session key
    pub user_id: String,
    /// Username, if the user has one
    #[serde(default)]
    pub username: Option<String>,
    /// Raw message text
    pub text: String,
    /// Trace id assigned on receipt
    #[serde(default)]
    pub trace_id: String,
}

impl InboundMessage {
    pub fn new(
        chat_id: impl Into<String>,
        user_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            chat_id: chat_id.into(),
            user_id: user_id.into(),
            username: None,
            text: text.into(),
            trace_id: parley_common::logging::generate_trace_id(),
        }
    }

    /// True if the text starts a bot command.
    pub fn is_command(&self) -> bool {
        self.text.trim_start().starts_with('/')
    }
}
