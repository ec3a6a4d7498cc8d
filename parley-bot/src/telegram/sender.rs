//! Outbound message delivery.
//!
//! Long replies are split into chunks that fit Telegram's message limit, and
//! every chunk walks a fixed ladder of renderings until the platform accepts
//! one: converted HTML, then markup-stripped text, then a sanitized string.

use super::format;
use crate::message::{MessageRef, ParseMode};
use crate::traits::ChatPlatform;
use parley_common::error::FormatError;
use parley_common::util::{sanitize_for_log, truncate_utf16, utf16_len};
use regex::Regex;
use std::sync::{Arc, LazyLock};

/// Telegram's message limit, in UTF-16 code units.
pub const MAX_MESSAGE_LEN: usize = 4096;

static TAG_LIKE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").expect("valid regex"));

// ============================================================================
// Delivery Tiers
// ============================================================================

/// One rendering of a chunk, tried in [`DeliveryTier::LADDER`] order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryTier {
    /// Converted Telegram HTML
    Styled,
    /// Raw chunk with markup characters removed
    Plain,
    /// Printable characters only, truncated to the limit
    Sanitized,
}

impl DeliveryTier {
    pub const LADDER: [Self; 3] = [Self::Styled, Self::Plain, Self::Sanitized];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Styled => "styled",
            Self::Plain => "plain",
            Self::Sanitized => "sanitized",
        }
    }

    /// Render `chunk` for this tier.
    pub fn render(self, chunk: &str, limit: usize) -> Result<(String, ParseMode), FormatError> {
        match self {
            Self::Styled => Ok((format::convert_to_telegram_html(chunk)?, ParseMode::Html)),
            Self::Plain => Ok((strip_markup(chunk), ParseMode::Plain)),
            Self::Sanitized => Ok((sanitize(chunk, limit), ParseMode::Plain)),
        }
    }
}

/// Remove tag-like substrings and the `*`, `_` and backtick markers.
pub fn strip_markup(text: &str) -> String {
    TAG_LIKE
        .replace_all(text, "")
        .chars()
        .filter(|c| !matches!(c, '*' | '_' | '`'))
        .collect()
}

/// Keep printable characters plus line breaks and tabs, then cut to `limit`.
pub fn sanitize(text: &str, limit: usize) -> String {
    let printable: String = text
        .chars()
        .filter(|&c| !c.is_control() || matches!(c, '\n' | '\r' | '\t'))
        .collect();
    truncate_utf16(&printable, limit).to_string()
}

// ============================================================================
// Chunking
// ============================================================================

/// Split a message into chunks that fit within `limit` UTF-16 code units.
///
/// Lines are packed greedily. A single line longer than the limit becomes a
/// chunk of its own. Joining the chunks with `\n` gives back the input.
pub fn split_message(text: &str, limit: usize) -> Vec<String> {
    if utf16_len(text) <= limit {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;
    let mut has_lines = false;

    for line in text.split('\n') {
        let line_len = utf16_len(line);

        if !has_lines {
            current.push_str(line);
            current_len = line_len;
            has_lines = true;
        } else if current_len + line_len + 1 <= limit {
            current.push('\n');
            current.push_str(line);
            current_len += line_len + 1;
        } else {
            chunks.push(std::mem::take(&mut current));
            current.push_str(line);
            current_len = line_len;
        }
    }

    if has_lines {
        chunks.push(current);
    }
    chunks
}

// ============================================================================
// Delivery Report
// ============================================================================

/// What happened to one chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkOutcome {
    Delivered { tier: DeliveryTier, message: MessageRef },
    Dropped,
}

/// Result of sending one logical message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub chunks: Vec<ChunkOutcome>,
}

impl DeliveryReport {
    pub fn sent(&self) -> usize {
        self.chunks
            .iter()
            .filter(|c| matches!(c, ChunkOutcome::Delivered { .. }))
            .count()
    }

    pub fn dropped(&self) -> usize {
        self.chunks.len() - self.sent()
    }

    /// Tier used per chunk, `None` for dropped chunks.
    pub fn tiers(&self) -> Vec<Option<DeliveryTier>> {
        self.chunks
            .iter()
            .map(|c| match c {
                ChunkOutcome::Delivered { tier, .. } => Some(*tier),
                ChunkOutcome::Dropped => None,
            })
            .collect()
    }

    /// Reference to the first delivered chunk.
    pub fn first_message(&self) -> Option<MessageRef> {
        self.chunks.iter().find_map(|c| match c {
            ChunkOutcome::Delivered { message, .. } => Some(*message),
            ChunkOutcome::Dropped => None,
        })
    }
}

// ============================================================================
// Message Sender
// ============================================================================

/// Delivers model output to a chat, never failing the caller.
#[derive(Clone)]
pub struct MessageSender {
    platform: Arc<dyn ChatPlatform>,
    limit: usize,
}

impl MessageSender {
    pub fn new(platform: Arc<dyn ChatPlatform>) -> Self {
        Self::with_limit(platform, MAX_MESSAGE_LEN)
    }

    pub fn with_limit(platform: Arc<dyn ChatPlatform>, limit: usize) -> Self {
        Self {
            platform,
            limit: limit.max(1),
        }
    }

    pub fn platform(&self) -> &Arc<dyn ChatPlatform> {
        &self.platform
    }

    /// Send `text` with the full ladder. Chunks that no tier can deliver are
    /// logged and skipped, later chunks are still attempted.
    pub async fn send(&self, chat_id: &str, text: &str) -> DeliveryReport {
        self.send_from(chat_id, text, &DeliveryTier::LADDER).await
    }

    /// Send a status line without markup conversion.
    pub async fn send_plain(&self, chat_id: &str, text: &str) -> Option<MessageRef> {
        self.send_from(chat_id, text, &DeliveryTier::LADDER[1..])
            .await
            .first_message()
    }

    async fn send_from(&self, chat_id: &str, text: &str, tiers: &[DeliveryTier]) -> DeliveryReport {
        let chunks = split_message(text, self.limit);
        let total = chunks.len();
        let mut report = DeliveryReport::default();

        for (index, chunk) in chunks.iter().enumerate() {
            let outcome = self.deliver_chunk(chat_id, chunk, tiers).await;
            if outcome == ChunkOutcome::Dropped {
                let err = parley_common::Error::Delivery(format!(
                    "all delivery tiers failed for chunk {}/{total}",
                    index + 1
                ));
                tracing::error!(chat_id = %chat_id, chunk = index + 1, error = %err, "Dropping chunk");
            }
            report.chunks.push(outcome);
        }

        tracing::debug!(
            chat_id = %chat_id,
            sent = report.sent(),
            dropped = report.dropped(),
            "Message delivered"
        );
        report
    }

    async fn deliver_chunk(&self, chat_id: &str, chunk: &str, tiers: &[DeliveryTier]) -> ChunkOutcome {
        for &tier in tiers {
            let (rendered, mode) = match tier.render(chunk, self.limit) {
                Ok(rendered) => rendered,
                Err(e) => {
                    tracing::warn!(tier = tier.as_str(), error = %e, "Skipping tier");
                    continue;
                }
            };

            match self.platform.reply(chat_id, &rendered, mode).await {
                Ok(message) => return ChunkOutcome::Delivered { tier, message },
                Err(e) => {
                    tracing::warn!(
                        chat_id = %chat_id,
                        tier = tier.as_str(),
                        error = %sanitize_for_log(&e.to_string()),
                        "Delivery attempt failed"
                    );
                }
            }
        }
        ChunkOutcome::Dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{ChannelError, ChannelResult};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Records every attempt and rejects the modes/texts it is told to.
    #[derive(Default)]
    struct RecordingPlatform {
        attempts: Mutex<Vec<(String, ParseMode)>>,
        reject_html: bool,
        reject_plain: bool,
        reject_containing: Option<String>,
    }

    impl RecordingPlatform {
        fn attempts(&self) -> Vec<(String, ParseMode)> {
            self.attempts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChatPlatform for RecordingPlatform {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn reply(&self, _chat_id: &str, text: &str, mode: ParseMode) -> ChannelResult<MessageRef> {
            let mut attempts = self.attempts.lock().unwrap();
            attempts.push((text.to_string(), mode));
            let id = attempts.len() as i64;
            drop(attempts);

            if let Some(marker) = &self.reject_containing {
                if text.contains(marker.as_str()) {
                    return Err(ChannelError::SendFailed("rejected".into()));
                }
            }
            match mode {
                ParseMode::Html if self.reject_html => {
                    Err(ChannelError::MarkupRejected("can't parse entities".into()))
                }
                ParseMode::Plain if self.reject_plain => {
                    Err(ChannelError::SendFailed("bad request".into()))
                }
                _ => Ok(MessageRef(id)),
            }
        }

        async fn reply_photo(&self, _: &str, _: Vec<u8>, _: &str) -> ChannelResult<MessageRef> {
            Ok(MessageRef(0))
        }

        async fn edit(&self, _: &str, _: MessageRef, _: &str, _: ParseMode) -> ChannelResult<()> {
            Ok(())
        }

        async fn delete(&self, _: &str, _: MessageRef) -> ChannelResult<()> {
            Ok(())
        }
    }

    // ------------------------------------------------------------------------
    // Chunking
    // ------------------------------------------------------------------------

    #[test]
    fn split_message_short() {
        assert_eq!(split_message("Hello, World!", 4096), vec!["Hello, World!"]);
    }

    #[test]
    fn split_message_exactly_at_limit_is_one_chunk() {
        let text = "a".repeat(4096);
        assert_eq!(split_message(&text, 4096).len(), 1);
    }

    #[test]
    fn split_message_packs_whole_lines() {
        let line = "x".repeat(100);
        let text = vec![line.as_str(); 100].join("\n");
        assert_eq!(utf16_len(&text), 10_099);

        let chunks = split_message(&text, 4096);
        assert!(chunks.len() >= 3);
        for chunk in &chunks {
            assert!(utf16_len(chunk) <= 4096);
            assert!(chunk.split('\n').all(|l| l.len() == 100));
        }
        assert_eq!(chunks.join("\n"), text);
    }

    #[test]
    fn split_message_keeps_oversized_line_whole() {
        let long = "y".repeat(5000);
        let text = format!("short\n{long}\ntail");
        let chunks = split_message(&text, 4096);
        assert_eq!(chunks, vec!["short".to_string(), long, "tail".to_string()]);
        assert_eq!(chunks.join("\n"), text);
    }

    #[test]
    fn split_message_counts_utf16_units() {
        // Each emoji is two UTF-16 units.
        let text = format!("{}\n{}", "😀".repeat(3), "😀".repeat(3));
        let chunks = split_message(&text, 8);
        assert_eq!(chunks.len(), 2);
    }

    #[test]
    fn split_message_preserves_blank_lines() {
        let text = format!("{}\n\n\n{}", "a".repeat(6), "b".repeat(6));
        let chunks = split_message(&text, 8);
        assert_eq!(chunks.join("\n"), text);
    }

    // ------------------------------------------------------------------------
    // Tier Rendering
    // ------------------------------------------------------------------------

    #[test]
    fn strip_markup_removes_tags_and_markers() {
        let stripped = strip_markup("**bold** <b>x</b> `code` _it_ a<b");
        assert_eq!(stripped, "bold x code it a<b");
    }

    #[test]
    fn sanitize_drops_control_chars_and_truncates() {
        assert_eq!(sanitize("a\u{0}b\tc\r\nd\u{7}", 100), "ab\tc\r\nd");
        assert_eq!(sanitize("abcdef", 4), "abcd");
    }

    #[test]
    fn styled_tier_uses_html() {
        let (text, mode) = DeliveryTier::Styled.render("**hi**", 4096).unwrap();
        assert_eq!(text, "<b>hi</b>");
        assert_eq!(mode, ParseMode::Html);
    }

    // ------------------------------------------------------------------------
    // Ladder
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn styled_success_stops_ladder() {
        let platform = Arc::new(RecordingPlatform::default());
        let sender = MessageSender::new(platform.clone());

        let report = sender.send("1", "**hello**").await;
        assert_eq!(report.tiers(), vec![Some(DeliveryTier::Styled)]);
        assert_eq!(
            platform.attempts(),
            vec![("<b>hello</b>".to_string(), ParseMode::Html)]
        );
    }

    #[tokio::test]
    async fn rejected_html_falls_back_to_plain() {
        let platform = Arc::new(RecordingPlatform {
            reject_html: true,
            ..Default::default()
        });
        let sender = MessageSender::new(platform.clone());

        let report = sender.send("1", "**bold** and `code` <tag> *it*").await;
        assert_eq!(report.tiers(), vec![Some(DeliveryTier::Plain)]);

        let attempts = platform.attempts();
        assert_eq!(attempts.len(), 2);
        let (plain, mode) = &attempts[1];
        assert_eq!(*mode, ParseMode::Plain);
        assert!(!plain.contains('<'));
        assert!(!plain.contains('*'));
        assert!(!plain.contains('`'));
    }

    #[tokio::test]
    async fn sanitized_tier_is_last_resort() {
        // Plain keeps control characters, sanitized removes them.
        let platform = Arc::new(RecordingPlatform {
            reject_html: true,
            reject_containing: Some("\u{1}".into()),
            ..Default::default()
        });
        let sender = MessageSender::new(platform.clone());

        let report = sender.send("1", "hi\u{1} there").await;
        assert_eq!(report.tiers(), vec![Some(DeliveryTier::Sanitized)]);

        let attempts = platform.attempts();
        assert_eq!(attempts.len(), 3);
        assert_eq!(attempts[2], ("hi there".to_string(), ParseMode::Plain));
    }

    #[tokio::test]
    async fn all_tiers_failing_drops_only_that_chunk() {
        let platform = Arc::new(RecordingPlatform {
            reject_containing: Some("poison".into()),
            ..Default::default()
        });
        let sender = MessageSender::with_limit(platform.clone(), 10);

        let report = sender.send("1", "ok one\npoison\nok two").await;
        assert_eq!(report.chunks.len(), 3);
        assert_eq!(report.sent(), 2);
        assert_eq!(report.dropped(), 1);
        assert_eq!(
            report.tiers(),
            vec![Some(DeliveryTier::Styled), None, Some(DeliveryTier::Styled)]
        );
        // styled + plain + sanitized attempts for the poisoned chunk
        assert_eq!(platform.attempts().len(), 5);
    }

    #[tokio::test]
    async fn send_plain_skips_styled_tier() {
        let platform = Arc::new(RecordingPlatform::default());
        let sender = MessageSender::new(platform.clone());

        let message = sender.send_plain("1", "🎨 Generating *image*...").await;
        assert_eq!(message, Some(MessageRef(1)));
        assert_eq!(
            platform.attempts(),
            vec![("🎨 Generating image...".to_string(), ParseMode::Plain)]
        );
    }

    #[tokio::test]
    async fn send_plain_returns_none_when_everything_fails() {
        let platform = Arc::new(RecordingPlatform {
            reject_plain: true,
            ..Default::default()
        });
        let sender = MessageSender::new(platform);
        assert_eq!(sender.send_plain("1", "status").await, None);
    }
}
