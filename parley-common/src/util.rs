//! Text utilities shared by the bot.

use regex::Regex;
use std::sync::LazyLock;

static REDACTIONS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"(?i)(api[_-]?key|apikey|key)=[A-Za-z0-9_\-]{20,}", "$1=***REDACTED***"),
        (r"(?i)(token|secret|bearer)\s*[=:]\s*\S{10,}", "$1=***REDACTED***"),
        (r"AIza[0-9A-Za-z_\-]{20,}", "***REDACTED_API_KEY***"),
        (r"bot\d+:[A-Za-z0-9_\-]{20,}", "bot***REDACTED_TOKEN***"),
    ]
    .into_iter()
    .filter_map(|(pattern, replacement)| Regex::new(pattern).ok().map(|re| (re, replacement)))
    .collect()
});

/// Truncate a string to at most `max_chars` characters, appending "..." if truncated.
///
/// Cuts on character boundaries, never inside a multi-byte sequence.
pub fn truncate_with_ellipsis(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => {
            let truncated = &s[..idx];
            format!("{}...", truncated.trim_end())
        }
        None => s.to_string(),
    }
}

/// Sanitize a string for safe logging (redact API keys and bot tokens).
///
/// Upstream error bodies and request URLs can echo the credentials back.
pub fn sanitize_for_log(s: &str) -> String {
    let mut result = s.to_string();
    for (re, replacement) in REDACTIONS.iter() {
        result = re.replace_all(&result, *replacement).to_string();
    }
    result
}

/// Length of `s` in UTF-16 code units, the unit Telegram measures message limits in.
pub fn utf16_len(s: &str) -> usize {
    s.chars().map(char::len_utf16).sum()
}

/// Longest prefix of `s` whose UTF-16 length does not exceed `max_units`.
pub fn truncate_utf16(s: &str, max_units: usize) -> &str {
    let mut units = 0;
    for (idx, c) in s.char_indices() {
        units += c.len_utf16();
        if units > max_units {
            return &s[..idx];
        }
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_with_ellipsis() {
        assert_eq!(truncate_with_ellipsis("hello", 10), "hello");
        assert_eq!(truncate_with_ellipsis("hello world", 5), "hello...");
        assert_eq!(truncate_with_ellipsis("😀😀😀😀", 2), "😀😀...");
        assert_eq!(truncate_with_ellipsis("", 10), "");
    }

    #[test]
    fn test_sanitize_gemini_key_in_url() {
        let input = "error sending request for url (https://x/models/m:generateContent?key=AIzaSyA1234567890abcdefghijklmnop)";
        let output = sanitize_for_log(input);
        assert!(!output.contains("AIzaSyA1234567890abcdefghijklmnop"));
        assert!(output.contains("REDACTED"));
    }

    #[test]
    fn test_sanitize_bot_token_in_url() {
        let input = "https://api.telegram.org/bot123456:AAHdqTcvCH1vGWJxfSeofSAs0K5PALDsaw/sendMessage";
        let output = sanitize_for_log(input);
        assert!(!output.contains("AAHdqTcvCH1vGWJxfSeofSAs0K5PALDsaw"));
    }

    #[test]
    fn test_sanitize_leaves_plain_text() {
        assert_eq!(sanitize_for_log("quota exceeded"), "quota exceeded");
    }

    #[test]
    fn test_utf16_len() {
        assert_eq!(utf16_len("abc"), 3);
        assert_eq!(utf16_len("你好"), 2);
        assert_eq!(utf16_len("😀"), 2);
    }

    #[test]
    fn test_truncate_utf16_never_splits_surrogate_pairs() {
        assert_eq!(truncate_utf16("a😀b", 2), "a");
        assert_eq!(truncate_utf16("a😀b", 3), "a😀");
        assert_eq!(truncate_utf16("short", 100), "short");
    }
}
