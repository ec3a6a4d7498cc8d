//! Telegram HTML format converter.
//!
//! Converts the markdown subset language models actually emit into the
//! Telegram HTML subset. HTML mode is used over Telegram's Markdown modes
//! because its escaping rules are limited to `&`, `<` and `>`.
//!
//! The conversion is an ordered list of passes over a span list. Text that
//! is still markdown, code content, and emitted tags are kept apart until the
//! final render, so escaping can never touch a tag a pass produced.

use parley_common::error::FormatError;
use regex::{Captures, Regex};
use std::sync::LazyLock;

// ============================================================================
// Regex Patterns
// ============================================================================

static CODE_BLOCK_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:[A-Za-z0-9_+#.\-]*[ \t]*\r?\n)?(.*?)```").expect("valid regex")
});
static INLINE_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"`([^`\n]+)`").expect("valid regex"));
static HEADER_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^#{1,6}[ \t]+(.*?)[ \t]*$").expect("valid regex"));
static BOLD_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\*\*([^\n]+?)\*\*|__([^\n]+?)__").expect("valid regex")
});
static BULLET_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([ \t]*)[*\-][ \t]+").expect("valid regex"));
static MARKUP_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<(/?)(b|i|code|pre)>").expect("valid regex"));

// ============================================================================
// Span Model
// ============================================================================

/// Tags the converter is allowed to emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    Bold,
    Italic,
    Code,
    Pre,
}

impl Tag {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Bold => "b",
            Self::Italic => "i",
            Self::Code => "code",
            Self::Pre => "pre",
        }
    }
}

/// One piece of a document partway through conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Span {
    /// Text later passes may still transform
    Markdown(String),
    /// Code content: escaped on render, never transformed
    Literal(String),
    /// Opening tag emitted by a pass
    Open(Tag),
    /// Closing tag emitted by a pass
    Close(Tag),
}

type Pass = fn(Vec<Span>) -> Vec<Span>;

/// The conversion passes, in the order they must run.
const PIPELINE: &[(&str, Pass)] = &[
    ("fenced_code", fenced_code_blocks),
    ("inline_code", inline_code),
    ("headers", headers),
    ("bold", bold),
    ("italic", italic),
    ("bullets", bullets),
];

// ============================================================================
// Public API
// ============================================================================

/// Convert markdown to Telegram-compatible HTML.
///
/// # Conversion Rules
///
/// | Input                 | Output                 |
/// |-----------------------|------------------------|
/// | ` ```lang\ncode``` `  | `<pre>code</pre>`      |
/// | `` `code` ``          | `<code>code</code>`    |
/// | `# Title` .. `######` | `<b>Title</b>`         |
/// | `**bold**`, `__b__`   | `<b>bold</b>`          |
/// | `*italic*`, `_i_`     | `<i>italic</i>`        |
/// | `- item`, `* item`    | `• item`               |
/// | `&`, `<`, `>`         | `&amp;`, `&lt;`, `&gt;` |
///
/// Code content is escaped like any other text but never reformatted.
pub fn convert_to_telegram_html(input: &str) -> Result<String, FormatError> {
    let mut spans = vec![Span::Markdown(input.to_string())];
    for (_name, pass) in PIPELINE {
        spans = pass(spans);
    }

    let html = render(&spans);
    validate_markup(&html)?;
    Ok(html)
}

/// Check that every `<b>`, `<i>`, `<code>` and `<pre>` in `html` is properly
/// nested and closed.
pub fn validate_markup(html: &str) -> Result<(), FormatError> {
    let mut open: Vec<&str> = Vec::new();

    for caps in MARKUP_TAG.captures_iter(html) {
        let closing = !caps[1].is_empty();
        let name = caps.get(2).map_or("", |m| m.as_str());

        if !closing {
            open.push(name);
            continue;
        }

        match open.pop() {
            Some(expected) if expected == name => {}
            Some(expected) => {
                return Err(FormatError::MismatchedTag {
                    expected: expected.to_string(),
                    found: name.to_string(),
                })
            }
            None => return Err(FormatError::UnexpectedClose(name.to_string())),
        }
    }

    match open.pop() {
        Some(name) => Err(FormatError::Unclosed(name.to_string())),
        None => Ok(()),
    }
}

/// Escape HTML special characters.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}

// ============================================================================
// Span Helpers
// ============================================================================

/// Push a span, merging adjacent markdown and dropping empty text.
fn push(out: &mut Vec<Span>, span: Span) {
    match span {
        Span::Markdown(text) if text.is_empty() => {}
        Span::Literal(text) if text.is_empty() => {}
        Span::Markdown(text) => {
            if let Some(Span::Markdown(prev)) = out.last_mut() {
                prev.push_str(&text);
            } else {
                out.push(Span::Markdown(text));
            }
        }
        other => out.push(other),
    }
}

fn wrap(out: &mut Vec<Span>, tag: Tag, inner: Span) {
    out.push(Span::Open(tag));
    push(out, inner);
    out.push(Span::Close(tag));
}

/// Apply `f` to every markdown span.
///
/// `f` also learns whether the span begins at the start of a line, which the
/// line-anchored passes need once code spans have split a line apart.
fn map_markdown<F>(spans: Vec<Span>, mut f: F) -> Vec<Span>
where
    F: FnMut(&str, bool, &mut Vec<Span>),
{
    let mut out = Vec::with_capacity(spans.len());
    let mut at_line_start = true;

    for span in spans {
        match span {
            Span::Markdown(text) => {
                f(&text, at_line_start, &mut out);
                if let Some(last) = text.chars().last() {
                    at_line_start = last == '\n';
                }
            }
            Span::Literal(text) => {
                if let Some(last) = text.chars().last() {
                    at_line_start = last == '\n';
                }
                out.push(Span::Literal(text));
            }
            Span::Open(tag) => {
                at_line_start = false;
                out.push(Span::Open(tag));
            }
            Span::Close(tag) => out.push(Span::Close(tag)),
        }
    }

    out
}

/// Split `text` around the matches of `re`, handing each match to `on_match`.
fn split_on(text: &str, re: &Regex, out: &mut Vec<Span>, mut on_match: impl FnMut(&Captures, &mut Vec<Span>)) {
    let mut last = 0;
    for caps in re.captures_iter(text) {
        let Some(whole) = caps.get(0) else { continue };
        push(out, Span::Markdown(text[last..whole.start()].to_string()));
        on_match(&caps, out);
        last = whole.end();
    }
    push(out, Span::Markdown(text[last..].to_string()));
}

/// Visit each line of `text`, telling the callback whether it starts a line.
fn for_each_line(text: &str, starts_line: bool, mut f: impl FnMut(&str, &str, bool)) {
    for (idx, piece) in text.split_inclusive('\n').enumerate() {
        let body = piece.trim_end_matches('\n').trim_end_matches('\r');
        let ending = &piece[body.len()..];
        f(body, ending, idx > 0 || starts_line);
    }
}

// ============================================================================
// Passes
// ============================================================================

fn fenced_code_blocks(spans: Vec<Span>) -> Vec<Span> {
    map_markdown(spans, |text, _, out| {
        split_on(text, &CODE_BLOCK_PATTERN, out, |caps, out| {
            let code = caps.get(1).map_or("", |m| m.as_str());
            wrap(out, Tag::Pre, Span::Literal(code.trim_matches('\n').to_string()));
        });
    })
}

fn inline_code(spans: Vec<Span>) -> Vec<Span> {
    map_markdown(spans, |text, _, out| {
        split_on(text, &INLINE_CODE, out, |caps, out| {
            wrap(out, Tag::Code, Span::Literal(caps[1].to_string()));
        });
    })
}

fn headers(spans: Vec<Span>) -> Vec<Span> {
    map_markdown(spans, |text, starts_line, out| {
        for_each_line(text, starts_line, |body, ending, at_start| {
            match HEADER_PATTERN.captures(body).filter(|_| at_start) {
                Some(caps) => {
                    wrap(out, Tag::Bold, Span::Markdown(caps[1].to_string()));
                    push(out, Span::Markdown(ending.to_string()));
                }
                None => push(out, Span::Markdown(format!("{body}{ending}"))),
            }
        });
    })
}

fn bold(spans: Vec<Span>) -> Vec<Span> {
    map_markdown(spans, |text, _, out| {
        split_on(text, &BOLD_PATTERN, out, |caps, out| {
            let inner = caps.get(1).or_else(|| caps.get(2)).map_or("", |m| m.as_str());
            wrap(out, Tag::Bold, Span::Markdown(inner.to_string()));
        });
    })
}

fn italic(spans: Vec<Span>) -> Vec<Span> {
    map_markdown(spans, |text, _, out| scan_italic(text, out))
}

fn bullets(spans: Vec<Span>) -> Vec<Span> {
    map_markdown(spans, |text, starts_line, out| {
        for_each_line(text, starts_line, |body, ending, at_start| {
            let line = if at_start {
                BULLET_PATTERN.replace(body, "${1}• ").into_owned()
            } else {
                body.to_string()
            };
            push(out, Span::Markdown(format!("{line}{ending}")));
        });
    })
}

// ============================================================================
// Italic Scanner
// ============================================================================

/// Single-marker emphasis. The regex crate has no look-around, so the
/// "not part of a double marker" rule is checked by hand.
fn scan_italic(text: &str, out: &mut Vec<Span>) {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let mut plain_from = 0;
    let mut i = 0;

    while i < chars.len() {
        let (start, marker) = chars[i];
        if (marker == '*' || marker == '_') && opens_italic(&chars, i) {
            if let Some(j) = find_italic_close(&chars, i) {
                let content_start = start + marker.len_utf8();
                let (close, _) = chars[j];
                push(out, Span::Markdown(text[plain_from..start].to_string()));
                wrap(out, Tag::Italic, Span::Markdown(text[content_start..close].to_string()));
                plain_from = close + marker.len_utf8();
                i = j + 1;
                continue;
            }
        }
        i += 1;
    }

    push(out, Span::Markdown(text[plain_from..].to_string()));
}

fn opens_italic(chars: &[(usize, char)], i: usize) -> bool {
    let marker = chars[i].1;
    let prev = i.checked_sub(1).map(|p| chars[p].1);
    let next = chars.get(i + 1).map(|&(_, c)| c);

    if prev == Some(marker) {
        return false;
    }
    if marker == '_' && prev.is_some_and(char::is_alphanumeric) {
        return false;
    }
    matches!(next, Some(c) if c != marker && !c.is_whitespace())
}

fn find_italic_close(chars: &[(usize, char)], open: usize) -> Option<usize> {
    let marker = chars[open].1;

    for j in (open + 2)..chars.len() {
        let c = chars[j].1;
        if c == '\n' {
            return None;
        }
        if c != marker {
            continue;
        }

        let prev = chars[j - 1].1;
        let next = chars.get(j + 1).map(|&(_, c)| c);
        if prev == marker || prev.is_whitespace() || next == Some(marker) {
            continue;
        }
        if marker == '_' && next.is_some_and(char::is_alphanumeric) {
            continue;
        }
        return Some(j);
    }

    None
}

// ============================================================================
// Render
// ============================================================================

fn render(spans: &[Span]) -> String {
    let mut html = String::new();
    for span in spans {
        match span {
            Span::Markdown(text) | Span::Literal(text) => html.push_str(&escape_html(text)),
            Span::Open(tag) => {
                html.push('<');
                html.push_str(tag.name());
                html.push('>');
            }
            Span::Close(tag) => {
                html.push_str("</");
                html.push_str(tag.name());
                html.push('>');
            }
        }
    }
    html
}

// ============================================================================
// Tests
// ============================================================================
