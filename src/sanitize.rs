//! Seam to the external HTML sanitizer and the plain-text derivation of
//! message bodies.

use std::fmt::Debug;
use std::sync::LazyLock;

use regex::Regex;

/// Cleans untrusted message HTML before it is stored.
///
/// The engine never renders HTML itself; it only stores what the sanitizer
/// returns and derives `body_text` from it.
pub trait HtmlSanitizer: Debug + Send + Sync {
    fn sanitize(&self, html: &str) -> String;
}

/// Sanitizer that treats every body as plain text and escapes it.
#[derive(Debug, Clone, Copy, Default)]
pub struct EscapingSanitizer;

impl HtmlSanitizer for EscapingSanitizer {
    fn sanitize(&self, html: &str) -> String {
        let mut out = String::with_capacity(html.len());
        for c in html.chars() {
            match c {
                '&' => out.push_str("&amp;"),
                '<' => out.push_str("&lt;"),
                '>' => out.push_str("&gt;"),
                '"' => out.push_str("&quot;"),
                '\'' => out.push_str("&#39;"),
                _ => out.push(c),
            }
        }
        out
    }
}

static LINE_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<br\s*/?\s*>").expect("static regex"));
static PARAGRAPH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)</?p[^>]*>").expect("static regex"));
static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").expect("static regex"));
static BLANK_LINES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("static regex"));

/// Rough plain-text rendering of sanitized HTML, for previews and snippets.
pub fn html_to_text(html: &str) -> String {
    let text = LINE_BREAK.replace_all(html, "\n");
    let text = PARAGRAPH.replace_all(&text, "\n");
    let text = TAG.replace_all(&text, "");
    let text = BLANK_LINES.replace_all(&text, "\n\n");
    text.trim().to_string()
}

/// First `max_chars` characters of `text` with whitespace runs collapsed.
pub fn snippet(text: &str, max_chars: usize) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .take(max_chars)
        .collect()
}
