// Sanitizer — cleans and normalizes inbound user text before it reaches
// the intent analyzer or an LLM prompt.
//
// Order matters: normalize → truncate → strip script-ish patterns → escape
// HTML → strip control chars → collapse whitespace → cap character spam.
// Each step assumes the previous one already ran, so reordering silently
// changes behavior — keep them in this sequence.

use regex::Regex;
use std::sync::LazyLock;

use crate::atoms::constants::MAX_MESSAGE_LENGTH;

const MAX_CONSECUTIVE_CHARS: usize = 100;

static SUSPICIOUS_PATTERNS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<script[^>]*>.*?</script>|javascript:|data:|vbscript:").unwrap()
});
static EVENT_HANDLER_ATTR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)on\w+\s*=").unwrap());
static STYLE_ATTR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)style\s*=").unwrap());
static EXCESSIVE_WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

fn is_control_char(c: char) -> bool {
    let u = c as u32;
    matches!(u, 0x00..=0x08 | 0x0b | 0x0c | 0x0e..=0x1f | 0x7f..=0x9f)
}

fn html_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

/// Collapse runs of the same character longer than [`MAX_CONSECUTIVE_CHARS`]
/// down to that cap, to blunt spam like `"aaaaaaa....".repeat(1000)`.
fn prevent_character_spam(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut run_char: Option<char> = None;
    let mut run_len = 0usize;
    for c in s.chars() {
        if Some(c) == run_char {
            run_len += 1;
            if run_len <= MAX_CONSECUTIVE_CHARS {
                out.push(c);
            }
        } else {
            run_char = Some(c);
            run_len = 1;
            out.push(c);
        }
    }
    out
}

/// Clean and normalize user-provided text. Returns an empty string if the
/// input is empty, whitespace-only, or becomes empty after sanitization —
/// callers treat an empty result as "reject this message".
pub fn sanitize(message: &str, strict_mode: bool) -> String {
    if message.trim().is_empty() {
        return String::new();
    }

    // NFKC: compatibility decomposition + canonical composition, folding
    // visually-identical lookalike characters to one representation.
    use unicode_normalization::UnicodeNormalization;
    let mut s: String = message.nfkc().collect();

    if s.len() > MAX_MESSAGE_LENGTH {
        let mut cut = MAX_MESSAGE_LENGTH;
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        s.truncate(cut);
    }

    s = SUSPICIOUS_PATTERNS.replace_all(&s, "").into_owned();

    if strict_mode {
        s = EVENT_HANDLER_ATTR.replace_all(&s, "").into_owned();
        s = STYLE_ATTR.replace_all(&s, "").into_owned();
    }

    s = html_escape(&s);
    s.retain(|c| !is_control_char(c));
    s = EXCESSIVE_WHITESPACE.replace_all(&s, " ").into_owned();
    s = prevent_character_spam(&s);
    s = s.trim().to_string();

    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_and_whitespace_only() {
        assert_eq!(sanitize("", true), "");
        assert_eq!(sanitize("   \n\t  ", true), "");
    }

    #[test]
    fn escapes_html_special_characters() {
        let out = sanitize("<b>hi</b> & 'quote' \"double\"", true);
        assert!(out.contains("&lt;b&gt;"));
        assert!(out.contains("&amp;"));
        assert!(out.contains("&#x27;"));
        assert!(out.contains("&quot;"));
    }

    #[test]
    fn strips_script_tags_and_javascript_uris() {
        let out = sanitize("click <script>alert(1)</script> javascript:alert(2)", true);
        assert!(!out.to_lowercase().contains("<script"));
        assert!(!out.to_lowercase().contains("javascript:"));
    }

    #[test]
    fn strips_event_handler_attrs_only_in_strict_mode() {
        let strict = sanitize("<img onerror=alert(1)>", true);
        assert!(!strict.contains("onerror="));
    }

    #[test]
    fn caps_character_spam() {
        let spam = "a".repeat(500);
        let out = sanitize(&spam, true);
        assert!(out.len() <= MAX_CONSECUTIVE_CHARS);
    }

    #[test]
    fn collapses_whitespace() {
        let out = sanitize("hello    \n\n  world", true);
        assert_eq!(out, "hello world");
    }

    #[test]
    fn truncates_overlong_input() {
        let long = "x".repeat(MAX_MESSAGE_LENGTH + 500);
        let out = sanitize(&long, true);
        assert!(out.len() <= MAX_MESSAGE_LENGTH);
    }
}
