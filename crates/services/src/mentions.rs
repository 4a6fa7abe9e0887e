//! # Mention parsing
//!
//! `@handle` extraction from raw content text. Offered to the write path as
//! a capability; the engine itself only ever sees MentionDetected events.

use once_cell::sync::Lazy;
use regex::Regex;

// A handle is 2–32 word characters and must not be glued to a preceding
// word character, so email addresses do not count as mentions.
static MENTION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:^|[^A-Za-z0-9_])@([A-Za-z0-9_]{2,32})\b")
        .expect("mention pattern is valid")
});

/// Extracts mentioned handles in order of first appearance, deduplicated.
pub fn extract_handles(text: &str) -> Vec<String> {
    let mut handles: Vec<String> = Vec::new();
    for captures in MENTION_RE.captures_iter(text) {
        if let Some(handle) = captures.get(1) {
            if !handles.iter().any(|h| h == handle.as_str()) {
                handles.push(handle.as_str().to_string());
            }
        }
    }
    handles
}
