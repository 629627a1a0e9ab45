//! Small text-cleanup helpers shared by the classifier and proactive paths.

use std::sync::LazyLock;

use regex::Regex;

static IRC_NICK_PREFIX_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>\s*(.*)").unwrap());
static LOOSE_SENDER_PREFIX_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<?\S+>\s*(.*)").unwrap());

/// Strip a strict `<nick> message` IRC-style prefix, used before classifying
/// a message's mode. Returns the original text unchanged if no such prefix
/// is present.
pub fn strip_irc_nick_prefix(text: &str) -> String {
    match IRC_NICK_PREFIX_RE.captures(text) {
        Some(caps) => caps
            .get(1)
            .map(|m| m.as_str().trim().to_string())
            .unwrap_or_else(|| text.to_string()),
        None => text.to_string(),
    }
}

/// Strip a looser `<nick>`/`nick>` prefix, used before running the proactive
/// interjection validator cascade.
pub fn strip_loose_sender_prefix(text: &str) -> String {
    match LOOSE_SENDER_PREFIX_RE.captures(text) {
        Some(caps) => caps
            .get(1)
            .map(|m| m.as_str().trim().to_string())
            .unwrap_or_else(|| text.to_string()),
        None => text.to_string(),
    }
}
