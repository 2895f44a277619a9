use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};

static ZERO_WIDTH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new("[\u{200B}-\u{200D}\u{FEFF}]").unwrap());
static INLINE_WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t]+").unwrap());
static EMPTY_LINES_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

/// Recurring promotional tail lines. Explicit list, easy to extend.
static TAIL_STOP_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)^subscribe\b.*",
        r"(?i)^(sponsored|advertisement|ad):?\b.*",
        r"(?i)^source:?.*",
        r"(?i)^read (also|more)\b.*",
        r"(?i)^(https?://)?t\.me/\S+$",
        r"(?i)^support (the|our|this) channel\b.*",
        r"(?i).*\bdonate\b.*",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).unwrap())
    .collect()
});

fn is_tail_stop_line(line: &str) -> bool {
    TAIL_STOP_PATTERNS
        .iter()
        .any(|pattern| pattern.is_match(line))
}

/// Canonicalize raw post text: strip zero-width characters, collapse inline
/// whitespace, normalize newlines, drop blank-line runs and known
/// promotional tail lines. Texts differing only by these artifacts
/// normalize to the same string and therefore hash identically.
pub fn normalize_text(text: &str) -> String {
    let without_zero_width = ZERO_WIDTH_RE.replace_all(text, "");
    let normalized_newlines = without_zero_width.replace("\r\n", "\n").replace('\r', "\n");

    let mut compact_lines: Vec<String> = Vec::new();
    for raw_line in normalized_newlines.split('\n') {
        let line = INLINE_WHITESPACE_RE
            .replace_all(raw_line, " ")
            .trim()
            .to_string();
        if line.is_empty() {
            if matches!(compact_lines.last(), Some(last) if last.is_empty()) {
                continue;
            }
            compact_lines.push(String::new());
            continue;
        }
        compact_lines.push(line);
    }

    while matches!(compact_lines.last(), Some(last) if last.is_empty()) {
        compact_lines.pop();
    }

    while matches!(compact_lines.last(), Some(last) if is_tail_stop_line(last)) {
        compact_lines.pop();
        while matches!(compact_lines.last(), Some(last) if last.is_empty()) {
            compact_lines.pop();
        }
    }

    while matches!(compact_lines.first(), Some(first) if first.is_empty()) {
        compact_lines.remove(0);
    }

    let joined = compact_lines.join("\n");
    EMPTY_LINES_RE
        .replace_all(joined.trim(), "\n\n")
        .into_owned()
}

/// Truncate to at most `limit` characters, appending an ellipsis when text
/// was cut. Character-based, so multi-byte text never splits mid-codepoint.
pub fn truncate_chars(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let cut: String = text.chars().take(limit.saturating_sub(1)).collect();
    format!("{}…", cut.trim_end())
}

/// SHA-256 over the normalized text. Media-only and empty items get a
/// payload derived from timestamp and permalink so the hash is never
/// degenerate across unrelated items.
pub fn compute_content_hash(
    text_norm: Option<&str>,
    has_media: bool,
    permalink: Option<&str>,
    posted_at: DateTime<Utc>,
) -> String {
    let normalized = text_norm.unwrap_or("").trim();
    let payload = if !normalized.is_empty() {
        normalized.to_string()
    } else if has_media {
        format!("media-only:{}:{}", posted_at.to_rfc3339(), permalink.unwrap_or(""))
    } else {
        format!("empty:{}:{}", posted_at.to_rfc3339(), permalink.unwrap_or(""))
    };

    let mut hasher = Sha256::new();
    hasher.update(payload.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn posted() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 7, 10, 30, 0).unwrap()
    }

    #[test]
    fn hash_equal_for_whitespace_variants() {
        let text_a = "Hello,   world!\n\nAnother line.";
        let text_b = "Hello, world!\r\n\r\nAnother line.   ";

        let normalized_a = normalize_text(text_a);
        let normalized_b = normalize_text(text_b);
        assert_eq!(normalized_a, normalized_b);

        let hash_a = compute_content_hash(Some(&normalized_a), false, Some("https://t.me/x/1"), posted());
        let hash_b = compute_content_hash(Some(&normalized_b), false, Some("https://t.me/x/1"), posted());
        assert_eq!(hash_a, hash_b);
    }

    #[test]
    fn hash_equal_when_trailing_promo_removed() {
        let base = "Big model update\nDetails inside.";
        let with_tail = format!("{base}\n\nSubscribe to the channel @example");

        let normalized_base = normalize_text(base);
        let normalized_tail = normalize_text(&with_tail);
        assert_eq!(normalized_base, normalized_tail);

        let hash_base =
            compute_content_hash(Some(&normalized_base), false, Some("https://t.me/x/2"), posted());
        let hash_tail =
            compute_content_hash(Some(&normalized_tail), false, Some("https://t.me/x/2"), posted());
        assert_eq!(hash_base, hash_tail);
    }

    #[test]
    fn strips_zero_width_and_blank_runs() {
        let text = "A\u{200B}B\n\n\n\nC";
        assert_eq!(normalize_text(text), "AB\n\nC");
    }

    #[test]
    fn strips_multiple_tail_lines() {
        let text = "News body\n\nSource: somewhere\nt.me/channel";
        assert_eq!(normalize_text(text), "News body");
    }

    #[test]
    fn media_only_items_hash_by_time_and_permalink() {
        let a = compute_content_hash(None, true, Some("https://t.me/x/3"), posted());
        let b = compute_content_hash(None, true, Some("https://t.me/x/4"), posted());
        assert_ne!(a, b);
        // Deterministic for the same inputs.
        let c = compute_content_hash(None, true, Some("https://t.me/x/3"), posted());
        assert_eq!(a, c);
    }

    #[test]
    fn empty_and_media_only_hashes_differ() {
        let media = compute_content_hash(None, true, Some("https://t.me/x/5"), posted());
        let empty = compute_content_hash(None, false, Some("https://t.me/x/5"), posted());
        assert_ne!(media, empty);
    }
}
