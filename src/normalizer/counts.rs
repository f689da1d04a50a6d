//! Engagement count coercion

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

/// Engagement metric carried by a post
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Engagement {
    Likes,
    Comments,
    Shares,
}

/// Number written before its keyword, e.g. `1.2K likes`
fn number_first(keywords: &str) -> Regex {
    Regex::new(&format!(r"(?i)(\d[\d,.]*\s*[kmb]?)\s*(?:{})\b", keywords))
        .expect("count pattern is valid")
}

/// Keyword written before its number, e.g. `Likes: 12`
fn keyword_first(keywords: &str) -> Regex {
    Regex::new(&format!(
        r"(?i)\b(?:{})\s*:?\s*(\d+(?:[.,]\d+)*(?:\s*[kmb]\b)?)",
        keywords
    ))
    .expect("count pattern is valid")
}

const LIKES_KEYWORDS: &str = "likes?|reactions?";
const COMMENTS_KEYWORDS: &str = "comments?|repl(?:y|ies)";
const SHARES_KEYWORDS: &str = "shares?";

static LIKES_RE: LazyLock<[Regex; 2]> =
    LazyLock::new(|| [number_first(LIKES_KEYWORDS), keyword_first(LIKES_KEYWORDS)]);

static COMMENTS_RE: LazyLock<[Regex; 2]> =
    LazyLock::new(|| [number_first(COMMENTS_KEYWORDS), keyword_first(COMMENTS_KEYWORDS)]);

static SHARES_RE: LazyLock<[Regex; 2]> =
    LazyLock::new(|| [number_first(SHARES_KEYWORDS), keyword_first(SHARES_KEYWORDS)]);

/// Parse a displayed count such as `1,234`, `1.2K`, `3M` or `1.2K reactions`.
///
/// Arithmetic is exact: `1.2K` is 1200, never 1199. Returns `None` for text
/// that does not start with a non-negative number.
pub fn parse_count(text: &str) -> Option<u64> {
    let text = text.trim().replace(',', "");
    let number_len = text
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(text.len());
    let (number, rest) = text.split_at(number_len);
    if number.is_empty() || !number.starts_with(|c: char| c.is_ascii_digit()) {
        return None;
    }

    let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
    if fraction.contains('.') {
        return None;
    }

    let rest = rest.trim_start();
    let mut suffix = rest.chars();
    let multiplier: u64 = match (suffix.next().map(|c| c.to_ascii_lowercase()), suffix.next()) {
        (Some(unit @ ('k' | 'm' | 'b')), next) if !next.is_some_and(char::is_alphabetic) => {
            match unit {
                'k' => 1_000,
                'm' => 1_000_000,
                _ => 1_000_000_000,
            }
        }
        _ => 1,
    };

    let whole: u64 = whole.parse().ok()?;
    let mut value = whole.checked_mul(multiplier)?;
    if multiplier > 1 && !fraction.is_empty() {
        let digits = fraction.len().min(9) as u32;
        let fraction: u64 = fraction[..digits as usize].parse().ok()?;
        value = value.checked_add(fraction * multiplier / 10u64.pow(digits))?;
    }
    Some(value)
}

/// Coerce an embedded count value. Objects such as `{"count": 12}` are
/// unwrapped; negative, fractional garbage and non-numeric values are `None`.
pub fn count_from_value(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite() && *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => parse_count(s),
        Value::Object(map) => ["count", "total_count", "text"]
            .iter()
            .find_map(|key| map.get(*key))
            .and_then(count_from_value),
        _ => None,
    }
}

/// Find a count written next to its keyword in rendered text, either
/// `34 comments` or `Comments: 34`. The number-first form is preferred.
pub fn count_in_text(text: &str, metric: Engagement) -> Option<u64> {
    let patterns = match metric {
        Engagement::Likes => &*LIKES_RE,
        Engagement::Comments => &*COMMENTS_RE,
        Engagement::Shares => &*SHARES_RE,
    };
    patterns.iter().find_map(|pattern| {
        pattern
            .captures(text)
            .and_then(|c| c.get(1))
            .and_then(|m| parse_count(m.as_str()))
    })
}
