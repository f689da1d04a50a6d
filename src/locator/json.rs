//! JSON scanning helpers for the payload locator

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Deserializer, Map, Value};
use tracing::{debug, warn};

/// Keys whose presence marks an object as a post candidate
pub(crate) const POST_ID_KEYS: [&str; 5] = [
    "post_id",
    "top_level_post_id",
    "story_fbid",
    "postId",
    "mf_story_key",
];

/// Prefix Facebook puts in front of JSON responses
pub(crate) const ANTI_HIJACK_PREFIX: &str = "for (;;);";

/// Upper bound of parse attempts when scanning a single text for objects
const MAX_SCAN_ATTEMPTS: usize = 20_000;

static ESCAPED_LITERAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#""((?:[^"\\]|\\.)*?\\"(?:post_id|top_level_post_id|story_fbid|postId|mf_story_key)\\"(?:[^"\\]|\\.)*)""#,
    )
    .expect("escaped literal pattern is valid")
});

fn is_id_like(value: &Value) -> bool {
    match value {
        Value::String(s) => !s.trim().is_empty(),
        Value::Number(_) => true,
        _ => false,
    }
}

/// Whether the object carries a post-identifier-like key
pub(crate) fn matches_post_shape(value: &Value) -> bool {
    value
        .as_object()
        .is_some_and(|map| POST_ID_KEYS.iter().any(|k| map.get(*k).is_some_and(is_id_like)))
}

/// Whether a text can contain a post candidate at all
pub(crate) fn mentions_post_key(text: &str) -> bool {
    POST_ID_KEYS.iter().any(|k| text.contains(k))
}

/// Collect post candidates in document order. Candidates are not descended
/// into, so stories attached to a post do not surface as separate posts.
pub(crate) fn collect_candidates(value: &Value, out: &mut Vec<Value>) {
    match value {
        Value::Object(map) => {
            if matches_post_shape(value) {
                out.push(value.clone());
            } else {
                for child in map.values() {
                    collect_candidates(child, out);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_candidates(item, out);
            }
        }
        _ => {}
    }
}

/// The `page_info` object of the feed container. Post candidates are not
/// descended into, so the paging state of a post's comments is never taken
/// for the feed's.
pub(crate) fn feed_page_info(value: &Value) -> Option<&Map<String, Value>> {
    if matches_post_shape(value) {
        return None;
    }
    match value {
        Value::Object(map) => map
            .get("page_info")
            .and_then(Value::as_object)
            .or_else(|| map.values().find_map(feed_page_info)),
        Value::Array(items) => items.iter().find_map(feed_page_info),
        _ => None,
    }
}

/// Parse a JSON response body, tolerating the anti-hijacking prefix and
/// newline-delimited documents. Returns `None` when the body is not JSON.
pub(crate) fn parse_json_documents(body: &str) -> Option<Vec<Value>> {
    let trimmed = body.trim_start();
    let rest = trimmed.strip_prefix(ANTI_HIJACK_PREFIX).unwrap_or(trimmed);
    let rest = rest.trim_start();
    if !(rest.starts_with('{') || rest.starts_with('[')) {
        return None;
    }

    let mut documents = Vec::new();
    for document in Deserializer::from_str(rest).into_iter::<Value>() {
        match document {
            Ok(value) => documents.push(value),
            Err(e) => {
                warn!("Malformed payload in JSON response: {}", e);
                break;
            }
        }
    }
    Some(documents)
}

/// Find every JSON object embedded in arbitrary text such as a JavaScript
/// call. Objects that fail to parse (truncated or not JSON) are skipped.
pub(crate) fn scan_embedded_objects(text: &str) -> Vec<Value> {
    let mut objects = Vec::new();
    let mut malformed = 0usize;
    let mut attempts = 0usize;
    let mut offset = 0usize;

    while let Some(found) = text[offset..].find("{\"") {
        let start = offset + found;
        attempts += 1;
        if attempts > MAX_SCAN_ATTEMPTS {
            warn!("Stopped scanning after {} attempts", MAX_SCAN_ATTEMPTS);
            break;
        }

        let mut stream = Deserializer::from_str(&text[start..]).into_iter::<Value>();
        match stream.next() {
            Some(Ok(value)) if value.is_object() => {
                offset = start + stream.byte_offset().max(1);
                objects.push(value);
            }
            _ => {
                malformed += 1;
                offset = start + 1;
            }
        }
    }

    if malformed > 0 {
        debug!("Skipped {} unparseable object starts", malformed);
    }
    objects
}

/// Decode escaped string literals that contain post JSON
pub(crate) fn escaped_payloads(text: &str) -> Vec<String> {
    ESCAPED_LITERAL_RE
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .map(|m| unescape_literal(m.as_str()))
        .collect()
}

/// Decode the body of a JSON/JavaScript string literal. Truncated literals
/// that JSON rejects are decoded leniently.
pub(crate) fn unescape_literal(literal: &str) -> String {
    match serde_json::from_str::<String>(&format!("\"{}\"", literal)) {
        Ok(decoded) => decoded,
        Err(_) => lenient_unescape(literal),
    }
}

fn lenient_unescape(literal: &str) -> String {
    let mut out = String::with_capacity(literal.len());
    let mut chars = literal.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('u') => {
                let hex: String = chars.by_ref().take(4).collect();
                match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                    Some(decoded) => out.push(decoded),
                    None => {
                        out.push_str("\\u");
                        out.push_str(&hex);
                    }
                }
            }
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}
