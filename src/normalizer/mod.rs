//! # Post Normalizer
//!
//! Maps raw fragments onto the canonical [`Post`] record. Every field has an
//! explicit, ordered list of fallback paths into the fragment; the first path
//! holding a usable value wins, then page context, then `null`.
//!
//! Paths are dotted (`message.text`), may index arrays (`actors.0.name`) and
//! may start with `**` to search the fragment depth-first for the rest of the
//! path. The search skips comments, replies and attached stories.
//!
//! Normalization is pure: the same fragment and reference time always
//! produce an equal post.

mod counts;
mod time;

pub use counts::{Engagement, count_from_value, count_in_text, parse_count};
pub use time::{DISPLAY_FORMAT, parse_display_time, render_display_time};

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, instrument};
use url::Url;

use crate::locator::{PageContext, RawPostFragment, Strategy, absolutize};
use crate::post::{FACEBOOK_BASE_URL, PageTarget, Post, is_facebook_host};

const POST_ID_PATHS: &[&str] = &[
    "post_id",
    "top_level_post_id",
    "postId",
    "story_fbid",
    "mf_story_key",
];

const PAGE_ID_PATHS: &[&str] = &[
    "page_id",
    "pageId",
    "owner.id",
    "actors.0.id",
    "page.id",
    "content_owner_id_new",
];

const PAGE_NAME_PATHS: &[&str] = &["page_name", "pageName", "owner.name", "actors.0.name", "page.name"];

const URL_PATHS: &[&str] = &["url", "permalink_url", "permalink", "story.url", "**.permalink_url"];

const TEXT_PATHS: &[&str] = &[
    "message.text",
    "message",
    "text",
    "body.text",
    "**.message.text",
];

const TIME_PATHS: &[&str] = &["time", "formatted_time", "timestamp_text", "date"];

const EPOCH_PATHS: &[&str] = &[
    "utime",
    "creation_time",
    "created_time",
    "publish_time",
    "timestamp",
    "**.creation_time",
    "**.publish_time",
];

const LIKES_PATHS: &[&str] = &[
    "likes",
    "like_count",
    "reaction_count",
    "reactors.count",
    "feedback.reaction_count",
    "**.reaction_count",
    "**.reactors",
];

const COMMENTS_PATHS: &[&str] = &[
    "comments",
    "comment_count",
    "feedback.comment_count",
    "**.comment_count",
    "**.total_comment_count",
];

const SHARES_PATHS: &[&str] = &[
    "shares",
    "share_count",
    "reshare_count",
    "**.share_count",
    "**.reshare_count",
];

const LINK_PATHS: &[&str] = &["link", "external_url", "attachments.0.url", "**.external_url"];

/// Keys holding other people's content (comments, replies, shared stories).
/// A deep search never enters them, so their values are never mistaken for
/// the post's own.
const NESTED_CONTENT_KEYS: [&str; 8] = [
    "comments",
    "comment_list",
    "display_comments",
    "top_level_comments",
    "replies",
    "attached_story",
    "attached_stories",
    "edges",
];

/// Query parameters that identify a post and survive URL cleaning
const IDENTIFYING_PARAMS: [&str; 3] = ["story_fbid", "id", "fbid"];

/// Epoch values below this are seconds rather than milliseconds
const MILLIS_THRESHOLD: i64 = 100_000_000_000;

/// Why a fragment could not become a post
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SkipReason {
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("missing required field `{0}`")]
    MissingRequiredField(&'static str),
}

/// A fragment that was dropped during normalization
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("skipped {strategy} fragment: {reason}")]
pub struct SkippedRecord {
    pub strategy: Strategy,
    pub reason: SkipReason,
}

/// Resolve a dotted path inside a JSON value
fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let segments: Vec<&str> = path.split('.').collect();
    walk(value, &segments)
}

fn walk<'a>(value: &'a Value, segments: &[&str]) -> Option<&'a Value> {
    let Some((head, rest)) = segments.split_first() else {
        return Some(value);
    };
    if *head == "**" {
        return deep_find(value, rest);
    }
    let next = match value {
        Value::Object(map) => map.get(*head)?,
        Value::Array(items) => items.get(head.parse::<usize>().ok()?)?,
        _ => return None,
    };
    walk(next, rest)
}

fn deep_find<'a>(value: &'a Value, rest: &[&str]) -> Option<&'a Value> {
    if let Some(found) = walk(value, rest).filter(|v| !v.is_null()) {
        return Some(found);
    }
    match value {
        Value::Object(map) => map
            .iter()
            .filter(|(key, _)| !NESTED_CONTENT_KEYS.contains(&key.as_str()))
            .find_map(|(_, child)| deep_find(child, rest)),
        Value::Array(items) => items.iter().find_map(|child| deep_find(child, rest)),
        _ => None,
    }
}

/// First path yielding a value accepted by `convert`
fn first<T>(value: &Value, paths: &[&str], convert: impl Fn(&Value) -> Option<T>) -> Option<T> {
    paths
        .iter()
        .filter_map(|path| lookup(value, path))
        .find_map(convert)
}

fn as_identifier(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Value::Object(map) => map.get("text").and_then(as_text),
        _ => None,
    }
}

fn as_epoch_millis(value: &Value) -> Option<i64> {
    let raw = match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))?,
        Value::String(s) if !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()) => {
            s.parse().ok()?
        }
        _ => return None,
    };
    if raw <= 0 {
        return None;
    }
    if raw < MILLIS_THRESHOLD {
        raw.checked_mul(1000)
    } else {
        Some(raw)
    }
}

/// Derive a post identifier from a post URL
pub fn post_id_from_url(url: &Url) -> Option<String> {
    for (key, value) in url.query_pairs() {
        if (key == "story_fbid" || key == "fbid") && !value.is_empty() {
            return Some(value.into_owned());
        }
    }

    let segments: Vec<&str> = url.path_segments()?.filter(|s| !s.is_empty()).collect();

    for marker in ["posts", "videos", "permalink", "reel"] {
        if let Some(pos) = segments.iter().position(|s| *s == marker) {
            if let Some(id) = segments.get(pos + 1).filter(|s| is_id_segment(s)) {
                return Some(id.to_string());
            }
        }
    }
    segments
        .iter()
        .rev()
        .find(|s| is_id_segment(s))
        .map(|s| s.to_string())
}

fn is_id_segment(segment: &str) -> bool {
    segment.starts_with("pfbid") || segment.chars().all(|c| c.is_ascii_digit())
}

/// Remove tracking parameters and fragments from a post URL
pub fn clean_post_url(url: &Url) -> Url {
    let mut cleaned = url.clone();
    cleaned.set_fragment(None);
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| IDENTIFYING_PARAMS.contains(&k.as_ref()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        cleaned.set_query(None);
    } else {
        cleaned.query_pairs_mut().clear().extend_pairs(kept);
    }
    cleaned
}

/// Unwrap Facebook's outbound redirector and keep only links leaving Facebook
pub fn external_link(raw: &str) -> Option<String> {
    let url = Url::parse(raw.trim()).ok()?;
    let url = match url.host_str() {
        Some(host) if is_facebook_host(host) && url.path() == "/l.php" => url
            .query_pairs()
            .find(|(k, _)| k == "u")
            .and_then(|(_, v)| Url::parse(&v).ok())?,
        _ => url,
    };
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    match url.host_str() {
        Some(host) if !is_facebook_host(host) => Some(url.to_string()),
        _ => None,
    }
}

/// Maps raw fragments to posts against a fixed reference time
#[derive(Debug, Clone)]
pub struct PostNormalizer {
    reference_time: DateTime<Utc>,
}

impl PostNormalizer {
    /// `reference_time` anchors relative display times such as "2h"
    pub fn new(reference_time: DateTime<Utc>) -> Self {
        Self { reference_time }
    }

    pub fn reference_time(&self) -> DateTime<Utc> {
        self.reference_time
    }

    /// Normalize one fragment into a post
    pub fn normalize(
        &self,
        fragment: &RawPostFragment,
        target: &PageTarget,
        context: &PageContext,
    ) -> Result<Post, SkippedRecord> {
        let skip = |reason| SkippedRecord {
            strategy: fragment.strategy(),
            reason,
        };
        let value = fragment.value();
        if !value.is_object() {
            return Err(skip(SkipReason::MalformedPayload(
                "fragment is not an object".to_string(),
            )));
        }

        let post_url = first(value, URL_PATHS, |v| v.as_str().and_then(absolutize))
            .and_then(|raw| Url::parse(&raw).ok())
            .filter(|u| u.host_str().is_some_and(is_facebook_host));

        let post_id = first(value, POST_ID_PATHS, as_identifier)
            .or_else(|| post_url.as_ref().and_then(post_id_from_url))
            .ok_or_else(|| skip(SkipReason::MissingRequiredField("postId")))?;

        let page_id = first(value, PAGE_ID_PATHS, as_identifier).or_else(|| context.id.clone());
        let page_name = first(value, PAGE_NAME_PATHS, as_text).or_else(|| context.name.clone());

        let url = match &post_url {
            Some(u) => Some(clean_post_url(u).to_string()),
            None => page_id
                .as_ref()
                .map(|page| format!("{}/{}/posts/{}", FACEBOOK_BASE_URL, page, post_id)),
        };

        let (time, timestamp) = self.resolve_time(value);

        let engagement_text = value.get("engagement_text").and_then(Value::as_str);
        let count = |paths: &[&str], metric| {
            first(value, paths, count_from_value)
                .or_else(|| engagement_text.and_then(|t| count_in_text(t, metric)))
        };

        let link = first(value, LINK_PATHS, |v| v.as_str().and_then(external_link)).or_else(|| {
            value
                .get("links")
                .and_then(Value::as_array)
                .and_then(|links| links.iter().filter_map(Value::as_str).find_map(external_link))
        });

        Ok(Post {
            facebook_url: target.url().to_string(),
            page_id,
            post_id,
            page_name,
            url,
            time,
            timestamp,
            likes: count(LIKES_PATHS, Engagement::Likes),
            comments: count(COMMENTS_PATHS, Engagement::Comments),
            shares: count(SHARES_PATHS, Engagement::Shares),
            text: first(value, TEXT_PATHS, as_text).unwrap_or_default(),
            link,
        })
    }

    /// Normalize a page of fragments, collecting skipped records
    #[instrument(skip_all, fields(target = %target, fragments = fragments.len()))]
    pub fn normalize_all(
        &self,
        fragments: &[RawPostFragment],
        target: &PageTarget,
        context: &PageContext,
    ) -> (Vec<Post>, Vec<SkippedRecord>) {
        let mut posts = Vec::with_capacity(fragments.len());
        let mut skipped = Vec::new();
        for fragment in fragments {
            match self.normalize(fragment, target, context) {
                Ok(post) => posts.push(post),
                Err(record) => {
                    debug!("{}", record);
                    skipped.push(record);
                }
            }
        }
        (posts, skipped)
    }

    fn resolve_time(&self, value: &Value) -> (Option<String>, Option<i64>) {
        let display = first(value, TIME_PATHS, as_text);
        let epoch = first(value, EPOCH_PATHS, as_epoch_millis);

        match (display, epoch) {
            (display, Some(millis)) => {
                let time = display.or_else(|| {
                    Utc.timestamp_millis_opt(millis)
                        .single()
                        .map(render_display_time)
                });
                (time, Some(millis))
            }
            (Some(display), None) => {
                let timestamp = parse_display_time(&display, self.reference_time)
                    .map(|at| at.timestamp_millis());
                (Some(display), timestamp)
            }
            (None, None) => (None, None),
        }
    }
}
