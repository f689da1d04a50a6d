//! HTML extraction for the payload locator: feed units rendered as plain
//! markup, page-level context and "see more" continuation links.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde_json::{Map, Value};
use tracing::{debug, warn};
use url::Url;

use super::PageContext;
use crate::post::FACEBOOK_BASE_URL;

static PAGE_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\\?"(?:pageID|page_id)\\?"\s*:\s*\\?"(\d+)\\?""#).expect("page id pattern is valid")
});

const POST_LINK_MARKERS: [&str; 6] = [
    "/posts/",
    "/photos/",
    "/videos/",
    "/permalink/",
    "story_fbid=",
    "/permalink.php",
];

const SEE_MORE_LABELS: [&str; 4] = [
    "see more stories",
    "see more posts",
    "show more",
    "more stories",
];

fn selector(css: &str) -> Option<Selector> {
    match Selector::parse(css) {
        Ok(selector) => Some(selector),
        Err(e) => {
            warn!("Failed to parse selector '{}': {}", css, e);
            None
        }
    }
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn element_text(element: ElementRef<'_>) -> String {
    normalize_whitespace(&element.text().collect::<Vec<_>>().join(" "))
}

/// Resolve a link found in page markup against the Facebook origin
pub(crate) fn absolutize(href: &str) -> Option<String> {
    let base = Url::parse(FACEBOOK_BASE_URL).ok()?;
    base.join(href.trim()).ok().map(|u| u.to_string())
}

/// Reveal markup that Facebook ships inside HTML comments
fn reveal_hidden_markup(body: &str) -> String {
    body.replace("<!--", "").replace("-->", "")
}

/// Extract feed units rendered as HTML and convert them into fragment objects
pub(crate) fn article_fragments(body: &str) -> Vec<Value> {
    let document = Html::parse_document(&reveal_hidden_markup(body));

    let mut units: Vec<ElementRef<'_>> = Vec::new();
    let mut seen = HashSet::new();
    for css in [r#"div[data-pagelet^="FeedUnit_"]"#, r#"div[role="article"]"#] {
        let Some(selector) = selector(css) else { continue };
        for element in document.select(&selector) {
            let nested = element.ancestors().any(|a| seen.contains(&a.id()));
            if !nested && seen.insert(element.id()) {
                units.push(element);
            }
        }
    }

    if units.is_empty() {
        debug!("No standard post containers found, using data-ft carriers");
        if let Some(selector) = selector("[data-ft]") {
            for element in document.select(&selector) {
                let nested = element.ancestors().any(|a| seen.contains(&a.id()));
                if !nested && seen.insert(element.id()) {
                    units.push(element);
                }
            }
        }
    }

    debug!("Identified {} potential post containers", units.len());
    units.into_iter().map(article_to_fragment).collect()
}

fn article_to_fragment(element: ElementRef<'_>) -> Value {
    let mut fragment = Map::new();

    let data_ft = element
        .value()
        .attr("data-ft")
        .or_else(|| {
            selector("[data-ft]").and_then(|s| {
                element
                    .select(&s)
                    .next()
                    .and_then(|e| e.value().attr("data-ft"))
            })
        })
        .and_then(|raw| match serde_json::from_str::<Value>(raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Malformed payload in data-ft attribute: {}", e);
                None
            }
        });
    if let Some(Value::Object(ft)) = &data_ft {
        for key in ["top_level_post_id", "mf_story_key", "page_id", "content_owner_id_new"] {
            if let Some(value) = ft.get(key) {
                fragment.insert(key.to_string(), value.clone());
            }
        }
    }

    let mut links = Vec::new();
    let mut post_url = None;
    if let Some(anchors) = selector("a[href]") {
        for anchor in element.select(&anchors) {
            let Some(href) = anchor.value().attr("href") else { continue };
            let Some(absolute) = absolutize(href) else { continue };
            if post_url.is_none() && POST_LINK_MARKERS.iter().any(|m| href.contains(m)) {
                post_url = Some(absolute.clone());
            }
            links.push(Value::String(absolute));
        }
    }
    if let Some(url) = post_url {
        fragment.insert("url".to_string(), Value::String(url));
    }
    fragment.insert("links".to_string(), Value::Array(links));

    let message = message_text(element);
    if !message.is_empty() {
        fragment.insert("message".to_string(), Value::String(message));
    }

    if let Some((time, utime)) = time_metadata(element) {
        if let Some(time) = time {
            fragment.insert("time".to_string(), Value::String(time));
        }
        if let Some(utime) = utime {
            fragment.insert("utime".to_string(), Value::String(utime));
        }
    }

    let engagement = element_text(element);
    if !engagement.is_empty() {
        fragment.insert("engagement_text".to_string(), Value::String(engagement));
    }

    Value::Object(fragment)
}

/// Whether `node` belongs to `unit` itself rather than to an article nested in it
fn owned_by(node: ElementRef<'_>, unit: ElementRef<'_>) -> bool {
    for ancestor in node.ancestors() {
        if ancestor.id() == unit.id() {
            return true;
        }
        let nested_article = ancestor
            .value()
            .as_element()
            .is_some_and(|e| e.attr("role") == Some("article"));
        if nested_article {
            return false;
        }
    }
    true
}

fn message_text(element: ElementRef<'_>) -> String {
    let mut pieces: Vec<String> = Vec::new();
    for css in [r#"div[dir="auto"]"#, "p"] {
        let Some(selector) = selector(css) else { continue };
        for node in element.select(&selector) {
            if !owned_by(node, element) {
                continue;
            }
            let text = element_text(node);
            if !text.is_empty() && !pieces.contains(&text) {
                pieces.push(text);
            }
        }
        if !pieces.is_empty() {
            break;
        }
    }
    pieces.join(" ").trim().to_string()
}

fn time_metadata(element: ElementRef<'_>) -> Option<(Option<String>, Option<String>)> {
    let with_utime = selector("[data-utime]")
        .and_then(|s| element.select(&s).next())
        .map(|node| {
            let time = node
                .value()
                .attr("title")
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .or_else(|| Some(element_text(node)).filter(|t| !t.is_empty()));
            let utime = node.value().attr("data-utime").map(|u| u.trim().to_string());
            (time, utime)
        });
    if with_utime.is_some() {
        return with_utime;
    }

    selector("abbr")
        .and_then(|s| element.select(&s).next())
        .map(element_text)
        .filter(|t| !t.is_empty())
        .map(|t| (Some(t), None))
}

/// Extract the page name and id from a feed page
pub(crate) fn page_context(body: &str) -> PageContext {
    let document = Html::parse_document(body);

    let name = selector(r#"meta[property="og:title"]"#)
        .and_then(|s| document.select(&s).next())
        .and_then(|e| e.value().attr("content"))
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .or_else(|| {
            selector("title")
                .and_then(|s| document.select(&s).next())
                .map(element_text)
                .map(|t| t.trim_end_matches("| Facebook").trim().to_string())
                .filter(|t| !t.is_empty())
        });

    let id = selector(r#"meta[property="al:android:url"]"#)
        .and_then(|s| document.select(&s).next())
        .and_then(|e| e.value().attr("content"))
        .and_then(|content| {
            content
                .rsplit('/')
                .find(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_digit()))
                .map(str::to_string)
        })
        .or_else(|| {
            PAGE_ID_RE
                .captures(body)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string())
        });

    PageContext { name, id }
}

/// Find a "see more" link that continues the feed
pub(crate) fn see_more_link(body: &str) -> Option<Url> {
    let document = Html::parse_document(body);
    let anchors = selector("a[href]")?;

    document.select(&anchors).find_map(|anchor| {
        let href = anchor.value().attr("href")?;
        let label = element_text(anchor).to_lowercase();
        let is_more = href.contains("cursor=")
            || SEE_MORE_LABELS.iter().any(|l| label.contains(l));
        if !is_more {
            return None;
        }
        absolutize(href).and_then(|u| Url::parse(&u).ok())
    })
}
