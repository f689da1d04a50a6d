//! # Payload Locator Module
//!
//! Finds the embedded structured data inside a feed response and isolates one
//! raw fragment per candidate post. Facebook's markup drifts often, so the
//! locator holds an ordered list of capability-tagged strategies; the first
//! strategy that yields at least one fragment wins and the rest are not run.
//!
//! ## Strategies
//!
//! - `ServerJsResponse`: the whole body is JSON, possibly behind `for (;;);`
//! - `ScriptJson`: `<script type="application/json">` blocks
//! - `InlineScript`: JSON objects passed to JavaScript calls in other scripts
//! - `EscapedJson`: JSON shipped as an escaped string literal
//! - `ArticleMarkup`: feed units rendered as plain HTML
//!
//! A JSON object is a candidate when it carries a post-identifier-like key.
//! Regions that fail to parse are logged and skipped. No fragments is a valid
//! result meaning "no posts on this page", distinct from a fetch failure.

mod json;
mod markup;

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use scraper::{Html, Selector};
use serde_json::Value;
use tracing::{debug, instrument};
use url::Url;

pub(crate) use markup::absolutize;

/// Extraction strategy, tried in the order configured on the locator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    ServerJsResponse,
    ScriptJson,
    InlineScript,
    EscapedJson,
    ArticleMarkup,
}

impl Strategy {
    /// All strategies in default order
    pub const ALL: [Strategy; 5] = [
        Strategy::ServerJsResponse,
        Strategy::ScriptJson,
        Strategy::InlineScript,
        Strategy::EscapedJson,
        Strategy::ArticleMarkup,
    ];

    fn apply(self, body: &str) -> Vec<Value> {
        let mut candidates = Vec::new();
        match self {
            Strategy::ServerJsResponse => {
                for document in json::parse_json_documents(body).unwrap_or_default() {
                    json::collect_candidates(&document, &mut candidates);
                }
            }
            Strategy::ScriptJson => {
                for script in scripts(body).into_iter().filter(|s| s.is_json) {
                    if !json::mentions_post_key(&script.text) {
                        continue;
                    }
                    match serde_json::from_str::<Value>(script.text.trim()) {
                        Ok(document) => json::collect_candidates(&document, &mut candidates),
                        Err(e) => tracing::warn!("Malformed payload in script block: {}", e),
                    }
                }
            }
            Strategy::InlineScript => {
                for script in scripts(body).into_iter().filter(|s| !s.is_json) {
                    if !json::mentions_post_key(&script.text) {
                        continue;
                    }
                    for object in json::scan_embedded_objects(&script.text) {
                        json::collect_candidates(&object, &mut candidates);
                    }
                }
            }
            Strategy::EscapedJson => {
                for payload in json::escaped_payloads(body) {
                    for object in json::scan_embedded_objects(&payload) {
                        json::collect_candidates(&object, &mut candidates);
                    }
                }
            }
            Strategy::ArticleMarkup => {
                candidates = markup::article_fragments(body);
            }
        }
        candidates
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Strategy::ServerJsResponse => "server-js-response",
            Strategy::ScriptJson => "script-json",
            Strategy::InlineScript => "inline-script",
            Strategy::EscapedJson => "escaped-json",
            Strategy::ArticleMarkup => "article-markup",
        };
        f.write_str(name)
    }
}

/// One raw, unvalidated unit of embedded data for a candidate post
#[derive(Debug, Clone, PartialEq)]
pub struct RawPostFragment {
    strategy: Strategy,
    value: Value,
}

impl RawPostFragment {
    pub fn new(strategy: Strategy, value: Value) -> Self {
        Self { strategy, value }
    }

    /// Strategy that located this fragment
    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn value(&self) -> &Value {
        &self.value
    }
}

/// Lazily located fragments of one response body.
///
/// No strategy runs until the first call to `next`; candidates then become
/// fragments one at a time.
#[derive(Debug)]
pub struct Fragments<'a> {
    body: &'a str,
    pending: std::slice::Iter<'a, Strategy>,
    current: Option<(Strategy, std::vec::IntoIter<Value>)>,
}

impl Fragments<'_> {
    /// Strategy that produced the fragments, running the strategies if needed
    pub fn strategy(&mut self) -> Option<Strategy> {
        self.resolve();
        self.current.as_ref().map(|(strategy, _)| *strategy)
    }

    fn resolve(&mut self) {
        if self.current.is_some() {
            return;
        }
        for strategy in self.pending.by_ref() {
            let candidates = strategy.apply(self.body);
            if candidates.is_empty() {
                debug!("Strategy {} found no fragments", strategy);
                continue;
            }
            debug!("Strategy {} found {} fragments", strategy, candidates.len());
            self.current = Some((*strategy, candidates.into_iter()));
            return;
        }
    }
}

impl Iterator for Fragments<'_> {
    type Item = RawPostFragment;

    fn next(&mut self) -> Option<Self::Item> {
        self.resolve();
        let (strategy, candidates) = self.current.as_mut()?;
        candidates
            .next()
            .map(|value| RawPostFragment::new(*strategy, value))
    }
}

/// Page-level data shared by every post of a page
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageContext {
    /// Display name of the page
    pub name: Option<String>,

    /// Numeric page identifier
    pub id: Option<String>,
}

impl PageContext {
    /// Fill missing values from `other`
    pub fn merge(&mut self, other: PageContext) {
        if self.name.is_none() {
            self.name = other.name;
        }
        if self.id.is_none() {
            self.id = other.id;
        }
    }
}

/// Opaque continuation data for the next feed page
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContinuationState {
    /// Cursor token passed back as the `cursor` query parameter
    Cursor(String),

    /// Complete URL of the next page
    NextUrl(Url),
}

impl ContinuationState {
    /// URL requesting the next page of `page_url`
    pub fn next_request_url(&self, page_url: &Url) -> Url {
        match self {
            ContinuationState::NextUrl(url) => url.clone(),
            ContinuationState::Cursor(cursor) => {
                let mut url = page_url.clone();
                let retained: Vec<(String, String)> = page_url
                    .query_pairs()
                    .filter(|(k, _)| k != "cursor")
                    .map(|(k, v)| (k.into_owned(), v.into_owned()))
                    .collect();
                {
                    let mut query = url.query_pairs_mut();
                    query.clear();
                    for (k, v) in &retained {
                        query.append_pair(k, v);
                    }
                    query.append_pair("cursor", cursor);
                }
                url
            }
        }
    }
}

/// Everything the locator extracts from one response body
#[derive(Debug, Clone, Default)]
pub struct LocatedPage {
    /// Post fragments in page order
    pub fragments: Vec<RawPostFragment>,

    /// Strategy that produced the fragments
    pub strategy: Option<Strategy>,

    /// Page name and id
    pub context: PageContext,

    /// Continuation for the next page, when the feed has more
    pub continuation: Option<ContinuationState>,
}

struct Script {
    text: String,
    is_json: bool,
}

fn scripts(body: &str) -> Vec<Script> {
    let document = Html::parse_document(body);
    let Ok(selector) = Selector::parse("script") else {
        return Vec::new();
    };
    document
        .select(&selector)
        .map(|element| Script {
            text: element.text().collect::<String>(),
            is_json: element
                .value()
                .attr("type")
                .is_some_and(|t| t.eq_ignore_ascii_case("application/json")),
        })
        .collect()
}

static PAGE_INFO_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\\?"page_info\\?"\s*:\s*\{([^{}]*)\}"#).expect("page info pattern is valid")
});

static END_CURSOR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\\?"end_cursor\\?"\s*:\s*\\?"([^"\\]+)\\?""#).expect("cursor pattern is valid")
});

static HAS_NEXT_PAGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\\?"has_next_page\\?"\s*:\s*(true|false)"#).expect("next page pattern is valid")
});

/// Paging state of one `page_info` object
#[derive(Debug, Default)]
struct PageInfo {
    end_cursor: Option<String>,
    has_next_page: Option<bool>,
}

impl PageInfo {
    fn from_map(map: &serde_json::Map<String, Value>) -> Self {
        Self {
            end_cursor: map
                .get("end_cursor")
                .and_then(Value::as_str)
                .filter(|c| !c.is_empty())
                .map(str::to_string),
            has_next_page: map.get("has_next_page").and_then(Value::as_bool),
        }
    }

    fn from_text(text: &str) -> Self {
        Self {
            end_cursor: END_CURSOR_RE
                .captures(text)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string()),
            has_next_page: HAS_NEXT_PAGE_RE
                .captures(text)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str() == "true"),
        }
    }

    fn into_continuation(self) -> Option<ContinuationState> {
        if self.has_next_page == Some(false) {
            return None;
        }
        self.end_cursor.map(ContinuationState::Cursor)
    }
}

/// JSON documents of a body that may carry paging state
fn paging_documents(body: &str) -> Vec<Value> {
    if let Some(documents) = json::parse_json_documents(body) {
        return documents;
    }
    let mut documents = Vec::new();
    for script in scripts(body) {
        if !script.text.contains("page_info") {
            continue;
        }
        if script.is_json {
            if let Ok(document) = serde_json::from_str::<Value>(script.text.trim()) {
                documents.push(document);
            }
        } else {
            documents.extend(json::scan_embedded_objects(&script.text));
        }
    }
    documents
}

/// Derive the continuation state of a feed response.
///
/// The feed's own `page_info` is read from the parsed payload; paging state
/// nested inside posts belongs to their comments and is ignored. Payloads
/// that only exist as escaped text are searched block by block instead.
pub fn continuation(body: &str) -> Option<ContinuationState> {
    if let Some(link) = markup::see_more_link(body) {
        return Some(ContinuationState::NextUrl(link));
    }

    if let Some(page_info) = paging_documents(body)
        .iter()
        .find_map(|document| json::feed_page_info(document).map(PageInfo::from_map))
    {
        return page_info.into_continuation();
    }

    // Without a parsed payload any block announcing a next page wins
    PAGE_INFO_RE
        .captures_iter(body)
        .filter_map(|c| c.get(1))
        .map(|m| PageInfo::from_text(m.as_str()))
        .filter_map(PageInfo::into_continuation)
        .last()
}

/// Locates post fragments using an ordered list of strategies
#[derive(Debug, Clone)]
pub struct PayloadLocator {
    strategies: Vec<Strategy>,
}

impl Default for PayloadLocator {
    fn default() -> Self {
        Self::new(Strategy::ALL.to_vec())
    }
}

impl PayloadLocator {
    pub fn new(strategies: Vec<Strategy>) -> Self {
        Self { strategies }
    }

    pub fn strategies(&self) -> &[Strategy] {
        &self.strategies
    }

    /// Locate the post fragments of a body with the first matching strategy
    pub fn locate<'a>(&'a self, body: &'a str) -> Fragments<'a> {
        Fragments {
            body,
            pending: self.strategies.iter(),
            current: None,
        }
    }

    /// Locate fragments together with page context and continuation
    #[instrument(skip(self, body), fields(bytes = body.len()))]
    pub fn locate_page(&self, body: &str) -> LocatedPage {
        let mut fragments = self.locate(body);
        let strategy = fragments.strategy();
        LocatedPage {
            fragments: fragments.collect(),
            strategy,
            context: markup::page_context(body),
            continuation: continuation(body),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_js_response() {
        let body = r#"for (;;);{"payload":{"feed":[{"post_id":"1"},{"post_id":"2"}]},"page_info":{"end_cursor":"CUR2","has_next_page":true}}"#;
        let page = PayloadLocator::default().locate_page(body);

        assert_eq!(page.strategy, Some(Strategy::ServerJsResponse));
        assert_eq!(page.fragments.len(), 2);
        assert_eq!(page.continuation, Some(ContinuationState::Cursor("CUR2".to_string())));
    }

    #[test]
    fn test_script_json_picks_matching_region() {
        let body = r#"<html><body>
            <script type="application/json">{"config":{"locale":"en_US"}}</script>
            <script type="application/json">{"broken": </script>
            <script type="application/json">{"require":[["x",{"story":{"post_id":"9","message":{"text":"hello"}}}]]}</script>
        </body></html>"#;
        let fragments: Vec<_> = PayloadLocator::default().locate(body).collect();

        assert_eq!(fragments.len(), 1);
        assert_eq!(fragments[0].strategy(), Strategy::ScriptJson);
        assert_eq!(fragments[0].value()["post_id"], "9");
    }

    #[test]
    fn test_malformed_json_region_falls_through() {
        let body = r#"<script type="application/json">{"post_id": "1", </script>
            <div role="article"><a href="/page/posts/5">x</a><p>Fallback</p></div>"#;
        let page = PayloadLocator::default().locate_page(body);

        assert_eq!(page.strategy, Some(Strategy::ArticleMarkup));
        assert_eq!(page.fragments.len(), 1);
    }

    #[test]
    fn test_inline_script() {
        let body = r#"<script>requireLazy(["x"],function(){s.handle({"post_id":"3","text":"a"})});</script>"#;
        let fragments: Vec<_> = PayloadLocator::default().locate(body).collect();

        assert_eq!(fragments.len(), 1);
        assert_eq!(fragments[0].strategy(), Strategy::InlineScript);
    }

    #[test]
    fn test_escaped_json() {
        let body = r#"<div data-store="{\"post_id\":\"4\",\"message\":\"hi\"}"></div>"#;
        let page = PayloadLocator::default().locate_page(body);

        assert_eq!(page.strategy, Some(Strategy::EscapedJson));
        assert_eq!(page.fragments[0].value()["post_id"], "4");
    }

    #[test]
    fn test_absent_payload_is_empty() {
        let locator = PayloadLocator::default();
        assert_eq!(locator.locate("<html><body>Nothing here</body></html>").count(), 0);
        assert_eq!(locator.locate("").count(), 0);
    }

    #[test]
    fn test_custom_strategy_order() {
        let body = r#"<div role="article"><a href="/p/posts/1">a</a></div>
            <script type="application/json">{"post_id":"2"}</script>"#;

        let markup_first = PayloadLocator::new(vec![Strategy::ArticleMarkup, Strategy::ScriptJson]);
        let fragments: Vec<_> = markup_first.locate(body).collect();
        assert_eq!(fragments[0].strategy(), Strategy::ArticleMarkup);

        let json_only = PayloadLocator::new(vec![Strategy::ScriptJson]);
        let fragments: Vec<_> = json_only.locate(body).collect();
        assert_eq!(fragments[0].value()["post_id"], "2");
    }

    #[test]
    fn test_continuation_end_of_feed() {
        assert_eq!(
            continuation(r#"{"page_info":{"end_cursor":"X","has_next_page":false}}"#),
            None
        );
        assert_eq!(continuation("<html></html>"), None);
    }

    #[test]
    fn test_strategies_run_on_demand() {
        let body = r#"<script type="application/json">{"post_id":"1"}</script>"#;
        let locator = PayloadLocator::default();
        let mut fragments = locator.locate(body);

        assert_eq!(fragments.strategy(), Some(Strategy::ScriptJson));
        assert_eq!(fragments.next().map(|f| f.strategy()), Some(Strategy::ScriptJson));
        assert!(fragments.next().is_none());
        assert_eq!(fragments.strategy(), Some(Strategy::ScriptJson));
    }

    #[test]
    fn test_comment_paging_does_not_end_feed() {
        let body = r#"for (;;);{"data":{"page_info":{"end_cursor":"FEED2","has_next_page":true},"feed":[{"post_id":"1","comments":{"page_info":{"end_cursor":"C","has_next_page":false}}}]}}"#;
        assert_eq!(continuation(body), Some(ContinuationState::Cursor("FEED2".to_string())));

        let ended = r#"{"data":{"feed":[{"post_id":"1","comments":{"page_info":{"end_cursor":"C","has_next_page":true}}}],"page_info":{"has_next_page":false}}}"#;
        assert_eq!(continuation(ended), None);
    }

    #[test]
    fn test_continuation_from_inline_script() {
        let body = r#"<script>s.handle({"feed":[{"post_id":"1"}],"page_info":{"end_cursor":"NEXT","has_next_page":true}})</script>"#;
        assert_eq!(continuation(body), Some(ContinuationState::Cursor("NEXT".to_string())));
    }

    #[test]
    fn test_cursor_request_url() {
        let page = Url::parse("https://www.facebook.com/profile.php?id=7&cursor=old").unwrap();
        let next = ContinuationState::Cursor("new token".to_string()).next_request_url(&page);

        assert_eq!(
            next.as_str(),
            "https://www.facebook.com/profile.php?id=7&cursor=new+token"
        );
    }

    #[test]
    fn test_page_context_merge() {
        let mut context = PageContext {
            name: Some("NYT".to_string()),
            id: None,
        };
        context.merge(PageContext {
            name: Some("Other".to_string()),
            id: Some("1".to_string()),
        });
        assert_eq!(context.name.as_deref(), Some("NYT"));
        assert_eq!(context.id.as_deref(), Some("1"));
    }
}
