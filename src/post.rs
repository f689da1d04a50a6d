//! # Post Data Model
//!
//! - `Post`: the canonical, immutable record produced for every extracted post
//! - `PageTarget`: a validated Facebook page URL plus the options of its run
//!
//! Posts serialize with the camelCase field names consumers expect and always
//! carry every key, using explicit `null` for unknown values.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::ScrapeOptions;
use crate::error::{Error, Result};

/// Base URL used to resolve bare page identifiers and relative links
pub const FACEBOOK_BASE_URL: &str = "https://www.facebook.com";

/// A single post extracted from a public page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub(crate) facebook_url: String,
    pub(crate) page_id: Option<String>,
    pub(crate) post_id: String,
    pub(crate) page_name: Option<String>,
    pub(crate) url: Option<String>,
    pub(crate) time: Option<String>,
    pub(crate) timestamp: Option<i64>,
    pub(crate) likes: Option<u64>,
    pub(crate) comments: Option<u64>,
    pub(crate) shares: Option<u64>,
    pub(crate) text: String,
    pub(crate) link: Option<String>,
}

impl Post {
    /// URL of the page the post was scraped from
    pub fn facebook_url(&self) -> &str {
        &self.facebook_url
    }

    pub fn page_id(&self) -> Option<&str> {
        self.page_id.as_deref()
    }

    /// Identifier of the post, unique within one page scrape
    pub fn post_id(&self) -> &str {
        &self.post_id
    }

    pub fn page_name(&self) -> Option<&str> {
        self.page_name.as_deref()
    }

    /// Canonical URL of the post
    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    /// Time as displayed on the page
    pub fn time(&self) -> Option<&str> {
        self.time.as_deref()
    }

    /// Milliseconds since the Unix epoch
    pub fn timestamp(&self) -> Option<i64> {
        self.timestamp
    }

    pub fn likes(&self) -> Option<u64> {
        self.likes
    }

    pub fn comments(&self) -> Option<u64> {
        self.comments
    }

    pub fn shares(&self) -> Option<u64> {
        self.shares
    }

    /// Full caption; empty when the post has no text
    pub fn text(&self) -> &str {
        &self.text
    }

    /// External link shared in the post body
    pub fn link(&self) -> Option<&str> {
        self.link.as_deref()
    }

    /// Minimal post used by tests of components that only look at identity
    #[cfg(test)]
    pub(crate) fn stub(facebook_url: &str, post_id: &str) -> Self {
        Self {
            facebook_url: facebook_url.to_string(),
            page_id: None,
            post_id: post_id.to_string(),
            page_name: None,
            url: None,
            time: None,
            timestamp: None,
            likes: None,
            comments: None,
            shares: None,
            text: String::new(),
            link: None,
        }
    }
}

/// A public Facebook page to scrape together with its run options
#[derive(Debug, Clone, PartialEq)]
pub struct PageTarget {
    url: Url,
    options: ScrapeOptions,
}

impl PageTarget {
    /// Create a target from a page URL or a bare page identifier such as `nytimes`
    pub fn new(input: &str, options: ScrapeOptions) -> Result<Self> {
        options.validate()?;
        let url = resolve_page_url(input)?;
        Ok(Self { url, options })
    }

    /// Create a target with default options
    pub fn parse(input: &str) -> Result<Self> {
        Self::new(input, ScrapeOptions::default())
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn options(&self) -> &ScrapeOptions {
        &self.options
    }
}

impl std::fmt::Display for PageTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.url)
    }
}

/// Whether the host belongs to Facebook
pub(crate) fn is_facebook_host(host: &str) -> bool {
    let host = host.to_ascii_lowercase();
    host == "facebook.com" || host.ends_with(".facebook.com") || host == "fb.com"
}

fn resolve_page_url(input: &str) -> Result<Url> {
    let input = input.trim();
    if input.is_empty() {
        return Err(Error::InvalidTarget("empty page target".to_string()));
    }

    let candidate = if input.contains("://") {
        input.to_string()
    } else if input.contains('/') || input.contains(".com") {
        format!("https://{}", input)
    } else if input
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
    {
        format!("{}/{}", FACEBOOK_BASE_URL, input)
    } else {
        return Err(Error::InvalidTarget(format!(
            "'{}' is neither a URL nor a page identifier",
            input
        )));
    };

    let mut url = Url::parse(&candidate)?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(Error::InvalidTarget(format!(
            "unsupported scheme '{}'",
            url.scheme()
        )));
    }
    let host = url
        .host_str()
        .ok_or_else(|| Error::InvalidTarget(format!("'{}' has no host", input)))?;
    if !is_facebook_host(host) {
        return Err(Error::InvalidTarget(format!(
            "'{}' is not a Facebook page",
            input
        )));
    }
    if url.path() == "/" || url.path().is_empty() {
        return Err(Error::InvalidTarget(format!(
            "'{}' does not name a page",
            input
        )));
    }
    url.set_fragment(None);
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_from_identifier() {
        let target = PageTarget::parse("nytimes").unwrap();
        assert_eq!(target.url().as_str(), "https://www.facebook.com/nytimes");
    }

    #[test]
    fn test_target_from_url() {
        let target = PageTarget::parse("https://m.facebook.com/nytimes/#posts").unwrap();
        assert_eq!(target.url().as_str(), "https://m.facebook.com/nytimes/");

        let target = PageTarget::parse("facebook.com/profile.php?id=100064").unwrap();
        assert_eq!(target.url().query(), Some("id=100064"));
    }

    #[test]
    fn test_target_rejects_other_hosts() {
        assert!(matches!(
            PageTarget::parse("https://example.com/nytimes"),
            Err(Error::InvalidTarget(_))
        ));
        assert!(matches!(
            PageTarget::parse("https://www.facebook.com/"),
            Err(Error::InvalidTarget(_))
        ));
        assert!(matches!(
            PageTarget::parse("not a page"),
            Err(Error::InvalidTarget(_))
        ));
        assert!(matches!(PageTarget::parse("  "), Err(Error::InvalidTarget(_))));
    }

    #[test]
    fn test_target_validates_options() {
        let options = ScrapeOptions::builder().max_posts(0).build();
        assert!(matches!(
            PageTarget::new("nytimes", options),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_post_serializes_explicit_nulls() {
        let post = Post::stub("https://www.facebook.com/nytimes", "123");
        let json = serde_json::to_value(&post).unwrap();
        let object = json.as_object().unwrap();

        for key in [
            "facebookUrl",
            "pageId",
            "postId",
            "pageName",
            "url",
            "time",
            "timestamp",
            "likes",
            "comments",
            "shares",
            "text",
            "link",
        ] {
            assert!(object.contains_key(key), "missing key {}", key);
        }
        assert!(object["likes"].is_null());
        assert_eq!(object["postId"], "123");
        assert_eq!(object["text"], "");
    }

    #[test]
    fn test_zero_and_null_counts_differ() {
        let mut post = Post::stub("https://www.facebook.com/nytimes", "1");
        post.likes = Some(0);
        let json = serde_json::to_string(&post).unwrap();
        let back: Post = serde_json::from_str(&json).unwrap();

        assert_eq!(back.likes(), Some(0));
        assert_eq!(back.comments(), None);
        assert_eq!(back, post);
    }
}
