//! # Fetcher Module
//!
//! Issues unauthenticated requests for a page feed and turns the responses into
//! raw bodies or classified errors.
//!
//! ## Key Components
//!
//! - `Fetcher`: the seam between the pagination driver and the network
//! - `HttpFetcher`: `reqwest` implementation with a browser-like header set and
//!   no cookie store
//! - `RateLimitedFetcher`: wraps any fetcher with a process-wide request budget
//! - `ScriptedFetcher`: replays scripted responses for tests
//! - `Pacer`: per-target pacing state enforcing the inter-request delay window
//! - `classify_response`: maps status, final URL and body signatures to
//!   `FetchError` variants

mod error;
mod http;
pub mod mock;
mod ratelimited;

pub use error::FetchError;
pub use http::HttpFetcher;
pub use mock::ScriptedFetcher;
pub use ratelimited::RateLimitedFetcher;

use std::future::Future;
use std::sync::LazyLock;
use std::time::Duration;

use rand::Rng;
use regex::Regex;
use tracing::debug;
use url::Url;

use crate::clock::Clock;
use crate::config::ScrapeOptions;

/// Raw body of a successful response
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    /// Response body
    pub body: String,

    /// URL after redirects
    pub final_url: Url,

    /// HTTP status code
    pub status: u16,
}

/// Fetches feed pages for the pagination driver
pub trait Fetcher: Send + Sync {
    /// Fetch `url`, waiting first as required by the target's pacing state
    fn fetch(
        &self,
        url: &Url,
        pacer: &mut Pacer,
    ) -> impl Future<Output = Result<RawResponse, FetchError>> + Send;
}

impl<F: Fetcher> Fetcher for &F {
    fn fetch(
        &self,
        url: &Url,
        pacer: &mut Pacer,
    ) -> impl Future<Output = Result<RawResponse, FetchError>> + Send {
        (**self).fetch(url, pacer)
    }
}

/// Pacing state of one page target.
///
/// Every request for the same target goes through the same `Pacer`, so the
/// delay window holds across pages and retries. Targets never share a pacer.
#[derive(Debug, Clone)]
pub struct Pacer {
    min_delay: Duration,
    max_delay: Duration,
    last_request: Option<Duration>,
    requests: u32,
}

impl Pacer {
    pub fn new(min_delay: Duration, max_delay: Duration) -> Self {
        Self {
            min_delay,
            max_delay: max_delay.max(min_delay),
            last_request: None,
            requests: 0,
        }
    }

    pub fn from_options(options: &ScrapeOptions) -> Self {
        let (min, max) = options.request_delay();
        Self::new(min, max)
    }

    /// Number of requests admitted so far
    pub fn requests(&self) -> u32 {
        self.requests
    }

    /// Time still to wait at `now` before the next request may be sent
    fn remaining(&self, now: Duration) -> Duration {
        let Some(last) = self.last_request else {
            return Duration::ZERO;
        };
        let gap = if self.max_delay > self.min_delay {
            rand::thread_rng().gen_range(self.min_delay..=self.max_delay)
        } else {
            self.min_delay
        };
        (last + gap).saturating_sub(now)
    }

    /// Wait until the next request is allowed and record it
    pub async fn wait<C: Clock>(&mut self, clock: &C) -> Duration {
        let wait = self.remaining(clock.now());
        if !wait.is_zero() {
            debug!("Pacing next request by {:?}", wait);
            clock.sleep(wait).await;
        }
        self.last_request = Some(clock.now());
        self.requests += 1;
        wait
    }
}

static TITLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("title pattern is valid")
});

const CHECKPOINT_MARKERS: [&str; 3] = [
    "id=\"checkpoint_title\"",
    "/checkpoint/block/",
    "\"checkpoint\":{\"",
];

const BLOCKED_TITLES: [&str; 3] = ["temporarily blocked", "security check", "checkpoint"];

const UNAVAILABLE_TITLES: [&str; 4] = [
    "page not found",
    "content not found",
    "this page isn't available",
    "this content isn't available",
];

/// Classify a response by status, final URL and body signatures
pub fn classify_response(
    requested: &Url,
    status: u16,
    final_url: &Url,
    body: &str,
    retry_after: Option<Duration>,
) -> Result<(), FetchError> {
    let url = requested.to_string();
    let path = final_url.path().to_ascii_lowercase();
    let title = TITLE_RE
        .captures(body)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_lowercase())
        .unwrap_or_default();

    if status == 429 || status == 503 {
        return Err(FetchError::RateLimited {
            url,
            reason: format!("HTTP {}", status),
            retry_after,
        });
    }
    if path.starts_with("/checkpoint") {
        return Err(FetchError::RateLimited {
            url,
            reason: "redirected to checkpoint".to_string(),
            retry_after,
        });
    }
    if path.starts_with("/login") {
        return Err(FetchError::PageUnavailable {
            url,
            status: Some(status),
            reason: "login required".to_string(),
        });
    }
    if status == 404 || status == 410 {
        return Err(FetchError::PageUnavailable {
            url,
            status: Some(status),
            reason: format!("HTTP {}", status),
        });
    }
    if status >= 500 {
        return Err(FetchError::Network {
            url,
            message: format!("server error HTTP {}", status),
        });
    }
    if status >= 400 {
        return Err(FetchError::PageUnavailable {
            url,
            status: Some(status),
            reason: format!("HTTP {}", status),
        });
    }
    if CHECKPOINT_MARKERS.iter().any(|m| body.contains(m))
        || BLOCKED_TITLES.iter().any(|t| title.contains(t))
    {
        return Err(FetchError::RateLimited {
            url,
            reason: "checkpoint page".to_string(),
            retry_after,
        });
    }
    if UNAVAILABLE_TITLES
        .iter()
        .any(|t| title.replace('\u{2019}', "'").contains(t))
    {
        return Err(FetchError::PageUnavailable {
            url,
            status: Some(status),
            reason: format!("error page: {}", title),
        });
    }
    Ok(())
}
