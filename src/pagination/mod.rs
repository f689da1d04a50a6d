//! # Pagination Driver
//!
//! Drives the fetch -> locate -> normalize cycle for one page target and
//! decides after every page whether another one is requested.
//!
//! ```text
//! Idle -> Fetching -> Normalizing -> DecidingContinuation -> Fetching
//!                                                        -> Exhausted
//!                                                        -> LimitReached
//! ```
//!
//! Terminal failure states are `Cancelled`, `RateLimitExceeded`,
//! `NetworkFailure` and `PageUnavailable`. Every state but
//! `PageUnavailable` on the first page ends with the posts collected so far.

mod backoff;

pub use backoff::Backoff;

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::aggregator::ResultAggregator;
use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::fetcher::{FetchError, Fetcher, Pacer, RawResponse};
use crate::locator::{PageContext, PayloadLocator};
use crate::normalizer::PostNormalizer;
use crate::outcome::{RunOutcome, RunStatus};
use crate::post::PageTarget;

/// State of a pagination driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DriverState {
    Idle,
    Fetching,
    Normalizing,
    DecidingContinuation,
    /// The feed has no further pages
    Exhausted,
    /// Post or page limit reached
    LimitReached,
    Cancelled,
    RateLimitExceeded,
    NetworkFailure,
    PageUnavailable,
}

impl DriverState {
    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            DriverState::Idle
                | DriverState::Fetching
                | DriverState::Normalizing
                | DriverState::DecidingContinuation
        )
    }
}

/// Why fetching a page stopped without a response
enum FetchStop {
    Terminal(DriverState),
    Unavailable(FetchError),
}

/// Drives repeated fetches for one page target
pub struct PaginationDriver<F: Fetcher, C: Clock> {
    target: PageTarget,
    fetcher: F,
    clock: C,
    locator: PayloadLocator,
    normalizer: PostNormalizer,
    pacer: Pacer,
    aggregator: ResultAggregator,
    cancel: CancellationToken,
    state: DriverState,
    transitions: Vec<DriverState>,
    state_tx: watch::Sender<DriverState>,
    context: PageContext,
    pages_fetched: u32,
    skipped: usize,
    backoff_delays: Vec<Duration>,
}

impl<F: Fetcher, C: Clock> PaginationDriver<F, C> {
    /// Create a driver in the `Idle` state. The clock's wall time is the
    /// reference for relative display times.
    pub fn new(target: PageTarget, fetcher: F, clock: C) -> Self {
        let options = target.options();
        let (state_tx, _) = watch::channel(DriverState::Idle);
        Self {
            pacer: Pacer::from_options(options),
            aggregator: ResultAggregator::new(options.max_posts),
            normalizer: PostNormalizer::new(clock.wall_time()),
            locator: PayloadLocator::default(),
            cancel: CancellationToken::new(),
            state: DriverState::Idle,
            transitions: vec![DriverState::Idle],
            state_tx,
            context: PageContext::default(),
            pages_fetched: 0,
            skipped: 0,
            backoff_delays: Vec::new(),
            target,
            fetcher,
            clock,
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_locator(mut self, locator: PayloadLocator) -> Self {
        self.locator = locator;
        self
    }

    /// Current state
    pub fn state(&self) -> DriverState {
        self.state
    }

    /// Every state entered so far, starting with `Idle`
    pub fn transitions(&self) -> &[DriverState] {
        &self.transitions
    }

    /// Watch state changes while the driver runs
    pub fn subscribe(&self) -> watch::Receiver<DriverState> {
        self.state_tx.subscribe()
    }

    pub fn target(&self) -> &PageTarget {
        &self.target
    }

    fn transition(&mut self, next: DriverState) {
        debug!(from = ?self.state, to = ?next, "Driver transition");
        self.state = next;
        self.transitions.push(next);
        self.state_tx.send_replace(next);
    }

    /// Run until the feed is exhausted, a limit is reached, or the run stops.
    ///
    /// Returns an error only when the first page is unavailable.
    #[instrument(skip(self), fields(target = %self.target))]
    pub async fn run(&mut self) -> Result<RunOutcome> {
        if self.state != DriverState::Idle {
            return Err(Error::Other(format!(
                "driver for {} already ran",
                self.target
            )));
        }

        let options = self.target.options().clone();
        let mut url = self.target.url().clone();
        let mut requested = HashSet::from([url.to_string()]);

        loop {
            if self.cancel.is_cancelled() {
                info!("Run cancelled before page {}", self.pages_fetched + 1);
                self.transition(DriverState::Cancelled);
                break;
            }

            self.transition(DriverState::Fetching);
            let response = match self.fetch_with_retries(&url).await {
                Ok(response) => response,
                Err(FetchStop::Terminal(state)) => {
                    self.transition(state);
                    break;
                }
                Err(FetchStop::Unavailable(err)) if self.pages_fetched == 0 => {
                    warn!("First page unavailable: {}", err);
                    self.transition(DriverState::PageUnavailable);
                    return Err(err.into());
                }
                Err(FetchStop::Unavailable(err)) => {
                    info!("Later page unavailable, treating feed as ended: {}", err);
                    self.transition(DriverState::Exhausted);
                    break;
                }
            };
            self.pages_fetched += 1;

            self.transition(DriverState::Normalizing);
            let located = self.locator.locate_page(&response.body);
            self.context.merge(located.context.clone());
            let (posts, skipped) =
                self.normalizer
                    .normalize_all(&located.fragments, &self.target, &self.context);
            self.skipped += skipped.len();
            let added = self.aggregator.add(posts);
            info!(
                "Page {}: {} fragments via {}, {} new posts, {} total",
                self.pages_fetched,
                located.fragments.len(),
                located
                    .strategy
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "none".to_string()),
                added,
                self.aggregator.len()
            );

            self.transition(DriverState::DecidingContinuation);
            if self.aggregator.is_full() {
                debug!("Reached {} posts", options.max_posts);
                self.transition(DriverState::LimitReached);
                break;
            }
            if located.fragments.is_empty() && self.pages_fetched > 1 {
                debug!("Empty page, feed exhausted");
                self.transition(DriverState::Exhausted);
                break;
            }
            let Some(continuation) = located.continuation else {
                debug!("No continuation, feed exhausted");
                self.transition(DriverState::Exhausted);
                break;
            };
            let next = continuation.next_request_url(self.target.url());
            if !requested.insert(next.to_string()) {
                warn!("Continuation repeats {}, stopping", next);
                self.transition(DriverState::Exhausted);
                break;
            }
            if self.pages_fetched >= options.max_pages {
                debug!("Reached {} pages", options.max_pages);
                self.transition(DriverState::LimitReached);
                break;
            }
            url = next;
        }

        Ok(self.outcome())
    }

    async fn fetch_with_retries(&mut self, url: &Url) -> std::result::Result<RawResponse, FetchStop> {
        let options = self.target.options();
        let mut backoff = Backoff::from_options(options);
        let network_retries = options.network_retries;
        let network_delay = options.network_retry_delay();
        let mut network_attempts = 0u32;

        loop {
            let err = match self.fetcher.fetch(url, &mut self.pacer).await {
                Ok(response) => return Ok(response),
                Err(err) => err,
            };

            let delay = match &err {
                FetchError::PageUnavailable { .. } => return Err(FetchStop::Unavailable(err)),
                FetchError::RateLimited { retry_after, .. } => {
                    let Some(delay) = backoff.next_delay(*retry_after) else {
                        warn!("Giving up after {} rate-limit retries: {}", backoff.attempts(), err);
                        return Err(FetchStop::Terminal(DriverState::RateLimitExceeded));
                    };
                    warn!("{}; backing off for {:?}", err, delay);
                    self.backoff_delays.push(delay);
                    delay
                }
                FetchError::Network { .. } => {
                    if network_attempts >= network_retries {
                        warn!("Giving up after {} network retries: {}", network_attempts, err);
                        return Err(FetchStop::Terminal(DriverState::NetworkFailure));
                    }
                    network_attempts += 1;
                    warn!("{}; retrying in {:?}", err, network_delay);
                    network_delay
                }
            };

            if !self.pause(delay).await || self.cancel.is_cancelled() {
                return Err(FetchStop::Terminal(DriverState::Cancelled));
            }
        }
    }

    /// Sleep unless cancelled first. Returns false when cancelled.
    async fn pause(&self, delay: Duration) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            _ = self.clock.sleep(delay) => true,
        }
    }

    fn outcome(&mut self) -> RunOutcome {
        let aggregator = std::mem::replace(
            &mut self.aggregator,
            ResultAggregator::new(self.target.options().max_posts),
        );
        RunOutcome {
            target: self.target.url().to_string(),
            status: RunStatus::from(self.state),
            posts: aggregator.finalize(),
            pages_fetched: self.pages_fetched,
            skipped: self.skipped,
            backoff_delays_ms: self
                .backoff_delays
                .iter()
                .map(|d| d.as_millis() as u64)
                .collect(),
            final_state: self.state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::ScrapeOptions;
    use crate::fetcher::ScriptedFetcher;

    fn options() -> crate::config::ScrapeOptionsBuilder {
        ScrapeOptions::builder().request_delay_ms(0, 0)
    }

    fn target(options: ScrapeOptions) -> PageTarget {
        PageTarget::new("nytimes", options).unwrap()
    }

    fn feed_page(ids: &[&str], cursor: Option<&str>) -> String {
        let feed: Vec<String> = ids
            .iter()
            .map(|id| format!(r#"{{"post_id":"{}","message":{{"text":"post {}"}}}}"#, id, id))
            .collect();
        let page_info = match cursor {
            Some(c) => format!(r#"{{"end_cursor":"{}","has_next_page":true}}"#, c),
            None => r#"{"has_next_page":false}"#.to_string(),
        };
        format!(
            r#"for (;;);{{"data":{{"feed":[{}],"page_info":{}}}}}"#,
            feed.join(","),
            page_info
        )
    }

    fn rate_limited() -> FetchError {
        FetchError::RateLimited {
            url: "https://www.facebook.com/nytimes".to_string(),
            reason: "HTTP 429".to_string(),
            retry_after: None,
        }
    }

    fn network() -> FetchError {
        FetchError::Network {
            url: "https://www.facebook.com/nytimes".to_string(),
            message: "connection reset".to_string(),
        }
    }

    fn unavailable() -> FetchError {
        FetchError::PageUnavailable {
            url: "https://www.facebook.com/nytimes".to_string(),
            status: Some(404),
            reason: "HTTP 404".to_string(),
        }
    }

    fn ids(outcome: &RunOutcome) -> Vec<&str> {
        outcome.posts.iter().map(|p| p.post_id()).collect()
    }

    fn driver(
        options: ScrapeOptions,
        fetcher: &ScriptedFetcher,
    ) -> PaginationDriver<&ScriptedFetcher, ManualClock> {
        PaginationDriver::new(target(options), fetcher, fetcher.clock().clone())
    }

    #[tokio::test]
    async fn test_exhausts_after_last_empty_page() {
        let fetcher = ScriptedFetcher::default();
        fetcher.push_body(feed_page(&["1", "2"], Some("c1")));
        fetcher.push_body(feed_page(&["3"], Some("c2")));
        fetcher.push_body(feed_page(&[], Some("c3")));

        let mut driver = driver(options().build(), &fetcher);
        let outcome = driver.run().await.unwrap();

        assert_eq!(fetcher.fetch_count(), 3);
        assert_eq!(outcome.final_state, DriverState::Exhausted);
        assert_eq!(outcome.status, RunStatus::Complete);
        assert_eq!(outcome.pages_fetched, 3);
        assert_eq!(ids(&outcome), vec!["1", "2", "3"]);

        let requested = fetcher.requested();
        assert_eq!(requested[0].as_str(), "https://www.facebook.com/nytimes");
        assert_eq!(requested[1].as_str(), "https://www.facebook.com/nytimes?cursor=c1");
        assert_eq!(requested[2].as_str(), "https://www.facebook.com/nytimes?cursor=c2");
    }

    #[tokio::test]
    async fn test_transitions_are_recorded() {
        let fetcher = ScriptedFetcher::default();
        fetcher.push_body(feed_page(&["1"], None));

        let mut driver = driver(options().build(), &fetcher);
        let updates = driver.subscribe();
        driver.run().await.unwrap();

        assert_eq!(
            driver.transitions(),
            &[
                DriverState::Idle,
                DriverState::Fetching,
                DriverState::Normalizing,
                DriverState::DecidingContinuation,
                DriverState::Exhausted,
            ]
        );
        assert_eq!(driver.state(), DriverState::Exhausted);
        assert_eq!(*updates.borrow(), DriverState::Exhausted);
        assert!(driver.run().await.is_err());
    }

    #[tokio::test]
    async fn test_rate_limited_then_success() {
        let fetcher = ScriptedFetcher::default();
        for _ in 0..3 {
            fetcher.push_error(rate_limited());
        }
        fetcher.push_body(feed_page(&["1"], None));

        let mut driver = driver(options().build(), &fetcher);
        let outcome = driver.run().await.unwrap();

        assert_eq!(outcome.status, RunStatus::Complete);
        assert_eq!(ids(&outcome), vec!["1"]);
        assert_eq!(outcome.backoff_delays_ms, vec![2_000, 4_000, 8_000]);
        assert!(outcome.backoff_delays_ms.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(fetcher.clock().total_slept(), Duration::from_secs(14));
    }

    #[tokio::test]
    async fn test_rate_limit_exhaustion_keeps_posts() {
        let fetcher = ScriptedFetcher::default();
        fetcher.push_body(feed_page(&["1"], Some("c1")));
        for _ in 0..3 {
            fetcher.push_error(rate_limited());
        }

        let mut driver = driver(options().max_retries(2).build(), &fetcher);
        let outcome = driver.run().await.unwrap();

        assert_eq!(outcome.status, RunStatus::PartialRateLimited);
        assert_eq!(outcome.final_state, DriverState::RateLimitExceeded);
        assert_eq!(ids(&outcome), vec!["1"]);
        assert_eq!(outcome.backoff_delays_ms.len(), 2);
        assert_eq!(fetcher.fetch_count(), 4);
    }

    #[tokio::test]
    async fn test_duplicates_across_pages() {
        let fetcher = ScriptedFetcher::default();
        fetcher.push_body(feed_page(&["A"], Some("c1")));
        fetcher.push_body(feed_page(&["A", "B"], None));

        let mut driver = driver(options().build(), &fetcher);
        let outcome = driver.run().await.unwrap();

        assert_eq!(ids(&outcome), vec!["A", "B"]);
        assert_eq!(outcome.status, RunStatus::Complete);
    }

    #[tokio::test]
    async fn test_max_posts_limit() {
        let fetcher = ScriptedFetcher::default();
        fetcher.push_body(feed_page(&["1", "2", "3"], Some("c1")));

        let mut driver = driver(options().max_posts(1).build(), &fetcher);
        let outcome = driver.run().await.unwrap();

        assert_eq!(ids(&outcome), vec!["1"]);
        assert_eq!(outcome.status, RunStatus::Complete);
        assert_eq!(outcome.final_state, DriverState::LimitReached);
        assert_eq!(fetcher.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_max_pages_limit() {
        let fetcher = ScriptedFetcher::default();
        fetcher.push_body(feed_page(&["1"], Some("c1")));
        fetcher.push_body(feed_page(&["2"], Some("c2")));
        fetcher.push_body(feed_page(&["3"], Some("c3")));

        let mut driver = driver(options().max_pages(2).build(), &fetcher);
        let outcome = driver.run().await.unwrap();

        assert_eq!(fetcher.fetch_count(), 2);
        assert_eq!(outcome.final_state, DriverState::LimitReached);
        assert_eq!(ids(&outcome), vec!["1", "2"]);
    }

    #[tokio::test]
    async fn test_repeated_cursor_ends_feed() {
        let fetcher = ScriptedFetcher::default();
        fetcher.push_body(feed_page(&["1"], Some("loop")));
        fetcher.push_body(feed_page(&["2"], Some("loop")));

        let mut driver = driver(options().build(), &fetcher);
        let outcome = driver.run().await.unwrap();

        assert_eq!(fetcher.fetch_count(), 2);
        assert_eq!(outcome.final_state, DriverState::Exhausted);
    }

    #[tokio::test]
    async fn test_network_retries_exhausted() {
        let fetcher = ScriptedFetcher::default();
        for _ in 0..4 {
            fetcher.push_error(network());
        }

        let options = options().network_retries(3, 500).build();
        let mut driver = driver(options, &fetcher);
        let outcome = driver.run().await.unwrap();

        assert_eq!(outcome.status, RunStatus::PartialNetworkError);
        assert!(outcome.posts.is_empty());
        assert_eq!(fetcher.fetch_count(), 4);
        assert_eq!(fetcher.clock().sleeps(), vec![Duration::from_millis(500); 3]);
    }

    #[tokio::test]
    async fn test_network_error_recovers() {
        let fetcher = ScriptedFetcher::default();
        fetcher.push_error(network());
        fetcher.push_body(feed_page(&["1"], None));

        let mut driver = driver(options().build(), &fetcher);
        let outcome = driver.run().await.unwrap();

        assert_eq!(outcome.status, RunStatus::Complete);
        assert_eq!(ids(&outcome), vec!["1"]);
    }

    #[tokio::test]
    async fn test_first_page_unavailable_is_fatal() {
        let fetcher = ScriptedFetcher::default();
        fetcher.push_error(unavailable());

        let mut driver = driver(options().build(), &fetcher);
        let result = driver.run().await;

        assert!(matches!(result, Err(Error::PageUnavailable { .. })));
        assert_eq!(driver.state(), DriverState::PageUnavailable);
    }

    #[tokio::test]
    async fn test_later_page_unavailable_ends_feed() {
        let fetcher = ScriptedFetcher::default();
        fetcher.push_body(feed_page(&["1"], Some("c1")));
        fetcher.push_error(unavailable());

        let mut driver = driver(options().build(), &fetcher);
        let outcome = driver.run().await.unwrap();

        assert_eq!(outcome.status, RunStatus::Complete);
        assert_eq!(outcome.final_state, DriverState::Exhausted);
        assert_eq!(ids(&outcome), vec!["1"]);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let fetcher = ScriptedFetcher::default();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let mut driver = driver(options().build(), &fetcher).with_cancellation(cancel);
        let outcome = driver.run().await.unwrap();

        assert_eq!(outcome.status, RunStatus::PartialCancelled);
        assert_eq!(fetcher.fetch_count(), 0);
    }

    /// Cancels its token once `after` fetches have been served
    struct CancellingFetcher {
        inner: ScriptedFetcher,
        cancel: CancellationToken,
        after: usize,
    }

    impl Fetcher for CancellingFetcher {
        async fn fetch(
            &self,
            url: &Url,
            pacer: &mut Pacer,
        ) -> std::result::Result<RawResponse, FetchError> {
            let result = self.inner.fetch(url, pacer).await;
            if self.inner.fetch_count() >= self.after {
                self.cancel.cancel();
            }
            result
        }
    }

    #[tokio::test]
    async fn test_cancellation_keeps_collected_posts() {
        let inner = ScriptedFetcher::default();
        inner.push_body(feed_page(&["1", "2"], Some("c1")));
        inner.push_body(feed_page(&["3"], None));
        let cancel = CancellationToken::new();
        let fetcher = CancellingFetcher {
            inner: inner.clone(),
            cancel: cancel.clone(),
            after: 1,
        };

        let mut driver = PaginationDriver::new(target(options().build()), fetcher, inner.clock().clone())
            .with_cancellation(cancel);
        let outcome = driver.run().await.unwrap();

        assert_eq!(outcome.status, RunStatus::PartialCancelled);
        assert_eq!(ids(&outcome), vec!["1", "2"]);
        assert_eq!(inner.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_backoff() {
        let inner = ScriptedFetcher::default();
        inner.push_error(rate_limited());
        inner.push_body(feed_page(&["1"], None));
        let cancel = CancellationToken::new();
        let fetcher = CancellingFetcher {
            inner: inner.clone(),
            cancel: cancel.clone(),
            after: 1,
        };

        let mut driver = PaginationDriver::new(target(options().build()), fetcher, inner.clock().clone())
            .with_cancellation(cancel);
        let outcome = driver.run().await.unwrap();

        assert_eq!(outcome.status, RunStatus::PartialCancelled);
        assert!(inner.clock().sleeps().is_empty());
        assert_eq!(inner.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_page_context_fills_posts() {
        let fetcher = ScriptedFetcher::default();
        fetcher.push_body(
            r#"<html><head><meta property="og:title" content="The New York Times" />
            <meta property="al:android:url" content="fb://page/5281959998" /></head>
            <body><div role="article"><a href="/nytimes/posts/111">x</a><p>Hello</p></div></body></html>"#,
        );

        let mut driver = driver(options().build(), &fetcher);
        let outcome = driver.run().await.unwrap();

        assert_eq!(outcome.posts.len(), 1);
        let post = &outcome.posts[0];
        assert_eq!(post.post_id(), "111");
        assert_eq!(post.page_name(), Some("The New York Times"));
        assert_eq!(post.page_id(), Some("5281959998"));
        assert_eq!(post.text(), "Hello");
    }
}
