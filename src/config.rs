//! # Scraper Configuration Module
//!
//! Configuration for a scraping run, split in two levels:
//!
//! - `ScrapeOptions`: per page target limits, pacing window and retry policies
//! - `ScraperConfig`: run-level settings shared by every target (HTTP identity,
//!   proxy, admission gate size, run timeout, global request budget)
//!
//! Both use a builder pattern and ship defaults suited to polite,
//! unauthenticated access.

use std::time::Duration;

use crate::error::{Error, Result};

/// Default user agent, an ordinary desktop browser
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// Per target options
#[derive(Debug, Clone, PartialEq)]
pub struct ScrapeOptions {
    /// Maximum number of unique posts to collect
    pub max_posts: usize,

    /// Maximum number of feed pages to fetch
    pub max_pages: u32,

    /// Lower bound of the delay between two requests for the same target, in milliseconds
    pub min_request_delay_ms: u64,

    /// Upper bound of the delay between two requests for the same target, in milliseconds
    pub max_request_delay_ms: u64,

    /// Maximum number of retries of a page after a rate-limit response
    pub max_retries: u32,

    /// Delay before the first rate-limit retry; doubles on each attempt
    pub backoff_base_ms: u64,

    /// Upper bound for a single rate-limit backoff delay
    pub backoff_cap_ms: u64,

    /// Maximum number of retries of a page after a network failure
    pub network_retries: u32,

    /// Fixed delay between network retries
    pub network_retry_delay_ms: u64,
}

impl Default for ScrapeOptions {
    fn default() -> Self {
        Self {
            max_posts: 500,
            max_pages: 50,
            min_request_delay_ms: 1_000,
            max_request_delay_ms: 5_000,
            max_retries: 5,
            backoff_base_ms: 2_000,
            backoff_cap_ms: 60_000,
            network_retries: 3,
            network_retry_delay_ms: 2_000,
        }
    }
}

impl ScrapeOptions {
    /// Create a new builder
    pub fn builder() -> ScrapeOptionsBuilder {
        ScrapeOptionsBuilder::new()
    }

    /// Inter-request delay window
    pub fn request_delay(&self) -> (Duration, Duration) {
        (
            Duration::from_millis(self.min_request_delay_ms),
            Duration::from_millis(self.max_request_delay_ms),
        )
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_cap(&self) -> Duration {
        Duration::from_millis(self.backoff_cap_ms)
    }

    pub fn network_retry_delay(&self) -> Duration {
        Duration::from_millis(self.network_retry_delay_ms)
    }

    /// Check that the options describe a bounded, monotonic policy
    pub fn validate(&self) -> Result<()> {
        if self.max_posts == 0 {
            return Err(Error::Config("max_posts must be at least 1".to_string()));
        }
        if self.max_pages == 0 {
            return Err(Error::Config("max_pages must be at least 1".to_string()));
        }
        if self.min_request_delay_ms > self.max_request_delay_ms {
            return Err(Error::Config(format!(
                "request delay window is empty: {}ms > {}ms",
                self.min_request_delay_ms, self.max_request_delay_ms
            )));
        }
        if self.backoff_base_ms > self.backoff_cap_ms {
            return Err(Error::Config(format!(
                "backoff base {}ms exceeds cap {}ms",
                self.backoff_base_ms, self.backoff_cap_ms
            )));
        }
        Ok(())
    }
}

/// Builder for ScrapeOptions
#[derive(Debug, Default)]
pub struct ScrapeOptionsBuilder {
    options: ScrapeOptions,
}

impl ScrapeOptionsBuilder {
    /// Create a new builder with default options
    pub fn new() -> Self {
        Self {
            options: ScrapeOptions::default(),
        }
    }

    /// Set the maximum number of posts
    pub fn max_posts(mut self, max_posts: usize) -> Self {
        self.options.max_posts = max_posts;
        self
    }

    /// Set the maximum number of pages
    pub fn max_pages(mut self, max_pages: u32) -> Self {
        self.options.max_pages = max_pages;
        self
    }

    /// Set the inter-request delay window in milliseconds
    pub fn request_delay_ms(mut self, min: u64, max: u64) -> Self {
        self.options.min_request_delay_ms = min;
        self.options.max_request_delay_ms = max;
        self
    }

    /// Set the number of rate-limit retries
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.options.max_retries = max_retries;
        self
    }

    /// Set the backoff base and cap in milliseconds
    pub fn backoff_ms(mut self, base: u64, cap: u64) -> Self {
        self.options.backoff_base_ms = base;
        self.options.backoff_cap_ms = cap;
        self
    }

    /// Set the network retry count and delay in milliseconds
    pub fn network_retries(mut self, retries: u32, delay_ms: u64) -> Self {
        self.options.network_retries = retries;
        self.options.network_retry_delay_ms = delay_ms;
        self
    }

    /// Build the options
    pub fn build(self) -> ScrapeOptions {
        self.options
    }
}

/// Run-level configuration
#[derive(Debug, Clone)]
pub struct ScraperConfig {
    /// User agent sent with every request
    pub user_agent: String,

    /// Accept-Language header sent with every request
    pub accept_language: String,

    /// Additional request headers. Authentication headers are rejected.
    pub extra_headers: Vec<(String, String)>,

    /// Optional proxy URL for all requests
    pub proxy: Option<String>,

    /// Timeout for a single HTTP request in seconds
    pub request_timeout_secs: u64,

    /// Maximum number of page targets scraped at the same time
    pub concurrency: usize,

    /// Optional timeout for the whole run
    pub run_timeout: Option<Duration>,

    /// Optional process-wide request budget across all targets
    pub requests_per_minute: Option<u32>,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            accept_language: "en-US,en;q=0.9".to_string(),
            extra_headers: Vec::new(),
            proxy: None,
            request_timeout_secs: 15,
            concurrency: 3,
            run_timeout: None,
            requests_per_minute: None,
        }
    }
}

impl ScraperConfig {
    /// Create a new builder
    pub fn builder() -> ScraperConfigBuilder {
        ScraperConfigBuilder::new()
    }

    /// Get the request timeout as a Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Builder for ScraperConfig
#[derive(Debug, Default)]
pub struct ScraperConfigBuilder {
    config: ScraperConfig,
}

impl ScraperConfigBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self {
            config: ScraperConfig::default(),
        }
    }

    /// Set the user agent
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Set the Accept-Language header
    pub fn accept_language(mut self, accept_language: impl Into<String>) -> Self {
        self.config.accept_language = accept_language.into();
        self
    }

    /// Add an extra request header
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.extra_headers.push((name.into(), value.into()));
        self
    }

    /// Set the proxy URL
    pub fn proxy(mut self, proxy: Option<String>) -> Self {
        self.config.proxy = proxy;
        self
    }

    /// Set the request timeout in seconds
    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.request_timeout_secs = secs;
        self
    }

    /// Set the number of concurrently scraped targets
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.config.concurrency = concurrency.max(1);
        self
    }

    /// Set the run timeout
    pub fn run_timeout(mut self, run_timeout: Option<Duration>) -> Self {
        self.config.run_timeout = run_timeout;
        self
    }

    /// Set the global request budget
    pub fn requests_per_minute(mut self, requests_per_minute: Option<u32>) -> Self {
        self.config.requests_per_minute = requests_per_minute;
        self
    }

    /// Build the configuration
    pub fn build(self) -> ScraperConfig {
        self.config
    }
}
