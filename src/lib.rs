//! # fbposts - Public Facebook Page Post Extraction
//!
//! This crate extracts structured post metadata (identifiers, text, engagement
//! counts, timestamps, links) from public Facebook pages without authenticated
//! sessions. It never sends cookies or credentials; a login wall is reported as
//! an unavailable page.
//!
//! ## Features
//!
//! - Unauthenticated fetching with per-target pacing, exponential backoff on
//!   rate limiting and an optional process-wide request budget
//! - Payload location through an ordered list of extraction strategies that
//!   tolerates markup drift (server JSON responses, script blocks, escaped
//!   JSON, plain article markup)
//! - Normalization into a canonical `Post` with explicit `null`s for unknown
//!   values, metric-suffix count parsing and display-time parsing
//! - Pagination through cursors and "see more" links with deduplication
//! - Concurrent batch runs with an admission gate, run timeout and cancellation
//! - Partial results with a status whenever a run stops early
//!
//! ## Example
//!
//! ```rust,no_run
//! use fbposts::config::{ScrapeOptions, ScraperConfig};
//! use fbposts::post::PageTarget;
//! use fbposts::scraper::Scraper;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let scraper = Scraper::new(ScraperConfig::default())?;
//!
//!     let options = ScrapeOptions::builder().max_posts(20).build();
//!     let target = PageTarget::new("nytimes", options)?;
//!
//!     let outcome = scraper.scrape(target).await?;
//!     println!("{}: {} posts", outcome.status, outcome.posts.len());
//!     println!("{}", serde_json::to_string_pretty(&outcome.posts)?);
//!     Ok(())
//! }
//! ```

mod error;

pub mod aggregator;
pub mod clock;
pub mod config;
pub mod fetcher;
pub mod locator;
pub mod normalizer;
pub mod outcome;
pub mod pagination;
pub mod post;
pub mod scraper;

pub use error::Error;

/// Re-export of types module for public use
pub mod prelude {
    pub use crate::config::{ScrapeOptions, ScraperConfig};
    pub use crate::error::Error;
    pub use crate::error::Result;
    pub use crate::outcome::{RunOutcome, RunStatus};
    pub use crate::post::{PageTarget, Post};
    pub use crate::scraper::Scraper;
}
