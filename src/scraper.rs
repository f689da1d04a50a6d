//! # Batch Scraper
//!
//! Scrapes several page targets concurrently. Each target gets its own pacer,
//! pagination driver and aggregator; targets share only the admission gate
//! (`concurrency` permits), the optional request budget and the run-level
//! cancellation token.
//!
//! A failing target never aborts the batch. Only the run timeout or an
//! explicit cancellation stops every target, and even then each one reports
//! the posts it collected.

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, instrument, warn};

use crate::clock::{Clock, TokioClock};
use crate::config::ScraperConfig;
use crate::error::{Error, Result};
use crate::fetcher::{Fetcher, HttpFetcher, RateLimitedFetcher};
use crate::outcome::{RunOutcome, RunStatus};
use crate::pagination::PaginationDriver;
use crate::post::PageTarget;

/// Progress message sent when a target finishes
#[derive(Debug, Clone, PartialEq)]
pub struct TargetProgress {
    pub target: String,
    pub posts: usize,

    /// `None` when the target failed
    pub status: Option<RunStatus>,
}

/// Runs page targets behind a counting admission gate
pub struct Scraper<F: Fetcher = RateLimitedFetcher<HttpFetcher>, C: Clock = TokioClock> {
    fetcher: F,
    clock: C,
    config: ScraperConfig,
    gate: Arc<Semaphore>,
    cancel: CancellationToken,
}

impl Scraper {
    /// Create a scraper issuing real HTTP requests
    pub fn new(config: ScraperConfig) -> Result<Self> {
        let fetcher = HttpFetcher::new(&config)?;
        let fetcher = RateLimitedFetcher::with_budget(fetcher, config.requests_per_minute)?;
        Ok(Self::with_fetcher(config, fetcher, TokioClock::new()))
    }
}

impl<F: Fetcher, C: Clock> Scraper<F, C> {
    /// Create a scraper with a custom fetcher and clock
    pub fn with_fetcher(config: ScraperConfig, fetcher: F, clock: C) -> Self {
        let permits = config.concurrency.max(1);
        Self {
            gate: Arc::new(Semaphore::new(permits)),
            cancel: CancellationToken::new(),
            fetcher,
            clock,
            config,
        }
    }

    /// Token cancelling every target of this scraper
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &ScraperConfig {
        &self.config
    }

    /// Scrape a single target
    pub async fn scrape(&self, target: PageTarget) -> Result<RunOutcome> {
        let mut results = self.scrape_all(vec![target], None).await;
        results
            .pop()
            .unwrap_or_else(|| Err(Error::Other("no result for target".to_string())))
    }

    /// Scrape every target and return one result per target, in input order
    #[instrument(skip_all, fields(targets = targets.len()))]
    pub async fn scrape_all(
        &self,
        targets: Vec<PageTarget>,
        progress: Option<mpsc::Sender<TargetProgress>>,
    ) -> Vec<Result<RunOutcome>> {
        info!(
            "Scraping {} targets, {} at a time",
            targets.len(),
            self.config.concurrency
        );
        let run_cancel = self.cancel.child_token();

        let runs = join_all(
            targets
                .into_iter()
                .map(|target| self.run_target(target, run_cancel.clone(), progress.clone())),
        );
        tokio::pin!(runs);

        match self.config.run_timeout {
            Some(limit) => {
                tokio::select! {
                    biased;
                    _ = self.clock.sleep(limit) => {
                        warn!("Run timeout of {:?} reached, cancelling remaining work", limit);
                        run_cancel.cancel();
                        runs.await
                    }
                    results = &mut runs => results,
                }
            }
            None => runs.await,
        }
    }

    async fn run_target(
        &self,
        target: PageTarget,
        cancel: CancellationToken,
        progress: Option<mpsc::Sender<TargetProgress>>,
    ) -> Result<RunOutcome> {
        let span = info_span!("target", url = %target);
        async move {
            let _permit = match self.gate.acquire().await {
                Ok(permit) => permit,
                Err(e) => return Err(Error::Other(format!("admission gate closed: {}", e))),
            };
            debug!("Admitted");

            let url = target.to_string();
            let mut driver =
                PaginationDriver::new(target, &self.fetcher, self.clock.clone()).with_cancellation(cancel);
            let result = driver.run().await;

            match &result {
                Ok(outcome) => info!(
                    "Finished with {} posts over {} pages ({})",
                    outcome.posts.len(),
                    outcome.pages_fetched,
                    outcome.status
                ),
                Err(e) => error!("Failed: {}", e),
            }

            if let Some(sender) = progress {
                let update = TargetProgress {
                    target: url,
                    posts: result.as_ref().map(|o| o.posts.len()).unwrap_or(0),
                    status: result.as_ref().ok().map(|o| o.status),
                };
                if sender.send(update).await.is_err() {
                    debug!("Progress receiver dropped");
                }
            }
            result
        }
        .instrument(span)
        .await
    }
}
