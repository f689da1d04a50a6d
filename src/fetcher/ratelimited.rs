use std::num::NonZeroU32;
use std::sync::Arc;

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use tracing::{Instrument, debug_span, info_span};
use url::Url;

use super::{FetchError, Fetcher, Pacer, RawResponse};
use crate::error::{Error, Result};

/// Applies a process-wide request budget on top of any fetcher.
///
/// Cloning shares the budget, so one instance bounds outbound volume across
/// every concurrently scraped target. Without a limiter requests pass through.
#[derive(Clone)]
pub struct RateLimitedFetcher<F: Fetcher> {
    fetcher: F,
    limiter: Option<Arc<DefaultDirectRateLimiter>>,
}

impl<F> RateLimitedFetcher<F>
where
    F: Fetcher,
{
    pub fn new(fetcher: F, limiter: DefaultDirectRateLimiter) -> Self {
        Self {
            fetcher,
            limiter: Some(Arc::new(limiter)),
        }
    }

    /// Pass requests through without a budget
    pub fn unlimited(fetcher: F) -> Self {
        Self {
            fetcher,
            limiter: None,
        }
    }

    /// Allow at most `requests` requests per minute
    pub fn per_minute(fetcher: F, requests: u32) -> Result<Self> {
        let requests = NonZeroU32::new(requests)
            .ok_or_else(|| Error::Config("requests per minute must be at least 1".to_string()))?;
        Ok(Self::new(fetcher, RateLimiter::direct(Quota::per_minute(requests))))
    }

    /// Apply the budget when one is configured
    pub fn with_budget(fetcher: F, requests_per_minute: Option<u32>) -> Result<Self> {
        match requests_per_minute {
            Some(requests) => Self::per_minute(fetcher, requests),
            None => Ok(Self::unlimited(fetcher)),
        }
    }

    pub fn is_limited(&self) -> bool {
        self.limiter.is_some()
    }

    pub fn inner(&self) -> &F {
        &self.fetcher
    }
}

impl<F: Fetcher> Fetcher for RateLimitedFetcher<F> {
    async fn fetch(
        &self,
        url: &Url,
        pacer: &mut Pacer,
    ) -> std::result::Result<RawResponse, FetchError> {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().instrument(debug_span!("limiter")).await;
        }
        self.fetcher
            .fetch(url, pacer)
            .instrument(info_span!("fetch", url = %url))
            .await
    }
}
