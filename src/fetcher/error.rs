//! Error types for the fetcher module

use std::time::Duration;

use thiserror::Error;

/// Error type for fetch operations
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FetchError {
    /// Facebook throttled or temporarily blocked the request
    #[error("Rate limited at {url}: {reason}")]
    RateLimited {
        /// Requested URL
        url: String,
        /// What identified the response as rate limiting
        reason: String,
        /// Wait suggested by a Retry-After header
        retry_after: Option<Duration>,
    },

    /// Transport failure, timeout or transient server error
    #[error("Network error at {url}: {message}")]
    Network {
        /// Requested URL
        url: String,
        /// Underlying error message
        message: String,
    },

    /// The page does not exist, is not public, or is an error page
    #[error("Page unavailable at {url}: {reason}")]
    PageUnavailable {
        /// Requested URL
        url: String,
        /// HTTP status when one was received
        status: Option<u16>,
        /// What identified the page as unavailable
        reason: String,
    },
}

impl FetchError {
    /// Whether retrying the same request can succeed
    pub fn is_transient(&self) -> bool {
        !matches!(self, FetchError::PageUnavailable { .. })
    }

    pub(crate) fn network(url: &str, err: reqwest::Error) -> Self {
        let message = if err.is_timeout() {
            format!("request timed out: {}", err)
        } else {
            err.to_string()
        };
        FetchError::Network {
            url: url.to_string(),
            message,
        }
    }
}
