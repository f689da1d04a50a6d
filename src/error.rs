//! Error types for the fbposts crate

use thiserror::Error;

use crate::fetcher::FetchError;

/// Result type for fbposts operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for fbposts operations
#[derive(Debug, Error)]
pub enum Error {
    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// URL parsing error
    #[error("URL parsing error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// The input could not be turned into a Facebook page target
    #[error("Invalid page target: {0}")]
    InvalidTarget(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// The target page is an error page, does not exist or is not public
    #[error("Page unavailable: {url} ({reason})")]
    PageUnavailable {
        /// URL of the page target
        url: String,
        /// Why the page was considered unavailable
        reason: String,
    },

    /// Fetch error that was not handled by the pagination driver
    #[error("Fetch error: {0}")]
    Fetch(String),

    /// Other errors
    #[error("{0}")]
    Other(String),
}

impl From<FetchError> for Error {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::PageUnavailable { url, reason, .. } => Error::PageUnavailable { url, reason },
            _ => Error::Fetch(err.to_string()),
        }
    }
}
