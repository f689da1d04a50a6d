//! HTTP fetcher backed by `reqwest`
//!
//! Requests carry an ordinary browser header set and nothing else: the client
//! has no cookie store and authentication headers are refused at construction.

use std::time::Duration;

use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderName, HeaderValue, RETRY_AFTER, USER_AGENT};
use reqwest::{Client as ReqwestClient, Proxy, redirect};
use tracing::{debug, instrument, warn};
use url::Url;

use super::{FetchError, Fetcher, Pacer, RawResponse, classify_response};
use crate::clock::{Clock, TokioClock};
use crate::config::ScraperConfig;
use crate::error::{Error, Result};

const BROWSER_ACCEPT: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8";

/// Headers that would carry credentials or session state
const FORBIDDEN_HEADERS: [&str; 4] = [
    "cookie",
    "authorization",
    "proxy-authorization",
    "x-fb-lsd",
];

/// Whether a header must never be sent
pub(crate) fn is_forbidden_header(name: &str) -> bool {
    let name = name.trim().to_ascii_lowercase();
    FORBIDDEN_HEADERS.contains(&name.as_str()) || name.starts_with("x-fb-")
}

/// Unauthenticated HTTP fetcher
#[derive(Debug, Clone)]
pub struct HttpFetcher<C = TokioClock> {
    client: ReqwestClient,
    clock: C,
}

impl HttpFetcher<TokioClock> {
    /// Create a fetcher using real time
    pub fn new(config: &ScraperConfig) -> Result<Self> {
        Self::with_clock(config, TokioClock::new())
    }
}

impl<C: Clock> HttpFetcher<C> {
    /// Create a fetcher with a custom clock
    pub fn with_clock(config: &ScraperConfig, clock: C) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, header_value(&config.user_agent)?);
        headers.insert(ACCEPT_LANGUAGE, header_value(&config.accept_language)?);
        headers.insert(ACCEPT, HeaderValue::from_static(BROWSER_ACCEPT));

        for (name, value) in &config.extra_headers {
            if is_forbidden_header(name) {
                return Err(Error::Config(format!(
                    "header '{}' would authenticate the request and is not allowed",
                    name
                )));
            }
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| Error::Config(format!("invalid header name '{}': {}", name, e)))?;
            headers.insert(name, header_value(value)?);
        }

        let mut builder = ReqwestClient::builder()
            .default_headers(headers)
            .timeout(config.request_timeout())
            .redirect(redirect::Policy::limited(10));

        if let Some(proxy) = &config.proxy {
            builder = builder.proxy(Proxy::all(proxy.as_str())?);
        }

        Ok(Self {
            client: builder.build()?,
            clock,
        })
    }
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| Error::Config(format!("invalid header value '{}': {}", value, e)))
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

impl<C: Clock> Fetcher for HttpFetcher<C> {
    #[instrument(skip(self, pacer), fields(url = %url), level = "debug")]
    async fn fetch(&self, url: &Url, pacer: &mut Pacer) -> std::result::Result<RawResponse, FetchError> {
        pacer.wait(&self.clock).await;

        debug!("Sending GET request");
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| FetchError::network(url.as_str(), e))?;

        let status = response.status().as_u16();
        let final_url = response.url().clone();
        let retry_after = parse_retry_after(response.headers());
        let body = response
            .text()
            .await
            .map_err(|e| FetchError::network(url.as_str(), e))?;

        if let Err(err) = classify_response(url, status, &final_url, &body, retry_after) {
            warn!("Fetch failed: {}", err);
            return Err(err);
        }

        debug!("Received {} bytes from {}", body.len(), final_url);
        Ok(RawResponse {
            body,
            final_url,
            status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    fn fetcher() -> HttpFetcher {
        HttpFetcher::new(&ScraperConfig::default()).unwrap()
    }

    fn no_pacing() -> Pacer {
        Pacer::new(Duration::ZERO, Duration::ZERO)
    }

    #[tokio::test]
    async fn test_fetch_success_sends_browser_headers() {
        let mut server = Server::new_async().await;
        let mock_server = server
            .mock("GET", "/nytimes")
            .match_header("user-agent", Matcher::Regex("Mozilla/5.0".to_string()))
            .match_header("accept-language", "en-US,en;q=0.9")
            .match_header("cookie", Matcher::Missing)
            .match_header("authorization", Matcher::Missing)
            .with_status(200)
            .with_body("<html><title>NYT</title></html>")
            .expect(1)
            .create_async()
            .await;

        let url = Url::parse(&format!("{}/nytimes", server.url())).unwrap();
        let response = fetcher().fetch(&url, &mut no_pacing()).await.unwrap();

        assert_eq!(response.status, 200);
        assert!(response.body.contains("NYT"));
        assert_eq!(response.final_url, url);
        mock_server.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_rate_limited_with_retry_after() {
        let mut server = Server::new_async().await;
        let mock_server = server
            .mock("GET", "/nytimes")
            .with_status(429)
            .with_header("retry-after", "7")
            .create_async()
            .await;

        let url = Url::parse(&format!("{}/nytimes", server.url())).unwrap();
        let result = fetcher().fetch(&url, &mut no_pacing()).await;

        match result {
            Err(FetchError::RateLimited { retry_after, .. }) => {
                assert_eq!(retry_after, Some(Duration::from_secs(7)))
            }
            other => panic!("expected rate limit, got {:?}", other),
        }
        mock_server.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_not_found_is_unavailable() {
        let mut server = Server::new_async().await;
        let mock_server = server
            .mock("GET", "/missing")
            .with_status(404)
            .with_body("Not Found")
            .create_async()
            .await;

        let url = Url::parse(&format!("{}/missing", server.url())).unwrap();
        let result = fetcher().fetch(&url, &mut no_pacing()).await;

        assert!(matches!(
            result,
            Err(FetchError::PageUnavailable { status: Some(404), .. })
        ));
        mock_server.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_login_redirect_is_unavailable() {
        let mut server = Server::new_async().await;
        let redirect = server
            .mock("GET", "/private")
            .with_status(302)
            .with_header("location", "/login/?next=private")
            .create_async()
            .await;
        let login = server
            .mock("GET", "/login/")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body("<title>Log in</title>")
            .create_async()
            .await;

        let url = Url::parse(&format!("{}/private", server.url())).unwrap();
        let result = fetcher().fetch(&url, &mut no_pacing()).await;

        assert!(matches!(result, Err(FetchError::PageUnavailable { .. })));
        redirect.assert_async().await;
        login.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_server_error_is_network() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/nytimes")
            .with_status(500)
            .create_async()
            .await;

        let url = Url::parse(&format!("{}/nytimes", server.url())).unwrap();
        let result = fetcher().fetch(&url, &mut no_pacing()).await;

        assert!(matches!(result, Err(FetchError::Network { .. })));
    }

    #[test]
    fn test_authentication_headers_are_rejected() {
        for name in ["Cookie", "authorization", "X-FB-Friendly-Name"] {
            let config = ScraperConfig::builder().header(name, "secret").build();
            assert!(
                matches!(HttpFetcher::new(&config), Err(Error::Config(_))),
                "{} should be rejected",
                name
            );
        }

        let config = ScraperConfig::builder().header("DNT", "1").build();
        assert!(HttpFetcher::new(&config).is_ok());
    }
}
