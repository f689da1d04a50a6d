//! Result of scraping one page target

use serde::{Deserialize, Serialize};

use crate::pagination::DriverState;
use crate::post::Post;

/// How a page scrape ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunStatus {
    /// The feed was exhausted or a configured limit was reached
    Complete,
    PartialRateLimited,
    PartialCancelled,
    PartialNetworkError,
}

impl RunStatus {
    pub fn is_complete(&self) -> bool {
        matches!(self, RunStatus::Complete)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Complete => "complete",
            RunStatus::PartialRateLimited => "partial-rate-limited",
            RunStatus::PartialCancelled => "partial-cancelled",
            RunStatus::PartialNetworkError => "partial-network-error",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<DriverState> for RunStatus {
    fn from(state: DriverState) -> Self {
        match state {
            DriverState::RateLimitExceeded => RunStatus::PartialRateLimited,
            DriverState::Cancelled => RunStatus::PartialCancelled,
            DriverState::NetworkFailure => RunStatus::PartialNetworkError,
            _ => RunStatus::Complete,
        }
    }
}

/// Posts collected for one target together with run statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOutcome {
    /// URL of the scraped page
    pub target: String,
    pub status: RunStatus,

    /// Unique posts in first-encountered order
    pub posts: Vec<Post>,
    pub pages_fetched: u32,

    /// Fragments that could not become posts
    pub skipped: usize,

    /// Rate-limit backoff delays applied, in milliseconds
    pub backoff_delays_ms: Vec<u64>,
    pub final_state: DriverState,
}

impl RunOutcome {
    pub fn is_complete(&self) -> bool {
        self.status.is_complete()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_string(&RunStatus::PartialRateLimited).unwrap(),
            "\"partial-rate-limited\""
        );
        assert_eq!(RunStatus::PartialCancelled.to_string(), "partial-cancelled");
    }

    #[test]
    fn test_status_from_state() {
        assert_eq!(RunStatus::from(DriverState::Exhausted), RunStatus::Complete);
        assert_eq!(RunStatus::from(DriverState::LimitReached), RunStatus::Complete);
        assert_eq!(
            RunStatus::from(DriverState::NetworkFailure),
            RunStatus::PartialNetworkError
        );
    }

    #[test]
    fn test_outcome_json_shape() {
        let outcome = RunOutcome {
            target: "https://www.facebook.com/nytimes".to_string(),
            status: RunStatus::Complete,
            posts: vec![Post::stub("https://www.facebook.com/nytimes", "1")],
            pages_fetched: 1,
            skipped: 0,
            backoff_delays_ms: vec![2000],
            final_state: DriverState::Exhausted,
        };
        let json = serde_json::to_value(&outcome).unwrap();

        assert_eq!(json["status"], "complete");
        assert_eq!(json["pagesFetched"], 1);
        assert_eq!(json["backoffDelaysMs"][0], 2000);
        assert_eq!(json["finalState"], "exhausted");
        assert_eq!(json["posts"][0]["postId"], "1");
    }
}
