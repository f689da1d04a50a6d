use std::time::Duration;

use crate::config::ScrapeOptions;

/// Exponential backoff for rate-limited requests.
///
/// Each delay doubles the previous one, is capped, and never decreases, even
/// when a `Retry-After` hint asks for less. Hints above the cap are clamped.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    max_attempts: u32,
    attempts: u32,
    last: Duration,
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            cap: cap.max(base),
            max_attempts,
            attempts: 0,
            last: Duration::ZERO,
        }
    }

    pub fn from_options(options: &ScrapeOptions) -> Self {
        Self::new(
            options.backoff_base(),
            options.backoff_cap(),
            options.max_retries,
        )
    }

    /// Delay before the next attempt, or `None` once attempts are exhausted
    pub fn next_delay(&mut self, retry_after: Option<Duration>) -> Option<Duration> {
        if self.attempts >= self.max_attempts {
            return None;
        }

        let factor = 1u32.checked_shl(self.attempts).unwrap_or(u32::MAX);
        let mut delay = self.base.saturating_mul(factor).min(self.cap);
        if let Some(hint) = retry_after {
            delay = delay.max(hint.min(self.cap));
        }
        delay = delay.max(self.last);

        self.attempts += 1;
        self.last = delay;
        Some(delay)
    }

    /// Attempts used so far
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }
}
