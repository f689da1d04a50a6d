//! # Clock Module
//!
//! Time is injected into the fetcher and the pagination driver through the
//! `Clock` trait so that pacing, backoff and retry behaviour can be exercised
//! without real delays.
//!
//! - `TokioClock`: real monotonic time and `tokio::time::sleep`
//! - `ManualClock`: virtual time that advances instantly and records every sleep

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Source of monotonic time, wall time and sleeping
pub trait Clock: Clone + Send + Sync {
    /// Monotonic time elapsed since the clock was created
    fn now(&self) -> Duration;

    /// Current wall-clock time, used as the reference for relative post times
    fn wall_time(&self) -> DateTime<Utc>;

    /// Suspend for the given duration
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send;
}

/// Clock backed by tokio's timer
#[derive(Debug, Clone)]
pub struct TokioClock {
    origin: tokio::time::Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        Self {
            origin: tokio::time::Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TokioClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn wall_time(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }
}

#[derive(Debug)]
struct ManualState {
    elapsed: Duration,
    wall: DateTime<Utc>,
    sleeps: Vec<Duration>,
}

/// Virtual clock for tests. Sleeping advances time immediately.
#[derive(Debug, Clone)]
pub struct ManualClock {
    state: Arc<Mutex<ManualState>>,
}

impl ManualClock {
    /// Create a clock whose wall time starts at `wall`
    pub fn new(wall: DateTime<Utc>) -> Self {
        Self {
            state: Arc::new(Mutex::new(ManualState {
                elapsed: Duration::ZERO,
                wall,
                sleeps: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ManualState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Advance virtual time without recording a sleep
    pub fn advance(&self, duration: Duration) {
        let mut state = self.lock();
        state.elapsed += duration;
        state.wall += chrono::Duration::from_std(duration).unwrap_or_default();
    }

    /// Every sleep requested so far, in order
    pub fn sleeps(&self) -> Vec<Duration> {
        self.lock().sleeps.clone()
    }

    /// Total time spent sleeping
    pub fn total_slept(&self) -> Duration {
        self.lock().sleeps.iter().sum()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        self.lock().elapsed
    }

    fn wall_time(&self) -> DateTime<Utc> {
        self.lock().wall
    }

    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send {
        let state = self.state.clone();
        async move {
            {
                let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
                state.elapsed += duration;
                state.wall += chrono::Duration::from_std(duration).unwrap_or_default();
                state.sleeps.push(duration);
            }
            tokio::task::yield_now().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[tokio::test]
    async fn test_manual_clock_records_sleeps() {
        let start = Utc.with_ymd_and_hms(2024, 3, 4, 12, 0, 0).unwrap();
        let clock = ManualClock::new(start);

        clock.sleep(Duration::from_secs(2)).await;
        clock.sleep(Duration::from_secs(3)).await;

        assert_eq!(clock.now(), Duration::from_secs(5));
        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_secs(2), Duration::from_secs(3)]
        );
        assert_eq!(clock.wall_time(), start + chrono::Duration::seconds(5));
    }

    #[test]
    fn test_manual_clock_advance_is_not_a_sleep() {
        let clock = ManualClock::default();
        clock.advance(Duration::from_millis(1500));

        assert_eq!(clock.now(), Duration::from_millis(1500));
        assert!(clock.sleeps().is_empty());
    }

    #[test]
    fn test_tokio_clock_sleeps_on_runtime_timer() {
        let clock = TokioClock::new();
        tokio_test::block_on(async { clock.sleep(Duration::from_millis(5)).await });

        assert!(clock.now() >= Duration::from_millis(5));
        assert!(clock.wall_time() <= Utc::now());
    }
}
