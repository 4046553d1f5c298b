//! Time source abstraction
//!
//! Refill and queue-age logic read time through [`Clock`] so tests can
//! drive it deterministically. Monotonic time comes from tokio, which means
//! `tokio::time::pause()` also freezes [`SystemClock`].

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

/// Source of monotonic and wall-clock time
pub trait Clock: Send + Sync {
    /// Monotonic instant, used for token refill
    fn now(&self) -> Instant;

    /// Wall-clock time, used for timestamps that survive restarts
    fn utc_now(&self) -> DateTime<Utc>;
}

/// Production clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn utc_now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for tests
///
/// Cloned handles share the same elapsed offset, so a test can keep one
/// handle and give another to the component under test.
#[derive(Debug, Clone)]
pub struct MockClock {
    start: Instant,
    start_utc: DateTime<Utc>,
    elapsed: Arc<Mutex<Duration>>,
}

impl MockClock {
    /// Create a mock clock anchored at the current time
    pub fn new() -> Self {
        Self::at(Utc::now())
    }

    /// Create a mock clock whose wall-clock reading starts at `start_utc`
    pub fn at(start_utc: DateTime<Utc>) -> Self {
        Self {
            start: Instant::now(),
            start_utc,
            elapsed: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    /// Move both clocks forward
    pub fn advance(&self, by: Duration) {
        let mut elapsed = self.elapsed.lock().unwrap_or_else(PoisonError::into_inner);
        *elapsed += by;
    }

    fn elapsed(&self) -> Duration {
        *self.elapsed.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        self.start + self.elapsed()
    }

    fn utc_now(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.elapsed()).unwrap_or(chrono::Duration::MAX);
        self.start_utc + elapsed
    }
}
