//! Per-endpoint token bucket throttle
//!
//! Each endpoint key gets its own bucket, created lazily with the default
//! limits on first reference. Refill is computed on access, so an idle
//! bucket costs nothing and never needs a background timer.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::clock::{Clock, SystemClock};

/// Bucket sizing and refill cadence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketLimits {
    /// Capacity of the bucket
    pub max_tokens: u32,
    /// Tokens added per elapsed interval
    pub refill_rate: u32,
    /// Length of one refill interval
    pub refill_interval: Duration,
}

impl Default for BucketLimits {
    fn default() -> Self {
        Self {
            max_tokens: 60,
            refill_rate: 1,
            refill_interval: Duration::from_millis(1000),
        }
    }
}

impl BucketLimits {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_tokens == 0 {
            return Err("max_tokens must be greater than 0".to_string());
        }
        if self.refill_rate == 0 {
            return Err("refill_rate must be greater than 0".to_string());
        }
        if self.refill_interval.is_zero() {
            return Err("refill_interval must be greater than zero".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct TokenBucket {
    tokens: u32,
    limits: BucketLimits,
    last_refill: Instant,
}

impl TokenBucket {
    fn full(limits: BucketLimits, now: Instant) -> Self {
        Self {
            tokens: limits.max_tokens,
            limits,
            last_refill: now,
        }
    }

    /// Whole intervals elapsed since the last refill
    fn intervals_since(&self, now: Instant) -> u32 {
        let elapsed = now.saturating_duration_since(self.last_refill);
        let intervals = elapsed.as_nanos() / self.limits.refill_interval.as_nanos();
        u32::try_from(intervals).unwrap_or(u32::MAX)
    }

    fn projected_tokens(&self, now: Instant) -> u32 {
        let added = self
            .intervals_since(now)
            .saturating_mul(self.limits.refill_rate);
        self.tokens.saturating_add(added).min(self.limits.max_tokens)
    }

    fn refill(&mut self, now: Instant) {
        let intervals = self.intervals_since(now);
        if intervals == 0 {
            return;
        }

        self.tokens = self.projected_tokens(now);
        if self.tokens == self.limits.max_tokens {
            self.last_refill = now;
        } else {
            // Keep the partial interval so the next refill is not delayed
            self.last_refill += self.limits.refill_interval * intervals;
        }
    }
}

/// Token bucket rate limiter keyed by endpoint
pub struct RateLimiter<C: Clock = SystemClock> {
    defaults: BucketLimits,
    overrides: Mutex<HashMap<String, BucketLimits>>,
    buckets: Mutex<HashMap<String, TokenBucket>>,
    clock: Arc<C>,
}

impl RateLimiter<SystemClock> {
    pub fn new(defaults: BucketLimits) -> Self {
        Self::with_clock(defaults, SystemClock)
    }
}

impl<C: Clock> RateLimiter<C> {
    pub fn with_clock(defaults: BucketLimits, clock: C) -> Self {
        Self {
            defaults,
            overrides: Mutex::new(HashMap::new()),
            buckets: Mutex::new(HashMap::new()),
            clock: Arc::new(clock),
        }
    }

    /// Use non-default limits for one key
    ///
    /// Must be called before the key is first used; an existing bucket keeps
    /// its current token count but adopts the new limits.
    pub fn configure(&self, key: &str, limits: BucketLimits) {
        lock(&self.overrides).insert(key.to_string(), limits);
        if let Some(bucket) = lock(&self.buckets).get_mut(key) {
            bucket.tokens = bucket.tokens.min(limits.max_tokens);
            bucket.limits = limits;
        }
    }

    pub fn limits_for(&self, key: &str) -> BucketLimits {
        lock(&self.overrides)
            .get(key)
            .copied()
            .unwrap_or(self.defaults)
    }

    /// Consume one token for `key` if one is available
    pub fn try_acquire(&self, key: &str) -> bool {
        let now = self.clock.now();
        let limits = self.limits_for(key);
        let mut buckets = lock(&self.buckets);
        let bucket = buckets
            .entry(key.to_string())
            .or_insert_with(|| TokenBucket::full(limits, now));

        bucket.refill(now);

        if bucket.tokens == 0 {
            debug!("Rate limit: no tokens left for {}", key);
            return false;
        }

        bucket.tokens -= 1;
        true
    }

    /// Wait until a token for `key` is available, then consume it
    ///
    /// Polls once per refill interval instead of spinning.
    pub async fn wait_for_token(&self, key: &str) {
        loop {
            if self.try_acquire(key) {
                return;
            }
            let interval = self.limits_for(key).refill_interval;
            debug!("Waiting {:?} for a {} token", interval, key);
            tokio::time::sleep(interval).await;
        }
    }

    /// Empty the bucket for `key`
    ///
    /// Used when the server reports its own quota as exhausted, so the next
    /// local attempt waits for a refill instead of hitting a 429.
    pub fn drain(&self, key: &str) {
        let now = self.clock.now();
        let limits = self.limits_for(key);
        let mut buckets = lock(&self.buckets);
        let bucket = buckets
            .entry(key.to_string())
            .or_insert_with(|| TokenBucket::full(limits, now));
        bucket.tokens = 0;
        bucket.last_refill = now;
        debug!("Drained {} bucket after server quota exhaustion", key);
    }

    /// Tokens currently available for `key`, without consuming any
    pub fn remaining_tokens(&self, key: &str) -> u32 {
        let now = self.clock.now();
        match lock(&self.buckets).get(key) {
            Some(bucket) => bucket.projected_tokens(now),
            None => self.limits_for(key).max_tokens,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;

    fn limiter(clock: &MockClock) -> RateLimiter<MockClock> {
        RateLimiter::with_clock(BucketLimits::default(), clock.clone())
    }

    #[test]
    fn test_exhaust_then_refill_after_interval() {
        let clock = MockClock::new();
        let limiter = limiter(&clock);

        for _ in 0..60 {
            assert!(limiter.try_acquire("/orders"));
        }
        assert!(!limiter.try_acquire("/orders"));

        clock.advance(Duration::from_millis(999));
        assert!(!limiter.try_acquire("/orders"));

        clock.advance(Duration::from_millis(1));
        assert!(limiter.try_acquire("/orders"));
        assert!(!limiter.try_acquire("/orders"));
    }

    #[test]
    fn test_tokens_stay_within_bounds() {
        let clock = MockClock::new();
        let limiter = limiter(&clock);

        for step in 0..500u64 {
            limiter.try_acquire("/feedback");
            if step % 7 == 0 {
                clock.advance(Duration::from_millis(step * 13));
            }
            let remaining = limiter.remaining_tokens("/feedback");
            assert!(remaining <= 60);
        }

        clock.advance(Duration::from_secs(3600));
        assert_eq!(limiter.remaining_tokens("/feedback"), 60);
    }

    #[test]
    fn test_partial_interval_is_not_lost() {
        let clock = MockClock::new();
        let limiter = limiter(&clock);

        for _ in 0..60 {
            limiter.try_acquire("/orders");
        }

        clock.advance(Duration::from_millis(1500));
        assert!(limiter.try_acquire("/orders"));
        assert!(!limiter.try_acquire("/orders"));

        // Half an interval was carried over from the previous refill
        clock.advance(Duration::from_millis(500));
        assert!(limiter.try_acquire("/orders"));
    }

    #[test]
    fn test_keys_are_independent() {
        let clock = MockClock::new();
        let limiter = limiter(&clock);

        for _ in 0..60 {
            limiter.try_acquire("/orders");
        }

        assert!(!limiter.try_acquire("/orders"));
        assert!(limiter.try_acquire("/feedback"));
        assert_eq!(limiter.remaining_tokens("/feedback"), 59);
    }

    #[test]
    fn test_remaining_tokens_does_not_consume() {
        let clock = MockClock::new();
        let limiter = limiter(&clock);

        assert_eq!(limiter.remaining_tokens("/orders"), 60);
        assert_eq!(limiter.remaining_tokens("/orders"), 60);
        limiter.try_acquire("/orders");
        assert_eq!(limiter.remaining_tokens("/orders"), 59);
    }

    #[test]
    fn test_drain_empties_bucket() {
        let clock = MockClock::new();
        let limiter = limiter(&clock);

        limiter.drain("/orders");
        assert_eq!(limiter.remaining_tokens("/orders"), 0);
        assert!(!limiter.try_acquire("/orders"));

        clock.advance(Duration::from_millis(1000));
        assert!(limiter.try_acquire("/orders"));
    }

    #[test]
    fn test_configure_override() {
        let clock = MockClock::new();
        let limiter = limiter(&clock);
        limiter.configure(
            "/slow",
            BucketLimits {
                max_tokens: 2,
                refill_rate: 1,
                refill_interval: Duration::from_secs(10),
            },
        );

        assert!(limiter.try_acquire("/slow"));
        assert!(limiter.try_acquire("/slow"));
        assert!(!limiter.try_acquire("/slow"));
        assert_eq!(limiter.remaining_tokens("/other"), 60);
    }

    #[test]
    fn test_validate_limits() {
        assert!(BucketLimits::default().validate().is_ok());
        let zero = BucketLimits {
            max_tokens: 0,
            ..BucketLimits::default()
        };
        assert!(zero.validate().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_token_resolves_after_refill() {
        let limiter = RateLimiter::new(BucketLimits {
            max_tokens: 1,
            refill_rate: 1,
            refill_interval: Duration::from_millis(1000),
        });

        let start = Instant::now();
        limiter.wait_for_token("/orders").await;
        assert!(start.elapsed() < Duration::from_millis(1));

        limiter.wait_for_token("/orders").await;
        assert!(start.elapsed() >= Duration::from_millis(1000));
    }
}
