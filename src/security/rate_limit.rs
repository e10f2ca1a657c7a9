//! Fixed-window rate limiters.
//!
//! One counter per identifier, reset when its window elapses. Counters live
//! in a [`DashMap`] so unrelated identifiers only contend when they share a
//! shard.

use std::sync::Arc;
use std::time::{Duration, Instant};
use dashmap::DashMap;

use crate::clock::{self, Clock};
use crate::config::validation::MAX_WINDOW_SECS;
use crate::config::LimitConfig;

const MAX_WINDOW: Duration = Duration::from_secs(MAX_WINDOW_SECS);

#[derive(Debug, Clone, Copy)]
struct WindowCounter {
    count: u32,
    window_start: Instant,
}

impl WindowCounter {
    fn expired(&self, now: Instant, window: Duration) -> bool {
        now.saturating_duration_since(self.window_start) >= window
    }
}

fn window_end(start: Instant, window: Duration) -> Instant {
    start
        .checked_add(window)
        .or_else(|| start.checked_add(MAX_WINDOW))
        .unwrap_or(start)
}

/// Fixed-window counter keyed by an arbitrary identifier.
#[derive(Debug)]
pub struct RateLimiter {
    window: Duration,
    limit: u32,
    counters: DashMap<String, WindowCounter>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(window: Duration, limit: u32) -> Self {
        Self::with_clock(window, limit, clock::system())
    }

    /// Windows longer than one year are clamped.
    pub fn with_clock(window: Duration, limit: u32, clock: Arc<dyn Clock>) -> Self {
        Self {
            window: window.min(MAX_WINDOW),
            limit,
            counters: DashMap::new(),
            clock,
        }
    }

    pub fn from_config(config: &LimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self::with_clock(config.window(), config.limit, clock)
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Count one request for `id` and report whether it fits the budget.
    ///
    /// A denied request does not consume budget, so the stored count never
    /// exceeds `limit`.
    pub fn allow(&self, id: &str) -> bool {
        let now = self.clock.now();
        let mut counter = self
            .counters
            .entry(id.to_string())
            .or_insert(WindowCounter {
                count: 0,
                window_start: now,
            });

        if counter.expired(now, self.window) {
            counter.count = 0;
            counter.window_start = now;
        }

        if counter.count >= self.limit {
            return false;
        }
        counter.count += 1;
        true
    }

    /// Requests left for `id` in its current window.
    pub fn remaining(&self, id: &str) -> u32 {
        let now = self.clock.now();
        match self.counters.get(id) {
            Some(counter) if !counter.expired(now, self.window) => {
                self.limit.saturating_sub(counter.count)
            }
            _ => self.limit,
        }
    }

    /// When the current window for `id` ends. An unseen or expired
    /// identifier would start a fresh window now.
    pub fn reset_at(&self, id: &str) -> Instant {
        let now = self.clock.now();
        match self.counters.get(id) {
            Some(counter) if !counter.expired(now, self.window) => {
                window_end(counter.window_start, self.window)
            }
            _ => window_end(now, self.window),
        }
    }

    /// Drop identifiers whose window has elapsed. Returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.counters.len();
        self.counters
            .retain(|_, counter| !counter.expired(now, self.window));
        before.saturating_sub(self.counters.len())
    }

    /// Number of identifiers currently tracked.
    pub fn tracked(&self) -> usize {
        self.counters.len()
    }

    pub(crate) fn now(&self) -> Instant {
        self.clock.now()
    }
}

/// Per-client-IP limiter with its own counter table.
#[derive(Debug)]
pub struct IpRateLimiter {
    inner: RateLimiter,
}

impl IpRateLimiter {
    pub fn new(inner: RateLimiter) -> Self {
        Self { inner }
    }

    pub fn allow_ip(&self, ip: &str) -> bool {
        self.inner.allow(ip)
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.inner
    }
}

/// Per-API-key limiter with its own counter table.
#[derive(Debug)]
pub struct ApiKeyRateLimiter {
    inner: RateLimiter,
}

impl ApiKeyRateLimiter {
    pub fn new(inner: RateLimiter) -> Self {
        Self { inner }
    }

    pub fn allow_api_key(&self, key: &str) -> bool {
        self.inner.allow(key)
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn limiter(window_ms: u64, limit: u32) -> (RateLimiter, ManualClock) {
        let clock = ManualClock::new();
        let rl = RateLimiter::with_clock(
            Duration::from_millis(window_ms),
            limit,
            Arc::new(clock.clone()),
        );
        (rl, clock)
    }

    #[test]
    fn test_window_exhaustion_and_reset() {
        let (rl, clock) = limiter(1000, 2);

        assert!(rl.allow("x"));
        assert!(rl.allow("x"));
        assert!(!rl.allow("x"));

        clock.advance(Duration::from_millis(1100));
        assert!(rl.allow("x"));
        assert_eq!(rl.remaining("x"), 1);
    }

    #[test]
    fn test_identifiers_are_independent() {
        let (rl, _clock) = limiter(1000, 1);

        assert!(rl.allow("a"));
        assert!(!rl.allow("a"));
        assert!(rl.allow("b"));
    }

    #[test]
    fn test_remaining_and_unseen() {
        let (rl, _clock) = limiter(1000, 3);
        assert_eq!(rl.remaining("new"), 3);

        rl.allow("k");
        assert_eq!(rl.remaining("k"), 2);
        rl.allow("k");
        rl.allow("k");
        rl.allow("k");
        assert_eq!(rl.remaining("k"), 0);
    }

    #[test]
    fn test_reset_at() {
        let (rl, clock) = limiter(1000, 5);
        let start = clock.now();

        assert_eq!(rl.reset_at("unseen"), start + Duration::from_millis(1000));

        rl.allow("k");
        clock.advance(Duration::from_millis(400));
        assert_eq!(rl.reset_at("k"), start + Duration::from_millis(1000));

        clock.advance(Duration::from_millis(700));
        assert_eq!(rl.reset_at("k"), clock.now() + Duration::from_millis(1000));
    }

    #[test]
    fn test_huge_window_is_clamped() {
        let clock = ManualClock::new();
        let rl = RateLimiter::with_clock(Duration::from_secs(u64::MAX), 2, Arc::new(clock.clone()));
        assert_eq!(rl.window(), MAX_WINDOW);

        assert!(rl.allow("x"));
        assert_eq!(rl.reset_at("x"), clock.now() + MAX_WINDOW);
        assert_eq!(rl.reset_at("unseen"), clock.now() + MAX_WINDOW);
        assert_eq!(rl.remaining("x"), 1);
    }

    #[test]
    fn test_window_end_saturates() {
        let now = Instant::now();
        assert_eq!(window_end(now, Duration::from_secs(1)), now + Duration::from_secs(1));
        assert!(window_end(now, Duration::MAX) >= now);
    }

    #[test]
    fn test_zero_limit_denies_everything() {
        let (rl, _clock) = limiter(1000, 0);
        assert!(!rl.allow("x"));
        assert_eq!(rl.remaining("x"), 0);
    }

    #[test]
    fn test_purge_expired() {
        let (rl, clock) = limiter(1000, 5);
        rl.allow("old");
        clock.advance(Duration::from_millis(600));
        rl.allow("fresh");
        clock.advance(Duration::from_millis(500));

        assert_eq!(rl.purge_expired(), 1);
        assert_eq!(rl.tracked(), 1);
        assert_eq!(rl.remaining("fresh"), 4);
    }

    #[test]
    fn test_concurrent_allow_respects_limit() {
        let rl = Arc::new(RateLimiter::new(Duration::from_secs(60), 50));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let rl = rl.clone();
                std::thread::spawn(move || (0..20).filter(|_| rl.allow("shared")).count())
            })
            .collect();

        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(admitted, 50);
    }

    #[test]
    fn test_ip_and_key_tables_are_separate() {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new());
        let ip = IpRateLimiter::new(RateLimiter::with_clock(Duration::from_secs(1), 1, clock.clone()));
        let key = ApiKeyRateLimiter::new(RateLimiter::with_clock(Duration::from_secs(1), 1, clock));

        assert!(ip.allow_ip("same"));
        assert!(key.allow_api_key("same"));
        assert!(!ip.allow_ip("same"));
        assert!(!key.allow_api_key("same"));
    }
}
