// Fixed-window rate limiting per (client, route).
//
// Buckets are created lazily on first request and reset in place once their
// window has passed. State is in-memory only (resets on restart); idle buckets
// are dropped by `sweep_expired`, which the core runs on an interval.

use dashmap::DashMap;
use std::time::{Duration, Instant};

/// Request count for one (client, route) window.
struct WindowBucket {
    count: u64,
    reset_time: Instant,
}

impl WindowBucket {
    fn new(now: Instant, window: Duration) -> Self {
        Self {
            count: 0,
            reset_time: now + window,
        }
    }
}

/// Per-(client, route) fixed-window limiter.
pub struct RateLimiter {
    buckets: DashMap<(String, String), WindowBucket>,
    window: Duration,
}

impl RateLimiter {
    pub fn new(window: Duration) -> Self {
        Self {
            buckets: DashMap::new(),
            window,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Count one request for `client` on `route` against `limit`.
    ///
    /// Returns the time until the window resets when the limit is exceeded.
    pub fn check_and_consume(&self, client: &str, route: &str, limit: u64) -> Result<(), Duration> {
        self.check_and_consume_at(client, route, limit, Instant::now())
    }

    pub fn check_and_consume_at(
        &self,
        client: &str,
        route: &str,
        limit: u64,
        now: Instant,
    ) -> Result<(), Duration> {
        let mut bucket = self
            .buckets
            .entry((client.to_string(), route.to_string()))
            .or_insert_with(|| WindowBucket::new(now, self.window));

        if now >= bucket.reset_time {
            *bucket = WindowBucket::new(now, self.window);
        }

        bucket.count += 1;
        if bucket.count > limit {
            Err(bucket.reset_time.saturating_duration_since(now))
        } else {
            Ok(())
        }
    }

    /// Drop every bucket whose window has passed. Returns how many were removed.
    pub fn sweep_expired(&self, now: Instant) -> usize {
        let before = self.buckets.len();
        self.buckets.retain(|_, bucket| now < bucket.reset_time);
        before.saturating_sub(self.buckets.len())
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(60);

    #[test]
    fn test_allows_up_to_limit() {
        let limiter = RateLimiter::new(WINDOW);
        let now = Instant::now();
        for _ in 0..100 {
            assert!(limiter.check_and_consume_at("u1", "/api/modules/crm/contacts", 100, now).is_ok());
        }
        let retry = limiter
            .check_and_consume_at("u1", "/api/modules/crm/contacts", 100, now)
            .unwrap_err();
        assert_eq!(retry, WINDOW);
    }

    #[test]
    fn test_window_resets_after_expiry() {
        let limiter = RateLimiter::new(WINDOW);
        let start = Instant::now();
        assert!(limiter.check_and_consume_at("u1", "/r", 1, start).is_ok());
        assert!(limiter.check_and_consume_at("u1", "/r", 1, start).is_err());

        // Still blocked just before the reset
        let almost = start + Duration::from_secs(59);
        assert_eq!(
            limiter.check_and_consume_at("u1", "/r", 1, almost),
            Err(Duration::from_secs(1))
        );

        // Fresh window starts at count 1
        let later = start + Duration::from_secs(61);
        assert!(limiter.check_and_consume_at("u1", "/r", 1, later).is_ok());
        assert!(limiter.check_and_consume_at("u1", "/r", 1, later).is_err());
    }

    #[test]
    fn test_separate_buckets_per_client_and_route() {
        let limiter = RateLimiter::new(WINDOW);
        let now = Instant::now();
        assert!(limiter.check_and_consume_at("u1", "/a", 1, now).is_ok());
        assert!(limiter.check_and_consume_at("u1", "/a", 1, now).is_err());
        // Other client, same route
        assert!(limiter.check_and_consume_at("u2", "/a", 1, now).is_ok());
        // Same client, other route
        assert!(limiter.check_and_consume_at("u1", "/b", 1, now).is_ok());
        assert_eq!(limiter.bucket_count(), 3);
    }

    #[test]
    fn test_sweep_drops_only_expired_buckets() {
        let limiter = RateLimiter::new(WINDOW);
        let start = Instant::now();
        limiter.check_and_consume_at("u1", "/a", 10, start).unwrap();
        limiter
            .check_and_consume_at("u2", "/a", 10, start + Duration::from_secs(30))
            .unwrap();

        assert_eq!(limiter.sweep_expired(start + Duration::from_secs(10)), 0);
        assert_eq!(limiter.sweep_expired(start + Duration::from_secs(60)), 1);
        assert_eq!(limiter.bucket_count(), 1);
        assert_eq!(limiter.sweep_expired(start + Duration::from_secs(120)), 1);
        assert_eq!(limiter.bucket_count(), 0);
    }
}
