//! Sliding-window rate limiting per caller identity.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Per-identity sliding window of request instants.
///
/// The check and the record happen under one lock acquisition, so two
/// concurrent callers can never both take the last slot.
pub struct RateLimiter {
    window: Duration,
    max_requests: usize,
    clients: Mutex<HashMap<String, Vec<Instant>>>,
}

impl RateLimiter {
    /// Create a limiter allowing `max_requests` per `window`.
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            window,
            max_requests,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Configured requests per window.
    pub fn limit(&self) -> usize {
        self.max_requests
    }

    /// Record a request for `identity` now.
    ///
    /// Returns `Err(retry_after_secs)` when the window is full; the rejected
    /// request is not recorded.
    pub fn check(&self, identity: &str) -> Result<(), u64> {
        self.check_at(identity, Instant::now())
    }

    /// [`RateLimiter::check`] against an explicit clock reading.
    pub fn check_at(&self, identity: &str, now: Instant) -> Result<(), u64> {
        let mut clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());
        let timestamps = clients.entry(identity.to_string()).or_default();
        timestamps.retain(|t| now.saturating_duration_since(*t) < self.window);
        if timestamps.len() >= self.max_requests {
            let oldest = timestamps.first().copied().unwrap_or(now);
            let retry_after = self.window.saturating_sub(now.saturating_duration_since(oldest));
            return Err(retry_after.as_secs().max(1));
        }
        timestamps.push(now);
        Ok(())
    }

    /// Drop identities whose windows are empty.
    pub fn cleanup(&self) {
        let now = Instant::now();
        let mut clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());
        clients.retain(|_, timestamps| {
            timestamps.retain(|t| now.saturating_duration_since(*t) < self.window);
            !timestamps.is_empty()
        });
    }

    /// Number of identities currently tracked.
    pub fn tracked(&self) -> usize {
        self.clients.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE: Duration = Duration::from_secs(60);

    #[test]
    fn allows_under_limit() {
        let limiter = RateLimiter::new(5, MINUTE);
        for _ in 0..5 {
            assert!(limiter.check("ip:127.0.0.1").is_ok());
        }
    }

    #[test]
    fn limit_plus_one_is_rejected() {
        let limiter = RateLimiter::new(3, MINUTE);
        let t0 = Instant::now();
        for i in 0..3 {
            assert!(limiter.check_at("stdio", t0 + Duration::from_secs(i)).is_ok());
        }
        let retry = limiter
            .check_at("stdio", t0 + Duration::from_secs(10))
            .unwrap_err();
        // Oldest request leaves the window 50s later.
        assert_eq!(retry, 50);
    }

    #[test]
    fn window_rollover_admits_again() {
        let limiter = RateLimiter::new(2, MINUTE);
        let t0 = Instant::now();
        assert!(limiter.check_at("k", t0).is_ok());
        assert!(limiter.check_at("k", t0).is_ok());
        assert!(limiter.check_at("k", t0 + Duration::from_secs(30)).is_err());
        assert!(limiter
            .check_at("k", t0 + MINUTE + Duration::from_millis(1))
            .is_ok());
    }

    #[test]
    fn rejected_requests_are_not_recorded() {
        let limiter = RateLimiter::new(1, MINUTE);
        let t0 = Instant::now();
        assert!(limiter.check_at("k", t0).is_ok());
        for s in 1..10 {
            assert!(limiter.check_at("k", t0 + Duration::from_secs(s)).is_err());
        }
        assert!(limiter.check_at("k", t0 + MINUTE).is_ok());
    }

    #[test]
    fn identities_are_independent() {
        let limiter = RateLimiter::new(2, MINUTE);
        assert!(limiter.check("ip:10.0.0.1").is_ok());
        assert!(limiter.check("ip:10.0.0.1").is_ok());
        assert!(limiter.check("ip:10.0.0.1").is_err());
        assert!(limiter.check("ip:10.0.0.2").is_ok());
    }

    #[test]
    fn cleanup_drops_idle_identities() {
        let limiter = RateLimiter::new(2, Duration::from_millis(1));
        limiter.check("a").unwrap();
        limiter.check("b").unwrap();
        std::thread::sleep(Duration::from_millis(5));
        limiter.cleanup();
        assert_eq!(limiter.tracked(), 0);
    }

    #[test]
    fn concurrent_callers_never_exceed_limit() {
        let limiter = std::sync::Arc::new(RateLimiter::new(10, MINUTE));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = limiter.clone();
                std::thread::spawn(move || (0..5).filter(|_| limiter.check("shared").is_ok()).count())
            })
            .collect();
        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(admitted, 10);
    }
}
