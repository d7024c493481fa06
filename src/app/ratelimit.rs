//! Per-user sliding-window rate limiter
//!
//! Protects a single warm instance against abuse bursts. The table is
//! process-local: parallel instances each keep their own window, so this is
//! deliberately not a global limit.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Max requests per user inside the window
const RATE_LIMIT_MAX: usize = 10;
/// Window length
const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(1);

/// Sliding-window limiter keyed by user id
#[derive(Default)]
pub struct RateLimiter {
    windows: Mutex<HashMap<i64, Vec<Instant>>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a request; true when the user is over quota.
    /// Stale entries are pruned on every call.
    pub fn is_limited(&self, user_id: i64) -> bool {
        let now = Instant::now();
        let mut windows = self.windows.lock().unwrap();
        let timestamps = windows.entry(user_id).or_default();

        timestamps.retain(|t| now.duration_since(*t) < RATE_LIMIT_WINDOW);

        if timestamps.len() >= RATE_LIMIT_MAX {
            return true;
        }
        timestamps.push(now);
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allows_up_to_limit() {
        let limiter = RateLimiter::new();
        for _ in 0..RATE_LIMIT_MAX {
            assert!(!limiter.is_limited(1));
        }
        assert!(limiter.is_limited(1));
    }

    #[test]
    fn test_users_are_independent() {
        let limiter = RateLimiter::new();
        for _ in 0..RATE_LIMIT_MAX {
            assert!(!limiter.is_limited(1));
        }
        assert!(limiter.is_limited(1));
        assert!(!limiter.is_limited(2));
    }
}
