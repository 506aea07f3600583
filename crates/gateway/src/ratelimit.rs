//! Per-avatar rate limiting.
//!
//! Fixed-window counting, checked before a message ever reaches the
//! engine: a refused request never mutates engine state.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

struct Window {
    started: Instant,
    count: u32,
}

/// A fixed-window per-avatar rate limiter.
pub struct RateLimiter {
    window: Duration,
    max_per_window: u32,
    windows: Mutex<HashMap<String, Window>>,
}

impl RateLimiter {
    /// `max_per_window == 0` disables limiting.
    pub fn new(window: Duration, max_per_window: u32) -> Self {
        Self {
            window,
            max_per_window,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Record one request for this avatar; returns whether it is allowed.
    pub fn allow(&self, avatar_id: &str) -> bool {
        if self.max_per_window == 0 {
            return true;
        }

        let now = Instant::now();
        let mut windows = self.windows.lock().unwrap();

        // Drop stale windows opportunistically so the map stays bounded.
        windows.retain(|_, w| now.duration_since(w.started) < self.window * 2);

        let window = windows.entry(avatar_id.to_string()).or_insert(Window {
            started: now,
            count: 0,
        });

        if now.duration_since(window.started) >= self.window {
            window.started = now;
            window.count = 0;
        }

        window.count += 1;
        let allowed = window.count <= self.max_per_window;
        if !allowed {
            debug!(avatar_id, count = window.count, "Rate limit exceeded");
        }
        allowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_max() {
        let limiter = RateLimiter::new(Duration::from_secs(10), 3);
        assert!(limiter.allow("carol"));
        assert!(limiter.allow("carol"));
        assert!(limiter.allow("carol"));
        assert!(!limiter.allow("carol"));
    }

    #[test]
    fn avatars_limited_independently() {
        let limiter = RateLimiter::new(Duration::from_secs(10), 1);
        assert!(limiter.allow("carol"));
        assert!(limiter.allow("bob"));
        assert!(!limiter.allow("carol"));
    }

    #[test]
    fn window_resets() {
        let limiter = RateLimiter::new(Duration::from_millis(20), 1);
        assert!(limiter.allow("carol"));
        assert!(!limiter.allow("carol"));
        std::thread::sleep(Duration::from_millis(25));
        assert!(limiter.allow("carol"));
    }

    #[test]
    fn zero_max_disables() {
        let limiter = RateLimiter::new(Duration::from_secs(10), 0);
        for _ in 0..100 {
            assert!(limiter.allow("carol"));
        }
    }
}
