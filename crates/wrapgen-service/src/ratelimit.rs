//! Fixed-window rate limiting.
//!
//! In-process counters keyed by an arbitrary string (user ID or client
//! origin). Good for a single-instance deployment; a multi-instance
//! deployment would move these counters to shared storage.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

struct Window {
    started: Instant,
    count: u32,
}

/// A fixed-window rate limiter.
///
/// The first request in a window starts it; requests beyond `max` within the
/// window are denied. A denied request does not consume quota.
pub struct FixedWindowLimiter {
    max: u32,
    window: Duration,
    windows: Mutex<HashMap<String, Window>>,
}

impl FixedWindowLimiter {
    /// Create a limiter allowing `max` requests per `window`.
    #[must_use]
    pub fn new(max: u32, window: Duration) -> Self {
        Self {
            max,
            window,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Whether a request under `key` is allowed right now.
    pub fn allow(&self, key: &str) -> bool {
        self.allow_at(key, Instant::now())
    }

    /// Window length, for backoff hints.
    #[must_use]
    pub fn window(&self) -> Duration {
        self.window
    }

    fn allow_at(&self, key: &str, now: Instant) -> bool {
        let mut windows = self
            .windows
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        match windows.get_mut(key) {
            Some(window) if now.duration_since(window.started) <= self.window => {
                if window.count >= self.max {
                    return false;
                }
                window.count += 1;
                true
            }
            _ => {
                windows.insert(
                    key.to_string(),
                    Window {
                        started: now,
                        count: 1,
                    },
                );
                true
            }
        }
    }
}
