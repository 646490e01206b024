//! Sliding-window rate limiter keyed by resource name

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::config::RateLimitConfig;

/// Admits at most `max_calls` per resource within any trailing `window`
#[derive(Debug)]
pub struct RateLimiter {
    window: Duration,
    max_calls: usize,
    calls: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(window: Duration, max_calls: usize) -> Self {
        Self {
            window,
            max_calls,
            calls: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.window, config.max_calls)
    }

    /// Check and record a call against `resource`
    ///
    /// Denied calls are not recorded.
    pub fn can_call(&self, resource: &str) -> bool {
        let now = Instant::now();
        let mut calls = self.calls.lock().unwrap_or_else(|e| e.into_inner());
        let window = calls.entry(resource.to_string()).or_default();
        self.evict(window, now);

        if window.len() >= self.max_calls {
            debug!(resource, calls = window.len(), "Rate limit reached");
            return false;
        }

        window.push_back(now);
        true
    }

    /// Calls still admissible for `resource` in the current window
    pub fn remaining(&self, resource: &str) -> usize {
        let now = Instant::now();
        let mut calls = self.calls.lock().unwrap_or_else(|e| e.into_inner());
        match calls.get_mut(resource) {
            Some(window) => {
                self.evict(window, now);
                self.max_calls.saturating_sub(window.len())
            }
            None => self.max_calls,
        }
    }

    /// Drop all history for `resource`
    pub fn forget(&self, resource: &str) {
        let mut calls = self.calls.lock().unwrap_or_else(|e| e.into_inner());
        calls.remove(resource);
    }

    /// Number of resources with recorded history
    pub fn tracked(&self) -> usize {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn evict(&self, window: &mut VecDeque<Instant>, now: Instant) {
        while let Some(oldest) = window.front() {
            if now.saturating_duration_since(*oldest) >= self.window {
                window.pop_front();
            } else {
                break;
            }
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::from_config(&RateLimitConfig::default())
    }
}
