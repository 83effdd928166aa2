//! Sliding-window rate limiter keyed by string.
//!
//! Each key keeps the timestamps of its admitted requests. A request at `T`
//! is admitted when fewer than `max_requests` timestamps fall inside
//! `(T - window, T]`.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;

use crate::clock::{duration_millis, Clock, Timestamp};
use crate::constants::{
    GEOCODING_API_MAX_REQUESTS, RATE_LIMIT_CLEANUP_INTERVAL, RATE_LIMIT_RETENTION,
    RATE_LIMIT_WINDOW, TOOL_MAX_REQUESTS, WEATHER_API_MAX_REQUESTS,
};
use crate::task::PeriodicTask;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window: Duration,
}

impl RateLimitConfig {
    /// Outbound forecast calls, per upstream URL
    pub fn weather_api() -> Self {
        Self {
            max_requests: WEATHER_API_MAX_REQUESTS,
            window: RATE_LIMIT_WINDOW,
        }
    }

    /// Outbound geocoding calls, per upstream URL
    pub fn geocoding_api() -> Self {
        Self {
            max_requests: GEOCODING_API_MAX_REQUESTS,
            window: RATE_LIMIT_WINDOW,
        }
    }

    /// Tool invocations as a whole
    pub fn tool() -> Self {
        Self {
            max_requests: TOOL_MAX_REQUESTS,
            window: RATE_LIMIT_WINDOW,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u32,
    pub reset_time: Timestamp,
    pub retry_after_seconds: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RateLimiterStats {
    pub active_keys: usize,
    pub total_tracked_requests: usize,
}

pub struct RateLimiter {
    clock: Arc<dyn Clock>,
    windows: Mutex<HashMap<String, VecDeque<Timestamp>>>,
    cleaner: Mutex<Option<PeriodicTask>>,
}

impl RateLimiter {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            windows: Mutex::new(HashMap::new()),
            cleaner: Mutex::new(None),
        }
    }

    /// Checks `key` against `config`, recording the request when admitted.
    pub fn check_limit(&self, key: &str, config: &RateLimitConfig) -> RateLimitDecision {
        let now = self.clock.now_millis();
        let window_ms = duration_millis(config.window);
        let cutoff = now.saturating_sub(window_ms);

        let mut windows = self.windows.lock();
        let timestamps = windows.entry(key.to_string()).or_default();

        while timestamps.front().is_some_and(|&ts| ts <= cutoff) {
            timestamps.pop_front();
        }

        let count = timestamps.len();
        if count >= config.max_requests as usize {
            let oldest = timestamps.front().copied().unwrap_or(now);
            let reset_time = oldest.saturating_add(window_ms);
            let wait_ms = reset_time.saturating_sub(now).max(0);
            let retry_after_seconds = (wait_ms as u64).div_ceil(1000);

            tracing::debug!(key, retry_after_seconds, "Rate limit exceeded");

            return RateLimitDecision {
                allowed: false,
                remaining: 0,
                reset_time,
                retry_after_seconds: Some(retry_after_seconds),
            };
        }

        timestamps.push_back(now);
        let oldest = timestamps.front().copied().unwrap_or(now);

        RateLimitDecision {
            allowed: true,
            remaining: config.max_requests - timestamps.len() as u32,
            reset_time: oldest.saturating_add(window_ms),
            retry_after_seconds: None,
        }
    }

    /// Drops timestamps past the retention floor and forgets idle keys.
    /// Returns the number of keys dropped.
    pub fn cleanup(&self) -> usize {
        let cutoff = self
            .clock
            .now_millis()
            .saturating_sub(duration_millis(RATE_LIMIT_RETENTION));
        let mut windows = self.windows.lock();

        let before = windows.len();
        windows.retain(|_, timestamps| {
            while timestamps.front().is_some_and(|&ts| ts < cutoff) {
                timestamps.pop_front();
            }
            !timestamps.is_empty()
        });
        let removed = before - windows.len();

        if removed > 0 {
            tracing::debug!(removed, "Dropped idle rate limit windows");
        }
        removed
    }

    pub fn reset(&self, key: &str) {
        self.windows.lock().remove(key);
    }

    pub fn reset_all(&self) {
        self.windows.lock().clear();
    }

    pub fn stats(&self) -> RateLimiterStats {
        let windows = self.windows.lock();
        RateLimiterStats {
            active_keys: windows.len(),
            total_tracked_requests: windows.values().map(VecDeque::len).sum(),
        }
    }

    pub fn start_cleanup(self: &Arc<Self>) {
        let mut cleaner = self.cleaner.lock();
        if cleaner.is_some() {
            return;
        }

        let limiter: Weak<Self> = Arc::downgrade(self);
        *cleaner = Some(PeriodicTask::spawn(
            "rate-limit-cleanup",
            RATE_LIMIT_CLEANUP_INTERVAL,
            move || {
                if let Some(limiter) = limiter.upgrade() {
                    limiter.cleanup();
                }
                std::future::ready(())
            },
        ));
    }

    pub async fn shutdown(&self) {
        let cleaner = self.cleaner.lock().take();
        if let Some(task) = cleaner {
            task.join().await;
            tracing::info!("Rate limiter cleanup stopped");
        }
    }
}
