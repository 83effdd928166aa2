use std::time::Duration;

use chrono::{DateTime, Utc};

/// Milliseconds since the Unix epoch
pub type Timestamp = i64;

/// Wall-clock source shared by the cache, rate limiter and health checks
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> Timestamp;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> Timestamp {
        Utc::now().timestamp_millis()
    }
}

/// Length of `duration` in milliseconds, saturating at `i64::MAX`
pub fn duration_millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

/// Converts a millisecond timestamp into a UTC date time
pub fn to_datetime(millis: Timestamp) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}

#[cfg(test)]
pub use manual::ManualClock;
