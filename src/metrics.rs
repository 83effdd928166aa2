use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

/// Request counters and memory peak, read by the health aggregator.
#[derive(Debug, Default)]
pub struct PerformanceRecorder {
    total_requests: AtomicU64,
    failed_requests: AtomicU64,
    total_duration_ms: AtomicU64,
    peak_memory_bytes: AtomicU64,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RequestMetrics {
    pub total_requests: u64,
    pub failed_requests: u64,
    pub average_duration_ms: f64,
    pub peak_memory_bytes: u64,
}

impl PerformanceRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self, duration: Duration, success: bool) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.total_duration_ms
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
        if !success {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_memory(&self, bytes: u64) {
        self.peak_memory_bytes.fetch_max(bytes, Ordering::Relaxed);
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> RequestMetrics {
        let total = self.total_requests.load(Ordering::Relaxed);
        let duration = self.total_duration_ms.load(Ordering::Relaxed);

        RequestMetrics {
            total_requests: total,
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            average_duration_ms: if total == 0 {
                0.0
            } else {
                duration as f64 / total as f64
            },
            peak_memory_bytes: self.peak_memory_bytes.load(Ordering::Relaxed),
        }
    }
}
