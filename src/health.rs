//! Health aggregation.
//!
//! A full check samples memory, cache effectiveness, upstream reachability,
//! configuration and runtime dependencies, then reduces the five results to
//! one [`OverallStatus`]:
//!
//! 1. any `fail` makes the service `unhealthy`,
//! 2. otherwise more than one `warn` makes it `degraded`,
//! 3. otherwise it is `healthy`.
//!
//! The last computed status is kept for [`HealthAggregator::get_quick_health`],
//! which never runs checks. Checks never propagate errors; a check that
//! cannot complete reports `fail` (or `warn` for reachability).

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::{json, Value};

use crate::cache::{CacheStats, CacheStatsSource};
use crate::clock::{duration_millis, to_datetime, Clock, Timestamp};
use crate::config::{ServerSettings, ValidationResult};
use crate::constants::{
    CACHE_HIT_RATE_WARN, ERROR_RATE_WINDOW, HEALTH_CHECK_INTERVAL, MEMORY_FAIL_RATIO,
    MEMORY_WARN_RATIO,
};
use crate::error::{Result, WeatherError};
use crate::metrics::{PerformanceRecorder, RequestMetrics};
use crate::probes::{ConnectivityProbe, Dependency, ResourceMonitor, ResourceUsage};
use crate::rate_limiter::{RateLimiter, RateLimiterStats};
use crate::task::PeriodicTask;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallStatus {
    #[default]
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Pass,
    Warn,
    Fail,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckResult {
    pub name: String,
    pub status: CheckStatus,
    pub message: String,
    pub duration_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub status: OverallStatus,
    pub timestamp: DateTime<Utc>,
    /// Seconds since the aggregator was created
    pub uptime: f64,
    pub version: String,
    pub checks: Vec<HealthCheckResult>,
    pub metrics: SystemMetrics,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuickHealth {
    pub status: OverallStatus,
    pub uptime_seconds: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemMetrics {
    pub memory: MemoryMetrics,
    pub cpu: CpuMetrics,
    pub cache: BTreeMap<String, CacheStats>,
    pub requests: RequestMetrics,
    pub errors: ErrorMetrics,
    pub rate_limiter: RateLimiterStats,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryMetrics {
    pub used_bytes: u64,
    pub total_bytes: u64,
    pub usage_ratio: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CpuMetrics {
    pub usage_percent: f32,
    pub cores: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ErrorMetrics {
    pub count: u64,
    pub last_error_at: Option<DateTime<Utc>>,
    pub error_rate: f64,
}

/// Everything the aggregator reads from.
pub struct HealthSources {
    pub settings: Arc<ServerSettings>,
    pub clock: Arc<dyn Clock>,
    pub caches: Vec<Arc<dyn CacheStatsSource>>,
    pub rate_limiter: Arc<RateLimiter>,
    pub recorder: Arc<PerformanceRecorder>,
    pub probe: Arc<dyn ConnectivityProbe>,
    pub resources: Arc<dyn ResourceMonitor>,
    pub dependencies: Vec<Dependency>,
}

#[derive(Debug, Default)]
struct ErrorState {
    count: u64,
    last_error_at: Option<Timestamp>,
}

pub struct HealthAggregator {
    sources: HealthSources,
    started_at: Timestamp,
    current_status: RwLock<OverallStatus>,
    errors: Mutex<ErrorState>,
    poller: Mutex<Option<PeriodicTask>>,
}

impl HealthAggregator {
    pub fn new(sources: HealthSources) -> Self {
        let started_at = sources.clock.now_millis();
        Self {
            sources,
            started_at,
            current_status: RwLock::new(OverallStatus::Healthy),
            errors: Mutex::new(ErrorState::default()),
            poller: Mutex::new(None),
        }
    }

    /// Runs every check and updates the current status.
    pub async fn get_health_status(&self) -> HealthStatus {
        let usage = self.sources.resources.sample();
        if let Ok(usage) = &usage {
            self.sources.recorder.record_memory(usage.memory_used_bytes);
        }

        let cache_stats: Vec<(&'static str, CacheStats)> = self
            .sources
            .caches
            .iter()
            .map(|cache| (cache.name(), cache.stats()))
            .collect();

        let (memory, cache, external, configuration, dependencies) = tokio::join!(
            run_check("memory", CheckStatus::Fail, async { Ok(memory_outcome(&usage)) }),
            run_check("cache", CheckStatus::Warn, async {
                Ok(cache_outcome(&cache_stats))
            }),
            run_check("external_apis", CheckStatus::Warn, self.check_external()),
            run_check("configuration", CheckStatus::Fail, async {
                Ok(configuration_outcome(&self.sources.settings.validate()))
            }),
            run_check("dependencies", CheckStatus::Fail, async {
                Ok(dependency_outcome(&self.sources.dependencies))
            }),
        );

        let checks = vec![memory, cache, external, configuration, dependencies];
        let status = reduce_status(&checks);
        self.transition(status);

        let now = self.sources.clock.now_millis();
        let usage = usage.unwrap_or_default();

        HealthStatus {
            status,
            timestamp: to_datetime(now),
            uptime: self.uptime_seconds(now),
            version: self.sources.settings.server_version.clone(),
            checks,
            metrics: SystemMetrics {
                memory: MemoryMetrics {
                    used_bytes: usage.memory_used_bytes,
                    total_bytes: usage.memory_total_bytes,
                    usage_ratio: usage.memory_ratio().unwrap_or(0.0),
                },
                cpu: CpuMetrics {
                    usage_percent: usage.cpu_usage_percent,
                    cores: usage.cpu_count,
                },
                cache: cache_stats
                    .into_iter()
                    .map(|(name, stats)| (name.to_string(), stats))
                    .collect(),
                requests: self.sources.recorder.snapshot(),
                errors: self.error_metrics(now),
                rate_limiter: self.sources.rate_limiter.stats(),
            },
        }
    }

    /// Last computed status; does not run any check.
    pub fn get_quick_health(&self) -> QuickHealth {
        let now = self.sources.clock.now_millis();
        QuickHealth {
            status: *self.current_status.read(),
            uptime_seconds: self.uptime_seconds(now),
            timestamp: to_datetime(now),
        }
    }

    pub fn record_error(&self, error: &WeatherError, context: Option<&str>) {
        let now = self.sources.clock.now_millis();
        {
            let mut errors = self.errors.lock();
            errors.count += 1;
            errors.last_error_at = Some(now);
        }

        tracing::warn!(
            kind = error.kind(),
            context = context.unwrap_or("-"),
            "Recorded error: {}",
            error
        );
    }

    /// Starts the periodic full check.
    pub fn start_polling(self: &Arc<Self>) {
        let mut poller = self.poller.lock();
        if poller.is_some() {
            return;
        }

        let health: Weak<Self> = Arc::downgrade(self);
        *poller = Some(PeriodicTask::spawn(
            "health-check",
            HEALTH_CHECK_INTERVAL,
            move || {
                let health = health.clone();
                async move {
                    let Some(health) = health.upgrade() else {
                        return;
                    };

                    let report = health.get_health_status().await;
                    if report.status != OverallStatus::Healthy {
                        let failing: Vec<&str> = report
                            .checks
                            .iter()
                            .filter(|check| check.status != CheckStatus::Pass)
                            .map(|check| check.name.as_str())
                            .collect();
                        tracing::warn!(
                            status = ?report.status,
                            checks = ?failing,
                            "Periodic health check reported problems"
                        );
                    }
                }
            },
        ));
    }

    pub async fn shutdown(&self) {
        let poller = self.poller.lock().take();
        if let Some(task) = poller {
            task.join().await;
            tracing::info!("Health polling stopped");
        }
    }

    async fn check_external(&self) -> Result<CheckOutcome> {
        let settings = &self.sources.settings;
        let timeout = settings.health_timeout();
        let urls = [settings.geocoding_url.clone(), settings.weather_url.clone()];

        let handles: Vec<_> = urls
            .iter()
            .map(|url| {
                let probe = self.sources.probe.clone();
                let url = url.clone();
                tokio::spawn(async move {
                    match tokio::time::timeout(timeout, probe.probe(&url, timeout)).await {
                        Ok(result) => result,
                        Err(_) => Err(WeatherError::Timeout {
                            url,
                            timeout_ms: timeout.as_millis() as u64,
                        }),
                    }
                })
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for (url, handle) in urls.into_iter().zip(handles) {
            let result = handle
                .await
                .map_err(|e| WeatherError::Internal(format!("probe task failed: {}", e)))?;
            results.push((url, result));
        }

        Ok(external_outcome(&results))
    }

    fn transition(&self, status: OverallStatus) {
        let previous = std::mem::replace(&mut *self.current_status.write(), status);
        if previous == status {
            return;
        }

        match status {
            OverallStatus::Healthy => {
                tracing::info!(from = ?previous, to = ?status, "Health status changed")
            }
            _ => tracing::warn!(from = ?previous, to = ?status, "Health status changed"),
        }
    }

    fn uptime_seconds(&self, now: Timestamp) -> f64 {
        (now - self.started_at).max(0) as f64 / 1000.0
    }

    fn error_metrics(&self, now: Timestamp) -> ErrorMetrics {
        let errors = self.errors.lock();
        let total_requests = self.sources.recorder.total_requests();
        let window = duration_millis(ERROR_RATE_WINDOW);

        // Only the recency of the last error gates the rate
        let error_rate = match errors.last_error_at {
            Some(at) if now - at <= window && total_requests > 0 => {
                (errors.count as f64 / total_requests as f64).min(1.0)
            }
            _ => 0.0,
        };

        ErrorMetrics {
            count: errors.count,
            last_error_at: errors.last_error_at.map(to_datetime),
            error_rate,
        }
    }
}

/// Reduces individual results to an overall status.
pub fn reduce_status(checks: &[HealthCheckResult]) -> OverallStatus {
    if checks.iter().any(|c| c.status == CheckStatus::Fail) {
        return OverallStatus::Unhealthy;
    }

    let warnings = checks
        .iter()
        .filter(|c| c.status == CheckStatus::Warn)
        .count();
    if warnings > 1 {
        OverallStatus::Degraded
    } else {
        OverallStatus::Healthy
    }
}

#[derive(Debug, Clone)]
struct CheckOutcome {
    status: CheckStatus,
    message: String,
    metadata: Option<Value>,
}

impl CheckOutcome {
    fn new(status: CheckStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            metadata: None,
        }
    }

    fn pass(message: impl Into<String>) -> Self {
        Self::new(CheckStatus::Pass, message)
    }

    fn warn(message: impl Into<String>) -> Self {
        Self::new(CheckStatus::Warn, message)
    }

    fn fail(message: impl Into<String>) -> Self {
        Self::new(CheckStatus::Fail, message)
    }

    fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

async fn run_check<F>(name: &'static str, on_error: CheckStatus, check: F) -> HealthCheckResult
where
    F: Future<Output = Result<CheckOutcome>>,
{
    let started = Instant::now();
    let outcome = match check.await {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::error!(check = name, error = %e, "Health check could not complete");
            CheckOutcome::new(on_error, "Health check could not be completed")
                .with_metadata(json!({ "error": e.kind() }))
        }
    };

    HealthCheckResult {
        name: name.to_string(),
        status: outcome.status,
        message: outcome.message,
        duration_ms: started.elapsed().as_secs_f64() * 1000.0,
        metadata: outcome.metadata,
    }
}

fn memory_outcome(usage: &Result<ResourceUsage>) -> CheckOutcome {
    let usage = match usage {
        Ok(usage) => usage,
        Err(e) => {
            return CheckOutcome::warn("Memory statistics unavailable")
                .with_metadata(json!({ "error": e.to_string() }))
        }
    };

    let Some(ratio) = usage.memory_ratio() else {
        return CheckOutcome::warn("Memory statistics unavailable");
    };

    let percent = ratio * 100.0;
    let outcome = if ratio > MEMORY_FAIL_RATIO {
        CheckOutcome::fail(format!("Memory usage critical: {:.1}%", percent))
    } else if ratio > MEMORY_WARN_RATIO {
        CheckOutcome::warn(format!("Memory usage high: {:.1}%", percent))
    } else {
        CheckOutcome::pass(format!("Memory usage normal: {:.1}%", percent))
    };

    outcome.with_metadata(json!({
        "usedBytes": usage.memory_used_bytes,
        "totalBytes": usage.memory_total_bytes,
        "usagePercent": (percent * 10.0).round() / 10.0,
    }))
}

fn cache_outcome(stats: &[(&'static str, CacheStats)]) -> CheckOutcome {
    let cold: Vec<&str> = stats
        .iter()
        .filter(|(_, s)| s.hit_rate < CACHE_HIT_RATE_WARN)
        .map(|(name, _)| *name)
        .collect();

    let metadata: serde_json::Map<String, Value> = stats
        .iter()
        .map(|(name, s)| {
            (
                name.to_string(),
                json!({ "size": s.size, "capacity": s.capacity, "hitRate": s.hit_rate }),
            )
        })
        .collect();

    let outcome = if cold.is_empty() {
        CheckOutcome::pass("Caches operating normally")
    } else {
        CheckOutcome::warn(format!("Low cache hit rate: {}", cold.join(", ")))
    };
    outcome.with_metadata(Value::Object(metadata))
}

fn external_outcome(results: &[(String, Result<u16>)]) -> CheckOutcome {
    let unreachable: Vec<&str> = results
        .iter()
        .filter(|(_, result)| result.is_err())
        .map(|(url, _)| url.as_str())
        .collect();

    let metadata: serde_json::Map<String, Value> = results
        .iter()
        .map(|(url, result)| {
            let entry = match result {
                Ok(status) => json!({ "reachable": true, "status": status }),
                Err(e) => json!({ "reachable": false, "error": e.kind() }),
            };
            (url.clone(), entry)
        })
        .collect();

    let outcome = match unreachable.len() {
        0 => CheckOutcome::pass("All external APIs reachable"),
        n if n == results.len() => CheckOutcome::fail("No external APIs reachable"),
        _ => CheckOutcome::warn(format!("Unreachable: {}", unreachable.join(", "))),
    };
    outcome.with_metadata(Value::Object(metadata))
}

fn configuration_outcome(validation: &ValidationResult) -> CheckOutcome {
    if !validation.is_valid() {
        CheckOutcome::fail(format!("Invalid configuration: {}", validation.error_summary()))
    } else if !validation.warnings.is_empty() {
        CheckOutcome::warn(format!("Incomplete configuration: {}", validation.warning_summary()))
    } else {
        CheckOutcome::pass("Configuration valid")
    }
}

fn dependency_outcome(dependencies: &[Dependency]) -> CheckOutcome {
    let mut missing = Vec::new();
    let mut metadata = serde_json::Map::new();

    for dependency in dependencies {
        match dependency.resolve() {
            Ok(()) => {
                metadata.insert(dependency.name.to_string(), json!("ok"));
            }
            Err(e) => {
                metadata.insert(dependency.name.to_string(), json!(e));
                missing.push(dependency.name);
            }
        }
    }

    let outcome = if missing.is_empty() {
        CheckOutcome::pass("All dependencies available")
    } else {
        CheckOutcome::fail(format!("Missing dependencies: {}", missing.join(", ")))
    };
    outcome.with_metadata(Value::Object(metadata))
}
