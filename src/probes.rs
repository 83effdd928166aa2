//! Inputs the health aggregator samples: reachability, resources and
//! runtime dependencies.

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use sysinfo::{Pid, System};

use crate::error::{Result, WeatherError};

/// Bounded-time reachability check against an upstream URL.
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    /// Resolves with the HTTP status of any response received in time.
    async fn probe(&self, url: &str, timeout: Duration) -> Result<u16>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ResourceUsage {
    pub memory_used_bytes: u64,
    pub memory_total_bytes: u64,
    pub cpu_usage_percent: f32,
    pub cpu_count: usize,
}

impl ResourceUsage {
    pub fn memory_ratio(&self) -> Option<f64> {
        (self.memory_total_bytes > 0)
            .then(|| self.memory_used_bytes as f64 / self.memory_total_bytes as f64)
    }
}

pub trait ResourceMonitor: Send + Sync {
    fn sample(&self) -> Result<ResourceUsage>;
}

/// Samples the current process through `sysinfo`.
///
/// Used memory is the resident set size; the total is the configured budget
/// or, without one, the machine's total memory.
pub struct SystemResourceMonitor {
    system: Mutex<System>,
    pid: Option<Pid>,
    memory_limit_bytes: Option<u64>,
}

impl SystemResourceMonitor {
    pub fn new(memory_limit_mb: Option<u64>) -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                tracing::warn!("Process statistics unavailable: {}", e);
                None
            }
        };

        Self {
            system: Mutex::new(System::new()),
            pid,
            memory_limit_bytes: memory_limit_mb.map(|mb| mb * 1024 * 1024),
        }
    }
}

impl ResourceMonitor for SystemResourceMonitor {
    fn sample(&self) -> Result<ResourceUsage> {
        let pid = self
            .pid
            .ok_or_else(|| WeatherError::Internal("current process id unknown".to_string()))?;

        let mut system = self.system.lock();
        system.refresh_memory();
        if !system.refresh_process(pid) {
            return Err(WeatherError::Internal(format!("process {} not found", pid)));
        }

        let process = system
            .process(pid)
            .ok_or_else(|| WeatherError::Internal(format!("process {} not found", pid)))?;

        Ok(ResourceUsage {
            memory_used_bytes: process.memory(),
            memory_total_bytes: self
                .memory_limit_bytes
                .unwrap_or_else(|| system.total_memory()),
            cpu_usage_percent: process.cpu_usage(),
            cpu_count: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        })
    }
}

type Resolver = Box<dyn Fn() -> std::result::Result<(), String> + Send + Sync>;

/// A runtime capability the server cannot work without.
pub struct Dependency {
    pub name: &'static str,
    resolve: Resolver,
}

impl Dependency {
    pub fn new<F>(name: &'static str, resolve: F) -> Self
    where
        F: Fn() -> std::result::Result<(), String> + Send + Sync + 'static,
    {
        Self {
            name,
            resolve: Box::new(resolve),
        }
    }

    pub fn resolve(&self) -> std::result::Result<(), String> {
        (self.resolve)()
    }
}

impl std::fmt::Debug for Dependency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dependency").field("name", &self.name).finish()
    }
}

/// Dependencies declared by the server binary.
pub fn runtime_dependencies() -> Vec<Dependency> {
    vec![
        Dependency::new("tokio-runtime", || {
            tokio::runtime::Handle::try_current()
                .map(|_| ())
                .map_err(|e| e.to_string())
        }),
        Dependency::new("http-client", || {
            reqwest::Client::builder()
                .build()
                .map(|_| ())
                .map_err(|e| e.to_string())
        }),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_ratio() {
        let usage = ResourceUsage {
            memory_used_bytes: 25,
            memory_total_bytes: 100,
            ..Default::default()
        };
        assert_eq!(usage.memory_ratio(), Some(0.25));
        assert_eq!(ResourceUsage::default().memory_ratio(), None);
    }

    #[test]
    fn test_system_monitor_samples_current_process() {
        let monitor = SystemResourceMonitor::new(Some(64 * 1024));
        let usage = monitor.sample().unwrap();
        assert!(usage.memory_used_bytes > 0);
        assert_eq!(usage.memory_total_bytes, 64 * 1024 * 1024 * 1024);
        assert!(usage.cpu_count >= 1);
    }

    #[tokio::test]
    async fn test_runtime_dependencies_resolve_inside_runtime() {
        for dependency in runtime_dependencies() {
            assert!(dependency.resolve().is_ok(), "{} failed", dependency.name);
        }
    }

    #[test]
    fn test_runtime_dependency_missing_outside_runtime() {
        let deps = runtime_dependencies();
        let runtime = deps.iter().find(|d| d.name == "tokio-runtime").unwrap();
        assert!(runtime.resolve().is_err());
    }
}
