use std::sync::Arc;

use crate::cache::{CacheConfig, CacheStatsSource, TtlCache};
use crate::clock::{Clock, SystemClock};
use crate::config::ServerSettings;
use crate::error::Result;
use crate::health::{HealthAggregator, HealthSources};
use crate::http::HttpFetcher;
use crate::metrics::PerformanceRecorder;
use crate::models::{ForecastResponse, GeocodeEntry};
use crate::probes::{runtime_dependencies, SystemResourceMonitor};
use crate::rate_limiter::RateLimiter;

/// Process-wide singletons, built once at startup and shared by the service.
pub struct AppContext {
    pub settings: Arc<ServerSettings>,
    pub fetcher: Arc<HttpFetcher>,
    pub geocoding_cache: Arc<TtlCache<GeocodeEntry>>,
    pub weather_cache: Arc<TtlCache<ForecastResponse>>,
    pub rate_limiter: Arc<RateLimiter>,
    pub recorder: Arc<PerformanceRecorder>,
    pub health: Arc<HealthAggregator>,
}

impl AppContext {
    /// Validates `settings` and wires every component; fails on bad configuration.
    pub fn new(settings: ServerSettings) -> Result<Self> {
        Self::with_clock(settings, Arc::new(SystemClock))
    }

    pub fn with_clock(settings: ServerSettings, clock: Arc<dyn Clock>) -> Result<Self> {
        settings.ensure_valid()?;

        let settings = Arc::new(settings);
        let fetcher = Arc::new(HttpFetcher::new()?);
        let geocoding_cache = Arc::new(TtlCache::new(
            "geocoding",
            CacheConfig::geocoding(),
            clock.clone(),
        ));
        let weather_cache = Arc::new(TtlCache::new(
            "weather",
            CacheConfig::weather(),
            clock.clone(),
        ));
        let rate_limiter = Arc::new(RateLimiter::new(clock.clone()));
        let recorder = Arc::new(PerformanceRecorder::new());

        let health = Arc::new(HealthAggregator::new(HealthSources {
            settings: settings.clone(),
            clock,
            caches: vec![
                geocoding_cache.clone() as Arc<dyn CacheStatsSource>,
                weather_cache.clone() as Arc<dyn CacheStatsSource>,
            ],
            rate_limiter: rate_limiter.clone(),
            recorder: recorder.clone(),
            probe: fetcher.clone(),
            resources: Arc::new(SystemResourceMonitor::new(settings.memory_limit_mb)),
            dependencies: runtime_dependencies(),
        }));

        Ok(Self {
            settings,
            fetcher,
            geocoding_cache,
            weather_cache,
            rate_limiter,
            recorder,
            health,
        })
    }

    /// Starts cache sweeps, rate limiter cleanup and health polling.
    pub fn start(&self) {
        self.geocoding_cache.start_sweeper();
        self.weather_cache.start_sweeper();
        self.rate_limiter.start_cleanup();
        self.health.start_polling();

        tracing::info!("Background tasks started");
    }

    /// Stops every background task, waits for them to exit and drops cached state.
    pub async fn shutdown(&self) {
        self.health.shutdown().await;
        self.rate_limiter.shutdown().await;
        self.geocoding_cache.shutdown().await;
        self.weather_cache.shutdown().await;

        tracing::info!("Background tasks stopped");
    }
}
