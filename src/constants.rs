use std::time::Duration;

/// User agent string for HTTP requests
pub const USER_AGENT: &str = concat!("mcp-weather-server/", env!("CARGO_PKG_VERSION"));

/// Open-Meteo geocoding API endpoint
pub const GEOCODING_API_URL: &str = "https://geocoding-api.open-meteo.com/v1/search";

/// Open-Meteo forecast API endpoint
pub const WEATHER_API_URL: &str = "https://api.open-meteo.com/v1/forecast";

// ============================================================================
// Cache
// ============================================================================

pub const GEOCODING_CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);
pub const GEOCODING_CACHE_MAX_SIZE: usize = 1000;
pub const GEOCODING_CACHE_SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// TTL for cities the geocoding API does not know about
pub const GEOCODING_NEGATIVE_TTL: Duration = Duration::from_secs(30 * 60);

pub const WEATHER_CACHE_TTL: Duration = Duration::from_secs(10 * 60);
pub const WEATHER_CACHE_MAX_SIZE: usize = 500;
pub const WEATHER_CACHE_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Hit/miss counters are halved once their sum exceeds this
pub const CACHE_STATS_WINDOW: u64 = 100;

// ============================================================================
// Rate limiting
// ============================================================================

pub const WEATHER_API_MAX_REQUESTS: u32 = 30;
pub const GEOCODING_API_MAX_REQUESTS: u32 = 20;
pub const TOOL_MAX_REQUESTS: u32 = 10;
pub const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);

pub const RATE_LIMIT_CLEANUP_INTERVAL: Duration = Duration::from_secs(5 * 60);
pub const RATE_LIMIT_RETENTION: Duration = Duration::from_secs(5 * 60);

/// Rate limiter key guarding the weather tools as a whole
pub const TOOL_RATE_LIMIT_KEY: &str = "tool:weather";

// ============================================================================
// Health
// ============================================================================

pub const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(5 * 60);
pub const MEMORY_FAIL_RATIO: f64 = 0.8;
pub const MEMORY_WARN_RATIO: f64 = MEMORY_FAIL_RATIO * 0.8;
pub const CACHE_HIT_RATE_WARN: f64 = 0.3;

/// Errors older than this no longer count toward the reported error rate
pub const ERROR_RATE_WINDOW: Duration = Duration::from_secs(5 * 60);
