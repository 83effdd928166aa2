use std::time::Duration;

use clap::Parser;
use url::Url;

use crate::constants::{GEOCODING_API_URL, WEATHER_API_URL};
use crate::error::{Result, WeatherError};

/// Server settings, read from flags with environment fallbacks.
#[derive(Debug, Clone, Parser)]
#[command(name = "mcp-weather-server", version, about = "MCP server for city weather lookups")]
pub struct ServerSettings {
    /// Server name reported to MCP clients
    #[arg(long, env = "MCP_SERVER_NAME", default_value = "mcp-weather-server")]
    pub server_name: String,

    /// Server version reported to MCP clients
    #[arg(long, env = "MCP_SERVER_VERSION", default_value = env!("CARGO_PKG_VERSION"))]
    pub server_version: String,

    /// Geocoding API endpoint
    #[arg(long, env = "GEOCODING_API_URL", default_value = GEOCODING_API_URL)]
    pub geocoding_url: String,

    /// Forecast API endpoint
    #[arg(long, env = "WEATHER_API_URL", default_value = WEATHER_API_URL)]
    pub weather_url: String,

    /// Timeout for upstream API calls, in milliseconds
    #[arg(long, env = "API_TIMEOUT_MS", default_value_t = 10_000)]
    pub api_timeout_ms: u64,

    /// Timeout for health reachability probes, in milliseconds
    #[arg(long, env = "HEALTH_CHECK_TIMEOUT_MS", default_value_t = 5_000)]
    pub health_timeout_ms: u64,

    /// Language for place names and descriptions
    #[arg(long, env = "WEATHER_LANGUAGE", default_value = "en")]
    pub language: String,

    /// Number of forecast days to return
    #[arg(
        long,
        env = "FORECAST_DAYS",
        default_value_t = 7,
        value_parser = clap::value_parser!(u8).range(1..=16)
    )]
    pub forecast_days: u8,

    /// Memory budget for the health check; total system memory when unset
    #[arg(long, env = "MEMORY_LIMIT_MB")]
    pub memory_limit_mb: Option<u64>,
}

impl ServerSettings {
    pub fn api_timeout(&self) -> Duration {
        Duration::from_millis(self.api_timeout_ms)
    }

    pub fn health_timeout(&self) -> Duration {
        Duration::from_millis(self.health_timeout_ms)
    }

    /// Checks the settings; errors are fatal, warnings are not.
    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        for (field, value) in [
            ("geocoding_url", &self.geocoding_url),
            ("weather_url", &self.weather_url),
        ] {
            if let Err(message) = validate_url(value) {
                result.add_error(field, message);
            }
        }

        if self.api_timeout_ms == 0 {
            result.add_error("api_timeout_ms", "must be greater than zero");
        }
        if self.health_timeout_ms == 0 {
            result.add_error("health_timeout_ms", "must be greater than zero");
        }
        if !(1..=16).contains(&self.forecast_days) {
            result.add_error("forecast_days", "must be between 1 and 16");
        }

        if self.server_name.trim().is_empty() {
            result.add_warning("server_name", "missing");
        }
        if self.server_version.trim().is_empty() {
            result.add_warning("server_version", "missing");
        }

        result
    }

    /// Fails fast on invalid settings, logging any warnings.
    pub fn ensure_valid(&self) -> Result<()> {
        let result = self.validate();

        for warning in &result.warnings {
            tracing::warn!("Configuration warning: {}", warning);
        }
        if self.language.trim().is_empty() {
            tracing::info!("No language configured, upstream default will be used");
        }

        if !result.is_valid() {
            return Err(WeatherError::Configuration(result.error_summary()));
        }
        Ok(())
    }
}

fn validate_url(value: &str) -> std::result::Result<(), String> {
    let url = Url::parse(value).map_err(|e| format!("invalid URL '{}': {}", value, e))?;

    match url.scheme() {
        "http" | "https" if url.has_host() => Ok(()),
        "http" | "https" => Err(format!("URL '{}' has no host", value)),
        scheme => Err(format!("unsupported URL scheme '{}'", scheme)),
    }
}

/// A single validation finding
#[derive(Debug, Clone)]
pub struct ConfigValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationError>,
}

impl ValidationResult {
    /// Returns true if there are no errors (warnings are OK)
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    pub fn add_warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    pub fn error_summary(&self) -> String {
        join(&self.errors)
    }

    pub fn warning_summary(&self) -> String {
        join(&self.warnings)
    }
}

fn join(findings: &[ConfigValidationError]) -> String {
    findings
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
pub(crate) fn test_settings(geocoding_url: &str, weather_url: &str) -> ServerSettings {
    ServerSettings {
        server_name: "weather-test".to_string(),
        server_version: "0.0.1".to_string(),
        geocoding_url: geocoding_url.to_string(),
        weather_url: weather_url.to_string(),
        api_timeout_ms: 2_000,
        health_timeout_ms: 1_000,
        language: "en".to_string(),
        forecast_days: 3,
        memory_limit_mb: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_parse_and_validate() {
        let settings = ServerSettings::parse_from(["mcp-weather-server"]);
        assert_eq!(settings.geocoding_url, GEOCODING_API_URL);
        assert_eq!(settings.weather_url, WEATHER_API_URL);
        assert!(settings.validate().is_valid());
    }

    #[test]
    fn test_flags_override_defaults() {
        let settings = ServerSettings::parse_from([
            "mcp-weather-server",
            "--forecast-days",
            "3",
            "--language",
            "es",
            "--api-timeout-ms",
            "2500",
        ]);
        assert_eq!(settings.forecast_days, 3);
        assert_eq!(settings.language, "es");
        assert_eq!(settings.api_timeout(), Duration::from_millis(2500));
    }

    #[test]
    fn test_forecast_days_out_of_range_rejected() {
        let parsed = ServerSettings::try_parse_from(["mcp-weather-server", "--forecast-days", "30"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_invalid_urls_are_errors() {
        let settings = test_settings("not a url", "ftp://example.com/forecast");
        let result = settings.validate();
        assert!(!result.is_valid());
        assert_eq!(result.errors.len(), 2);
        assert!(result.error_summary().contains("geocoding_url"));
        assert!(result.error_summary().contains("unsupported URL scheme"));

        let err = settings.ensure_valid().unwrap_err();
        assert!(matches!(err, WeatherError::Configuration(_)));
    }

    #[test]
    fn test_relative_url_is_error() {
        let settings = test_settings("/v1/search", "https://api.open-meteo.com/v1/forecast");
        assert!(!settings.validate().is_valid());
    }

    #[test]
    fn test_missing_identity_is_warning() {
        let mut settings = test_settings(GEOCODING_API_URL, WEATHER_API_URL);
        settings.server_name = String::new();

        let result = settings.validate();
        assert!(result.is_valid());
        assert_eq!(result.warnings.len(), 1);
        assert_eq!(result.warning_summary(), "server_name: missing");
        assert!(settings.ensure_valid().is_ok());
    }

    #[test]
    fn test_blank_language_is_not_a_finding() {
        let mut settings = test_settings(GEOCODING_API_URL, WEATHER_API_URL);
        settings.language = "  ".to_string();

        let result = settings.validate();
        assert!(result.is_valid());
        assert!(result.warnings.is_empty());
        assert!(settings.ensure_valid().is_ok());
    }
}
