use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use rmcp::{
    handler::server::{wrapper::Parameters, ServerHandler, tool::ToolRouter},
    model::{CallToolResult, Content, Implementation, ProtocolVersion, ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router,
    ErrorData as McpError,
};
use url::Url;

use crate::constants::{GEOCODING_NEGATIVE_TTL, TOOL_RATE_LIMIT_KEY};
use crate::context::AppContext;
use crate::error::{Result, WeatherError};
use crate::formatters::{format_forecast, format_weather_report};
use crate::models::{
    ForecastResponse, GeocodeEntry, GeocodingResponse, GetForecastRequest, GetWeatherRequest,
};
use crate::rate_limiter::RateLimitConfig;

const CURRENT_FIELDS: &str =
    "temperature_2m,relative_humidity_2m,apparent_temperature,weather_code,wind_speed_10m";
const DAILY_FIELDS: &str =
    "temperature_2m_max,temperature_2m_min,weather_code,wind_speed_10m_max,precipitation_sum";

/// Main weather service that handles MCP requests
#[derive(Clone)]
pub struct Weather {
    ctx: Arc<AppContext>,
    tool_router: ToolRouter<Self>,
}

impl Weather {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self {
            ctx,
            tool_router: Self::tool_router(),
        }
    }

    /// Records an admitted request against `key` or reports how long to wait
    fn admit(&self, key: &str, config: &RateLimitConfig) -> Result<()> {
        let decision = self.ctx.rate_limiter.check_limit(key, config);
        if decision.allowed {
            tracing::debug!(key, remaining = decision.remaining, "Request admitted");
            return Ok(());
        }

        tracing::info!(key, reset_time = decision.reset_time, "Request rate limited");
        Err(WeatherError::RateLimited {
            key: key.to_string(),
            retry_after_seconds: decision.retry_after_seconds.unwrap_or(1),
        })
    }

    /// Resolves a city name, consulting the geocoding cache first
    async fn geocode(&self, city: &str) -> Result<GeocodeEntry> {
        let settings = &self.ctx.settings;
        let city = city.trim();
        let key = format!("{}:{}", city.to_lowercase(), settings.language);

        if let Some(entry) = self.ctx.geocoding_cache.get(&key) {
            tracing::debug!(city, "Geocoding cache hit");
            return Ok(entry);
        }

        self.admit(
            &format!("geocoding:{}", settings.geocoding_url),
            &RateLimitConfig::geocoding_api(),
        )?;

        let url = Url::parse_with_params(
            &settings.geocoding_url,
            &[
                ("name", city),
                ("count", "1"),
                ("language", settings.language.as_str()),
                ("format", "json"),
            ],
        )
        .map_err(|e| WeatherError::Configuration(e.to_string()))?;

        let response: GeocodingResponse = self
            .ctx
            .fetcher
            .get_json(url.as_str(), settings.api_timeout())
            .await?;

        match response.results.into_iter().next() {
            Some(location) => {
                tracing::info!(city, name = %location.name, "Geocoded city");
                let entry = GeocodeEntry::Found(location);
                self.ctx.geocoding_cache.set(key, entry.clone());
                Ok(entry)
            }
            None => {
                tracing::info!(city, "City not found upstream");
                self.ctx
                    .geocoding_cache
                    .set_with_ttl(key, GeocodeEntry::NotFound, GEOCODING_NEGATIVE_TTL);
                Ok(GeocodeEntry::NotFound)
            }
        }
    }

    /// Fetches a forecast, consulting the weather cache first
    async fn forecast(&self, latitude: f64, longitude: f64) -> Result<ForecastResponse> {
        let settings = &self.ctx.settings;
        let key = format!(
            "{:.4},{:.4}:{}:{}",
            latitude, longitude, settings.forecast_days, settings.language
        );

        if let Some(forecast) = self.ctx.weather_cache.get(&key) {
            tracing::debug!(key, "Weather cache hit");
            return Ok(forecast);
        }

        self.admit(
            &format!("weather:{}", settings.weather_url),
            &RateLimitConfig::weather_api(),
        )?;

        let url = Url::parse_with_params(
            &settings.weather_url,
            &[
                ("latitude", latitude.to_string()),
                ("longitude", longitude.to_string()),
                ("current", CURRENT_FIELDS.to_string()),
                ("daily", DAILY_FIELDS.to_string()),
                ("timezone", "auto".to_string()),
                ("forecast_days", settings.forecast_days.to_string()),
            ],
        )
        .map_err(|e| WeatherError::Configuration(e.to_string()))?;

        let forecast: ForecastResponse = self
            .ctx
            .fetcher
            .get_json(url.as_str(), settings.api_timeout())
            .await?;

        self.ctx.weather_cache.set(key, forecast.clone());
        Ok(forecast)
    }

    async fn lookup_weather(&self, city: &str) -> Result<String> {
        self.admit(TOOL_RATE_LIMIT_KEY, &RateLimitConfig::tool())?;

        let location = match self.geocode(city).await? {
            GeocodeEntry::Found(location) => location,
            GeocodeEntry::NotFound => return Err(WeatherError::NotFound(city.trim().to_string())),
        };

        let forecast = self.forecast(location.latitude, location.longitude).await?;
        Ok(format_weather_report(
            &location,
            &forecast,
            self.ctx.settings.forecast_days as usize,
        ))
    }

    async fn lookup_forecast(&self, latitude: f64, longitude: f64) -> Result<String> {
        self.admit(TOOL_RATE_LIMIT_KEY, &RateLimitConfig::tool())?;

        let forecast = self.forecast(latitude, longitude).await?;
        Ok(format_forecast(
            &forecast,
            self.ctx.settings.forecast_days as usize,
        ))
    }

    /// Times a tool call and turns its outcome into a tool result
    async fn respond<F>(&self, tool: &'static str, lookup: F) -> CallToolResult
    where
        F: Future<Output = Result<String>>,
    {
        let started = Instant::now();
        let result = lookup.await;
        let succeeded = matches!(result, Ok(_) | Err(WeatherError::NotFound(_)));
        self.ctx.recorder.record_request(started.elapsed(), succeeded);

        match result {
            Ok(text) => CallToolResult::success(vec![Content::text(text)]),
            // An unknown city is an answer, not a failure
            Err(e @ WeatherError::NotFound(_)) => {
                CallToolResult::success(vec![Content::text(e.user_message())])
            }
            Err(e) => {
                if !matches!(e, WeatherError::RateLimited { .. }) {
                    self.ctx.health.record_error(&e, Some(tool));
                }
                CallToolResult::error(vec![Content::text(e.user_message())])
            }
        }
    }
}

#[tool_handler]
impl ServerHandler for Weather {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: self.ctx.settings.server_name.clone(),
                version: self.ctx.settings.server_version.clone(),
                icons: None,
                title: None,
                website_url: None,
            },
            instructions: Some(
                "A weather information service powered by the Open-Meteo APIs. \
                Look up current conditions and a daily forecast by city name or coordinates, \
                and inspect the server's health."
                    .to_string(),
            ),
        }
    }
}

#[tool_router]
impl Weather {
    /// Gets current weather and forecast for a city
    #[tool(description = "Get current weather and a daily forecast for a city by name (e.g., 'Madrid', 'New York', 'Tokyo').")]
    async fn get_weather(
        &self,
        Parameters(request): Parameters<GetWeatherRequest>,
    ) -> Result<CallToolResult, McpError> {
        if request.city.trim().is_empty() {
            return Err(McpError::invalid_params("City name must not be empty", None));
        }

        tracing::info!("Getting weather for city: {}", request.city);

        Ok(self
            .respond("get_weather", self.lookup_weather(&request.city))
            .await)
    }

    /// Gets weather forecast for any location worldwide
    #[tool(description = "Get weather forecast for any location worldwide. Provide latitude and longitude (e.g., latitude: 52.52, longitude: 13.41 for Berlin).")]
    async fn get_forecast(
        &self,
        Parameters(request): Parameters<GetForecastRequest>,
    ) -> Result<CallToolResult, McpError> {
        if !(-90.0..=90.0).contains(&request.latitude)
            || !(-180.0..=180.0).contains(&request.longitude)
        {
            return Err(McpError::invalid_params(
                "Latitude must be within -90..90 and longitude within -180..180",
                None,
            ));
        }

        tracing::info!(
            "Getting forecast for coordinates: {}, {}",
            request.latitude,
            request.longitude
        );

        Ok(self
            .respond(
                "get_forecast",
                self.lookup_forecast(request.latitude, request.longitude),
            )
            .await)
    }

    /// Runs every health check
    #[tool(description = "Run all server health checks (memory, caches, upstream reachability, configuration, dependencies) and return the full health report as JSON.")]
    async fn health_status(&self) -> Result<CallToolResult, McpError> {
        let status = self.ctx.health.get_health_status().await;
        let json = serde_json::to_string_pretty(&status)
            .map_err(|e| McpError::internal_error(format!("Failed to encode health status: {}", e), None))?;

        Ok(CallToolResult::success(vec![Content::text(json)]))
    }

    /// Returns the last computed health status
    #[tool(description = "Return the last computed health status and uptime without running checks.")]
    async fn quick_health(&self) -> Result<CallToolResult, McpError> {
        let quick = self.ctx.health.get_quick_health();
        let json = serde_json::to_string_pretty(&quick)
            .map_err(|e| McpError::internal_error(format!("Failed to encode health status: {}", e), None))?;

        Ok(CallToolResult::success(vec![Content::text(json)]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::test_settings;
    use crate::formatters::tests::sample_forecast_json;
    use std::time::Duration;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn madrid_json() -> serde_json::Value {
        serde_json::json!({
            "results": [{
                "name": "Madrid",
                "latitude": 40.4165,
                "longitude": -3.70256,
                "country": "Spain",
                "admin1": "Madrid",
                "timezone": "Europe/Madrid"
            }]
        })
    }

    fn service(server: &MockServer, clock: Arc<ManualClock>) -> Weather {
        let settings = test_settings(
            &format!("{}/v1/search", server.uri()),
            &format!("{}/v1/forecast", server.uri()),
        );
        let ctx = AppContext::with_clock(settings, clock).unwrap();
        Weather::new(Arc::new(ctx))
    }

    #[tokio::test]
    async fn test_lookup_uses_caches_after_first_call() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/search"))
            .and(query_param("name", "Madrid"))
            .respond_with(ResponseTemplate::new(200).set_body_json(madrid_json()))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/forecast"))
            .and(query_param("forecast_days", "3"))
            .respond_with(ResponseTemplate::new(200).set_body_json(sample_forecast_json()))
            .expect(1)
            .mount(&server)
            .await;

        let weather = service(&server, Arc::new(ManualClock::new(0)));

        let first = weather.lookup_weather("Madrid").await.unwrap();
        let second = weather.lookup_weather("  madrid ").await.unwrap();
        assert!(first.starts_with("Weather for Madrid, Spain"));
        assert_eq!(first, second);

        // Trimmed, lower-cased key
        assert_eq!(weather.ctx.geocoding_cache.stats().size, 1);
        assert_eq!(weather.ctx.weather_cache.stats().size, 1);
    }

    #[tokio::test]
    async fn test_unknown_city_is_cached_negatively() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/search"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "generationtime_ms": 0.3 })),
            )
            .expect(2)
            .mount(&server)
            .await;

        let clock = Arc::new(ManualClock::new(0));
        let weather = service(&server, clock.clone());

        for _ in 0..3 {
            let err = weather.lookup_weather("Atlantis").await.unwrap_err();
            assert!(matches!(err, WeatherError::NotFound(ref name) if name == "Atlantis"));
        }
        assert_eq!(
            weather.ctx.geocoding_cache.get("atlantis:en"),
            Some(GeocodeEntry::NotFound)
        );

        // Negative entries expire sooner than positive ones
        clock.advance(GEOCODING_NEGATIVE_TTL + Duration::from_secs(1));
        assert!(weather.lookup_weather("Atlantis").await.is_err());
    }

    #[tokio::test]
    async fn test_not_found_is_reported_as_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let weather = service(&server, Arc::new(ManualClock::new(0)));
        let result = weather
            .get_weather(Parameters(GetWeatherRequest {
                city: "Atlantis".to_string(),
            }))
            .await
            .unwrap();

        assert_eq!(result.is_error, Some(false));
        assert_eq!(weather.ctx.recorder.snapshot().failed_requests, 0);
    }

    #[tokio::test]
    async fn test_tool_rate_limit_is_outermost() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(madrid_json()))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/forecast"))
            .respond_with(ResponseTemplate::new(200).set_body_json(sample_forecast_json()))
            .expect(1)
            .mount(&server)
            .await;

        let clock = Arc::new(ManualClock::new(0));
        let weather = service(&server, clock.clone());

        for _ in 0..10 {
            weather.lookup_weather("Madrid").await.unwrap();
            clock.advance(Duration::from_secs(1));
        }

        let err = weather.lookup_weather("Madrid").await.unwrap_err();
        match err {
            WeatherError::RateLimited {
                key,
                retry_after_seconds,
            } => {
                assert_eq!(key, TOOL_RATE_LIMIT_KEY);
                assert_eq!(retry_after_seconds, 50);
            }
            other => panic!("expected rate limit, got {other:?}"),
        }

        clock.advance(Duration::from_secs(51));
        assert!(weather.lookup_weather("Madrid").await.is_ok());
    }

    #[tokio::test]
    async fn test_geocoding_rate_limit_per_upstream() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(madrid_json()))
            .expect(20)
            .mount(&server)
            .await;

        let weather = service(&server, Arc::new(ManualClock::new(0)));

        for i in 0..20 {
            weather.geocode(&format!("city-{i}")).await.unwrap();
        }

        let err = weather.geocode("city-20").await.unwrap_err();
        assert!(
            matches!(err, WeatherError::RateLimited { ref key, .. } if key.starts_with("geocoding:"))
        );

        // Cached names still resolve while the upstream budget is spent
        assert!(weather.geocode("city-3").await.is_ok());
    }

    #[tokio::test]
    async fn test_upstream_failure_becomes_tool_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/forecast"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let weather = service(&server, Arc::new(ManualClock::new(0)));
        let result = weather
            .get_forecast(Parameters(GetForecastRequest {
                latitude: 52.52,
                longitude: 13.41,
            }))
            .await
            .unwrap();

        assert_eq!(result.is_error, Some(true));
        assert_eq!(weather.ctx.weather_cache.stats().size, 0);

        let snapshot = weather.ctx.recorder.snapshot();
        assert_eq!(snapshot.total_requests, 1);
        assert_eq!(snapshot.failed_requests, 1);
    }

    #[tokio::test]
    async fn test_invalid_parameters_rejected() {
        let server = MockServer::start().await;
        let weather = service(&server, Arc::new(ManualClock::new(0)));

        let bad_coords = weather
            .get_forecast(Parameters(GetForecastRequest {
                latitude: 123.0,
                longitude: 0.0,
            }))
            .await;
        assert!(bad_coords.is_err());

        let blank_city = weather
            .get_weather(Parameters(GetWeatherRequest {
                city: "   ".to_string(),
            }))
            .await;
        assert!(blank_city.is_err());
        assert_eq!(weather.ctx.recorder.snapshot().total_requests, 0);
    }

    #[tokio::test]
    async fn test_health_tools_return_json() {
        let server = MockServer::start().await;
        let weather = service(&server, Arc::new(ManualClock::new(0)));

        let full = weather.health_status().await.unwrap();
        assert_eq!(full.is_error, Some(false));

        let quick = weather.quick_health().await.unwrap();
        assert_eq!(quick.is_error, Some(false));
    }
}
