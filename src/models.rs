use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// ============================================================================
// Open-Meteo Geocoding API Models
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct GeocodingResponse {
    // Absent entirely when nothing matches
    #[serde(default)]
    pub results: Vec<Location>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Location {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub admin1: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
}

impl Location {
    /// "Madrid, Madrid, Spain" style label
    pub fn label(&self) -> String {
        let mut parts = vec![self.name.as_str()];
        if let Some(admin1) = self.admin1.as_deref().filter(|a| *a != self.name) {
            parts.push(admin1);
        }
        if let Some(country) = self.country.as_deref() {
            parts.push(country);
        }
        parts.join(", ")
    }
}

/// Geocoding cache value; unknown cities are cached too.
#[derive(Debug, Clone, PartialEq)]
pub enum GeocodeEntry {
    Found(Location),
    NotFound,
}

// ============================================================================
// Open-Meteo Forecast API Models
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct ForecastResponse {
    pub latitude: f64,
    pub longitude: f64,
    pub timezone: String,
    #[serde(default)]
    pub current: Option<CurrentWeather>,
    #[serde(default)]
    pub current_units: Option<CurrentUnits>,
    pub daily: DailyData,
    pub daily_units: DailyUnits,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CurrentWeather {
    pub time: String,
    #[serde(rename = "temperature_2m")]
    pub temperature: f64,
    #[serde(rename = "apparent_temperature")]
    pub apparent_temperature: f64,
    #[serde(rename = "relative_humidity_2m")]
    pub relative_humidity: f64,
    #[serde(rename = "weather_code")]
    pub weather_code: i32,
    #[serde(rename = "wind_speed_10m")]
    pub wind_speed: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CurrentUnits {
    #[serde(rename = "temperature_2m")]
    pub temperature: String,
    #[serde(rename = "relative_humidity_2m")]
    pub relative_humidity: String,
    #[serde(rename = "wind_speed_10m")]
    pub wind_speed: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DailyData {
    pub time: Vec<String>,
    #[serde(rename = "temperature_2m_max")]
    pub temperature_max: Vec<f64>,
    #[serde(rename = "temperature_2m_min")]
    pub temperature_min: Vec<f64>,
    #[serde(rename = "weather_code")]
    pub weather_code: Vec<i32>,
    #[serde(rename = "wind_speed_10m_max")]
    pub wind_speed_max: Vec<f64>,
    #[serde(rename = "precipitation_sum")]
    pub precipitation_sum: Vec<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DailyUnits {
    #[serde(rename = "temperature_2m_max")]
    pub temperature_max: String,
    #[serde(rename = "wind_speed_10m_max")]
    pub wind_speed_max: String,
    #[serde(rename = "precipitation_sum")]
    pub precipitation_sum: String,
}

// ============================================================================
// MCP Tool Request Models
// ============================================================================

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct GetWeatherRequest {
    /// City name, e.g. "Madrid" or "New York"
    pub city: String,
}

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct GetForecastRequest {
    /// Latitude in degrees, -90 to 90
    pub latitude: f64,
    /// Longitude in degrees, -180 to 180
    pub longitude: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geocoding_response_without_results() {
        let response: GeocodingResponse =
            serde_json::from_str(r#"{"generationtime_ms":0.5}"#).unwrap();
        assert!(response.results.is_empty());
    }

    #[test]
    fn test_location_label_skips_duplicate_region() {
        let madrid = Location {
            name: "Madrid".to_string(),
            latitude: 40.4165,
            longitude: -3.70256,
            country: Some("Spain".to_string()),
            admin1: Some("Madrid".to_string()),
            timezone: None,
        };
        assert_eq!(madrid.label(), "Madrid, Spain");

        let springfield = Location {
            name: "Springfield".to_string(),
            admin1: Some("Illinois".to_string()),
            country: Some("United States".to_string()),
            ..madrid
        };
        assert_eq!(springfield.label(), "Springfield, Illinois, United States");
    }
}
