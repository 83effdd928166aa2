use crate::models::{ForecastResponse, Location};

/// Formats an Open-Meteo forecast for a geocoded city
pub fn format_weather_report(location: &Location, forecast: &ForecastResponse, days: usize) -> String {
    let mut output = format!(
        "Weather for {}\nLocation: {:.4}, {:.4}\nTimezone: {}\n\n",
        location.label(),
        forecast.latitude,
        forecast.longitude,
        forecast.timezone
    );
    push_current(&mut output, forecast);
    push_daily(&mut output, forecast, days);
    output
}

/// Formats an Open-Meteo forecast for bare coordinates
pub fn format_forecast(forecast: &ForecastResponse, days: usize) -> String {
    let mut output = format!(
        "Weather Forecast (Open-Meteo)\nLocation: {:.4}, {:.4}\nTimezone: {}\n\n",
        forecast.latitude, forecast.longitude, forecast.timezone
    );
    push_current(&mut output, forecast);
    push_daily(&mut output, forecast, days);
    output
}

fn push_current(output: &mut String, forecast: &ForecastResponse) {
    let (Some(current), Some(units)) = (&forecast.current, &forecast.current_units) else {
        return;
    };

    output.push_str(&format!(
        "Now ({}):\n  Temperature: {:.1}{} (feels like {:.1}{})\n  Conditions: {}\n  Humidity: {:.0}{}\n  Wind Speed: {:.1} {}\n\n",
        current.time,
        current.temperature,
        units.temperature,
        current.apparent_temperature,
        units.temperature,
        weather_code_to_description(current.weather_code),
        current.relative_humidity,
        units.relative_humidity,
        current.wind_speed,
        units.wind_speed
    ));
}

fn push_daily(output: &mut String, forecast: &ForecastResponse, days: usize) {
    let daily = &forecast.daily;
    let available = [
        daily.time.len(),
        daily.temperature_min.len(),
        daily.temperature_max.len(),
        daily.weather_code.len(),
        daily.wind_speed_max.len(),
        daily.precipitation_sum.len(),
    ]
    .into_iter()
    .min()
    .unwrap_or(0);

    for i in 0..available.min(days) {
        output.push_str(&format!(
            "{}:\n  Temperature: {:.1}{} - {:.1}{}\n  Conditions: {}\n  Wind Speed: {:.1} {}\n  Precipitation: {:.1} {}\n\n",
            daily.time[i],
            daily.temperature_min[i],
            forecast.daily_units.temperature_max,
            daily.temperature_max[i],
            forecast.daily_units.temperature_max,
            weather_code_to_description(daily.weather_code[i]),
            daily.wind_speed_max[i],
            forecast.daily_units.wind_speed_max,
            daily.precipitation_sum[i],
            forecast.daily_units.precipitation_sum
        ));
    }
}

/// Converts WMO weather code to human-readable description
fn weather_code_to_description(code: i32) -> &'static str {
    match code {
        0 => "Clear sky",
        1 => "Mainly clear",
        2 => "Partly cloudy",
        3 => "Overcast",
        45 | 48 => "Foggy",
        51 | 53 | 55 => "Drizzle",
        56 | 57 => "Freezing drizzle",
        61 | 63 | 65 => "Rain",
        66 | 67 => "Freezing rain",
        71 | 73 | 75 => "Snow",
        77 => "Snow grains",
        80 | 81 | 82 => "Rain showers",
        85 | 86 => "Snow showers",
        95 => "Thunderstorm",
        96 | 99 => "Thunderstorm with hail",
        _ => "Unknown",
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn sample_forecast_json() -> serde_json::Value {
        serde_json::json!({
            "latitude": 40.4,
            "longitude": -3.7,
            "timezone": "Europe/Madrid",
            "current": {
                "time": "2026-10-17T12:00",
                "temperature_2m": 21.3,
                "apparent_temperature": 20.1,
                "relative_humidity_2m": 45,
                "weather_code": 2,
                "wind_speed_10m": 11.5
            },
            "current_units": {
                "temperature_2m": "°C",
                "relative_humidity_2m": "%",
                "wind_speed_10m": "km/h"
            },
            "daily": {
                "time": ["2026-10-17", "2026-10-18", "2026-10-19"],
                "temperature_2m_max": [24.0, 22.5, 19.0],
                "temperature_2m_min": [12.0, 11.5, 10.0],
                "weather_code": [2, 61, 95],
                "wind_speed_10m_max": [15.0, 20.0, 30.0],
                "precipitation_sum": [0.0, 3.2, 12.5]
            },
            "daily_units": {
                "temperature_2m_max": "°C",
                "wind_speed_10m_max": "km/h",
                "precipitation_sum": "mm"
            }
        })
    }

    fn sample_forecast() -> ForecastResponse {
        serde_json::from_value(sample_forecast_json()).unwrap()
    }

    #[test]
    fn test_report_includes_current_and_requested_days() {
        let location = Location {
            name: "Madrid".to_string(),
            latitude: 40.4,
            longitude: -3.7,
            country: Some("Spain".to_string()),
            admin1: None,
            timezone: None,
        };

        let report = format_weather_report(&location, &sample_forecast(), 2);
        assert!(report.starts_with("Weather for Madrid, Spain"));
        assert!(report.contains("Now (2026-10-17T12:00)"));
        assert!(report.contains("Partly cloudy"));
        assert!(report.contains("2026-10-18:"));
        assert!(!report.contains("2026-10-19:"));
    }

    #[test]
    fn test_forecast_without_current_block() {
        let mut json = sample_forecast_json();
        json.as_object_mut().unwrap().remove("current");
        let forecast: ForecastResponse = serde_json::from_value(json).unwrap();

        let text = format_forecast(&forecast, 7);
        assert!(!text.contains("Now ("));
        assert!(text.contains("Thunderstorm"));
    }
}
