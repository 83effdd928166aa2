use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;

use crate::constants::USER_AGENT;
use crate::error::{Result, WeatherError};
use crate::probes::ConnectivityProbe;

/// Outbound HTTP with per-call timeouts mapped onto [`WeatherError`].
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| WeatherError::Internal(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    /// Makes an HTTP GET request and deserializes the JSON response
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str, timeout: Duration) -> Result<T> {
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| map_request_error(url, timeout, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(WeatherError::Upstream {
                status: Some(status.as_u16()),
                message: format!("Request failed with status: {}", status),
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| map_request_error(url, timeout, e))
    }
}

#[async_trait]
impl ConnectivityProbe for HttpFetcher {
    async fn probe(&self, url: &str, timeout: Duration) -> Result<u16> {
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| map_request_error(url, timeout, e))?;

        Ok(response.status().as_u16())
    }
}

fn map_request_error(url: &str, timeout: Duration, e: reqwest::Error) -> WeatherError {
    if e.is_timeout() {
        WeatherError::Timeout {
            url: url.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        }
    } else if e.is_decode() {
        WeatherError::upstream(format!("malformed response: {}", e))
    } else {
        WeatherError::Upstream {
            status: e.status().map(|s| s.as_u16()),
            message: format!("request failed: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Debug, Deserialize)]
    struct Payload {
        value: i32,
    }

    #[tokio::test]
    async fn test_get_json_decodes_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "value": 7 })))
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new().unwrap();
        let payload: Payload = fetcher
            .get_json(&format!("{}/data", server.uri()), Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(payload.value, 7);
    }

    #[tokio::test]
    async fn test_non_success_status_is_upstream_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new().unwrap();
        let err = fetcher
            .get_json::<Payload>(&server.uri(), Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, WeatherError::Upstream { status: Some(503), .. }));
    }

    #[tokio::test]
    async fn test_malformed_body_is_upstream_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new().unwrap();
        let err = fetcher
            .get_json::<Payload>(&server.uri(), Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, WeatherError::Upstream { .. }));
    }

    #[tokio::test]
    async fn test_slow_upstream_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "value": 1 }))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new().unwrap();
        let err = fetcher
            .get_json::<Payload>(&server.uri(), Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, WeatherError::Timeout { timeout_ms: 50, .. }));
    }

    #[tokio::test]
    async fn test_probe_accepts_any_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new().unwrap();
        let status = fetcher
            .probe(&server.uri(), Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(status, 404);
    }

    #[tokio::test]
    async fn test_probe_rejects_unreachable_host() {
        let fetcher = HttpFetcher::new().unwrap();
        let result = fetcher
            .probe("http://127.0.0.1:9", Duration::from_secs(2))
            .await;
        assert!(result.is_err());
    }
}
