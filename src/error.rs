//! Error types for the weather server.
//!
//! Cache misses and rate-limit denials are ordinary return values in the
//! cache and limiter; they only become a [`WeatherError`] once the request
//! path decides to surface them. Use [`WeatherError::user_message`] for
//! anything shown to the end user.

use thiserror::Error;

pub type Result<T, E = WeatherError> = std::result::Result<T, E>;

#[derive(Debug, Clone, Error)]
pub enum WeatherError {
    #[error("Location not found: {0}")]
    NotFound(String),

    #[error("Rate limit exceeded for {key}, retry after {retry_after_seconds}s")]
    RateLimited {
        key: String,
        retry_after_seconds: u64,
    },

    #[error("Request to {url} timed out after {timeout_ms}ms")]
    Timeout { url: String, timeout_ms: u64 },

    #[error("Upstream error (status {status:?}): {message}")]
    Upstream {
        status: Option<u16>,
        message: String,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl WeatherError {
    pub fn upstream(message: impl Into<String>) -> Self {
        WeatherError::Upstream {
            status: None,
            message: message.into(),
        }
    }

    /// Returns a non-technical message suitable for the tool response.
    pub fn user_message(&self) -> String {
        match self {
            WeatherError::NotFound(name) => {
                format!("No location named '{}' could be found.", name)
            }
            WeatherError::RateLimited {
                retry_after_seconds,
                ..
            } => format!(
                "Too many weather requests right now. Please try again in {} second{}.",
                retry_after_seconds,
                if *retry_after_seconds == 1 { "" } else { "s" }
            ),
            WeatherError::Timeout { .. } => {
                "The weather service took too long to respond. Please try again.".to_string()
            }
            WeatherError::Upstream {
                status: Some(status),
                ..
            } if *status >= 500 => {
                "The weather service is experiencing issues. Please try again later.".to_string()
            }
            WeatherError::Upstream { .. } => {
                "The weather service returned an unexpected response. Please try again."
                    .to_string()
            }
            WeatherError::Configuration(_) | WeatherError::Internal(_) => {
                "Something went wrong while fetching the weather. Please try again.".to_string()
            }
        }
    }

    /// Short machine-friendly name used in logs and health metadata.
    pub fn kind(&self) -> &'static str {
        match self {
            WeatherError::NotFound(_) => "not_found",
            WeatherError::RateLimited { .. } => "rate_limited",
            WeatherError::Timeout { .. } => "timeout",
            WeatherError::Upstream { .. } => "upstream",
            WeatherError::Configuration(_) => "configuration",
            WeatherError::Internal(_) => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limited_message_reports_wait() {
        let err = WeatherError::RateLimited {
            key: "tool:weather".to_string(),
            retry_after_seconds: 42,
        };
        assert!(err.user_message().contains("42 seconds"));

        let err = WeatherError::RateLimited {
            key: "tool:weather".to_string(),
            retry_after_seconds: 1,
        };
        assert!(err.user_message().ends_with("1 second."));
    }

    #[test]
    fn test_user_messages_hide_internals() {
        let err = WeatherError::Upstream {
            status: Some(503),
            message: "backend pool exhausted".to_string(),
        };
        assert!(!err.user_message().contains("backend pool"));
        assert!(err.to_string().contains("503"));

        let err = WeatherError::Internal("mutex poisoned".to_string());
        assert!(!err.user_message().contains("mutex"));
    }
}
