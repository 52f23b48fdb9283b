pub mod client;
pub mod error;
pub mod provider;

pub use client::TaskApiClient;
pub use error::{ClientError, ClientResult};
pub use provider::HttpTaskBackend;

use std::time::Duration;

/// Connection settings for the task API.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub base_url: String,
    /// Deadline for training submissions and status polls.
    pub request_timeout: Duration,
    /// Deadline for `POST /analyze`, which may run the whole agent pipeline
    /// before answering.
    pub analyze_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            request_timeout: Duration::from_secs(30),
            analyze_timeout: Duration::from_secs(300),
            poll_interval: Duration::from_millis(3000),
        }
    }
}

impl BackendConfig {
    /// Read `TASK_API_URL`, `TASK_API_TIMEOUT_SECS`, `TASK_ANALYZE_TIMEOUT_SECS`
    /// and `TASK_POLL_INTERVAL_MS`, falling back to the defaults.
    pub fn from_env() -> ClientResult<Self> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        Ok(Self {
            base_url: std::env::var("TASK_API_URL").unwrap_or(defaults.base_url),
            request_timeout: Duration::from_secs(parse_setting(
                "TASK_API_TIMEOUT_SECS",
                std::env::var("TASK_API_TIMEOUT_SECS").ok(),
                defaults.request_timeout.as_secs(),
            )?),
            analyze_timeout: Duration::from_secs(parse_setting(
                "TASK_ANALYZE_TIMEOUT_SECS",
                std::env::var("TASK_ANALYZE_TIMEOUT_SECS").ok(),
                defaults.analyze_timeout.as_secs(),
            )?),
            poll_interval: Duration::from_millis(parse_setting(
                "TASK_POLL_INTERVAL_MS",
                std::env::var("TASK_POLL_INTERVAL_MS").ok(),
                defaults.poll_interval.as_millis() as u64,
            )?),
        })
    }
}

fn parse_setting(name: &str, raw: Option<String>, default: u64) -> ClientResult<u64> {
    match raw {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ClientError::Config(format!("{name} must be a whole number, got '{value}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BackendConfig::default();
        assert_eq!(config.base_url, "http://localhost:8000");
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.analyze_timeout, Duration::from_secs(300));
        assert_eq!(config.poll_interval, Duration::from_millis(3000));
    }

    #[test]
    fn test_parse_setting() {
        assert_eq!(parse_setting("X", None, 30).unwrap(), 30);
        assert_eq!(parse_setting("X", Some(" 45 ".into()), 30).unwrap(), 45);

        let err = parse_setting("TASK_API_TIMEOUT_SECS", Some("soon".into()), 30).unwrap_err();
        assert!(err.to_string().contains("TASK_API_TIMEOUT_SECS"));
    }
}
