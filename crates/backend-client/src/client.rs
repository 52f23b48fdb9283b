use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use task_core::{
    AnalyzeRequest, AnalyzeResponse, PollStatus, TaskHandle, TrainChildRequest, TrainResponse,
};

use crate::error::{ClientError, ClientResult};
use crate::BackendConfig;

/// Typed wrapper over the task API endpoints.
#[derive(Clone)]
pub struct TaskApiClient {
    client: reqwest::Client,
    base_url: Url,
    analyze_timeout: Duration,
}

impl TaskApiClient {
    pub fn new(config: &BackendConfig) -> ClientResult<Self> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| ClientError::Config(format!("invalid base URL '{}': {}", config.base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(ClientError::Config(format!(
                "base URL '{}' cannot take a path",
                config.base_url
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            client,
            base_url,
            analyze_timeout: config.analyze_timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    /// `POST /analyze`
    pub async fn analyze(&self, request: &AnalyzeRequest) -> ClientResult<AnalyzeResponse> {
        tracing::debug!("POST /analyze ticker={} thread={}", request.ticker, request.thread_id);
        let response = self
            .client
            .post(self.endpoint(&["analyze"]))
            .timeout(self.analyze_timeout)
            .json(request)
            .send()
            .await
            .map_err(ClientError::from_transport)?;

        read_json(response).await
    }

    /// `POST /train-parent`
    pub async fn train_parent(&self) -> ClientResult<TrainResponse> {
        let response = self
            .client
            .post(self.endpoint(&["train-parent"]))
            .send()
            .await
            .map_err(ClientError::from_transport)?;

        read_json(response).await
    }

    /// `POST /train-child`
    pub async fn train_child(&self, ticker: &str) -> ClientResult<TrainResponse> {
        let request = TrainChildRequest {
            ticker: ticker.to_string(),
        };

        let response = self
            .client
            .post(self.endpoint(&["train-child"]))
            .json(&request)
            .send()
            .await
            .map_err(ClientError::from_transport)?;

        read_json(response).await
    }

    /// `GET /status/{task_id}`
    pub async fn status(&self, task: &TaskHandle) -> ClientResult<PollStatus> {
        let response = self
            .client
            .get(self.endpoint(&["status", task.as_str()]))
            .send()
            .await
            .map_err(ClientError::from_transport)?;

        read_json(response).await
    }

    /// `GET /health`
    pub async fn health(&self) -> ClientResult<bool> {
        let response = self
            .client
            .get(self.endpoint(&["health"]))
            .send()
            .await
            .map_err(ClientError::from_transport)?;

        Ok(response.status().is_success())
    }
}

async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> ClientResult<T> {
    let status = response.status();
    let body = response.text().await.map_err(ClientError::from_transport)?;

    if !status.is_success() {
        return Err(ClientError::Api {
            status: status.as_u16(),
            detail: error_detail(&body, status),
        });
    }

    Ok(serde_json::from_str(&body)?)
}

/// The API reports failures as `{"detail": "..."}`.
fn error_detail(body: &str, status: StatusCode) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("detail").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("Request failed")
                .to_string()
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use task_core::SessionIdentity;

    fn client(base: &str) -> TaskApiClient {
        TaskApiClient::new(&BackendConfig {
            base_url: base.to_string(),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_endpoint_paths() {
        let api = client("http://localhost:8000");
        assert_eq!(api.endpoint(&["analyze"]).as_str(), "http://localhost:8000/analyze");

        let api = client("https://example.test/api/");
        assert_eq!(
            api.endpoint(&["status", "aapl"]).as_str(),
            "https://example.test/api/status/aapl"
        );
    }

    #[test]
    fn test_task_ids_are_escaped() {
        let api = client("http://localhost:8000");
        assert_eq!(
            api.endpoint(&["status", "a/b c"]).as_str(),
            "http://localhost:8000/status/a%2Fb%20c"
        );
    }

    #[test]
    fn test_invalid_base_url_rejected() {
        let result = TaskApiClient::new(&BackendConfig {
            base_url: "not a url".to_string(),
            ..Default::default()
        });
        assert!(matches!(result, Err(ClientError::Config(_))));
    }

    #[test]
    fn test_error_detail_extraction() {
        assert_eq!(
            error_detail(r#"{"detail": "Task 'aapl' not found."}"#, StatusCode::NOT_FOUND),
            "Task 'aapl' not found."
        );
        assert_eq!(error_detail("<html>", StatusCode::BAD_GATEWAY), "Bad Gateway");
        assert_eq!(error_detail(r#"{"detail": 5}"#, StatusCode::INTERNAL_SERVER_ERROR), "Internal Server Error");
    }

    #[tokio::test]
    #[ignore] // Needs a running task API
    async fn test_analyze_live() {
        let api = TaskApiClient::new(&BackendConfig::from_env().unwrap()).unwrap();
        let request = AnalyzeRequest {
            ticker: "AAPL".to_string(),
            thread_id: SessionIdentity::generate().to_string(),
        };
        let response = api.analyze(&request).await.unwrap();
        println!("Outcome: {:?}", response.into_outcome());
    }
}
