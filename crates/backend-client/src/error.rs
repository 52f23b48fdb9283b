use task_core::TaskError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("Request timed out")]
    Timeout,

    #[error("{detail} (HTTP {status})")]
    Api { status: u16, detail: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

pub type ClientResult<T> = Result<T, ClientError>;

impl ClientError {
    /// Separates deadline hits from other transport failures.
    pub(crate) fn from_transport(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ClientError::Timeout
        } else {
            ClientError::RequestFailed(e)
        }
    }
}

impl From<ClientError> for TaskError {
    fn from(e: ClientError) -> Self {
        match e {
            ClientError::Timeout => TaskError::Timeout,
            ClientError::Api { status, detail } => TaskError::Api { status, detail },
            ClientError::Serialization(e) => TaskError::InvalidResponse(e.to_string()),
            ClientError::RequestFailed(e) if e.is_decode() => TaskError::InvalidResponse(e.to_string()),
            other => TaskError::Transport(other.to_string()),
        }
    }
}
