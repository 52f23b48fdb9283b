use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TaskError {
    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("Request timed out")]
    Timeout,

    #[error("{detail} (HTTP {status})")]
    Api { status: u16, detail: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

pub type TaskResult<T> = Result<T, TaskError>;
