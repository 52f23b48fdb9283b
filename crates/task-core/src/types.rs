use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Task id assigned to the parent (global) model training job.
pub const PARENT_TASK_ID: &str = "parent_training";

/// Opaque identifier of a backend-tracked job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskHandle(String);

impl TaskHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fallback used when the backend does not hand back a task id.
    pub fn for_ticker(ticker: &str) -> Self {
        Self(ticker.trim().to_lowercase())
    }

    pub fn parent() -> Self {
        Self(PARENT_TASK_ID.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Correlation token shared by an analysis attempt and its automatic retry,
/// so the backend can resume the same conversation thread.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionIdentity(String);

impl SessionIdentity {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 8 characters, for display.
    pub fn short(&self) -> &str {
        match self.0.char_indices().nth(8) {
            Some((idx, _)) => &self.0[..idx],
            None => &self.0,
        }
    }
}

impl From<String> for SessionIdentity {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for SessionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PollState {
    Running,
    Completed,
    Failed,
}

/// One status probe result from `GET /status/{task_id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollStatus {
    pub status: PollState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elapsed_seconds: Option<f64>,
    /// Everything else the backend sent (task_id, result, error, timestamps).
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl PollStatus {
    pub fn running(elapsed_seconds: f64) -> Self {
        Self {
            status: PollState::Running,
            elapsed_seconds: Some(elapsed_seconds),
            payload: Map::new(),
        }
    }

    pub fn completed() -> Self {
        Self {
            status: PollState::Completed,
            elapsed_seconds: None,
            payload: Map::new(),
        }
    }

    pub fn failed() -> Self {
        Self {
            status: PollState::Failed,
            elapsed_seconds: None,
            payload: Map::new(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, PollState::Completed | PollState::Failed)
    }

    /// Backend error text attached to a failed status, if any.
    pub fn error_detail(&self) -> Option<&str> {
        self.payload.get("error").and_then(Value::as_str)
    }
}

/// Canonical chart point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    pub date: String,
    pub close: f64,
}

impl ForecastPoint {
    pub fn new(date: impl Into<String>, close: f64) -> Self {
        Self {
            date: date.into(),
            close,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalyzeRequest {
    pub ticker: String,
    pub thread_id: String,
}

/// Finished analysis as returned by `POST /analyze`.
///
/// Scalar fields are passed through untouched; `predictions` is left as raw
/// JSON for the normalizer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    #[serde(default)]
    pub ticker: Option<String>,
    #[serde(default)]
    pub report: Option<String>,
    #[serde(default)]
    pub final_report: Option<String>,
    #[serde(default)]
    pub recommendation: Option<Value>,
    #[serde(default)]
    pub confidence: Option<Value>,
    #[serde(default)]
    pub predictions: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AnalysisReport {
    /// `report`, else `final_report`, else empty.
    pub fn report_text(&self) -> &str {
        self.report
            .as_deref()
            .or(self.final_report.as_deref())
            .unwrap_or("")
    }

    pub fn recommendation_text(&self) -> String {
        scalar_text(self.recommendation.as_ref())
    }

    pub fn confidence_text(&self) -> String {
        scalar_text(self.confidence.as_ref())
    }
}

fn scalar_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => "N/A".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Raw body of `POST /analyze` before classification.
#[derive(Debug, Clone, Deserialize)]
pub struct AnalyzeResponse {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub detail: Option<String>,
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(flatten)]
    pub report: AnalysisReport,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AnalyzeOutcome {
    Completed(Box<AnalysisReport>),
    Failed { detail: String },
    /// The ticker has no trained model yet; the backend started training it.
    TrainingRequired { task_id: Option<TaskHandle> },
}

impl AnalyzeResponse {
    pub fn into_outcome(self) -> AnalyzeOutcome {
        match self.status.as_deref() {
            Some("training") => AnalyzeOutcome::TrainingRequired {
                task_id: self.task_id.map(TaskHandle::new),
            },
            Some("error") => AnalyzeOutcome::Failed {
                detail: self.detail.unwrap_or_else(|| "Analysis failed".to_string()),
            },
            _ => AnalyzeOutcome::Completed(Box::new(self.report)),
        }
    }
}

/// What a training request is for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrainingSubject {
    /// The parent (global market) model.
    Parent,
    Ticker(String),
}

impl TrainingSubject {
    pub fn fallback_handle(&self) -> TaskHandle {
        match self {
            TrainingSubject::Parent => TaskHandle::parent(),
            TrainingSubject::Ticker(ticker) => TaskHandle::for_ticker(ticker),
        }
    }
}

impl fmt::Display for TrainingSubject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrainingSubject::Parent => f.write_str("parent"),
            TrainingSubject::Ticker(ticker) => f.write_str(ticker),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TrainChildRequest {
    pub ticker: String,
}

/// Raw body of `POST /train-parent` and `POST /train-child`.
#[derive(Debug, Clone, Deserialize)]
pub struct TrainResponse {
    pub status: String,
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TrainOutcome {
    /// Model already exists; nothing to wait for.
    AlreadyCompleted,
    /// Training started or was already running.
    Started { task_id: Option<TaskHandle> },
}

impl TrainResponse {
    pub fn into_outcome(self) -> TrainOutcome {
        if self.status == "completed" {
            TrainOutcome::AlreadyCompleted
        } else {
            TrainOutcome::Started {
                task_id: self.task_id.map(TaskHandle::new),
            }
        }
    }
}
