//! Transition table for the analyze-ticker workflow.
//!
//! Pure and synchronous: events go in, commands for the driver come out.
//! Every async continuation carries the epoch it was issued under; anything
//! from an older epoch is discarded, so a reset or a new submit can never be
//! overwritten by a late response.

use predictions_normalizer::normalize;
use std::fmt;
use std::sync::Arc;
use task_core::{
    estimate_progress, training_stage, AnalysisReport, AnalyzeOutcome, ForecastPoint, PollState,
    PollStatus, SessionIdentity, TaskHandle, TaskResult, COMPLETE, IN_PROGRESS_CAP,
};

pub const TRAINING_FAILED: &str = "Model training failed";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisPhase {
    Idle,
    Analyzing,
    Training,
    Retrying,
    Done,
    Error,
}

impl AnalysisPhase {
    /// Idle, done and error wait for user action.
    pub fn is_at_rest(self) -> bool {
        matches!(self, AnalysisPhase::Idle | AnalysisPhase::Done | AnalysisPhase::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AnalysisPhase::Idle => "idle",
            AnalysisPhase::Analyzing => "analyzing",
            AnalysisPhase::Training => "training",
            AnalysisPhase::Retrying => "retrying",
            AnalysisPhase::Done => "done",
            AnalysisPhase::Error => "error",
        }
    }
}

impl fmt::Display for AnalysisPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Finished analysis with its predictions already normalized.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisResult {
    pub report: AnalysisReport,
    pub forecast: Vec<ForecastPoint>,
    pub history: Vec<ForecastPoint>,
}

impl AnalysisResult {
    pub fn from_report(report: AnalysisReport) -> Self {
        let series = normalize(&report.predictions);
        Self {
            report,
            forecast: series.forecast,
            history: series.history,
        }
    }
}

#[derive(Debug, Clone)]
enum AnalysisState {
    Idle,
    Analyzing {
        ticker: String,
    },
    Training {
        ticker: String,
        task: TaskHandle,
        elapsed_seconds: f64,
    },
    Retrying {
        ticker: String,
        task: TaskHandle,
        /// Last elapsed value seen while training.
        elapsed_seconds: f64,
    },
    Done {
        ticker: String,
        result: Arc<AnalysisResult>,
    },
    Error {
        ticker: Option<String>,
        message: String,
    },
}

impl AnalysisState {
    fn phase(&self) -> AnalysisPhase {
        match self {
            AnalysisState::Idle => AnalysisPhase::Idle,
            AnalysisState::Analyzing { .. } => AnalysisPhase::Analyzing,
            AnalysisState::Training { .. } => AnalysisPhase::Training,
            AnalysisState::Retrying { .. } => AnalysisPhase::Retrying,
            AnalysisState::Done { .. } => AnalysisPhase::Done,
            AnalysisState::Error { .. } => AnalysisPhase::Error,
        }
    }

    fn ticker(&self) -> Option<&str> {
        match self {
            AnalysisState::Idle => None,
            AnalysisState::Analyzing { ticker }
            | AnalysisState::Training { ticker, .. }
            | AnalysisState::Retrying { ticker, .. }
            | AnalysisState::Done { ticker, .. } => Some(ticker),
            AnalysisState::Error { ticker, .. } => ticker.as_deref(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum AnalysisEvent {
    Submit { ticker: String },
    /// Re-submit the ticker that ended in error.
    Retry,
    Reset,
    /// Response (or transport failure) of a submit issued under `epoch`.
    Responded {
        epoch: u64,
        outcome: TaskResult<AnalyzeOutcome>,
    },
    /// Any successful status poll tick.
    StatusObserved { epoch: u64, status: PollStatus },
    /// The poll that reached a terminal status.
    PollFinished { epoch: u64, status: PollStatus },
}

#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisCommand {
    SubmitAnalysis {
        epoch: u64,
        ticker: String,
        session: SessionIdentity,
    },
    StartPolling {
        epoch: u64,
        task: TaskHandle,
    },
    StopPolling,
}

/// Read-only view of the machine for display code.
#[derive(Debug, Clone)]
pub struct AnalysisSnapshot {
    pub phase: AnalysisPhase,
    pub ticker: Option<String>,
    pub task_id: Option<TaskHandle>,
    pub elapsed_seconds: f64,
    pub progress: f64,
    pub result: Option<Arc<AnalysisResult>>,
    pub error: Option<String>,
    pub session: SessionIdentity,
}

impl AnalysisSnapshot {
    /// Training stage label while a model is being trained.
    pub fn stage(&self) -> Option<&'static str> {
        (self.phase == AnalysisPhase::Training).then(|| training_stage(self.progress))
    }
}

pub struct AnalysisMachine {
    session: SessionIdentity,
    epoch: u64,
    state: AnalysisState,
}

impl AnalysisMachine {
    pub fn new(session: SessionIdentity) -> Self {
        Self {
            session,
            epoch: 0,
            state: AnalysisState::Idle,
        }
    }

    pub fn session(&self) -> &SessionIdentity {
        &self.session
    }

    pub fn phase(&self) -> AnalysisPhase {
        self.state.phase()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn dispatch(&mut self, event: AnalysisEvent) -> Vec<AnalysisCommand> {
        match event {
            AnalysisEvent::Submit { ticker } => self.begin(ticker),
            AnalysisEvent::Retry => match &self.state {
                AnalysisState::Error {
                    ticker: Some(ticker),
                    ..
                } => {
                    let ticker = ticker.clone();
                    self.begin(ticker)
                }
                _ => {
                    tracing::debug!("Retry ignored in phase {}", self.phase());
                    Vec::new()
                }
            },
            AnalysisEvent::Reset => {
                self.epoch += 1;
                self.state = AnalysisState::Idle;
                vec![AnalysisCommand::StopPolling]
            }
            AnalysisEvent::Responded { epoch, outcome } => {
                if !self.is_current(epoch) {
                    return Vec::new();
                }
                self.on_response(outcome)
            }
            AnalysisEvent::StatusObserved { epoch, status } => {
                if self.is_current(epoch) {
                    if let (AnalysisState::Training { elapsed_seconds, .. }, Some(elapsed)) =
                        (&mut self.state, status.elapsed_seconds)
                    {
                        *elapsed_seconds = elapsed;
                    }
                }
                Vec::new()
            }
            AnalysisEvent::PollFinished { epoch, status } => {
                if !self.is_current(epoch) {
                    return Vec::new();
                }
                self.on_poll_finished(status)
            }
        }
    }

    fn is_current(&self, epoch: u64) -> bool {
        if epoch != self.epoch {
            tracing::debug!(
                "Discarding stale event from epoch {} (current {})",
                epoch,
                self.epoch
            );
            return false;
        }
        true
    }

    fn begin(&mut self, ticker: String) -> Vec<AnalysisCommand> {
        self.epoch += 1;
        let mut commands = Vec::with_capacity(2);
        if matches!(
            self.state,
            AnalysisState::Training { .. } | AnalysisState::Retrying { .. }
        ) {
            commands.push(AnalysisCommand::StopPolling);
        }

        self.state = AnalysisState::Analyzing {
            ticker: ticker.clone(),
        };
        commands.push(AnalysisCommand::SubmitAnalysis {
            epoch: self.epoch,
            ticker,
            session: self.session.clone(),
        });
        commands
    }

    fn on_response(&mut self, outcome: TaskResult<AnalyzeOutcome>) -> Vec<AnalysisCommand> {
        let ticker = match &self.state {
            AnalysisState::Analyzing { ticker } | AnalysisState::Retrying { ticker, .. } => {
                ticker.clone()
            }
            _ => return Vec::new(),
        };

        match outcome {
            Ok(AnalyzeOutcome::Completed(report)) => {
                self.state = AnalysisState::Done {
                    ticker,
                    result: Arc::new(AnalysisResult::from_report(*report)),
                };
                Vec::new()
            }
            Ok(AnalyzeOutcome::Failed { detail }) => {
                self.state = AnalysisState::Error {
                    ticker: Some(ticker),
                    message: detail,
                };
                Vec::new()
            }
            Ok(AnalyzeOutcome::TrainingRequired { task_id }) => {
                let task = task_id.unwrap_or_else(|| TaskHandle::for_ticker(&ticker));
                self.state = AnalysisState::Training {
                    ticker,
                    task: task.clone(),
                    elapsed_seconds: 0.0,
                };
                vec![AnalysisCommand::StartPolling {
                    epoch: self.epoch,
                    task,
                }]
            }
            Err(e) => {
                self.state = AnalysisState::Error {
                    ticker: Some(ticker),
                    message: e.to_string(),
                };
                Vec::new()
            }
        }
    }

    fn on_poll_finished(&mut self, status: PollStatus) -> Vec<AnalysisCommand> {
        let AnalysisState::Training {
            ticker,
            task,
            elapsed_seconds,
        } = &self.state
        else {
            return Vec::new();
        };
        let (ticker, task, elapsed_seconds) = (ticker.clone(), task.clone(), *elapsed_seconds);

        match status.status {
            PollState::Completed => {
                self.state = AnalysisState::Retrying {
                    ticker: ticker.clone(),
                    task,
                    elapsed_seconds,
                };
                vec![
                    AnalysisCommand::StopPolling,
                    AnalysisCommand::SubmitAnalysis {
                        epoch: self.epoch,
                        ticker,
                        session: self.session.clone(),
                    },
                ]
            }
            PollState::Failed => {
                self.state = AnalysisState::Error {
                    ticker: Some(ticker),
                    message: TRAINING_FAILED.to_string(),
                };
                vec![AnalysisCommand::StopPolling]
            }
            PollState::Running => Vec::new(),
        }
    }

    pub fn snapshot(&self) -> AnalysisSnapshot {
        let (task_id, elapsed_seconds, progress) = match &self.state {
            AnalysisState::Training {
                task,
                elapsed_seconds,
                ..
            } => (
                Some(task.clone()),
                *elapsed_seconds,
                estimate_progress(*elapsed_seconds),
            ),
            AnalysisState::Retrying {
                task,
                elapsed_seconds,
                ..
            } => (Some(task.clone()), *elapsed_seconds, IN_PROGRESS_CAP),
            AnalysisState::Done { .. } => (None, 0.0, COMPLETE),
            _ => (None, 0.0, 0.0),
        };

        AnalysisSnapshot {
            phase: self.phase(),
            ticker: self.state.ticker().map(str::to_string),
            task_id,
            elapsed_seconds,
            progress,
            result: match &self.state {
                AnalysisState::Done { result, .. } => Some(Arc::clone(result)),
                _ => None,
            },
            error: match &self.state {
                AnalysisState::Error { message, .. } => Some(message.clone()),
                _ => None,
            },
            session: self.session.clone(),
        }
    }
}
