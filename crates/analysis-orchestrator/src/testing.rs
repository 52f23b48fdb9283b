//! Scripted in-memory backend for orchestrator tests.

use async_trait::async_trait;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use task_core::{
    AnalysisReport, AnalyzeOutcome, PollStatus, SessionIdentity, TaskBackend, TaskError,
    TaskHandle, TaskResult, TrainOutcome, TrainingSubject,
};

use crate::status_poller::lock;

#[derive(Default)]
pub(crate) struct ScriptedBackend {
    analyses: Mutex<VecDeque<TaskResult<AnalyzeOutcome>>>,
    trainings: Mutex<VecDeque<TaskResult<TrainOutcome>>>,
    statuses: Mutex<VecDeque<TaskResult<PollStatus>>>,
    analyze_calls: Mutex<Vec<(String, SessionIdentity)>>,
    training_calls: Mutex<Vec<TrainingSubject>>,
    status_calls: Mutex<Vec<TaskHandle>>,
    analyze_delay: Duration,
    training_delay: Duration,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_analyze_delay(mut self, delay: Duration) -> Self {
        self.analyze_delay = delay;
        self
    }

    pub fn with_training_delay(mut self, delay: Duration) -> Self {
        self.training_delay = delay;
        self
    }

    pub fn push_analysis(&self, outcome: TaskResult<AnalyzeOutcome>) {
        lock(&self.analyses).push_back(outcome);
    }

    pub fn push_training(&self, outcome: TaskResult<TrainOutcome>) {
        lock(&self.trainings).push_back(outcome);
    }

    pub fn push_status(&self, status: TaskResult<PollStatus>) {
        lock(&self.statuses).push_back(status);
    }

    pub fn analyze_calls(&self) -> Vec<(String, SessionIdentity)> {
        lock(&self.analyze_calls).clone()
    }

    pub fn training_calls(&self) -> Vec<TrainingSubject> {
        lock(&self.training_calls).clone()
    }

    pub fn status_calls(&self) -> Vec<TaskHandle> {
        lock(&self.status_calls).clone()
    }
}

fn unscripted(what: &str) -> TaskError {
    TaskError::Transport(format!("no scripted {what}"))
}

#[async_trait]
impl TaskBackend for ScriptedBackend {
    async fn submit_analysis(
        &self,
        ticker: &str,
        session: &SessionIdentity,
    ) -> TaskResult<AnalyzeOutcome> {
        lock(&self.analyze_calls).push((ticker.to_string(), session.clone()));
        if !self.analyze_delay.is_zero() {
            tokio::time::sleep(self.analyze_delay).await;
        }
        let next = lock(&self.analyses).pop_front();
        next.unwrap_or_else(|| Err(unscripted("analysis")))
    }

    async fn submit_training(&self, subject: &TrainingSubject) -> TaskResult<TrainOutcome> {
        lock(&self.training_calls).push(subject.clone());
        if !self.training_delay.is_zero() {
            tokio::time::sleep(self.training_delay).await;
        }
        let next = lock(&self.trainings).pop_front();
        next.unwrap_or_else(|| Err(unscripted("training")))
    }

    async fn poll_status(&self, task: &TaskHandle) -> TaskResult<PollStatus> {
        lock(&self.status_calls).push(task.clone());
        let next = lock(&self.statuses).pop_front();
        next.unwrap_or_else(|| Err(unscripted("status")))
    }

    fn backend_name(&self) -> &'static str {
        "scripted"
    }
}

pub(crate) fn report_with_forecast() -> AnalyzeOutcome {
    AnalyzeOutcome::Completed(Box::new(AnalysisReport {
        ticker: Some("AAPL".into()),
        report: Some("Momentum is strong.".into()),
        recommendation: Some(json!("BUY")),
        confidence: Some(json!(0.82)),
        predictions: json!({
            "forecast": [
                {"date": "2025-01-06", "close": 151.2},
                {"date": "2025-01-07", "close": "152.40"}
            ],
            "history": [{"date": "2025-01-03", "close": 149.9}]
        }),
        ..Default::default()
    }))
}
