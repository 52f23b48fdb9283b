use async_trait::async_trait;

use crate::{AnalyzeOutcome, PollStatus, SessionIdentity, TaskHandle, TaskResult, TrainOutcome, TrainingSubject};

/// Remote system that performs analysis and training jobs.
///
/// Implemented by the HTTP client in `backend-client`; tests script their own.
#[async_trait]
pub trait TaskBackend: Send + Sync {
    async fn submit_analysis(
        &self,
        ticker: &str,
        session: &SessionIdentity,
    ) -> TaskResult<AnalyzeOutcome>;

    async fn submit_training(&self, subject: &TrainingSubject) -> TaskResult<TrainOutcome>;

    async fn poll_status(&self, task: &TaskHandle) -> TaskResult<PollStatus>;

    fn backend_name(&self) -> &'static str;
}
