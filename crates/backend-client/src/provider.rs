use async_trait::async_trait;
use task_core::{
    AnalyzeOutcome, AnalyzeRequest, PollStatus, SessionIdentity, TaskBackend, TaskHandle,
    TaskResult, TrainOutcome, TrainingSubject,
};

use crate::client::TaskApiClient;
use crate::error::ClientResult;
use crate::BackendConfig;

/// `TaskBackend` over the HTTP task API.
#[derive(Clone)]
pub struct HttpTaskBackend {
    client: TaskApiClient,
}

impl HttpTaskBackend {
    pub fn new(client: TaskApiClient) -> Self {
        Self { client }
    }

    pub fn from_config(config: &BackendConfig) -> ClientResult<Self> {
        Ok(Self::new(TaskApiClient::new(config)?))
    }

    pub fn client(&self) -> &TaskApiClient {
        &self.client
    }
}

impl From<TaskApiClient> for HttpTaskBackend {
    fn from(client: TaskApiClient) -> Self {
        Self::new(client)
    }
}

#[async_trait]
impl TaskBackend for HttpTaskBackend {
    async fn submit_analysis(
        &self,
        ticker: &str,
        session: &SessionIdentity,
    ) -> TaskResult<AnalyzeOutcome> {
        let request = AnalyzeRequest {
            ticker: ticker.to_string(),
            thread_id: session.to_string(),
        };
        let response = self.client.analyze(&request).await?;
        Ok(response.into_outcome())
    }

    async fn submit_training(&self, subject: &TrainingSubject) -> TaskResult<TrainOutcome> {
        let response = match subject {
            TrainingSubject::Parent => self.client.train_parent().await?,
            TrainingSubject::Ticker(ticker) => self.client.train_child(ticker).await?,
        };
        Ok(response.into_outcome())
    }

    async fn poll_status(&self, task: &TaskHandle) -> TaskResult<PollStatus> {
        Ok(self.client.status(task).await?)
    }

    fn backend_name(&self) -> &'static str {
        "http"
    }
}
