//! Drives analysis and training jobs against a [`TaskBackend`].
//!
//! The transition logic lives in pure machines ([`AnalysisMachine`],
//! [`TrainingMachine`]). The orchestrators here run their commands: they call
//! the backend, start and stop status polling, and publish a snapshot on every
//! transition through a `watch` channel.

pub mod machine;
mod status_poller;
pub mod training;

#[cfg(test)]
mod testing;

pub use machine::{
    AnalysisCommand, AnalysisEvent, AnalysisMachine, AnalysisPhase, AnalysisResult,
    AnalysisSnapshot, TRAINING_FAILED,
};
pub use training::{
    TrainingCommand, TrainingEvent, TrainingMachine, TrainingOrchestrator, TrainingPhase,
    TrainingSnapshot,
};

use polling_engine::{PollingEngine, DEFAULT_INTERVAL};
use status_poller::{lock, stop_watching, watch_task};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use task_core::{PollStatus, SessionIdentity, TaskBackend, TaskHandle};
use tokio::sync::watch;

struct Shared {
    backend: Arc<dyn TaskBackend>,
    machine: Mutex<AnalysisMachine>,
    poller: Mutex<PollingEngine<PollStatus>>,
    updates: watch::Sender<AnalysisSnapshot>,
}

/// Analyze-ticker workflow: submit, wait out model training, retry once the
/// model is ready.
///
/// Cheap to clone; clones share the same machine and poller.
#[derive(Clone)]
pub struct AnalysisOrchestrator {
    shared: Arc<Shared>,
}

impl AnalysisOrchestrator {
    pub fn new(backend: Arc<dyn TaskBackend>) -> Self {
        Self::with_options(backend, SessionIdentity::generate(), DEFAULT_INTERVAL)
    }

    /// Explicit session identity and training status poll interval.
    pub fn with_options(
        backend: Arc<dyn TaskBackend>,
        session: SessionIdentity,
        poll_interval: Duration,
    ) -> Self {
        let machine = AnalysisMachine::new(session);
        let (updates, _) = watch::channel(machine.snapshot());
        tracing::info!(
            "Analysis orchestrator ready (backend: {}, session: {})",
            backend.backend_name(),
            machine.session().short()
        );

        Self {
            shared: Arc::new(Shared {
                backend,
                machine: Mutex::new(machine),
                poller: Mutex::new(PollingEngine::new(poll_interval)),
                updates,
            }),
        }
    }

    pub fn session(&self) -> SessionIdentity {
        lock(&self.shared.machine).session().clone()
    }

    pub fn snapshot(&self) -> AnalysisSnapshot {
        lock(&self.shared.machine).snapshot()
    }

    /// Receives a snapshot after every transition.
    pub fn subscribe(&self) -> watch::Receiver<AnalysisSnapshot> {
        self.shared.updates.subscribe()
    }

    /// Submit a ticker. Returns once the backend answered: done, error, or
    /// training in progress (poll continues in the background).
    pub async fn analyze(&self, ticker: impl Into<String>) -> AnalysisSnapshot {
        self.drive(AnalysisEvent::Submit {
            ticker: ticker.into(),
        })
        .await;
        self.snapshot()
    }

    /// Re-submit the ticker of a failed attempt. No-op outside error.
    pub async fn retry(&self) -> AnalysisSnapshot {
        self.drive(AnalysisEvent::Retry).await;
        self.snapshot()
    }

    /// Back to idle immediately; polling stops and late responses are dropped.
    pub fn reset(&self) {
        for command in self.apply(AnalysisEvent::Reset) {
            if let AnalysisCommand::StopPolling = command {
                stop_watching(&self.shared.poller);
            }
        }
    }

    /// Wait until the workflow is idle, done or in error.
    pub async fn settled(&self) -> AnalysisSnapshot {
        let mut updates = self.subscribe();
        let settled = match updates.wait_for(|s| s.phase.is_at_rest()).await {
            Ok(snapshot) => snapshot.clone(),
            Err(_) => self.snapshot(),
        };
        settled
    }

    /// Latest training status poll failure, cleared by the next success.
    pub fn poll_error(&self) -> Option<String> {
        lock(&self.shared.poller).last_error()
    }

    pub fn is_polling(&self) -> bool {
        lock(&self.shared.poller).is_polling()
    }

    fn apply(&self, event: AnalysisEvent) -> Vec<AnalysisCommand> {
        let mut machine = lock(&self.shared.machine);
        let before = machine.phase();
        let commands = machine.dispatch(event);
        let snapshot = machine.snapshot();

        if snapshot.phase != before {
            tracing::info!(
                "Analysis {} -> {} (ticker: {})",
                before,
                snapshot.phase,
                snapshot.ticker.as_deref().unwrap_or("-")
            );
        }
        self.shared.updates.send_replace(snapshot);
        commands
    }

    async fn drive(&self, event: AnalysisEvent) {
        let mut pending = VecDeque::from([event]);

        while let Some(event) = pending.pop_front() {
            for command in self.apply(event) {
                match command {
                    AnalysisCommand::SubmitAnalysis {
                        epoch,
                        ticker,
                        session,
                    } => {
                        tracing::debug!("Submitting analysis for {} ({})", ticker, session.short());
                        let outcome = self.shared.backend.submit_analysis(&ticker, &session).await;
                        if let Err(e) = &outcome {
                            tracing::warn!("Analysis request for {} failed: {}", ticker, e);
                        }
                        pending.push_back(AnalysisEvent::Responded { epoch, outcome });
                    }
                    AnalysisCommand::StartPolling { epoch, task } => self.start_polling(epoch, task),
                    AnalysisCommand::StopPolling => {
                        stop_watching(&self.shared.poller);
                    }
                }
            }
        }
    }

    fn start_polling(&self, epoch: u64, task: TaskHandle) {
        let on_tick = {
            let weak = Arc::downgrade(&self.shared);
            move |status: &PollStatus| {
                if let Some(shared) = weak.upgrade() {
                    AnalysisOrchestrator { shared }.apply(AnalysisEvent::StatusObserved {
                        epoch,
                        status: status.clone(),
                    });
                }
            }
        };
        let on_finish = {
            let weak = Arc::downgrade(&self.shared);
            move |status: PollStatus| {
                if let Some(shared) = weak.upgrade() {
                    let orchestrator = AnalysisOrchestrator { shared };
                    tokio::spawn(async move {
                        orchestrator
                            .drive(AnalysisEvent::PollFinished { epoch, status })
                            .await;
                    });
                }
            }
        };

        tracing::info!("Waiting for model training (task: {})", task);
        watch_task(
            &self.shared.poller,
            Arc::clone(&self.shared.backend),
            task,
            on_tick,
            on_finish,
        );
    }
}
