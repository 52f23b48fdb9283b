//! Explicit model training: the parent model or one ticker's child model.

use polling_engine::{PollingEngine, DEFAULT_INTERVAL};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use task_core::{
    estimate_progress, training_stage, PollState, PollStatus, TaskBackend, TaskHandle,
    TaskResult, TrainOutcome, TrainingSubject, COMPLETE,
};
use tokio::sync::watch;

use crate::status_poller::{lock, stop_watching, watch_task};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainingPhase {
    Idle,
    Running,
    Completed,
    Failed,
}

impl TrainingPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            TrainingPhase::Idle => "idle",
            TrainingPhase::Running => "running",
            TrainingPhase::Completed => "completed",
            TrainingPhase::Failed => "failed",
        }
    }
}

impl fmt::Display for TrainingPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn starting_message(subject: &TrainingSubject) -> String {
    match subject {
        TrainingSubject::Parent => "Starting parent training...".to_string(),
        TrainingSubject::Ticker(ticker) => format!("Starting training for {ticker}..."),
    }
}

fn already_trained_message(subject: &TrainingSubject) -> String {
    match subject {
        TrainingSubject::Parent => "Parent model already trained".to_string(),
        TrainingSubject::Ticker(ticker) => format!("{ticker} model already trained"),
    }
}

#[derive(Debug, Clone)]
enum TrainingState {
    Idle,
    Running {
        subject: TrainingSubject,
        task: TaskHandle,
        elapsed_seconds: f64,
    },
    Completed {
        subject: TrainingSubject,
    },
    Failed {
        subject: TrainingSubject,
    },
}

#[derive(Debug, Clone)]
pub enum TrainingEvent {
    Submit {
        subject: TrainingSubject,
    },
    Reset,
    Responded {
        epoch: u64,
        outcome: TaskResult<TrainOutcome>,
    },
    StatusObserved {
        epoch: u64,
        status: PollStatus,
    },
    PollFinished {
        epoch: u64,
        status: PollStatus,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum TrainingCommand {
    SubmitTraining {
        epoch: u64,
        subject: TrainingSubject,
    },
    StartPolling {
        epoch: u64,
        task: TaskHandle,
    },
    StopPolling,
}

#[derive(Debug, Clone)]
pub struct TrainingSnapshot {
    pub phase: TrainingPhase,
    pub subject: Option<TrainingSubject>,
    pub task_id: Option<TaskHandle>,
    pub elapsed_seconds: f64,
    pub progress: f64,
    pub message: String,
    /// A training request is in flight and has not been answered yet.
    pub submitting: bool,
}

impl TrainingSnapshot {
    pub fn is_at_rest(&self) -> bool {
        match self.phase {
            TrainingPhase::Idle => !self.submitting,
            TrainingPhase::Running => false,
            TrainingPhase::Completed | TrainingPhase::Failed => true,
        }
    }

    pub fn stage(&self) -> Option<&'static str> {
        (self.phase == TrainingPhase::Running).then(|| training_stage(self.progress))
    }
}

/// Stays idle while the submit is in flight; the backend's answer decides
/// between running and completed.
pub struct TrainingMachine {
    state: TrainingState,
    epoch: u64,
    message: String,
    pending: Option<TrainingSubject>,
}

impl Default for TrainingMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl TrainingMachine {
    pub fn new() -> Self {
        Self {
            state: TrainingState::Idle,
            epoch: 0,
            message: String::new(),
            pending: None,
        }
    }

    pub fn phase(&self) -> TrainingPhase {
        match self.state {
            TrainingState::Idle => TrainingPhase::Idle,
            TrainingState::Running { .. } => TrainingPhase::Running,
            TrainingState::Completed { .. } => TrainingPhase::Completed,
            TrainingState::Failed { .. } => TrainingPhase::Failed,
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn dispatch(&mut self, event: TrainingEvent) -> Vec<TrainingCommand> {
        match event {
            TrainingEvent::Submit { subject } => {
                self.epoch += 1;
                let mut commands = Vec::with_capacity(2);
                if matches!(self.state, TrainingState::Running { .. }) {
                    commands.push(TrainingCommand::StopPolling);
                }
                self.state = TrainingState::Idle;
                self.message = starting_message(&subject);
                self.pending = Some(subject.clone());
                commands.push(TrainingCommand::SubmitTraining {
                    epoch: self.epoch,
                    subject,
                });
                commands
            }
            TrainingEvent::Reset => {
                self.epoch += 1;
                self.state = TrainingState::Idle;
                self.message.clear();
                self.pending = None;
                vec![TrainingCommand::StopPolling]
            }
            TrainingEvent::Responded { epoch, outcome } => {
                if !self.is_current(epoch) {
                    return Vec::new();
                }
                match self.pending.take() {
                    Some(subject) => self.on_response(subject, outcome),
                    None => Vec::new(),
                }
            }
            TrainingEvent::StatusObserved { epoch, status } => {
                if self.is_current(epoch) {
                    if let (TrainingState::Running { elapsed_seconds, .. }, Some(elapsed)) =
                        (&mut self.state, status.elapsed_seconds)
                    {
                        *elapsed_seconds = elapsed;
                    }
                }
                Vec::new()
            }
            TrainingEvent::PollFinished { epoch, status } => {
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
                "Discarding stale training event from epoch {} (current {})",
                epoch,
                self.epoch
            );
            return false;
        }
        true
    }

    fn on_response(
        &mut self,
        subject: TrainingSubject,
        outcome: TaskResult<TrainOutcome>,
    ) -> Vec<TrainingCommand> {
        match outcome {
            Ok(TrainOutcome::AlreadyCompleted) => {
                self.message = already_trained_message(&subject);
                self.state = TrainingState::Completed { subject };
                Vec::new()
            }
            Ok(TrainOutcome::Started { task_id }) => {
                let task = task_id.unwrap_or_else(|| subject.fallback_handle());
                self.state = TrainingState::Running {
                    subject,
                    task: task.clone(),
                    elapsed_seconds: 0.0,
                };
                vec![TrainingCommand::StartPolling {
                    epoch: self.epoch,
                    task,
                }]
            }
            Err(e) => {
                self.message = e.to_string();
                self.state = TrainingState::Failed { subject };
                Vec::new()
            }
        }
    }

    fn on_poll_finished(&mut self, status: PollStatus) -> Vec<TrainingCommand> {
        let TrainingState::Running { subject, .. } = &self.state else {
            return Vec::new();
        };
        let subject = subject.clone();

        match status.status {
            PollState::Completed => {
                self.message = "Training complete".to_string();
                self.state = TrainingState::Completed { subject };
            }
            PollState::Failed => {
                self.message = match status.error_detail() {
                    Some(detail) => format!("Training failed: {detail}"),
                    None => "Training failed".to_string(),
                };
                self.state = TrainingState::Failed { subject };
            }
            PollState::Running => return Vec::new(),
        }
        vec![TrainingCommand::StopPolling]
    }

    pub fn snapshot(&self) -> TrainingSnapshot {
        let (subject, task_id, elapsed_seconds, progress) = match &self.state {
            TrainingState::Idle => (self.pending.clone(), None, 0.0, 0.0),
            TrainingState::Running {
                subject,
                task,
                elapsed_seconds,
            } => (
                Some(subject.clone()),
                Some(task.clone()),
                *elapsed_seconds,
                estimate_progress(*elapsed_seconds),
            ),
            TrainingState::Completed { subject } => (Some(subject.clone()), None, 0.0, COMPLETE),
            TrainingState::Failed { subject } => (Some(subject.clone()), None, 0.0, 0.0),
        };

        TrainingSnapshot {
            phase: self.phase(),
            subject,
            task_id,
            elapsed_seconds,
            progress,
            message: self.message.clone(),
            submitting: self.pending.is_some(),
        }
    }
}

struct Shared {
    backend: Arc<dyn TaskBackend>,
    machine: Mutex<TrainingMachine>,
    poller: Mutex<PollingEngine<PollStatus>>,
    updates: watch::Sender<TrainingSnapshot>,
}

/// Starts parent or child model training and follows it to completion.
#[derive(Clone)]
pub struct TrainingOrchestrator {
    shared: Arc<Shared>,
}

impl TrainingOrchestrator {
    pub fn new(backend: Arc<dyn TaskBackend>) -> Self {
        Self::with_poll_interval(backend, DEFAULT_INTERVAL)
    }

    pub fn with_poll_interval(backend: Arc<dyn TaskBackend>, poll_interval: Duration) -> Self {
        let machine = TrainingMachine::new();
        let (updates, _) = watch::channel(machine.snapshot());

        Self {
            shared: Arc::new(Shared {
                backend,
                machine: Mutex::new(machine),
                poller: Mutex::new(PollingEngine::new(poll_interval)),
                updates,
            }),
        }
    }

    pub fn snapshot(&self) -> TrainingSnapshot {
        lock(&self.shared.machine).snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<TrainingSnapshot> {
        self.shared.updates.subscribe()
    }

    pub async fn train_parent(&self) -> TrainingSnapshot {
        self.train(TrainingSubject::Parent).await
    }

    pub async fn train_child(&self, ticker: impl Into<String>) -> TrainingSnapshot {
        self.train(TrainingSubject::Ticker(ticker.into())).await
    }

    /// Returns once the backend answered the training request.
    pub async fn train(&self, subject: TrainingSubject) -> TrainingSnapshot {
        self.drive(TrainingEvent::Submit { subject }).await;
        self.snapshot()
    }

    pub fn reset(&self) {
        for command in self.apply(TrainingEvent::Reset) {
            if let TrainingCommand::StopPolling = command {
                stop_watching(&self.shared.poller);
            }
        }
    }

    /// Wait until training completed or failed, or nothing is pending.
    pub async fn settled(&self) -> TrainingSnapshot {
        let mut updates = self.subscribe();
        let settled = match updates.wait_for(TrainingSnapshot::is_at_rest).await {
            Ok(snapshot) => snapshot.clone(),
            Err(_) => self.snapshot(),
        };
        settled
    }

    pub fn poll_error(&self) -> Option<String> {
        lock(&self.shared.poller).last_error()
    }

    pub fn is_polling(&self) -> bool {
        lock(&self.shared.poller).is_polling()
    }

    fn apply(&self, event: TrainingEvent) -> Vec<TrainingCommand> {
        let mut machine = lock(&self.shared.machine);
        let before = machine.phase();
        let commands = machine.dispatch(event);
        let snapshot = machine.snapshot();

        if snapshot.phase != before {
            tracing::info!("Training {} -> {}: {}", before, snapshot.phase, snapshot.message);
        }
        self.shared.updates.send_replace(snapshot);
        commands
    }

    async fn drive(&self, event: TrainingEvent) {
        let mut pending = VecDeque::from([event]);

        while let Some(event) = pending.pop_front() {
            for command in self.apply(event) {
                match command {
                    TrainingCommand::SubmitTraining { epoch, subject } => {
                        tracing::info!("Requesting training for {}", subject);
                        let outcome = self.shared.backend.submit_training(&subject).await;
                        if let Err(e) = &outcome {
                            tracing::warn!("Training request for {} failed: {}", subject, e);
                        }
                        pending.push_back(TrainingEvent::Responded { epoch, outcome });
                    }
                    TrainingCommand::StartPolling { epoch, task } => self.start_polling(epoch, task),
                    TrainingCommand::StopPolling => {
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
                    TrainingOrchestrator { shared }.apply(TrainingEvent::StatusObserved {
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
                    let orchestrator = TrainingOrchestrator { shared };
                    tokio::spawn(async move {
                        orchestrator
                            .drive(TrainingEvent::PollFinished { epoch, status })
                            .await;
                    });
                }
            }
        };

        watch_task(
            &self.shared.poller,
            Arc::clone(&self.shared.backend),
            task,
            on_tick,
            on_finish,
        );
    }
}
