use polling_engine::PollingEngine;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use task_core::{PollStatus, TaskBackend, TaskError, TaskHandle};

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Poll `GET /status/{task}` until it reports completed or failed.
///
/// `on_tick` sees every successful status; `on_finish` gets the terminal one.
pub(crate) fn watch_task<O, F>(
    engine: &Mutex<PollingEngine<PollStatus>>,
    backend: Arc<dyn TaskBackend>,
    task: TaskHandle,
    on_tick: O,
    on_finish: F,
) -> bool
where
    O: Fn(&PollStatus) + Send + Sync + 'static,
    F: FnOnce(PollStatus) + Send + 'static,
{
    let key = task.to_string();
    let on_tick = Arc::new(on_tick);

    let probe = move || {
        let backend = Arc::clone(&backend);
        let task = task.clone();
        let on_tick = Arc::clone(&on_tick);
        async move {
            let status = backend.poll_status(&task).await?;
            tracing::debug!(
                "Task {} is {:?} ({:?}s)",
                task,
                status.status,
                status.elapsed_seconds
            );
            on_tick(&status);
            Ok::<_, TaskError>(status)
        }
    };

    lock(engine).activate_with(key, probe, PollStatus::is_terminal, on_finish)
}

pub(crate) fn stop_watching(engine: &Mutex<PollingEngine<PollStatus>>) -> bool {
    lock(engine).deactivate()
}
