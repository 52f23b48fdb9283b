//! Interval polling of an async probe until a stop predicate matches.
//!
//! A [`PollingEngine`] owns at most one live poll loop. Each activation probes
//! immediately, then once per interval. Probe failures are recorded and the
//! loop carries on; only the stop predicate ends an activation, after which
//! the completion callback runs exactly once.

use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Status poll cadence used when callers don't pick one.
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(3000);

type OnStop<T> = Box<dyn FnOnce(T) + Send>;

struct Observed<T> {
    latest: Option<T>,
    error: Option<String>,
    ticks: u64,
}

impl<T> Default for Observed<T> {
    fn default() -> Self {
        Self {
            latest: None,
            error: None,
            ticks: 0,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Owns one running poll loop. `stop` is idempotent; dropping the handle
/// also cancels the loop.
pub struct PollHandle {
    stopped: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl PollHandle {
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.task.abort();
    }

    /// True once stopped explicitly or by the stop predicate.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst) || self.task.is_finished()
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn spawn_poller<T, P, Fut, E, S>(
    interval: Duration,
    observed: Arc<Mutex<Observed<T>>>,
    mut probe: P,
    should_stop: S,
    mut on_stop: Option<OnStop<T>>,
) -> PollHandle
where
    T: Clone + Send + 'static,
    P: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    E: Display + Send,
    S: Fn(&T) -> bool + Send + 'static,
{
    let stopped = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&stopped);

    let task = tokio::spawn(async move {
        // tokio rejects a zero period
        let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if flag.load(Ordering::SeqCst) {
                break;
            }

            let outcome = probe().await;
            if flag.load(Ordering::SeqCst) {
                break;
            }

            match outcome {
                Ok(value) => {
                    let finished = should_stop(&value);
                    {
                        let mut state = lock(&observed);
                        state.ticks += 1;
                        state.latest = Some(value.clone());
                        state.error = None;
                    }
                    if finished {
                        flag.store(true, Ordering::SeqCst);
                        tracing::debug!("Stop condition reached, polling finished");
                        if let Some(callback) = on_stop.take() {
                            callback(value);
                        }
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!("Poll probe failed, retrying next tick: {}", e);
                    let mut state = lock(&observed);
                    state.ticks += 1;
                    state.error = Some(e.to_string());
                }
            }
        }
    });

    PollHandle { stopped, task }
}

struct Activation {
    key: String,
    handle: PollHandle,
}

/// Repeatedly runs a probe while enabled.
///
/// `activate` enables the engine for a watched key; `deactivate` disables it.
/// The latest probe value and the last probe error stay readable between
/// ticks.
pub struct PollingEngine<T> {
    interval: Duration,
    observed: Arc<Mutex<Observed<T>>>,
    active: Option<Activation>,
}

impl<T> PollingEngine<T>
where
    T: Clone + Send + 'static,
{
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            observed: Arc::new(Mutex::new(Observed::default())),
            active: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Enable polling of `key` without a completion callback.
    pub fn activate<P, Fut, E, S>(&mut self, key: impl Into<String>, probe: P, should_stop: S) -> bool
    where
        P: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Display + Send,
        S: Fn(&T) -> bool + Send + 'static,
    {
        self.start(key.into(), probe, should_stop, None)
    }

    /// Enable polling of `key`; `on_stop` receives the value that satisfied
    /// `should_stop`.
    pub fn activate_with<P, Fut, E, S, C>(
        &mut self,
        key: impl Into<String>,
        probe: P,
        should_stop: S,
        on_stop: C,
    ) -> bool
    where
        P: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Display + Send,
        S: Fn(&T) -> bool + Send + 'static,
        C: FnOnce(T) + Send + 'static,
    {
        self.start(key.into(), probe, should_stop, Some(Box::new(on_stop)))
    }

    /// Returns false when already enabled for the same key; a finished
    /// activation stays finished until `deactivate`.
    fn start<P, Fut, E, S>(
        &mut self,
        key: String,
        probe: P,
        should_stop: S,
        on_stop: Option<OnStop<T>>,
    ) -> bool
    where
        P: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Display + Send,
        S: Fn(&T) -> bool + Send + 'static,
    {
        if self.active.as_ref().is_some_and(|a| a.key == key) {
            return false;
        }
        self.deactivate();

        *lock(&self.observed) = Observed::default();
        tracing::debug!("Polling '{}' every {:?}", key, self.interval);

        let handle = spawn_poller(
            self.interval,
            Arc::clone(&self.observed),
            probe,
            should_stop,
            on_stop,
        );
        self.active = Some(Activation { key, handle });
        true
    }

    /// Cancel the live loop, if any. A later `activate` starts over with an
    /// immediate probe.
    pub fn deactivate(&mut self) -> bool {
        match self.active.take() {
            Some(activation) => {
                activation.handle.stop();
                tracing::debug!("Stopped polling '{}'", activation.key);
                true
            }
            None => false,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.active.is_some()
    }

    /// Enabled and not yet stopped by the predicate.
    pub fn is_polling(&self) -> bool {
        self.active.as_ref().is_some_and(|a| !a.handle.is_stopped())
    }

    pub fn watched(&self) -> Option<&str> {
        self.active.as_ref().map(|a| a.key.as_str())
    }

    pub fn latest(&self) -> Option<T> {
        lock(&self.observed).latest.clone()
    }

    pub fn last_error(&self) -> Option<String> {
        lock(&self.observed).error.clone()
    }

    /// Probes completed (successfully or not) in the current activation.
    pub fn ticks(&self) -> u64 {
        lock(&self.observed).ticks
    }
}

impl<T> Default for PollingEngine<T>
where
    T: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new(DEFAULT_INTERVAL)
    }
}

impl<T> Drop for PollingEngine<T> {
    fn drop(&mut self) {
        if let Some(activation) = self.active.take() {
            activation.handle.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use tokio::time::sleep;

    const INTERVAL: Duration = Duration::from_millis(3000);

    fn counting_probe(
        calls: &Arc<AtomicU32>,
    ) -> impl FnMut() -> std::future::Ready<Result<u32, String>> + Send + 'static {
        let calls = Arc::clone(calls);
        move || std::future::ready(Ok(calls.fetch_add(1, Ordering::SeqCst) + 1))
    }

    #[tokio::test(start_paused = true)]
    async fn test_probes_immediately_then_on_interval() {
        let calls = Arc::new(AtomicU32::new(0));
        let mut engine = PollingEngine::new(INTERVAL);
        assert!(engine.activate("aapl", counting_probe(&calls), |_| false));

        sleep(Duration::from_millis(1)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(engine.latest(), Some(1));

        sleep(INTERVAL).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        sleep(INTERVAL).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(engine.ticks(), 3);
        assert!(engine.is_polling());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_predicate_ends_polling_and_calls_back_once() {
        let calls = Arc::new(AtomicU32::new(0));
        let stops = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&stops);

        let mut engine = PollingEngine::new(INTERVAL);
        engine.activate_with(
            "aapl",
            counting_probe(&calls),
            |n| *n >= 3,
            move |n| seen.lock().unwrap().push(n),
        );

        sleep(INTERVAL * 10).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(*stops.lock().unwrap(), vec![3]);
        assert_eq!(engine.latest(), Some(3));
        assert!(engine.is_enabled());
        assert!(!engine.is_polling());

        // Still enabled for the same key: no new loop.
        assert!(!engine.activate("aapl", counting_probe(&calls), |_| false));
        sleep(INTERVAL * 3).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_error_does_not_stop_polling() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let probe = move || {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            std::future::ready(if n == 2 {
                Err("connection reset".to_string())
            } else {
                Ok(n)
            })
        };

        let mut engine = PollingEngine::new(INTERVAL);
        engine.activate("msft", probe, |_| false);

        sleep(Duration::from_millis(1)).await;
        assert_eq!(engine.latest(), Some(1));
        assert_eq!(engine.last_error(), None);

        sleep(INTERVAL).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(engine.last_error().as_deref(), Some("connection reset"));
        assert_eq!(engine.latest(), Some(1));

        sleep(INTERVAL).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(engine.last_error(), None);
        assert_eq!(engine.latest(), Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disable_stops_and_reenable_starts_fresh() {
        let calls = Arc::new(AtomicU32::new(0));
        let mut engine = PollingEngine::new(INTERVAL);
        engine.activate("nvda", counting_probe(&calls), |_| false);

        sleep(INTERVAL + Duration::from_millis(1)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        assert!(engine.deactivate());
        assert!(!engine.deactivate());
        assert!(!engine.is_enabled());
        sleep(INTERVAL * 5).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        assert!(engine.activate("nvda", counting_probe(&calls), |_| false));
        sleep(Duration::from_millis(1)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(engine.ticks(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_key_replaces_previous_loop() {
        let first = Arc::new(AtomicU32::new(0));
        let second = Arc::new(AtomicU32::new(0));
        let mut engine = PollingEngine::new(INTERVAL);

        engine.activate("aapl", counting_probe(&first), |_| false);
        sleep(Duration::from_millis(1)).await;

        assert!(engine.activate("msft", counting_probe(&second), |_| false));
        assert_eq!(engine.watched(), Some("msft"));
        sleep(INTERVAL * 2 + Duration::from_millis(1)).await;

        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stopped_handle_is_idempotent() {
        let calls = Arc::new(AtomicU32::new(0));
        let observed = Arc::new(Mutex::new(Observed::default()));
        let handle = spawn_poller(INTERVAL, observed, counting_probe(&calls), |_| false, None);

        sleep(Duration::from_millis(1)).await;
        handle.stop();
        handle.stop();
        assert!(handle.is_stopped());

        sleep(INTERVAL * 3).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
