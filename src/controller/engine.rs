//! Controller engine implementation.
//!
//! The controller owns the work queue and is responsible for:
//! - Seeding the queue from a full CronJob list at startup
//! - Turning store watch events into queued keys
//! - Running at most one pass per key at a time, bounded by a worker count
//! - Requeue timers for the next firing and backoff after failures
//! - Pause, resume, and graceful shutdown

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;

use crate::core::clock::{Clock, SystemClock};
use crate::core::types::ObjectKey;
use crate::events::{Event, EventBus};
use crate::reconcile::{ReconcileError, ReconcileOutcome, Reconciler};
use crate::store::{ObjectStore, WatchEvent};

use super::backoff::BackoffPolicy;
use super::handle::{COMMAND_CHANNEL_BUFFER, ControllerHandle};
use super::queue::WorkQueue;
use super::types::{ControllerCommand, ControllerState, QueueStats};

type PassResult = (ObjectKey, Result<ReconcileOutcome, ReconcileError>);

/// The reconciliation controller.
pub struct Controller<S: ObjectStore> {
    /// Store backend.
    store: Arc<S>,
    /// Source of "now" for reconcile passes.
    clock: Arc<dyn Clock>,
    /// Event bus for emitting events.
    event_bus: Arc<EventBus>,
    /// Maximum passes running at once.
    workers: usize,
    /// Upper bound on a single pass.
    pass_timeout: Duration,
    /// Graceful shutdown timeout (default: 30 seconds).
    shutdown_timeout: Duration,
    /// Retry delays for failing keys.
    backoff: BackoffPolicy,
}

/// Mutable loop state, owned by the controller task.
struct Runtime {
    queue: WorkQueue,
    timers: HashMap<ObjectKey, JoinHandle<()>>,
    delay_tx: mpsc::UnboundedSender<ObjectKey>,
    done_tx: mpsc::UnboundedSender<PassResult>,
    paused: bool,
}

impl Runtime {
    /// Fire `key` into the queue after `after`, replacing any pending timer.
    fn schedule(&mut self, key: ObjectKey, after: Duration) {
        self.cancel(&key);
        let delay_tx = self.delay_tx.clone();
        let fired = key.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = delay_tx.send(fired);
        });
        self.timers.insert(key, timer);
    }

    fn cancel(&mut self, key: &ObjectKey) {
        if let Some(timer) = self.timers.remove(key) {
            timer.abort();
        }
    }

    fn stats(&self) -> QueueStats {
        QueueStats {
            queued: self.queue.len(),
            in_flight: self.queue.in_flight(),
            scheduled: self.timers.len(),
            failing: self.queue.failing(),
        }
    }
}

impl<S: ObjectStore + 'static> Controller<S> {
    /// Create a new controller with the given store.
    pub fn new(store: S) -> Self {
        Self::with_store(Arc::new(store))
    }

    /// Create a new controller over a shared store.
    pub fn with_store(store: Arc<S>) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            event_bus: Arc::new(EventBus::new()),
            workers: 4,
            pass_timeout: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(30),
            backoff: BackoffPolicy::default(),
        }
    }

    /// Set the clock used by reconcile passes.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Set the event bus.
    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = event_bus;
        self
    }

    /// Set the number of concurrent passes. Zero is treated as one.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Set the per-pass timeout.
    pub fn with_pass_timeout(mut self, timeout: Duration) -> Self {
        self.pass_timeout = timeout;
        self
    }

    /// Set the graceful shutdown timeout.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Set the retry backoff policy.
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Get the store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Get the event bus.
    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    /// A reconciler sharing this controller's store, clock, and event bus.
    pub fn reconciler(&self) -> Reconciler<S> {
        Reconciler::new(Arc::clone(&self.store))
            .with_clock(Arc::clone(&self.clock))
            .with_event_bus(Arc::clone(&self.event_bus))
    }

    /// Start the controller and return a handle for controlling it.
    pub async fn start(self) -> (ControllerHandle, JoinHandle<()>) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_BUFFER);
        let state = Arc::new(RwLock::new(ControllerState::Running));

        let handle = ControllerHandle {
            command_tx,
            state: Arc::clone(&state),
        };

        let controller_task = tokio::spawn(async move {
            self.run(command_rx, state).await;
        });

        (handle, controller_task)
    }

    /// Main controller loop.
    async fn run(
        self,
        mut command_rx: mpsc::Receiver<ControllerCommand>,
        state: Arc<RwLock<ControllerState>>,
    ) {
        // Subscribe before listing so nothing changed in between is lost.
        let mut watch = self.store.subscribe();
        let mut watching = true;
        let reconciler = self.reconciler();

        let (delay_tx, mut delay_rx) = mpsc::unbounded_channel();
        let (done_tx, mut done_rx) = mpsc::unbounded_channel();
        let mut rt = Runtime {
            queue: WorkQueue::default(),
            timers: HashMap::new(),
            delay_tx,
            done_tx,
            paused: false,
        };

        self.resync(&mut rt).await;
        tracing::info!(
            workers = self.workers,
            queued = rt.queue.len(),
            "Controller started"
        );

        loop {
            if !rt.paused {
                self.dispatch(&mut rt, &reconciler);
            }

            tokio::select! {
                Some(command) = command_rx.recv() => {
                    match command {
                        ControllerCommand::Enqueue { key, response } => {
                            rt.queue.add(key);
                            let _ = response.send(());
                        }
                        ControllerCommand::Stats { response } => {
                            let _ = response.send(rt.stats());
                        }
                        ControllerCommand::Pause { response } => {
                            *state.write().await = ControllerState::Paused;
                            rt.paused = true;
                            tracing::info!("Controller paused");
                            let _ = response.send(());
                        }
                        ControllerCommand::Resume { response } => {
                            *state.write().await = ControllerState::Running;
                            rt.paused = false;
                            tracing::info!(queued = rt.queue.len(), "Controller resumed");
                            let _ = response.send(());
                        }
                        ControllerCommand::Shutdown { response } => {
                            *state.write().await = ControllerState::Stopped;

                            for (_, timer) in rt.timers.drain() {
                                timer.abort();
                            }
                            self.await_in_flight(&mut rt, &mut done_rx).await;

                            let _ = response.send(());
                            break;
                        }
                    }
                }

                event = watch.recv(), if watching => {
                    match event {
                        Ok(event) => self.observe(&mut rt, event),
                        Err(RecvError::Lagged(missed)) => {
                            tracing::warn!(missed, "Watch stream lagged, resyncing all CronJobs");
                            self.resync(&mut rt).await;
                        }
                        Err(RecvError::Closed) => {
                            tracing::warn!("Watch stream closed, relying on requeue timers");
                            watching = false;
                        }
                    }
                }

                Some(key) = delay_rx.recv() => {
                    rt.timers.remove(&key);
                    rt.queue.add(key);
                }

                Some((key, result)) = done_rx.recv() => {
                    self.complete(&mut rt, key, result).await;
                }
            }
        }

        tracing::info!("Controller stopped");
    }

    /// Queue every CronJob in the store.
    async fn resync(&self, rt: &mut Runtime) {
        match self.store.list_cronjobs(None).await {
            Ok(cronjobs) => {
                for cronjob in cronjobs {
                    rt.queue.add(cronjob.key());
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to list CronJobs for resync");
            }
        }
    }

    fn observe(&self, rt: &mut Runtime, event: WatchEvent) {
        if let WatchEvent::CronJobDeleted(key) = &event {
            rt.cancel(key);
        }
        if let Some(key) = event.cronjob_key() {
            tracing::trace!(cronjob = %key, "Watch event");
            rt.queue.add(key.clone());
        }
    }

    /// Start passes until the queue is empty or every worker is busy.
    fn dispatch(&self, rt: &mut Runtime, reconciler: &Reconciler<S>) {
        while rt.queue.in_flight() < self.workers {
            let Some(key) = rt.queue.next() else {
                break;
            };

            let reconciler = reconciler.clone();
            let done_tx = rt.done_tx.clone();
            let pass_timeout = self.pass_timeout;

            tokio::spawn(async move {
                let pass_key = key.clone();
                // Inner task so a panic surfaces as a JoinError instead of
                // taking the bookkeeping down with it.
                let pass = tokio::spawn(async move { reconciler.reconcile(&pass_key).await });
                let abort = pass.abort_handle();

                let result = match tokio::time::timeout(pass_timeout, pass).await {
                    Ok(Ok(result)) => result,
                    Ok(Err(join_error)) => Err(ReconcileError::Panicked(join_error.to_string())),
                    Err(_) => {
                        abort.abort();
                        Err(ReconcileError::Timeout(pass_timeout))
                    }
                };
                let _ = done_tx.send((key, result));
            });
        }
    }

    /// Book-keep a finished pass.
    async fn complete(
        &self,
        rt: &mut Runtime,
        key: ObjectKey,
        result: Result<ReconcileOutcome, ReconcileError>,
    ) {
        rt.queue.done(&key);

        match result {
            Ok(outcome) => {
                rt.queue.forget(&key);
                tracing::debug!(
                    cronjob = %key,
                    disposition = ?outcome.disposition,
                    requeue_after = ?outcome.requeue_after,
                    "Reconcile pass finished"
                );
                match outcome.requeue_after {
                    Some(after) => rt.schedule(key, after),
                    None => rt.cancel(&key),
                }
            }
            Err(e) if e.is_conflict() => {
                tracing::debug!(cronjob = %key, error = %e, "Reconcile lost a write race, retrying");
                rt.queue.add(key);
            }
            Err(e) => {
                let attempt = rt.queue.record_failure(&key);
                let retry_in = self.backoff.delay(attempt);
                tracing::error!(
                    cronjob = %key,
                    error = %e,
                    attempt,
                    retry_in = ?retry_in,
                    "Reconcile pass failed"
                );
                self.event_bus
                    .emit(Event::reconcile_failed(
                        key.clone(),
                        e.to_string(),
                        attempt,
                        retry_in,
                    ))
                    .await;
                rt.schedule(key, retry_in);
            }
        }
    }

    /// Wait for running passes to report back, up to the shutdown timeout.
    async fn await_in_flight(
        &self,
        rt: &mut Runtime,
        done_rx: &mut mpsc::UnboundedReceiver<PassResult>,
    ) {
        let running = rt.queue.in_flight();
        if running == 0 {
            tracing::info!("No reconcile passes to wait for during shutdown");
            return;
        }

        tracing::info!(
            "Graceful shutdown: waiting for {} reconcile pass(es) (timeout: {:?})",
            running,
            self.shutdown_timeout
        );

        let start = tokio::time::Instant::now();
        let deadline = start + self.shutdown_timeout;

        while rt.queue.in_flight() > 0 {
            match tokio::time::timeout_at(deadline, done_rx.recv()).await {
                Ok(Some((key, _))) => rt.queue.done(&key),
                Ok(None) => break,
                Err(_) => {
                    tracing::warn!(
                        "Graceful shutdown timeout ({:?}) exceeded with {} pass(es) still running",
                        self.shutdown_timeout,
                        rt.queue.in_flight()
                    );
                    return;
                }
            }
        }

        tracing::info!("All reconcile passes finished in {:?}", start.elapsed());
    }
}
