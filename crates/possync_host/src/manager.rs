//! Sync manager.
//!
//! Owns at most one running sync worker, answers its datastore requests
//! against the real store, and republishes its status events to every
//! subscriber. Runs are started on demand, on a timer while online, and on
//! reconnect.

use crate::config::HostConfig;
use crate::network::NetworkEvent;
use crate::rpc::{dispatch, HostMessage, WorkerMessage};
use crate::worker::{RemoteConnector, SyncWorker, WorkerMode, WorkerOutput, WorkerStart};
use parking_lot::Mutex;
use possync_engine::{RetryReport, RunSummary, SyncConfig, SyncError, SyncResult, SyncStore};
use possync_protocol::SyncEvent;
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Lifecycle of the manager's sync runs.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RunState {
    /// No run has happened yet.
    #[default]
    Idle,
    /// A worker is running.
    Running {
        /// Id of the current run.
        run_id: String,
    },
    /// The last run finished.
    Completed {
        /// Id of the finished run.
        run_id: String,
    },
    /// The last run failed as a whole.
    Failed {
        /// Id of the failed run.
        run_id: String,
        /// Failure description.
        reason: String,
    },
}

impl RunState {
    /// Returns true while a run is in progress.
    pub fn is_running(&self) -> bool {
        matches!(self, RunState::Running { .. })
    }

    /// Returns the id of the current or last run.
    pub fn run_id(&self) -> Option<&str> {
        match self {
            RunState::Idle => None,
            RunState::Running { run_id }
            | RunState::Completed { run_id }
            | RunState::Failed { run_id, .. } => Some(run_id),
        }
    }

    /// Enters `Running`. Fails if a run is already in progress.
    pub fn begin(&mut self, run_id: impl Into<String>) -> SyncResult<()> {
        if self.is_running() {
            return Err(SyncError::AlreadyRunning);
        }
        *self = RunState::Running {
            run_id: run_id.into(),
        };
        Ok(())
    }

    /// Moves a running state to `Completed`.
    pub fn finish(&mut self) {
        if let RunState::Running { run_id } = self {
            *self = RunState::Completed {
                run_id: std::mem::take(run_id),
            };
        }
    }

    /// Moves a running state to `Failed`.
    pub fn fail(&mut self, reason: impl Into<String>) {
        if let RunState::Running { run_id } = self {
            *self = RunState::Failed {
                run_id: std::mem::take(run_id),
                reason: reason.into(),
            };
        }
    }
}

type WorkerSender = mpsc::UnboundedSender<HostMessage>;

/// A scheduled run in flight.
type RunFuture<'a> = Pin<Box<dyn Future<Output = SyncResult<RunSummary>> + Send + 'a>>;

/// Leaves `Running` however a run ends.
///
/// If the run future is dropped before it finishes, the worker is told to
/// cancel and the run is marked failed, so later runs are not locked out.
struct RunGuard<'a> {
    state: &'a Mutex<RunState>,
    active: &'a Mutex<Option<WorkerSender>>,
    armed: bool,
}

impl RunGuard<'_> {
    fn complete(mut self, result: &SyncResult<WorkerOutput>) {
        self.armed = false;
        *self.active.lock() = None;
        let mut state = self.state.lock();
        match result {
            Ok(_) => state.finish(),
            Err(e) => state.fail(e.to_string()),
        }
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Some(worker) = self.active.lock().take() {
            let _ = worker.send(HostMessage::Cancel);
        }
        warn!("sync run abandoned before completion");
        self.state.lock().fail("run abandoned before completion");
    }
}

/// Host-side orchestrator of sync workers.
pub struct SyncManager<S: SyncStore + 'static, C: RemoteConnector> {
    config: SyncConfig,
    host: HostConfig,
    store: Arc<S>,
    connector: Arc<C>,
    state: Mutex<RunState>,
    events: broadcast::Sender<SyncEvent>,
    active: Mutex<Option<WorkerSender>>,
}

impl<S: SyncStore + 'static, C: RemoteConnector> SyncManager<S, C> {
    /// Creates a manager over `store`, spawning workers that reach the
    /// remote API through `connector`.
    pub fn new(config: SyncConfig, host: HostConfig, store: Arc<S>, connector: C) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            config,
            host,
            store,
            connector: Arc::new(connector),
            state: Mutex::new(RunState::Idle),
            events,
            active: Mutex::new(None),
        }
    }

    /// Subscribes to the status stream of every future run.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Returns the current run state.
    pub fn state(&self) -> RunState {
        self.state.lock().clone()
    }

    /// Returns true while a run is in progress.
    pub fn is_running(&self) -> bool {
        self.state.lock().is_running()
    }

    /// Returns the datastore.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Asks the running worker to stop after its current request.
    ///
    /// Returns false if no worker is running.
    pub fn cancel(&self) -> bool {
        match self.active.lock().as_ref() {
            Some(worker) => worker.send(HostMessage::Cancel).is_ok(),
            None => false,
        }
    }

    /// Runs one full sync in a fresh worker.
    pub async fn run_once(&self) -> SyncResult<RunSummary> {
        match self.execute(WorkerMode::Sync).await? {
            WorkerOutput::Sync(summary) => Ok(summary),
            WorkerOutput::Retries(_) => Err(SyncError::Protocol("unexpected worker output".into())),
        }
    }

    /// Replays the retry queue of every configured table in a fresh worker.
    pub async fn replay_retries(&self) -> SyncResult<BTreeMap<String, RetryReport>> {
        match self.execute(WorkerMode::ReplayRetries).await? {
            WorkerOutput::Retries(reports) => Ok(reports),
            WorkerOutput::Sync(_) => Err(SyncError::Protocol("unexpected worker output".into())),
        }
    }

    fn publish(&self, event: SyncEvent) {
        // No subscribers is not an error.
        let _ = self.events.send(event);
    }

    async fn execute(&self, mode: WorkerMode) -> SyncResult<WorkerOutput> {
        if let Err(e) = self.config.device_context() {
            warn!("sync not started: {}", e);
            self.publish(SyncEvent::fatal(e.to_string()));
            return Err(e);
        }

        let run_id = Uuid::new_v4().to_string();
        self.state.lock().begin(run_id.clone())?;
        let guard = RunGuard {
            state: &self.state,
            active: &self.active,
            armed: true,
        };

        let span = info_span!("sync_run", run_id = %run_id, mode = ?mode);
        let result = self.supervise(mode, run_id).instrument(span).await;
        guard.complete(&result);
        result
    }

    async fn supervise(&self, mode: WorkerMode, run_id: String) -> SyncResult<WorkerOutput> {
        let start = WorkerStart {
            config: self.config.clone(),
            mode,
            run_id,
        };
        let mut worker = match SyncWorker::spawn(
            start,
            Arc::clone(&self.connector),
            self.host.rpc_capacity,
            self.host.rpc_timeout,
        ) {
            Ok(worker) => worker,
            Err(e) => {
                self.publish(SyncEvent::fatal(e.to_string()));
                return Err(e);
            }
        };
        *self.active.lock() = Some(worker.sender());
        info!("worker spawned");

        let mut terminal = false;
        while let Some(message) = worker.recv().await {
            match message {
                WorkerMessage::DbRequest { req_id, command } => {
                    let action = command.action();
                    let outcome = dispatch(&*self.store, command).await;
                    if let Err(e) = &outcome {
                        debug!(req_id, action, error = %e, "datastore request failed");
                    }
                    if worker
                        .send(HostMessage::DbResponse {
                            req_id,
                            outcome: outcome.into(),
                        })
                        .is_err()
                    {
                        break;
                    }
                }
                WorkerMessage::Status { event } => {
                    terminal = event.is_terminal();
                    self.publish(event);
                    if terminal {
                        break;
                    }
                }
            }
        }

        let result = worker.join().await;
        info!(ok = result.is_ok(), "worker torn down");
        if let (false, Err(e)) = (terminal, &result) {
            // The worker died without reporting; surface it as a run failure.
            warn!(error = %e, "worker exited abnormally");
            self.publish(SyncEvent::fatal(e.to_string()));
        }
        result
    }

    /// Schedules runs until `shutdown` flips to true or its sender drops.
    ///
    /// A run starts on every `sync_interval` tick while online and
    /// immediately on each `offline -> online` transition. Ticks while
    /// offline or during a run are skipped. Network events and shutdown are
    /// handled while a run is in progress; on shutdown the run is cancelled
    /// and awaited. Returns the number of runs started.
    pub async fn run_scheduler(
        &self,
        mut network: broadcast::Receiver<NetworkEvent>,
        mut online: bool,
        mut shutdown: watch::Receiver<bool>,
    ) -> usize {
        let mut ticker = tokio::time::interval(self.host.sync_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        let mut current: Option<RunFuture<'_>> = None;
        let mut started = 0;
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                result = async {
                    match current.as_mut() {
                        Some(run) => run.await,
                        None => std::future::pending().await,
                    }
                }, if current.is_some() => {
                    current = None;
                    if !Self::finished(result) {
                        started -= 1;
                    }
                }
                _ = ticker.tick() => {
                    if online {
                        started += usize::from(self.launch("interval", &mut current));
                    } else {
                        debug!("scheduled sync skipped: offline");
                    }
                }
                event = network.recv() => match event {
                    Ok(NetworkEvent::Online) => {
                        let reconnected = !online;
                        online = true;
                        if reconnected {
                            started += usize::from(self.launch("reconnect", &mut current));
                        }
                    }
                    Ok(NetworkEvent::Offline) => online = false,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "missed network events");
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }

        if let Some(run) = current.take() {
            info!("cancelling sync in progress");
            self.cancel();
            if !Self::finished(run.await) {
                started -= 1;
            }
        }
        debug!(started, "scheduler stopped");
        started
    }

    /// Starts a run unless one is in progress.
    fn launch<'a>(&'a self, reason: &str, current: &mut Option<RunFuture<'a>>) -> bool {
        if current.is_some() || self.is_running() {
            debug!(reason, "sync skipped: run in progress");
            return false;
        }
        info!(reason, "sync triggered");
        *current = Some(Box::pin(self.run_once()));
        true
    }

    /// Logs a scheduled run's outcome; false if it never started.
    fn finished(result: SyncResult<RunSummary>) -> bool {
        match result {
            Ok(summary) => {
                debug!(clean = summary.is_clean(), cancelled = summary.cancelled, "scheduled sync finished");
                true
            }
            Err(SyncError::AlreadyRunning) => {
                debug!("scheduled sync skipped: run in progress");
                false
            }
            Err(e) => {
                warn!(error = %e, "scheduled sync failed");
                true
            }
        }
    }
}
