//! Isolated sync worker.
//!
//! A worker is a dedicated OS thread running its own single-threaded tokio
//! runtime and one [`SyncEngine`]. It holds no datastore handle: every
//! datastore call travels to the host as a [`WorkerMessage::DbRequest`] and
//! comes back as a [`HostMessage::DbResponse`].

use crate::rpc::{HostMessage, PendingReplies, RpcStore, WorkerMessage};
use possync_engine::{
    HttpRemote, RemoteApi, RetryReport, RunSummary, SyncConfig, SyncEngine, SyncError, SyncResult,
};
use possync_protocol::SyncEvent;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn, Instrument};

/// Creates the remote API used by a worker.
///
/// Called on the worker thread at the start of every run.
pub trait RemoteConnector: Send + Sync + 'static {
    /// Remote API type.
    type Remote: RemoteApi + 'static;

    /// Creates a remote API client for the run.
    fn connect(&self, config: &SyncConfig) -> SyncResult<Self::Remote>;
}

/// Connects workers to the HTTP remote API.
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpConnector;

impl RemoteConnector for HttpConnector {
    type Remote = HttpRemote;

    fn connect(&self, config: &SyncConfig) -> SyncResult<HttpRemote> {
        HttpRemote::new(config)
    }
}

/// Hands every worker the same shared remote.
impl<R: RemoteApi + 'static> RemoteConnector for Arc<R> {
    type Remote = Arc<R>;

    fn connect(&self, _config: &SyncConfig) -> SyncResult<Arc<R>> {
        Ok(Arc::clone(self))
    }
}

/// What a worker does once started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerMode {
    /// One full sync run.
    Sync,
    /// Replay the retry queue of every table.
    ReplayRetries,
}

/// Startup message of a worker.
#[derive(Debug, Clone)]
pub struct WorkerStart {
    /// Engine configuration, including tables and device identity.
    pub config: SyncConfig,
    /// Work to perform.
    pub mode: WorkerMode,
    /// Run id used to tag the worker's logs.
    pub run_id: String,
}

/// Result returned by a worker thread.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerOutput {
    /// Summary of a sync run.
    Sync(RunSummary),
    /// Retry replay report per table.
    Retries(BTreeMap<String, RetryReport>),
}

/// Host side of a running worker.
pub struct WorkerHandle {
    from_worker: mpsc::Receiver<WorkerMessage>,
    to_worker: mpsc::UnboundedSender<HostMessage>,
    thread: Option<JoinHandle<SyncResult<WorkerOutput>>>,
}

impl WorkerHandle {
    /// Receives the next message from the worker; `None` once it is gone.
    pub async fn recv(&mut self) -> Option<WorkerMessage> {
        self.from_worker.recv().await
    }

    /// Sends a message to the worker.
    pub fn send(&self, message: HostMessage) -> SyncResult<()> {
        self.to_worker.send(message).map_err(|_| SyncError::ChannelClosed)
    }

    /// Returns a sender that can reach the worker from elsewhere.
    pub fn sender(&self) -> mpsc::UnboundedSender<HostMessage> {
        self.to_worker.clone()
    }

    /// Tears the worker down and returns its result.
    ///
    /// Closing both channels makes any outstanding datastore call fail, so
    /// the thread always finishes. A panic becomes [`SyncError::WorkerFailed`].
    pub async fn join(mut self) -> SyncResult<WorkerOutput> {
        self.from_worker.close();
        drop(self.to_worker);
        let thread = self
            .thread
            .take()
            .ok_or_else(|| SyncError::WorkerFailed("worker already joined".into()))?;

        let joined = tokio::task::spawn_blocking(move || thread.join())
            .await
            .map_err(|e| SyncError::WorkerFailed(e.to_string()))?;
        match joined {
            Ok(result) => result,
            Err(panic) => Err(SyncError::WorkerFailed(panic_message(panic.as_ref()))),
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("worker panicked: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("worker panicked: {}", s)
    } else {
        "worker panicked".to_string()
    }
}

/// Spawns sync workers.
pub struct SyncWorker;

impl SyncWorker {
    /// Starts a worker thread.
    ///
    /// `capacity` bounds the worker-to-host channel and `rpc_timeout` bounds
    /// every datastore round-trip.
    pub fn spawn<C: RemoteConnector>(
        start: WorkerStart,
        connector: Arc<C>,
        capacity: usize,
        rpc_timeout: Duration,
    ) -> SyncResult<WorkerHandle> {
        let (to_host, from_worker) = mpsc::channel(capacity.max(1));
        let (to_worker, from_host) = mpsc::unbounded_channel();

        let thread = std::thread::Builder::new()
            .name(format!("possync-sync-{}", short_id(&start.run_id)))
            .spawn(move || {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()?;
                let span = tracing::info_span!("sync_worker", run_id = %start.run_id);
                runtime.block_on(
                    run_worker(start, connector, to_host, from_host, rpc_timeout).instrument(span),
                )
            })?;

        Ok(WorkerHandle {
            from_worker,
            to_worker,
            thread: Some(thread),
        })
    }
}

fn short_id(run_id: &str) -> &str {
    run_id.get(..8).unwrap_or(run_id)
}

async fn run_worker<C: RemoteConnector>(
    start: WorkerStart,
    connector: Arc<C>,
    to_host: mpsc::Sender<WorkerMessage>,
    from_host: mpsc::UnboundedReceiver<HostMessage>,
    rpc_timeout: Duration,
) -> SyncResult<WorkerOutput> {
    debug!(mode = ?start.mode, tables = start.config.tables.len(), "worker started");

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let forwarder = tokio::spawn(forward_events(events_rx, to_host.clone()));

    let remote = match connector.connect(&start.config) {
        Ok(remote) => remote,
        Err(e) => {
            let _ = events_tx.send(SyncEvent::fatal(e.to_string()));
            drop(events_tx);
            let _ = forwarder.await;
            return Err(e);
        }
    };

    let pending = Arc::new(PendingReplies::new());
    let store = RpcStore::new(to_host, Arc::clone(&pending), rpc_timeout);
    let engine = SyncEngine::new(start.config.clone(), remote, store).with_events(events_tx.clone());
    let router = tokio::spawn(route_replies(from_host, pending, engine.cancel_handle()));

    let result = match start.mode {
        WorkerMode::Sync => engine.run().await.map(WorkerOutput::Sync),
        WorkerMode::ReplayRetries => replay(&engine, &events_tx).await.map(WorkerOutput::Retries),
    };

    // Flush every status event before the thread ends.
    drop(engine);
    drop(events_tx);
    let _ = forwarder.await;
    router.abort();

    match &result {
        Ok(_) => info!("worker finished"),
        Err(e) => warn!(error = %e, "worker finished with error"),
    }
    result
}

async fn replay<R, S>(
    engine: &SyncEngine<R, S>,
    events: &mpsc::UnboundedSender<SyncEvent>,
) -> SyncResult<BTreeMap<String, RetryReport>>
where
    R: RemoteApi,
    S: possync_engine::SyncStore,
{
    if let Err(e) = engine.config().device_context() {
        let _ = events.send(SyncEvent::fatal(e.to_string()));
        return Err(e);
    }

    let _ = events.send(SyncEvent::Start);
    let mut reports = BTreeMap::new();
    for table in &engine.config().tables {
        match engine.process_retry_queue(table).await {
            Ok(report) => {
                reports.insert(table.clone(), report);
            }
            Err(e) => {
                let _ = events.send(SyncEvent::table_error(table, e.to_string()));
            }
        }
    }
    let _ = events.send(SyncEvent::Done);
    Ok(reports)
}

async fn forward_events(mut events: mpsc::UnboundedReceiver<SyncEvent>, to_host: mpsc::Sender<WorkerMessage>) {
    while let Some(event) = events.recv().await {
        if to_host.send(WorkerMessage::Status { event }).await.is_err() {
            break;
        }
    }
}

async fn route_replies(
    mut from_host: mpsc::UnboundedReceiver<HostMessage>,
    pending: Arc<PendingReplies>,
    cancel: possync_engine::CancelHandle,
) {
    while let Some(message) = from_host.recv().await {
        match message {
            HostMessage::DbResponse { req_id, outcome } => {
                if !pending.complete(req_id, outcome) {
                    debug!(req_id, "dropped reply with no waiting call");
                }
            }
            HostMessage::Cancel => {
                debug!("cancel requested by host");
                cancel.cancel();
            }
        }
    }
    pending.fail_all();
}
