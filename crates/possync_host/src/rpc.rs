//! Datastore RPC between an isolated worker and the host.
//!
//! Inside a worker the engine talks to an [`RpcStore`], which turns every
//! datastore call into a [`StoreCommand`] sent to the host. The host answers
//! each command with [`dispatch`] against the real datastore. Replies are
//! matched to callers by a per-worker sequence number, so several calls may
//! be in flight at once.
//!
//! Wire shape:
//! - worker to host: `{"type":"db:request","reqId":1,"action":"getLastSync","args":{...}}`
//! - host to worker: `{"type":"db:response","reqId":1,"result":{...}}` or `{"...","error":"..."}`

use async_trait::async_trait;
use parking_lot::Mutex;
use possync_engine::{SyncError, SyncResult, SyncStore};
use possync_protocol::{RetryKind, RetryRecord, Row, SyncCursor, SyncEvent, UpsertBatch};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// A datastore operation requested by a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", content = "args", rename_all = "camelCase")]
pub enum StoreCommand {
    /// See [`SyncStore::count_unsynced_rows`].
    CountUnsyncedRows {
        /// Table name.
        table: String,
    },
    /// See [`SyncStore::get_unsynced_rows`].
    GetUnsyncedRows {
        /// Table name.
        table: String,
        /// Page size.
        limit: u32,
        /// Rows to skip.
        offset: u64,
    },
    /// See [`SyncStore::upsert_many`].
    UpsertMany(UpsertBatch),
    /// See [`SyncStore::mark_rows_as_synced`].
    MarkRowsAsSynced {
        /// Table name.
        table: String,
        /// Row ids.
        ids: Vec<String>,
    },
    /// See [`SyncStore::mark_table_as_synced`].
    MarkTableAsSynced {
        /// Table name.
        table: String,
    },
    /// See [`SyncStore::add_retry`].
    AddRetry {
        /// Table name.
        table: String,
        /// Replay payload.
        payload: Value,
        /// Error text.
        error: String,
        /// Failed operation.
        #[serde(rename = "type")]
        kind: RetryKind,
    },
    /// See [`SyncStore::get_retries`].
    GetRetries {
        /// Table name.
        table: String,
    },
    /// See [`SyncStore::remove_retry`].
    RemoveRetry {
        /// Retry record id.
        id: u64,
    },
    /// See [`SyncStore::increment_retry`].
    IncrementRetry {
        /// Retry record id.
        id: u64,
    },
    /// See [`SyncStore::upsert`].
    Upsert {
        /// Table name.
        table: String,
        /// Row to merge.
        row: Row,
    },
    /// See [`SyncStore::get_last_sync`].
    GetLastSync {
        /// Table name.
        table: String,
    },
}

impl StoreCommand {
    /// Returns the wire action name.
    pub fn action(&self) -> &'static str {
        match self {
            StoreCommand::CountUnsyncedRows { .. } => "countUnsyncedRows",
            StoreCommand::GetUnsyncedRows { .. } => "getUnsyncedRows",
            StoreCommand::UpsertMany(_) => "upsertMany",
            StoreCommand::MarkRowsAsSynced { .. } => "markRowsAsSynced",
            StoreCommand::MarkTableAsSynced { .. } => "markTableAsSynced",
            StoreCommand::AddRetry { .. } => "addRetry",
            StoreCommand::GetRetries { .. } => "getRetries",
            StoreCommand::RemoveRetry { .. } => "removeRetry",
            StoreCommand::IncrementRetry { .. } => "incrementRetry",
            StoreCommand::Upsert { .. } => "upsert",
            StoreCommand::GetLastSync { .. } => "getLastSync",
        }
    }
}

/// Result of a [`StoreCommand`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StoreReply {
    /// Operation with no result.
    Unit,
    /// A row count.
    Count(u64),
    /// A page of rows.
    Rows(Vec<Row>),
    /// Retry records.
    Retries(Vec<RetryRecord>),
    /// A stored cursor.
    Cursor(Option<SyncCursor>),
}

/// Outcome of a command as carried on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RpcOutcome {
    /// The command succeeded.
    #[serde(rename = "result")]
    Ok(StoreReply),
    /// The command failed; the datastore error text.
    #[serde(rename = "error")]
    Err(String),
}

impl From<SyncResult<StoreReply>> for RpcOutcome {
    fn from(result: SyncResult<StoreReply>) -> Self {
        match result {
            Ok(reply) => RpcOutcome::Ok(reply),
            Err(e) => RpcOutcome::Err(e.to_string()),
        }
    }
}

/// Message from a worker to the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WorkerMessage {
    /// A datastore request awaiting a reply.
    #[serde(rename = "db:request", rename_all = "camelCase")]
    DbRequest {
        /// Correlation id.
        req_id: u64,
        /// Requested operation.
        #[serde(flatten)]
        command: StoreCommand,
    },
    /// A status event to forward to the UI.
    #[serde(rename = "status")]
    Status {
        /// The event.
        event: SyncEvent,
    },
}

/// Message from the host to a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum HostMessage {
    /// Reply to a datastore request.
    #[serde(rename = "db:response", rename_all = "camelCase")]
    DbResponse {
        /// Correlation id of the request.
        req_id: u64,
        /// Command outcome.
        #[serde(flatten)]
        outcome: RpcOutcome,
    },
    /// Cooperative cancellation of the current run.
    #[serde(rename = "cancel")]
    Cancel,
}

/// Executes a command against the real datastore.
///
/// Every command maps to exactly one datastore operation.
pub async fn dispatch<S: SyncStore + ?Sized>(store: &S, command: StoreCommand) -> SyncResult<StoreReply> {
    let reply = match command {
        StoreCommand::CountUnsyncedRows { table } => {
            StoreReply::Count(store.count_unsynced_rows(&table).await?)
        }
        StoreCommand::GetUnsyncedRows { table, limit, offset } => {
            StoreReply::Rows(store.get_unsynced_rows(&table, limit, offset).await?)
        }
        StoreCommand::UpsertMany(batch) => {
            store.upsert_many(batch).await?;
            StoreReply::Unit
        }
        StoreCommand::MarkRowsAsSynced { table, ids } => {
            store.mark_rows_as_synced(&table, &ids).await?;
            StoreReply::Unit
        }
        StoreCommand::MarkTableAsSynced { table } => {
            store.mark_table_as_synced(&table).await?;
            StoreReply::Unit
        }
        StoreCommand::AddRetry {
            table,
            payload,
            error,
            kind,
        } => {
            store.add_retry(&table, payload, &error, kind).await?;
            StoreReply::Unit
        }
        StoreCommand::GetRetries { table } => StoreReply::Retries(store.get_retries(&table).await?),
        StoreCommand::RemoveRetry { id } => {
            store.remove_retry(id).await?;
            StoreReply::Unit
        }
        StoreCommand::IncrementRetry { id } => {
            store.increment_retry(id).await?;
            StoreReply::Unit
        }
        StoreCommand::Upsert { table, row } => {
            store.upsert(&table, row).await?;
            StoreReply::Unit
        }
        StoreCommand::GetLastSync { table } => StoreReply::Cursor(store.get_last_sync(&table).await?),
    };
    Ok(reply)
}

/// Calls waiting for a host reply, keyed by correlation id.
#[derive(Debug, Default)]
pub struct PendingReplies {
    waiting: Mutex<HashMap<u64, oneshot::Sender<RpcOutcome>>>,
}

impl PendingReplies {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, req_id: u64) -> oneshot::Receiver<RpcOutcome> {
        let (tx, rx) = oneshot::channel();
        self.waiting.lock().insert(req_id, tx);
        rx
    }

    fn forget(&self, req_id: u64) {
        self.waiting.lock().remove(&req_id);
    }

    /// Delivers a reply to its caller. Returns false if nobody is waiting
    /// for that id (timed out or unknown).
    pub fn complete(&self, req_id: u64, outcome: RpcOutcome) -> bool {
        match self.waiting.lock().remove(&req_id) {
            Some(tx) => tx.send(outcome).is_ok(),
            None => false,
        }
    }

    /// Fails every waiting call with a closed channel.
    pub fn fail_all(&self) {
        self.waiting.lock().clear();
    }

    /// Number of calls waiting.
    pub fn len(&self) -> usize {
        self.waiting.lock().len()
    }

    /// Returns true if no call is waiting.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A [`SyncStore`] that forwards every operation to the host.
pub struct RpcStore {
    to_host: mpsc::Sender<WorkerMessage>,
    pending: Arc<PendingReplies>,
    next_id: AtomicU64,
    timeout: Duration,
}

impl RpcStore {
    /// Creates a store sending requests on `to_host`.
    ///
    /// Replies must be routed into `pending` by the worker's receive loop.
    pub fn new(to_host: mpsc::Sender<WorkerMessage>, pending: Arc<PendingReplies>, timeout: Duration) -> Self {
        Self {
            to_host,
            pending,
            next_id: AtomicU64::new(0),
            timeout,
        }
    }

    /// Sends a command and waits for its reply.
    pub async fn call(&self, command: StoreCommand) -> SyncResult<StoreReply> {
        let req_id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let action = command.action();
        let reply = self.pending.register(req_id);

        if self
            .to_host
            .send(WorkerMessage::DbRequest { req_id, command })
            .await
            .is_err()
        {
            self.pending.forget(req_id);
            return Err(SyncError::ChannelClosed);
        }

        match tokio::time::timeout(self.timeout, reply).await {
            Ok(Ok(RpcOutcome::Ok(reply))) => Ok(reply),
            Ok(Ok(RpcOutcome::Err(message))) => Err(SyncError::Store(message)),
            Ok(Err(_)) => Err(SyncError::ChannelClosed),
            Err(_) => {
                warn!(req_id, action, "datastore call timed out");
                self.pending.forget(req_id);
                Err(SyncError::Timeout)
            }
        }
    }
}

fn unexpected(action: &str, reply: StoreReply) -> SyncError {
    SyncError::Protocol(format!("unexpected reply to {}: {:?}", action, reply))
}

fn expect_unit(reply: StoreReply) -> SyncResult<()> {
    match reply {
        StoreReply::Unit => Ok(()),
        other => Err(unexpected("write", other)),
    }
}

#[async_trait]
impl SyncStore for RpcStore {
    async fn count_unsynced_rows(&self, table: &str) -> SyncResult<u64> {
        match self
            .call(StoreCommand::CountUnsyncedRows {
                table: table.to_string(),
            })
            .await?
        {
            StoreReply::Count(n) => Ok(n),
            other => Err(unexpected("countUnsyncedRows", other)),
        }
    }

    async fn get_unsynced_rows(&self, table: &str, limit: u32, offset: u64) -> SyncResult<Vec<Row>> {
        match self
            .call(StoreCommand::GetUnsyncedRows {
                table: table.to_string(),
                limit,
                offset,
            })
            .await?
        {
            StoreReply::Rows(rows) => Ok(rows),
            other => Err(unexpected("getUnsyncedRows", other)),
        }
    }

    async fn upsert_many(&self, batch: UpsertBatch) -> SyncResult<()> {
        expect_unit(self.call(StoreCommand::UpsertMany(batch)).await?)
    }

    async fn mark_rows_as_synced(&self, table: &str, ids: &[String]) -> SyncResult<()> {
        expect_unit(
            self.call(StoreCommand::MarkRowsAsSynced {
                table: table.to_string(),
                ids: ids.to_vec(),
            })
            .await?,
        )
    }

    async fn mark_table_as_synced(&self, table: &str) -> SyncResult<()> {
        expect_unit(
            self.call(StoreCommand::MarkTableAsSynced {
                table: table.to_string(),
            })
            .await?,
        )
    }

    async fn add_retry(&self, table: &str, payload: Value, error: &str, kind: RetryKind) -> SyncResult<()> {
        expect_unit(
            self.call(StoreCommand::AddRetry {
                table: table.to_string(),
                payload,
                error: error.to_string(),
                kind,
            })
            .await?,
        )
    }

    async fn get_retries(&self, table: &str) -> SyncResult<Vec<RetryRecord>> {
        match self
            .call(StoreCommand::GetRetries {
                table: table.to_string(),
            })
            .await?
        {
            StoreReply::Retries(records) => Ok(records),
            other => Err(unexpected("getRetries", other)),
        }
    }

    async fn remove_retry(&self, id: u64) -> SyncResult<()> {
        expect_unit(self.call(StoreCommand::RemoveRetry { id }).await?)
    }

    async fn increment_retry(&self, id: u64) -> SyncResult<()> {
        expect_unit(self.call(StoreCommand::IncrementRetry { id }).await?)
    }

    async fn upsert(&self, table: &str, row: Row) -> SyncResult<()> {
        expect_unit(
            self.call(StoreCommand::Upsert {
                table: table.to_string(),
                row,
            })
            .await?,
        )
    }

    async fn get_last_sync(&self, table: &str) -> SyncResult<Option<SyncCursor>> {
        match self
            .call(StoreCommand::GetLastSync {
                table: table.to_string(),
            })
            .await?
        {
            StoreReply::Cursor(cursor) => Ok(cursor),
            other => Err(unexpected("getLastSync", other)),
        }
    }
}

/// Serves every datastore request arriving on `requests` until the channel
/// closes, forwarding status events to `on_status`.
///
/// Used by tests and by simple hosts that have nothing else to multiplex.
pub async fn serve<S, F>(
    store: &S,
    mut requests: mpsc::Receiver<WorkerMessage>,
    replies: mpsc::UnboundedSender<HostMessage>,
    mut on_status: F,
) where
    S: SyncStore + ?Sized,
    F: FnMut(SyncEvent),
{
    while let Some(message) = requests.recv().await {
        match message {
            WorkerMessage::DbRequest { req_id, command } => {
                debug!(req_id, action = command.action(), "datastore request");
                let outcome = dispatch(store, command).await.into();
                if replies.send(HostMessage::DbResponse { req_id, outcome }).is_err() {
                    break;
                }
            }
            WorkerMessage::Status { event } => on_status(event),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use possync_engine::MemoryStore;
    use serde_json::json;

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    /// Routes replies into the pending table, like a worker's receive loop.
    fn route(mut replies: mpsc::UnboundedReceiver<HostMessage>, pending: Arc<PendingReplies>) {
        tokio::spawn(async move {
            while let Some(message) = replies.recv().await {
                if let HostMessage::DbResponse { req_id, outcome } = message {
                    pending.complete(req_id, outcome);
                }
            }
        });
    }

    #[test]
    fn request_wire_shape() {
        let message = WorkerMessage::DbRequest {
            req_id: 7,
            command: StoreCommand::GetUnsyncedRows {
                table: "clients".into(),
                limit: 100,
                offset: 0,
            },
        };
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "db:request",
                "reqId": 7,
                "action": "getUnsyncedRows",
                "args": {"table": "clients", "limit": 100, "offset": 0}
            })
        );
        assert_eq!(serde_json::from_value::<WorkerMessage>(value).unwrap(), message);
    }

    #[test]
    fn response_wire_shape() {
        let ok = HostMessage::DbResponse {
            req_id: 1,
            outcome: RpcOutcome::Ok(StoreReply::Count(3)),
        };
        assert_eq!(
            serde_json::to_value(&ok).unwrap(),
            json!({"type": "db:response", "reqId": 1, "result": {"count": 3}})
        );

        let err = HostMessage::DbResponse {
            req_id: 2,
            outcome: RpcOutcome::Err("disk full".into()),
        };
        assert_eq!(
            serde_json::to_value(&err).unwrap(),
            json!({"type": "db:response", "reqId": 2, "error": "disk full"})
        );
    }

    #[tokio::test]
    async fn dispatch_covers_the_port() {
        let store = MemoryStore::new();
        store.insert_local("clients", row(json!({"id": "a"}))).unwrap();

        let reply = dispatch(&store, StoreCommand::CountUnsyncedRows { table: "clients".into() }).await;
        assert_eq!(reply.unwrap(), StoreReply::Count(1));

        let reply = dispatch(
            &store,
            StoreCommand::MarkRowsAsSynced {
                table: "clients".into(),
                ids: vec!["a".into()],
            },
        )
        .await;
        assert_eq!(reply.unwrap(), StoreReply::Unit);
        assert!(store.unsynced_ids("clients").is_empty());

        let reply = dispatch(&store, StoreCommand::GetLastSync { table: "clients".into() }).await;
        assert_eq!(reply.unwrap(), StoreReply::Cursor(None));

        let err = dispatch(&store, StoreCommand::IncrementRetry { id: 42 }).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn rpc_store_round_trips_through_host() {
        let host_store = Arc::new(MemoryStore::new());
        let (to_host, requests) = mpsc::channel(4);
        let (replies_tx, replies_rx) = mpsc::unbounded_channel();
        let pending = Arc::new(PendingReplies::new());
        route(replies_rx, pending.clone());

        let served = host_store.clone();
        tokio::spawn(async move { serve(&*served, requests, replies_tx, |_| {}).await });

        let rpc = RpcStore::new(to_host, pending.clone(), Duration::from_secs(5));
        rpc.upsert("clients", row(json!({"id": "x", "name": "X"}))).await.unwrap();
        rpc.add_retry("clients", json!([]), "boom", RetryKind::Push).await.unwrap();

        assert_eq!(rpc.count_unsynced_rows("clients").await.unwrap(), 1);
        assert_eq!(rpc.get_unsynced_rows("clients", 10, 0).await.unwrap().len(), 1);
        let retries = rpc.get_retries("clients").await.unwrap();
        assert_eq!(retries[0].error, "boom");

        let err = rpc.increment_retry(999).await.unwrap_err();
        assert!(matches!(err, SyncError::Store(_)));
        assert!(pending.is_empty());
        assert_eq!(host_store.rows("clients").len(), 1);
    }

    #[tokio::test]
    async fn concurrent_calls_get_their_own_replies() {
        let host_store = Arc::new(MemoryStore::new());
        for table in ["a", "b", "c"] {
            for i in 0..(table.as_bytes()[0] - b'a' + 1) {
                host_store
                    .insert_local(table, row(json!({"id": format!("{table}{i}")})))
                    .unwrap();
            }
        }

        let (to_host, mut requests) = mpsc::channel(8);
        let (replies_tx, replies_rx) = mpsc::unbounded_channel();
        let pending = Arc::new(PendingReplies::new());
        route(replies_rx, pending.clone());

        // Answer in reverse arrival order.
        let served = host_store.clone();
        tokio::spawn(async move {
            let mut batch = Vec::new();
            while batch.len() < 3 {
                match requests.recv().await {
                    Some(WorkerMessage::DbRequest { req_id, command }) => batch.push((req_id, command)),
                    Some(_) => {}
                    None => return,
                }
            }
            for (req_id, command) in batch.into_iter().rev() {
                let outcome = dispatch(&*served, command).await.into();
                let _ = replies_tx.send(HostMessage::DbResponse { req_id, outcome });
            }
        });

        let rpc = RpcStore::new(to_host, pending, Duration::from_secs(5));
        let (a, b, c) = tokio::join!(
            rpc.count_unsynced_rows("a"),
            rpc.count_unsynced_rows("b"),
            rpc.count_unsynced_rows("c"),
        );
        assert_eq!((a.unwrap(), b.unwrap(), c.unwrap()), (1, 2, 3));
    }

    #[tokio::test]
    async fn call_times_out_and_forgets() {
        let (to_host, _requests) = mpsc::channel(4);
        let pending = Arc::new(PendingReplies::new());
        let rpc = RpcStore::new(to_host, pending.clone(), Duration::from_millis(20));

        let err = rpc.count_unsynced_rows("clients").await.unwrap_err();
        assert!(matches!(err, SyncError::Timeout));
        assert!(pending.is_empty());
        assert!(!pending.complete(1, RpcOutcome::Ok(StoreReply::Count(0))));
    }

    #[tokio::test]
    async fn closed_host_fails_calls() {
        let (to_host, requests) = mpsc::channel(4);
        drop(requests);
        let rpc = RpcStore::new(to_host, Arc::new(PendingReplies::new()), Duration::from_secs(1));
        assert!(matches!(
            rpc.get_last_sync("clients").await.unwrap_err(),
            SyncError::ChannelClosed
        ));
    }

    #[tokio::test]
    async fn fail_all_releases_waiters() {
        let (to_host, _requests) = mpsc::channel(4);
        let pending = Arc::new(PendingReplies::new());
        let rpc = RpcStore::new(to_host, pending.clone(), Duration::from_secs(5));

        let releaser = pending.clone();
        tokio::spawn(async move {
            while releaser.is_empty() {
                tokio::task::yield_now().await;
            }
            releaser.fail_all();
        });
        assert!(matches!(
            rpc.count_unsynced_rows("x").await.unwrap_err(),
            SyncError::ChannelClosed
        ));
    }
}
