//! The sync engine.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::progress::{push_page_weight, ProgressTracker};
use crate::store::SyncStore;
use crate::transport::RemoteApi;
use parking_lot::Mutex;
use possync_protocol::{PullRequest, RetryKind, Row, SyncCursor, SyncEvent, UpsertBatch};
use possync_schema::SchemaRegistry;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

/// Cooperative cancellation flag shared with an engine.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    /// Requests cancellation. In-flight requests complete first.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Returns true if cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Outcome of one table's phases within a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableReport {
    /// Table name.
    pub table: String,
    /// Rows pulled and upserted.
    pub pulled: u64,
    /// Rows pushed and marked synced.
    pub pushed: u64,
    /// Rows pushed but not acknowledged.
    pub failed: u64,
    /// Retry records written for this table.
    pub retries_recorded: u32,
    /// Pull phase error, if the phase ended early.
    pub pull_error: Option<String>,
    /// Push phase error, if the phase ended early.
    pub push_error: Option<String>,
    /// The pull phase was rejected by schema validation.
    pub validation_failed: bool,
    /// The table was not processed because the run was cancelled.
    pub skipped: bool,
}

impl TableReport {
    fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            ..Self::default()
        }
    }
}

/// Result of a full run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    /// Per-table reports, in processing order.
    pub tables: Vec<TableReport>,
    /// Whether the run observed a cancellation.
    pub cancelled: bool,
    /// Final progress value.
    pub progress: u8,
    /// Wall time of the run.
    pub duration: Duration,
}

impl RunSummary {
    /// Returns the report of a table.
    pub fn table(&self, table: &str) -> Option<&TableReport> {
        self.tables.iter().find(|t| t.table == table)
    }

    /// Returns true if no table reported an error.
    pub fn is_clean(&self) -> bool {
        self.tables.iter().all(|t| {
            t.pull_error.is_none() && t.push_error.is_none() && t.failed == 0 && !t.skipped
        })
    }
}

/// Outcome of one table's push phase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushReport {
    /// Pages posted.
    pub pages: u32,
    /// Rows accepted by the server.
    pub pushed: u64,
    /// Rows not accepted.
    pub failed: u64,
    /// Retry records written.
    pub retries_recorded: u32,
    /// Joined failure detail of partially failed pages.
    pub failure_detail: Option<String>,
}

/// Outcome of replaying a table's retry queue.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryReport {
    /// Records attempted.
    pub replayed: u32,
    /// Records that succeeded and were removed.
    pub removed: u32,
    /// Records that failed again and had their attempt count bumped.
    pub failed: u32,
}

#[derive(Clone, Copy)]
enum PullFailure {
    Record,
    Skip,
}

/// The sync engine reconciles local tables with the remote API.
///
/// One engine performs one run at a time: for each configured table, in
/// order, a pull phase followed by a push phase. Tables are never processed
/// concurrently.
pub struct SyncEngine<R: RemoteApi, S: SyncStore> {
    config: SyncConfig,
    remote: Arc<R>,
    store: Arc<S>,
    schemas: SchemaRegistry,
    events: Option<UnboundedSender<SyncEvent>>,
    cancel: CancelHandle,
    progress: Mutex<ProgressTracker>,
    retries_written: AtomicU32,
}

impl<R: RemoteApi, S: SyncStore> SyncEngine<R, S> {
    /// Creates a new sync engine using the built-in POS schemas.
    pub fn new(config: SyncConfig, remote: R, store: S) -> Self {
        Self {
            config,
            remote: Arc::new(remote),
            store: Arc::new(store),
            schemas: SchemaRegistry::pos(),
            events: None,
            cancel: CancelHandle::default(),
            progress: Mutex::new(ProgressTracker::new()),
            retries_written: AtomicU32::new(0),
        }
    }

    /// Registers the status channel.
    pub fn with_events(mut self, events: UnboundedSender<SyncEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Replaces the schema registry.
    pub fn with_schemas(mut self, schemas: SchemaRegistry) -> Self {
        self.schemas = schemas;
        self
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Returns the datastore.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Returns the remote API.
    pub fn remote(&self) -> &Arc<R> {
        &self.remote
    }

    /// Requests cooperative cancellation of the current run.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Returns a handle that can cancel this engine from elsewhere.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Returns the current overall progress.
    pub fn progress(&self) -> u8 {
        self.progress.lock().percent()
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn emit(&self, event: SyncEvent) {
        if let Some(events) = &self.events {
            // The receiver going away must not abort the run.
            let _ = events.send(event);
        }
    }

    fn add_progress(&self, table: &str, weight: f64) {
        let percent = self.progress.lock().add(table, weight);
        self.emit(SyncEvent::Progress {
            percent,
            table: Some(table.to_string()),
        });
    }

    /// Runs one full sync: pull then push for every configured table.
    ///
    /// Per-table failures are reported on the status stream and never stop
    /// the run. Only a missing device/branch identity aborts it, before any
    /// table is touched.
    pub async fn run(&self) -> SyncResult<RunSummary> {
        let start = Instant::now();
        if let Err(e) = self.config.device_context() {
            warn!("sync aborted: {}", e);
            self.emit(SyncEvent::fatal(e.to_string()));
            return Err(e);
        }

        self.progress.lock().reset();
        info!(tables = self.config.tables.len(), "sync run started");
        self.emit(SyncEvent::Start);

        let mut reports = Vec::with_capacity(self.config.tables.len());
        for table in &self.config.tables {
            let mut report = TableReport::new(table);
            if self.is_cancelled() {
                debug!(table = %table, "skipped: run cancelled");
                report.skipped = true;
                reports.push(report);
                continue;
            }

            let retries_before = self.retries_written.load(Ordering::SeqCst);
            match self.pull_table(table).await {
                Ok(pulled) => report.pulled = pulled,
                Err(e) => {
                    report.validation_failed = e.is_validation();
                    report.pull_error = Some(e.to_string());
                    self.emit(SyncEvent::table_error(table, e.to_string()));
                }
            }

            match self.push_table(table).await {
                Ok(push) => {
                    report.pushed = push.pushed;
                    report.failed = push.failed;
                    if let Some(detail) = push.failure_detail {
                        self.emit(SyncEvent::table_error(table, detail));
                    }
                }
                Err(e) => {
                    report.push_error = Some(e.to_string());
                    self.emit(SyncEvent::table_error(table, e.to_string()));
                }
            }

            // Only records that reached the store count.
            report.retries_recorded = self.retries_written.load(Ordering::SeqCst) - retries_before;
            reports.push(report);
        }

        let summary = RunSummary {
            tables: reports,
            cancelled: self.is_cancelled(),
            progress: self.progress(),
            duration: start.elapsed(),
        };
        info!(
            cancelled = summary.cancelled,
            progress = summary.progress,
            elapsed_ms = summary.duration.as_millis() as u64,
            "sync run finished"
        );
        self.emit(SyncEvent::Done);
        self.cancel.reset();
        Ok(summary)
    }

    /// Pulls every available page of a table.
    ///
    /// Returns the number of rows upserted. A transport failure writes a
    /// `Pull` retry record before returning the error; a validation failure
    /// returns the error without one. The cursor only moves together with
    /// the rows of the page that produced it.
    pub async fn pull_table(&self, table: &str) -> SyncResult<u64> {
        self.pull_pages(table, PullFailure::Record).await
    }

    async fn pull_pages(&self, table: &str, on_failure: PullFailure) -> SyncResult<u64> {
        let (device_id, branch_id) = self.config.device_context()?;
        self.emit(SyncEvent::PullTable {
            table: table.to_string(),
        });

        let stored = self.store.get_last_sync(table).await?;
        let SyncCursor {
            mut last_sync,
            mut next_id,
        } = stored.unwrap_or_else(|| SyncCursor::new(self.config.bootstrap_timestamp.clone(), None));

        let mut pulled = 0u64;
        loop {
            if self.is_cancelled() {
                debug!(table, "pull cancelled");
                break;
            }

            let request = PullRequest {
                last_sync: last_sync.clone(),
                last_id: next_id.clone(),
                limit: self.config.pull_limit,
                device_id: device_id.clone(),
                branch_id: branch_id.clone(),
            };

            let page = match self.remote.pull(table, &request).await {
                Ok(page) => page,
                Err(e) => {
                    warn!(table, error = %e, "pull failed");
                    if let PullFailure::Record = on_failure {
                        let context = json!({
                            "lastSync": request.last_sync,
                            "lastId": request.last_id,
                            "limit": request.limit,
                        });
                        self.record_retry(table, context, &e, RetryKind::Pull).await;
                    }
                    return Err(e);
                }
            };

            let rows = if page.data.is_empty() {
                Vec::new()
            } else {
                match self.schemas.validate(table, &page.data) {
                    Ok(rows) => rows,
                    Err(e) => {
                        warn!(table, issues = %e, "pulled page rejected");
                        return Err(e.into());
                    }
                }
            };

            let new_last_sync = page.resume_timestamp(&last_sync);
            // A page without a cursor keeps the previous tie-breaker.
            let new_next_id = match page.next_cursor {
                Some(_) => page.next_id.clone(),
                None => page.next_id.clone().or_else(|| next_id.clone()),
            };
            let stalled = page.has_more && new_last_sync == last_sync && new_next_id == next_id;

            let count = rows.len() as u64;
            self.store
                .upsert_many(UpsertBatch {
                    table: table.to_string(),
                    rows,
                    last_sync: new_last_sync.clone(),
                    next_id: new_next_id.clone(),
                })
                .await?;

            pulled += count;
            last_sync = new_last_sync;
            next_id = new_next_id;
            debug!(table, rows = count, has_more = page.has_more, "pulled page");
            self.add_progress(table, 1.0);

            if !page.has_more {
                break;
            }
            if stalled {
                // Server reported more rows without moving the cursor.
                warn!(table, "pull cursor did not advance, stopping");
                break;
            }
        }

        info!(table, rows = pulled, "pull finished");
        Ok(pulled)
    }

    /// Pushes every unsynced row of a table, one page at a time.
    ///
    /// Rows named in a response's success set are marked synced. A page with
    /// any failure produces exactly one `Push` retry record holding the whole
    /// page. The offset advances by the number of rows that did not succeed,
    /// since synced rows drop out of the unsynced set. A transport error
    /// records the page and ends the phase.
    pub async fn push_table(&self, table: &str) -> SyncResult<PushReport> {
        self.emit(SyncEvent::PushTable {
            table: table.to_string(),
        });

        let total = self.store.count_unsynced_rows(table).await?;
        let mut report = PushReport::default();
        if total == 0 {
            debug!(table, "nothing to push");
            return Ok(report);
        }

        let limit = self.config.push_limit.max(1);
        let pages = total.div_ceil(u64::from(limit));
        let weight = push_page_weight(self.config.table_count(), pages);
        debug!(table, total, pages, weight, "push started");

        let mut details = Vec::new();
        let mut offset = 0u64;
        loop {
            if self.is_cancelled() {
                debug!(table, "push cancelled");
                break;
            }

            let rows = self.store.get_unsynced_rows(table, limit, offset).await?;
            if rows.is_empty() {
                break;
            }
            report.pages += 1;

            let outcome = match self.remote.push(table, &rows).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(table, error = %e, offset, "push failed");
                    self.record_retry(table, rows_payload(&rows), &e, RetryKind::Push)
                        .await;
                    return Err(e);
                }
            };

            let succeeded = outcome.succeeded_ids(&rows);
            if !succeeded.is_empty() {
                self.store.mark_rows_as_synced(table, &succeeded).await?;
            }
            let not_synced = (rows.len() - succeeded.len()) as u64;
            report.pushed += succeeded.len() as u64;
            self.add_progress(table, weight * succeeded.len() as f64 / rows.len() as f64);

            if !outcome.failed.is_empty() || not_synced > 0 {
                let detail = if outcome.failed.is_empty() {
                    format!("{} row(s) not acknowledged", not_synced)
                } else {
                    outcome.failure_summary()
                };
                warn!(table, failed = not_synced, detail = %detail, "push page partially failed");
                let error = SyncError::Protocol(detail.clone());
                if self
                    .record_retry(table, rows_payload(&rows), &error, RetryKind::Push)
                    .await
                {
                    report.retries_recorded += 1;
                }
                report.failed += not_synced;
                details.push(detail);
            }

            offset += not_synced;
        }

        if !details.is_empty() {
            report.failure_detail = Some(details.join("; "));
        } else if !self.is_cancelled() {
            self.store.mark_table_as_synced(table).await?;
        }

        info!(table, pushed = report.pushed, failed = report.failed, "push finished");
        Ok(report)
    }

    /// Replays a table's retry records.
    ///
    /// `Push` records are re-posted with their stored rows; `Pull` records
    /// re-run the table's pull from its persisted cursor. A record is
    /// removed on success and has its attempt count bumped otherwise.
    pub async fn process_retry_queue(&self, table: &str) -> SyncResult<RetryReport> {
        let records = self.store.get_retries(table).await?;
        let mut report = RetryReport::default();

        for record in records {
            if self.is_cancelled() {
                break;
            }
            report.replayed += 1;

            let outcome = match record.kind {
                RetryKind::Push => self.replay_push(table, &record.payload).await,
                RetryKind::Pull => self.pull_pages(table, PullFailure::Skip).await.map(|_| ()),
            };

            match outcome {
                Ok(()) => {
                    self.store.remove_retry(record.id).await?;
                    report.removed += 1;
                }
                Err(e) => {
                    debug!(table, id = record.id, error = %e, "retry failed again");
                    self.store.increment_retry(record.id).await?;
                    report.failed += 1;
                }
            }
        }

        info!(table, replayed = report.replayed, removed = report.removed, "retry queue processed");
        Ok(report)
    }

    async fn replay_push(&self, table: &str, payload: &Value) -> SyncResult<()> {
        let rows: Vec<Row> = serde_json::from_value(payload.clone())?;
        let outcome = self.remote.push(table, &rows).await?;
        let succeeded = outcome.succeeded_ids(&rows);
        if !succeeded.is_empty() {
            self.store.mark_rows_as_synced(table, &succeeded).await?;
        }
        if outcome.failed.is_empty() && succeeded.len() == rows.len() {
            Ok(())
        } else {
            Err(SyncError::Protocol(outcome.failure_summary()))
        }
    }

    /// Writes a retry record; returns false if the store refused it.
    async fn record_retry(&self, table: &str, payload: Value, error: &SyncError, kind: RetryKind) -> bool {
        match self
            .store
            .add_retry(table, payload, &error.to_string(), kind)
            .await
        {
            Ok(()) => {
                self.retries_written.fetch_add(1, Ordering::SeqCst);
                true
            }
            Err(e) => {
                warn!(table, error = %e, "failed to write retry record");
                false
            }
        }
    }
}

fn rows_payload(rows: &[Row]) -> Value {
    Value::Array(rows.iter().cloned().map(Value::Object).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::transport::{MockRemote, PushScript};
    use possync_protocol::{PullPage, PushOutcome};
    use tokio::sync::mpsc;

    fn config(tables: &[&str]) -> SyncConfig {
        SyncConfig::new("memory://")
            .with_device("dev-1", "br-1")
            .with_tables(tables.iter().copied())
    }

    fn client(id: &str) -> Row {
        json!({"id": id, "name": format!("client {id}")})
            .as_object()
            .cloned()
            .unwrap()
    }

    fn seeded_store(table: &str, n: usize) -> MemoryStore {
        let store = MemoryStore::new();
        for i in 0..n {
            store.insert_local(table, client(&format!("c{i:04}"))).unwrap();
        }
        store
    }

    #[test]
    fn cancel_handle_flag() {
        let handle = CancelHandle::default();
        assert!(!handle.is_cancelled());
        handle.clone().cancel();
        assert!(handle.is_cancelled());
        handle.reset();
        assert!(!handle.is_cancelled());
    }

    #[tokio::test]
    async fn missing_device_aborts_before_any_table() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let engine = SyncEngine::new(
            SyncConfig::new("memory://").with_tables(["clients"]),
            MockRemote::new(),
            MemoryStore::new(),
        )
        .with_events(tx);

        let err = engine.run().await.unwrap_err();
        assert!(matches!(err, SyncError::DeviceNotRegistered));
        assert!(engine.remote().calls().is_empty());
        assert_eq!(rx.recv().await.unwrap(), SyncEvent::fatal("device not registered"));
    }

    #[tokio::test]
    async fn push_pages_of_250_rows() {
        let engine = SyncEngine::new(
            config(&["clients"]).with_push_limit(100),
            MockRemote::new(),
            seeded_store("clients", 250),
        );

        let report = engine.push_table("clients").await.unwrap();
        let sizes: Vec<usize> = engine
            .remote()
            .pushed_batches("clients")
            .iter()
            .map(Vec::len)
            .collect();
        assert_eq!(sizes, vec![100, 100, 50]);
        assert_eq!(report.pushed, 250);
        assert_eq!(report.pages, 3);
        assert_eq!(engine.progress(), 100);
        assert!(engine.store().table_synced_at("clients").is_some());
    }

    #[tokio::test]
    async fn partial_failure_records_whole_page() {
        let remote = MockRemote::new();
        remote.queue_push(
            "clients",
            PushScript::Outcome(
                PushOutcome::accepted(["a", "b"]).with_failure(Some("c"), "constraint"),
            ),
        );
        let store = MemoryStore::new();
        for id in ["a", "b", "c"] {
            store.insert_local("clients", client(id)).unwrap();
        }
        let engine = SyncEngine::new(config(&["clients"]).with_push_limit(3), remote, store);

        let report = engine.push_table("clients").await.unwrap();
        assert_eq!(report.pushed, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.retries_recorded, 1);

        let store = engine.store();
        assert_eq!(store.unsynced_ids("clients"), vec!["c"]);
        let retries = store.retries();
        assert_eq!(retries.len(), 1);
        assert_eq!(retries[0].kind, RetryKind::Push);
        assert_eq!(retries[0].payload.as_array().unwrap().len(), 3);
        assert!(retries[0].error.contains("constraint"));
        assert!(store.table_synced_at("clients").is_none());

        // offset advanced by one: the second fetch skipped the failed row.
        assert_eq!(engine.remote().pushed_batches("clients").len(), 1);
    }

    #[tokio::test]
    async fn push_transport_error_stops_table() {
        let remote = MockRemote::new();
        remote.queue_push("clients", PushScript::Fail("socket hang up".into()));
        let engine = SyncEngine::new(
            config(&["clients"]).with_push_limit(2),
            remote,
            seeded_store("clients", 5),
        );

        let err = engine.push_table("clients").await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(engine.remote().pushed_batches("clients").len(), 1);
        assert_eq!(engine.store().unsynced_ids("clients").len(), 5);
        assert_eq!(engine.store().retries().len(), 1);
    }

    #[tokio::test]
    async fn empty_push_is_a_noop() {
        let engine = SyncEngine::new(config(&["clients"]), MockRemote::new(), MemoryStore::new());
        assert_eq!(engine.push_table("clients").await.unwrap(), PushReport::default());
        assert_eq!(engine.progress(), 0);
        assert!(engine.remote().calls().is_empty());
    }

    #[tokio::test]
    async fn pull_single_page_then_stop() {
        let remote = MockRemote::new();
        remote.queue_page(
            "clients",
            PullPage::new(vec![json!({"id": "s1", "name": "Server", "approved": "1"})], false)
                .with_cursor("2024-06-01T00:00:00Z", Some("s1".into())),
        );
        let engine = SyncEngine::new(config(&["clients"]), remote, MemoryStore::new());

        assert_eq!(engine.pull_table("clients").await.unwrap(), 1);
        let requests = engine.remote().pull_requests("clients");
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].last_sync, crate::DEFAULT_BOOTSTRAP_TIMESTAMP);
        assert_eq!(requests[0].device_id, "dev-1");

        let stored = engine.store().row("clients", "s1").unwrap();
        assert!(stored.synced);
        assert_eq!(stored.row["approved"], 1);
        assert_eq!(stored.row["sync_status"], "synced");
        assert_eq!(
            engine.store().cursor("clients"),
            Some(SyncCursor::new("2024-06-01T00:00:00Z", Some("s1".into())))
        );
    }

    #[tokio::test]
    async fn pull_resumes_from_stored_cursor() {
        let remote = MockRemote::new();
        remote.queue_page(
            "clients",
            PullPage::new(vec![json!({"id": "1", "name": "a"})], true).with_cursor("t1", Some("1".into())),
        );
        remote.queue_page(
            "clients",
            PullPage::new(vec![json!({"id": "2", "name": "b"})], false).with_cursor("t2", Some("2".into())),
        );
        let store = MemoryStore::new();
        store
            .upsert_many(UpsertBatch {
                table: "clients".into(),
                rows: vec![],
                last_sync: "t0".into(),
                next_id: Some("0".into()),
            })
            .await
            .unwrap();
        let engine = SyncEngine::new(config(&["clients"]), remote, store);

        assert_eq!(engine.pull_table("clients").await.unwrap(), 2);
        let requests = engine.remote().pull_requests("clients");
        assert_eq!(requests[0].last_sync, "t0");
        assert_eq!(requests[0].last_id.as_deref(), Some("0"));
        assert_eq!(requests[1].last_sync, "t1");
        assert_eq!(requests[1].last_id.as_deref(), Some("1"));
        assert_eq!(engine.store().cursor("clients").unwrap().last_sync, "t2");
    }

    #[tokio::test]
    async fn invalid_page_leaves_cursor_untouched() {
        let remote = MockRemote::new();
        remote.queue_page(
            "clients",
            PullPage::new(vec![json!({"id": "1"})], true).with_cursor("t1", None),
        );
        let engine = SyncEngine::new(config(&["clients"]), remote, MemoryStore::new());

        let err = engine.pull_table("clients").await.unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().contains("0.name"));
        assert_eq!(engine.store().cursor("clients"), None);
        assert!(engine.store().retries().is_empty());
        assert!(engine.store().rows("clients").is_empty());
    }

    #[tokio::test]
    async fn pull_transport_error_records_cursor_context() {
        let remote = MockRemote::new();
        remote.queue_pull("sales", crate::PullScript::Fail("timeout".into()));
        let engine = SyncEngine::new(config(&["sales"]), remote, MemoryStore::new());

        assert!(engine.pull_table("sales").await.is_err());
        let retries = engine.store().retries();
        assert_eq!(retries.len(), 1);
        assert_eq!(retries[0].kind, RetryKind::Pull);
        assert_eq!(retries[0].payload["lastSync"], crate::DEFAULT_BOOTSTRAP_TIMESTAMP);
    }

    #[tokio::test]
    async fn stalled_cursor_stops_pull() {
        let remote = MockRemote::new();
        for _ in 0..3 {
            remote.queue_page("clients", PullPage::new(vec![], true));
        }
        let engine = SyncEngine::new(config(&["clients"]), remote, MemoryStore::new());
        assert_eq!(engine.pull_table("clients").await.unwrap(), 0);
        assert_eq!(engine.remote().pull_requests("clients").len(), 1);
    }

    #[tokio::test]
    async fn repeated_page_without_cursor_stops_pull() {
        let remote = MockRemote::new();
        for _ in 0..3 {
            remote.queue_page("clients", PullPage::new(vec![json!({"id": "1", "name": "a"})], true));
        }
        let engine = SyncEngine::new(config(&["clients"]), remote, MemoryStore::new());

        assert_eq!(engine.pull_table("clients").await.unwrap(), 1);
        assert_eq!(engine.remote().pull_requests("clients").len(), 1);
        assert!(engine.store().row("clients", "1").is_some());
    }

    #[tokio::test]
    async fn store_failure_counts_no_retry() {
        // Rows without an id pass this schema but the store refuses them.
        let mut schemas = SchemaRegistry::new();
        schemas.register(
            possync_schema::TableSchema::new("notes").field("text", possync_schema::FieldKind::Text),
        );
        let remote = MockRemote::new();
        remote.queue_page(
            "notes",
            PullPage::new(vec![json!({"text": "no id"})], false).with_cursor("t1", None),
        );
        let engine = SyncEngine::new(config(&["notes"]), remote, MemoryStore::new()).with_schemas(schemas);

        let summary = engine.run().await.unwrap();
        let report = summary.table("notes").unwrap();
        assert!(report.pull_error.is_some());
        assert!(!report.validation_failed);
        assert_eq!(report.retries_recorded, 0);
        assert!(engine.store().retries().is_empty());
    }

    #[tokio::test]
    async fn run_counts_written_retries() {
        let remote = MockRemote::new();
        remote.queue_pull("clients", crate::PullScript::Fail("offline".into()));
        remote.queue_push("clients", PushScript::Fail("offline".into()));
        let engine = SyncEngine::new(config(&["clients"]), remote, seeded_store("clients", 1));

        let summary = engine.run().await.unwrap();
        assert_eq!(summary.table("clients").unwrap().retries_recorded, 2);
        assert_eq!(engine.store().retries().len(), 2);
    }

    #[tokio::test]
    async fn retry_queue_replays_push_records() {
        let remote = MockRemote::new();
        remote.queue_push("clients", PushScript::Reject(vec!["b".into()], "dup".into()));
        let store = MemoryStore::new();
        for id in ["a", "b"] {
            store.insert_local("clients", client(id)).unwrap();
        }
        let engine = SyncEngine::new(config(&["clients"]), remote, store);
        engine.push_table("clients").await.unwrap();
        assert_eq!(engine.store().retries().len(), 1);

        // Next replay: the mock accepts everything.
        let report = engine.process_retry_queue("clients").await.unwrap();
        assert_eq!(report, RetryReport { replayed: 1, removed: 1, failed: 0 });
        assert!(engine.store().retries().is_empty());
        assert!(engine.store().unsynced_ids("clients").is_empty());
    }

    #[tokio::test]
    async fn retry_queue_bumps_attempts_on_failure() {
        let remote = MockRemote::new();
        remote.queue_push("clients", PushScript::Fail("down".into()));
        remote.queue_push("clients", PushScript::Fail("still down".into()));
        let engine = SyncEngine::new(config(&["clients"]), remote, seeded_store("clients", 1));
        assert!(engine.push_table("clients").await.is_err());

        let report = engine.process_retry_queue("clients").await.unwrap();
        assert_eq!(report.failed, 1);
        let retries = engine.store().retries();
        assert_eq!(retries.len(), 1);
        assert_eq!(retries[0].attempts, 1);
    }

    #[tokio::test]
    async fn retry_queue_replays_pull_records() {
        let remote = MockRemote::new();
        remote.queue_pull("clients", crate::PullScript::Fail("offline".into()));
        remote.queue_page(
            "clients",
            PullPage::new(vec![json!({"id": "9", "name": "late"})], false).with_cursor("t9", None),
        );
        let engine = SyncEngine::new(config(&["clients"]), remote, MemoryStore::new());
        assert!(engine.pull_table("clients").await.is_err());

        let report = engine.process_retry_queue("clients").await.unwrap();
        assert_eq!(report.removed, 1);
        assert!(engine.store().row("clients", "9").is_some());
        assert!(engine.store().retries().is_empty());
    }
}
