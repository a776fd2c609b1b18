//! Remote API abstraction.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use possync_protocol::{row_id, PullPage, PullRequest, PushOutcome, Row};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// The remote API handles network communication with the server of record.
///
/// This trait abstracts the network layer so the engine can run against
/// HTTP in production and a scripted mock in tests.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// Fetches one page of changed rows for a table.
    async fn pull(&self, table: &str, request: &PullRequest) -> SyncResult<PullPage>;

    /// Pushes a batch of rows for a table.
    async fn push(&self, table: &str, rows: &[Row]) -> SyncResult<PushOutcome>;
}

#[async_trait]
impl<R: RemoteApi + ?Sized> RemoteApi for Arc<R> {
    async fn pull(&self, table: &str, request: &PullRequest) -> SyncResult<PullPage> {
        (**self).pull(table, request).await
    }

    async fn push(&self, table: &str, rows: &[Row]) -> SyncResult<PushOutcome> {
        (**self).push(table, rows).await
    }
}

/// A request observed by [`MockRemote`].
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteCall {
    /// A pull page request.
    Pull {
        /// Table name.
        table: String,
        /// Request parameters.
        request: PullRequest,
    },
    /// A push batch.
    Push {
        /// Table name.
        table: String,
        /// Rows sent.
        rows: Vec<Row>,
    },
}

/// Scripted answer to a pull request.
#[derive(Debug, Clone)]
pub enum PullScript {
    /// Return this page.
    Page(PullPage),
    /// Fail with a retryable transport error.
    Fail(String),
}

/// Scripted answer to a push request.
#[derive(Debug, Clone)]
pub enum PushScript {
    /// Accept every row in the batch.
    AcceptAll,
    /// Accept every row except these ids, which fail with the message.
    Reject(Vec<String>, String),
    /// Return this outcome verbatim.
    Outcome(PushOutcome),
    /// Fail with a retryable transport error.
    Fail(String),
}

type CallHook = Box<dyn Fn(&RemoteCall) + Send + Sync>;

/// A mock remote API for testing.
///
/// Pull answers are queued per table; once a table's queue is empty the mock
/// returns an empty final page. Push answers are queued per table; once the
/// queue is empty every row is accepted.
#[derive(Default)]
pub struct MockRemote {
    pulls: Mutex<HashMap<String, VecDeque<PullScript>>>,
    pushes: Mutex<HashMap<String, VecDeque<PushScript>>>,
    calls: Mutex<Vec<RemoteCall>>,
    hook: Mutex<Option<CallHook>>,
}

impl MockRemote {
    /// Creates a new mock remote.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a pull page for a table.
    pub fn queue_page(&self, table: &str, page: PullPage) {
        self.queue_pull(table, PullScript::Page(page));
    }

    /// Queues a pull answer for a table.
    pub fn queue_pull(&self, table: &str, script: PullScript) {
        self.pulls
            .lock()
            .entry(table.to_string())
            .or_default()
            .push_back(script);
    }

    /// Queues a push answer for a table.
    pub fn queue_push(&self, table: &str, script: PushScript) {
        self.pushes
            .lock()
            .entry(table.to_string())
            .or_default()
            .push_back(script);
    }

    /// Registers a callback invoked before every request is answered.
    pub fn on_call(&self, hook: impl Fn(&RemoteCall) + Send + Sync + 'static) {
        *self.hook.lock() = Some(Box::new(hook));
    }

    /// Returns every request seen so far.
    pub fn calls(&self) -> Vec<RemoteCall> {
        self.calls.lock().clone()
    }

    /// Returns the pull requests made for a table.
    pub fn pull_requests(&self, table: &str) -> Vec<PullRequest> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                RemoteCall::Pull { table: t, request } if t == table => Some(request.clone()),
                _ => None,
            })
            .collect()
    }

    /// Returns the batches pushed for a table.
    pub fn pushed_batches(&self, table: &str) -> Vec<Vec<Row>> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                RemoteCall::Push { table: t, rows } if t == table => Some(rows.clone()),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: RemoteCall) {
        if let Some(hook) = self.hook.lock().as_ref() {
            hook(&call);
        }
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl RemoteApi for MockRemote {
    async fn pull(&self, table: &str, request: &PullRequest) -> SyncResult<PullPage> {
        self.record(RemoteCall::Pull {
            table: table.to_string(),
            request: request.clone(),
        });
        let script = self.pulls.lock().get_mut(table).and_then(VecDeque::pop_front);
        match script {
            Some(PullScript::Page(page)) => Ok(page),
            Some(PullScript::Fail(message)) => Err(SyncError::transport_retryable(message)),
            None => Ok(PullPage::new(Vec::new(), false)),
        }
    }

    async fn push(&self, table: &str, rows: &[Row]) -> SyncResult<PushOutcome> {
        self.record(RemoteCall::Push {
            table: table.to_string(),
            rows: rows.to_vec(),
        });
        let script = self
            .pushes
            .lock()
            .get_mut(table)
            .and_then(VecDeque::pop_front)
            .unwrap_or(PushScript::AcceptAll);

        let ids = rows.iter().filter_map(row_id);
        match script {
            PushScript::AcceptAll => Ok(PushOutcome::accepted(ids)),
            PushScript::Reject(rejected, message) => {
                let mut outcome = PushOutcome::accepted(ids.filter(|id| !rejected.contains(id)));
                for id in &rejected {
                    outcome = outcome.with_failure(Some(id.as_str()), message.as_str());
                }
                Ok(outcome)
            }
            PushScript::Outcome(outcome) => Ok(outcome),
            PushScript::Fail(message) => Err(SyncError::transport_retryable(message)),
        }
    }
}
