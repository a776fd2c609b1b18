//! Datastore port.
//!
//! The engine never touches the local database directly. Everything it needs
//! goes through [`SyncStore`], which is implemented by the datastore layer on
//! the host (or by the RPC bridge inside an isolated worker).

use crate::error::SyncResult;
use async_trait::async_trait;
use possync_protocol::{RetryKind, RetryRecord, Row, SyncCursor, UpsertBatch};
use serde_json::Value;
use std::sync::Arc;

/// Operations the sync engine requires from the local datastore.
///
/// "Unsynced" is a per-row state owned by the datastore; the engine only
/// uses the aggregate operations below and never inspects row contents to
/// decide sync state.
#[async_trait]
pub trait SyncStore: Send + Sync {
    /// Counts rows changed locally since their last successful push.
    async fn count_unsynced_rows(&self, table: &str) -> SyncResult<u64>;

    /// Returns up to `limit` unsynced rows, skipping the first `offset`.
    async fn get_unsynced_rows(&self, table: &str, limit: u32, offset: u64) -> SyncResult<Vec<Row>>;

    /// Upserts pulled rows and stores the new cursor in one operation.
    async fn upsert_many(&self, batch: UpsertBatch) -> SyncResult<()>;

    /// Marks the given rows as synced.
    async fn mark_rows_as_synced(&self, table: &str, ids: &[String]) -> SyncResult<()>;

    /// Records that a table has no pending local changes.
    async fn mark_table_as_synced(&self, table: &str) -> SyncResult<()>;

    /// Persists a retry record.
    async fn add_retry(&self, table: &str, payload: Value, error: &str, kind: RetryKind) -> SyncResult<()>;

    /// Lists retry records for a table, oldest first.
    async fn get_retries(&self, table: &str) -> SyncResult<Vec<RetryRecord>>;

    /// Deletes a retry record.
    async fn remove_retry(&self, id: u64) -> SyncResult<()>;

    /// Bumps a retry record's attempt count.
    async fn increment_retry(&self, id: u64) -> SyncResult<()>;

    /// Upserts a single row.
    async fn upsert(&self, table: &str, row: Row) -> SyncResult<()>;

    /// Returns the persisted pull cursor for a table.
    async fn get_last_sync(&self, table: &str) -> SyncResult<Option<SyncCursor>>;
}

#[async_trait]
impl<S: SyncStore + ?Sized> SyncStore for Arc<S> {
    async fn count_unsynced_rows(&self, table: &str) -> SyncResult<u64> {
        (**self).count_unsynced_rows(table).await
    }

    async fn get_unsynced_rows(&self, table: &str, limit: u32, offset: u64) -> SyncResult<Vec<Row>> {
        (**self).get_unsynced_rows(table, limit, offset).await
    }

    async fn upsert_many(&self, batch: UpsertBatch) -> SyncResult<()> {
        (**self).upsert_many(batch).await
    }

    async fn mark_rows_as_synced(&self, table: &str, ids: &[String]) -> SyncResult<()> {
        (**self).mark_rows_as_synced(table, ids).await
    }

    async fn mark_table_as_synced(&self, table: &str) -> SyncResult<()> {
        (**self).mark_table_as_synced(table).await
    }

    async fn add_retry(&self, table: &str, payload: Value, error: &str, kind: RetryKind) -> SyncResult<()> {
        (**self).add_retry(table, payload, error, kind).await
    }

    async fn get_retries(&self, table: &str) -> SyncResult<Vec<RetryRecord>> {
        (**self).get_retries(table).await
    }

    async fn remove_retry(&self, id: u64) -> SyncResult<()> {
        (**self).remove_retry(id).await
    }

    async fn increment_retry(&self, id: u64) -> SyncResult<()> {
        (**self).increment_retry(id).await
    }

    async fn upsert(&self, table: &str, row: Row) -> SyncResult<()> {
        (**self).upsert(table, row).await
    }

    async fn get_last_sync(&self, table: &str) -> SyncResult<Option<SyncCursor>> {
        (**self).get_last_sync(table).await
    }
}
