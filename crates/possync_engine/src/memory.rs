//! In-memory datastore.
//!
//! Implements the full [`SyncStore`] port over plain maps. Used by tests and
//! by the CLI, which loads and saves it as a JSON snapshot.

use crate::error::{SyncError, SyncResult};
use crate::store::SyncStore;
use async_trait::async_trait;
use parking_lot::RwLock;
use possync_protocol::{row_id, RetryKind, RetryRecord, Row, SyncCursor, UpsertBatch};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

/// A stored row and its sync flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRow {
    /// Row contents.
    pub row: Row,
    /// False while the row has local changes not yet accepted by the server.
    pub synced: bool,
}

/// Serializable state of a [`MemoryStore`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    /// Rows per table, keyed by row id.
    #[serde(default)]
    pub tables: BTreeMap<String, BTreeMap<String, StoredRow>>,
    /// Pull cursors per table.
    #[serde(default)]
    pub cursors: BTreeMap<String, SyncCursor>,
    /// Retry queue.
    #[serde(default)]
    pub retries: Vec<RetryRecord>,
    /// Next retry record id.
    #[serde(default)]
    pub next_retry_id: u64,
    /// When each table was last fully pushed.
    #[serde(default)]
    pub table_synced_at: BTreeMap<String, String>,
}

/// An in-memory [`SyncStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<StoreSnapshot>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store from a snapshot.
    pub fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        Self {
            inner: RwLock::new(snapshot),
        }
    }

    /// Loads a JSON snapshot file; a missing file yields an empty store.
    pub fn load(path: &Path) -> SyncResult<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let bytes = std::fs::read(path)?;
        Ok(Self::from_snapshot(serde_json::from_slice(&bytes)?))
    }

    /// Writes the store to a JSON snapshot file.
    pub fn save(&self, path: &Path) -> SyncResult<()> {
        let bytes = serde_json::to_vec_pretty(&*self.inner.read())?;
        std::fs::write(path, bytes)?;
        Ok(())
    }

    /// Returns a copy of the current state.
    pub fn snapshot(&self) -> StoreSnapshot {
        self.inner.read().clone()
    }

    /// Inserts or replaces a row changed locally (unsynced).
    pub fn insert_local(&self, table: &str, row: Row) -> SyncResult<()> {
        let id = row_id(&row).ok_or_else(|| SyncError::store(format!("row in {} has no id", table)))?;
        self.inner
            .write()
            .tables
            .entry(table.to_string())
            .or_default()
            .insert(id, StoredRow { row, synced: false });
        Ok(())
    }

    /// Returns a row by id.
    pub fn row(&self, table: &str, id: &str) -> Option<StoredRow> {
        self.inner.read().tables.get(table)?.get(id).cloned()
    }

    /// Returns every row of a table, ordered by id.
    pub fn rows(&self, table: &str) -> Vec<StoredRow> {
        self.inner
            .read()
            .tables
            .get(table)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns the ids of unsynced rows, ordered by id.
    pub fn unsynced_ids(&self, table: &str) -> Vec<String> {
        self.inner
            .read()
            .tables
            .get(table)
            .map(|rows| {
                rows.iter()
                    .filter(|(_, stored)| !stored.synced)
                    .map(|(id, _)| id.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Returns the cursor of a table.
    pub fn cursor(&self, table: &str) -> Option<SyncCursor> {
        self.inner.read().cursors.get(table).cloned()
    }

    /// Returns every retry record.
    pub fn retries(&self) -> Vec<RetryRecord> {
        self.inner.read().retries.clone()
    }

    /// Returns when the table was last fully pushed.
    pub fn table_synced_at(&self, table: &str) -> Option<String> {
        self.inner.read().table_synced_at.get(table).cloned()
    }

    fn merge(rows: &mut BTreeMap<String, StoredRow>, id: String, row: Row, synced: Option<bool>) {
        match rows.get_mut(&id) {
            Some(stored) => {
                stored.row.extend(row);
                if let Some(synced) = synced {
                    stored.synced = synced;
                }
            }
            None => {
                rows.insert(
                    id,
                    StoredRow {
                        row,
                        synced: synced.unwrap_or(false),
                    },
                );
            }
        }
    }
}

#[async_trait]
impl SyncStore for MemoryStore {
    async fn count_unsynced_rows(&self, table: &str) -> SyncResult<u64> {
        Ok(self.unsynced_ids(table).len() as u64)
    }

    async fn get_unsynced_rows(&self, table: &str, limit: u32, offset: u64) -> SyncResult<Vec<Row>> {
        let inner = self.inner.read();
        Ok(inner
            .tables
            .get(table)
            .map(|rows| {
                rows.values()
                    .filter(|stored| !stored.synced)
                    .skip(offset as usize)
                    .take(limit as usize)
                    .map(|stored| stored.row.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn upsert_many(&self, batch: UpsertBatch) -> SyncResult<()> {
        let cursor = batch.cursor();
        let mut inner = self.inner.write();
        let rows = inner.tables.entry(batch.table.clone()).or_default();
        for row in batch.rows {
            let id = row_id(&row)
                .ok_or_else(|| SyncError::store(format!("pulled row in {} has no id", batch.table)))?;
            Self::merge(rows, id, row, Some(true));
        }
        inner.cursors.insert(batch.table, cursor);
        Ok(())
    }

    async fn mark_rows_as_synced(&self, table: &str, ids: &[String]) -> SyncResult<()> {
        let mut inner = self.inner.write();
        if let Some(rows) = inner.tables.get_mut(table) {
            for id in ids {
                if let Some(stored) = rows.get_mut(id) {
                    stored.synced = true;
                }
            }
        }
        Ok(())
    }

    async fn mark_table_as_synced(&self, table: &str) -> SyncResult<()> {
        self.inner
            .write()
            .table_synced_at
            .insert(table.to_string(), chrono::Utc::now().to_rfc3339());
        Ok(())
    }

    async fn add_retry(&self, table: &str, payload: Value, error: &str, kind: RetryKind) -> SyncResult<()> {
        let mut inner = self.inner.write();
        inner.next_retry_id += 1;
        let id = inner.next_retry_id;
        inner.retries.push(RetryRecord {
            id,
            table: table.to_string(),
            payload,
            error: error.to_string(),
            kind,
            attempts: 0,
        });
        Ok(())
    }

    async fn get_retries(&self, table: &str) -> SyncResult<Vec<RetryRecord>> {
        Ok(self
            .inner
            .read()
            .retries
            .iter()
            .filter(|r| r.table == table)
            .cloned()
            .collect())
    }

    async fn remove_retry(&self, id: u64) -> SyncResult<()> {
        self.inner.write().retries.retain(|r| r.id != id);
        Ok(())
    }

    async fn increment_retry(&self, id: u64) -> SyncResult<()> {
        let mut inner = self.inner.write();
        let record = inner
            .retries
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| SyncError::store(format!("no retry record {}", id)))?;
        record.attempts += 1;
        Ok(())
    }

    /// Merges the row into any existing row with the same id, keeping its
    /// sync flag. New rows start unsynced.
    async fn upsert(&self, table: &str, row: Row) -> SyncResult<()> {
        let id = row_id(&row).ok_or_else(|| SyncError::store(format!("row in {} has no id", table)))?;
        let mut inner = self.inner.write();
        Self::merge(inner.tables.entry(table.to_string()).or_default(), id, row, None);
        Ok(())
    }

    async fn get_last_sync(&self, table: &str) -> SyncResult<Option<SyncCursor>> {
        Ok(self.cursor(table))
    }
}
