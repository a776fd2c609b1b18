//! Records persisted by the local datastore on behalf of the sync engine.

use crate::row::Row;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Pull position for one table.
///
/// Written only by the pull phase, together with the rows of the page that
/// produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCursor {
    /// Timestamp half of the cursor.
    pub last_sync: String,
    /// Tie-breaking id half of the cursor.
    pub next_id: Option<String>,
}

impl SyncCursor {
    /// Creates a cursor.
    pub fn new(last_sync: impl Into<String>, next_id: Option<String>) -> Self {
        Self {
            last_sync: last_sync.into(),
            next_id,
        }
    }
}

/// Validated rows plus the cursor they advance to, applied as one operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpsertBatch {
    /// Target table.
    pub table: String,
    /// Rows in storage format.
    pub rows: Vec<Row>,
    /// New cursor timestamp.
    pub last_sync: String,
    /// New cursor id.
    pub next_id: Option<String>,
}

impl UpsertBatch {
    /// Returns the cursor this batch advances to.
    pub fn cursor(&self) -> SyncCursor {
        SyncCursor::new(self.last_sync.clone(), self.next_id.clone())
    }
}

/// Which phase produced a retry record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RetryKind {
    /// A push page failed; the payload holds the rows.
    Push,
    /// A pull page failed; the payload holds the cursor context.
    Pull,
}

impl RetryKind {
    /// Returns the kind as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            RetryKind::Push => "Push",
            RetryKind::Pull => "Pull",
        }
    }
}

/// A persisted description of a failed sync operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryRecord {
    /// Datastore assigned id.
    pub id: u64,
    /// Table the failure belongs to.
    pub table: String,
    /// Serialized rows (push) or cursor context (pull).
    pub payload: Value,
    /// Error text at the time of failure.
    pub error: String,
    /// Phase that failed.
    #[serde(rename = "type")]
    pub kind: RetryKind,
    /// Number of replay attempts so far.
    #[serde(default)]
    pub attempts: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn retry_record_wire_shape() {
        let record = RetryRecord {
            id: 7,
            table: "clients".into(),
            payload: json!([{"id": "a"}]),
            error: "timeout".into(),
            kind: RetryKind::Push,
            attempts: 0,
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["type"], "Push");
        assert_eq!(value["attempts"], 0);
    }

    #[test]
    fn batch_cursor() {
        let batch = UpsertBatch {
            table: "products".into(),
            rows: vec![],
            last_sync: "2024-03-01T00:00:00Z".into(),
            next_id: Some("p9".into()),
        };
        assert_eq!(
            batch.cursor(),
            SyncCursor::new("2024-03-01T00:00:00Z", Some("p9".into()))
        );
    }
}
