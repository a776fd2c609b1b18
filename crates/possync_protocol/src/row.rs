//! Row representation.

use serde_json::{Map, Value};

/// A table row as exchanged with the remote API and the local datastore.
pub type Row = Map<String, Value>;

/// Column carrying a row's synchronization status.
pub const SYNC_STATUS_FIELD: &str = "sync_status";

/// Sentinel written into [`SYNC_STATUS_FIELD`] for rows accepted from the server.
pub const SYNCED: &str = "synced";

/// Returns the row's `id` as a string.
///
/// Numeric ids are stringified so that ids coming back from the server
/// compare equal to the ids stored locally.
pub fn row_id(row: &Row) -> Option<String> {
    match row.get("id")? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
