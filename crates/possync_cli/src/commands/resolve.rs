//! Resolve command implementation.

use super::read_json;
use possync_protocol::{decide, resolve, ConflictResolution, Row};
use serde::Serialize;
use serde_json::Value;
use std::path::Path;

/// Conflict resolution result.
#[derive(Debug, Serialize)]
pub struct ResolveResult {
    /// `local` or `server`.
    pub winner: &'static str,
    /// The row that would be stored.
    pub row: Row,
}

fn read_row(path: &Path) -> Result<Row, Box<dyn std::error::Error>> {
    match read_json(path)? {
        Value::Object(row) => Ok(row),
        _ => Err(format!("{} must contain a single JSON object", path.display()).into()),
    }
}

/// Resolves two rows without touching any store.
pub(crate) fn resolve_rows(local: &Row, server: &Row) -> ResolveResult {
    let winner = match decide(local, server) {
        ConflictResolution::KeepLocal => "local",
        ConflictResolution::AcceptRemote => "server",
    };
    ResolveResult {
        winner,
        row: resolve(local, server),
    }
}

/// Runs the resolve command.
pub fn run(local: &Path, server: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let result = resolve_rows(&read_row(local)?, &read_row(server)?);
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => {
            println!("Winner: {}", result.winner);
            println!("{}", serde_json::to_string_pretty(&result.row)?);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn newer_local_row_wins_and_keeps_server_fields() {
        let result = resolve_rows(
            &row(json!({"id": 1, "name": "Local", "updated_date": "2024-05-02T00:00:00Z"})),
            &row(json!({"id": 1, "name": "Server", "phone": "555", "updated_date": "2024-05-01T00:00:00Z"})),
        );
        assert_eq!(result.winner, "local");
        assert_eq!(result.row["name"], "Local");
        assert_eq!(result.row["phone"], "555");
    }

    #[test]
    fn ties_go_to_the_server() {
        let local = row(json!({"id": 1, "name": "Local", "row_version": 2}));
        let server = row(json!({"id": 1, "name": "Server", "row_version": 2}));
        let result = resolve_rows(&local, &server);
        assert_eq!(result.winner, "server");
        assert_eq!(result.row, server);
    }

    #[test]
    fn rejects_non_object_files() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("row.json");
        std::fs::write(&file, "[1, 2]").unwrap();
        assert!(read_row(&file).is_err());
    }
}
