//! CLI command implementations.

pub mod images;
pub mod resolve;
pub mod sync;
pub mod validate;

use serde_json::Value;
use std::path::Path;

/// Reads and parses a JSON file.
pub(crate) fn read_json(path: &Path) -> Result<Value, Box<dyn std::error::Error>> {
    let text = std::fs::read_to_string(path).map_err(|e| format!("Cannot read {}: {}", path.display(), e))?;
    Ok(serde_json::from_str(&text).map_err(|e| format!("Invalid JSON in {}: {}", path.display(), e))?)
}
