//! Validate command implementation.

use super::read_json;
use possync_schema::SchemaRegistry;
use serde::Serialize;
use serde_json::Value;
use std::path::Path;

/// Validation result of a rows file.
#[derive(Debug, Serialize)]
pub struct ValidateResult {
    /// Table the rows were checked against.
    pub table: String,
    /// Number of rows checked.
    pub rows: usize,
    /// Rows after coercion.
    pub coerced: Vec<Value>,
}

/// Extracts the rows of a file: a bare array, a pull page (`{"data": [...]}`)
/// or a single row object.
pub(crate) fn page_rows(value: Value) -> Result<Vec<Value>, String> {
    match value {
        Value::Array(rows) => Ok(rows),
        Value::Object(mut object) => match object.remove("data") {
            Some(Value::Array(rows)) => Ok(rows),
            Some(_) => Err("\"data\" must be an array".into()),
            None => Ok(vec![Value::Object(object)]),
        },
        _ => Err("expected an array of rows, a page object or a row".into()),
    }
}

/// Runs the validate command.
pub fn run(table: &str, file: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let rows = page_rows(read_json(file)?)?;
    let registry = SchemaRegistry::pos();

    let coerced = registry.validate(table, &rows).map_err(|e| {
        for issue in e.issues() {
            eprintln!("  {} [{}]: {}", issue.path, issue.code, issue.message);
        }
        e
    })?;

    let result = ValidateResult {
        table: table.to_string(),
        rows: rows.len(),
        coerced: coerced.into_iter().map(Value::Object).collect(),
    };
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => println!("{}: {} rows valid", result.table, result.rows),
    }
    Ok(())
}
