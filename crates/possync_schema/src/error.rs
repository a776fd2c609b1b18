//! Error types for schema validation.

use serde::Serialize;
use thiserror::Error;

/// Result type for schema operations.
pub type SchemaResult<T> = Result<T, SchemaError>;

/// One field that failed its schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldIssue {
    /// `<row index>.<field>`, or just the row index for row-level issues.
    pub path: String,
    /// What went wrong.
    pub message: String,
    /// Machine readable issue code.
    pub code: String,
}

impl FieldIssue {
    /// Creates an `invalid_type` issue.
    pub fn invalid_type(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
            code: "invalid_type".into(),
        }
    }
}

/// Errors raised while validating a page of rows.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    /// The table has no registered schema.
    #[error("No schema defined for table: {0}")]
    UnknownTable(String),

    /// One or more rows failed their schema.
    #[error("validation failed for table {table}: {}", render_issues(.issues))]
    Validation {
        /// Table being validated.
        table: String,
        /// Every failing field across the page.
        issues: Vec<FieldIssue>,
    },
}

impl SchemaError {
    /// Returns the field issues, empty for unknown tables.
    pub fn issues(&self) -> &[FieldIssue] {
        match self {
            SchemaError::UnknownTable(_) => &[],
            SchemaError::Validation { issues, .. } => issues,
        }
    }
}

fn render_issues(issues: &[FieldIssue]) -> String {
    serde_json::to_string(issues).unwrap_or_else(|_| format!("{} issue(s)", issues.len()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_table_message() {
        let err = SchemaError::UnknownTable("widgets".into());
        assert_eq!(err.to_string(), "No schema defined for table: widgets");
        assert!(err.issues().is_empty());
    }

    #[test]
    fn validation_message_lists_issues() {
        let err = SchemaError::Validation {
            table: "clients".into(),
            issues: vec![FieldIssue::invalid_type("0.name", "Required")],
        };
        let msg = err.to_string();
        assert!(msg.starts_with("validation failed for table clients: "));
        assert!(msg.contains(r#""path":"0.name""#));
        assert!(msg.contains(r#""code":"invalid_type""#));
    }
}
