//! Table schemas and the row decoder registry.

use crate::coerce::{to_date, to_flag, to_id, to_json_string, to_number, to_text};
use crate::error::{FieldIssue, SchemaError, SchemaResult};
use possync_protocol::{Row, SYNCED, SYNC_STATUS_FIELD};
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

/// How a field is decoded from wire format to storage format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Required identifier; numbers are stringified.
    Id,
    /// Required text; scalars are stringified.
    Text,
    /// Nullable text.
    OptionalText,
    /// Number or numeric string; invalid or missing becomes `0`.
    Number,
    /// Boolean-ish value stored as `1`/`0`.
    Flag,
    /// Arbitrary value stored as a serialized JSON string.
    Json,
    /// Nullable date-like value kept as-is.
    Date,
    /// Synchronization status, always stored as `"synced"`.
    SyncStatus,
}

impl FieldKind {
    /// Decodes one field value. `None` means the field was absent.
    fn decode(&self, value: Option<&Value>) -> Result<Value, &'static str> {
        let value = value.unwrap_or(&Value::Null);
        match self {
            FieldKind::Id => to_id(value),
            FieldKind::Text => to_text(value),
            FieldKind::OptionalText => match value {
                Value::Null => Ok(Value::Null),
                other => to_text(other),
            },
            FieldKind::Number => Ok(to_number(value)),
            FieldKind::Flag => Ok(to_flag(value)),
            FieldKind::Json => Ok(to_json_string(value)),
            FieldKind::Date => to_date(value),
            FieldKind::SyncStatus => Ok(Value::from(SYNCED)),
        }
    }
}

/// A declared field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    /// Column name.
    pub name: String,
    /// Decoding rule.
    pub kind: FieldKind,
}

/// Declarative schema for one table.
///
/// Fields not declared here are stripped from decoded rows. A
/// [`SYNC_STATUS_FIELD`] column is always present in the output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    name: String,
    fields: Vec<FieldSpec>,
}

impl TableSchema {
    /// Creates an empty schema.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    /// Adds a field.
    pub fn field(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.push(FieldSpec {
            name: name.into(),
            kind,
        });
        self
    }

    /// Adds several fields of the same kind.
    pub fn fields(mut self, names: &[&str], kind: FieldKind) -> Self {
        for name in names {
            self = self.field(*name, kind);
        }
        self
    }

    /// Table name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared fields, in declaration order.
    pub fn field_specs(&self) -> &[FieldSpec] {
        &self.fields
    }

    /// Decodes one row, appending any problems to `issues`.
    ///
    /// Returns `None` if the row had at least one issue.
    pub fn decode_row(&self, index: usize, value: &Value, issues: &mut Vec<FieldIssue>) -> Option<Row> {
        let Some(input) = value.as_object() else {
            issues.push(FieldIssue::invalid_type(index.to_string(), "Expected object"));
            return None;
        };

        let before = issues.len();
        let mut row = Row::new();
        for spec in &self.fields {
            match spec.kind.decode(input.get(&spec.name)) {
                Ok(decoded) => {
                    row.insert(spec.name.clone(), decoded);
                }
                Err(message) => {
                    issues.push(FieldIssue::invalid_type(
                        format!("{}.{}", index, spec.name),
                        message,
                    ));
                }
            }
        }
        row.insert(SYNC_STATUS_FIELD.to_string(), Value::from(SYNCED));

        (issues.len() == before).then_some(row)
    }

    /// Decodes a page of rows. Any failing row rejects the whole page.
    pub fn decode_page(&self, rows: &[Value]) -> SchemaResult<Vec<Row>> {
        let mut issues = Vec::new();
        let decoded: Vec<Row> = rows
            .iter()
            .enumerate()
            .filter_map(|(index, value)| self.decode_row(index, value, &mut issues))
            .collect();

        if issues.is_empty() {
            Ok(decoded)
        } else {
            Err(SchemaError::Validation {
                table: self.name.clone(),
                issues,
            })
        }
    }
}

/// Table-keyed registry of row decoders.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    tables: HashMap<String, TableSchema>,
}

impl SchemaRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding the built-in point-of-sale tables.
    pub fn pos() -> Self {
        let mut registry = Self::new();
        for schema in crate::tables::pos_schemas() {
            registry.register(schema);
        }
        registry
    }

    /// Registers (or replaces) a table schema.
    pub fn register(&mut self, schema: TableSchema) {
        self.tables.insert(schema.name.clone(), schema);
    }

    /// Looks up a table schema.
    pub fn get(&self, table: &str) -> Option<&TableSchema> {
        self.tables.get(table)
    }

    /// Returns true if the table has a schema.
    pub fn contains(&self, table: &str) -> bool {
        self.tables.contains_key(table)
    }

    /// Registered table names, sorted.
    pub fn table_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tables.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Validates and transforms a page of wire rows for `table`.
    pub fn validate(&self, table: &str, rows: &[Value]) -> SchemaResult<Vec<Row>> {
        let schema = self
            .get(table)
            .ok_or_else(|| SchemaError::UnknownTable(table.to_string()))?;
        let decoded = schema.decode_page(rows)?;
        debug!(table, rows = decoded.len(), "validated page");
        Ok(decoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> TableSchema {
        TableSchema::new("things")
            .field("id", FieldKind::Id)
            .field("name", FieldKind::Text)
            .field("note", FieldKind::OptionalText)
            .field("price", FieldKind::Number)
            .field("active", FieldKind::Flag)
            .field("meta", FieldKind::Json)
            .field("deleted_at", FieldKind::Date)
            .field(SYNC_STATUS_FIELD, FieldKind::SyncStatus)
    }

    #[test]
    fn decodes_and_strips_extras() {
        let rows = schema()
            .decode_page(&[json!({
                "id": 3,
                "name": "Cola",
                "price": "1.50",
                "active": "true",
                "meta": {"size": "L"},
                "deleted_at": null,
                "sync_status": "pending",
                "extra": "dropped"
            })])
            .unwrap();

        let row = &rows[0];
        assert_eq!(row["id"], "3");
        assert_eq!(row["name"], "Cola");
        assert_eq!(row["note"], Value::Null);
        assert_eq!(row["price"], json!(1.5));
        assert_eq!(row["active"], 1);
        assert_eq!(row["meta"], r#"{"size":"L"}"#);
        assert_eq!(row["deleted_at"], Value::Null);
        assert_eq!(row["sync_status"], "synced");
        assert!(!row.contains_key("extra"));
    }

    #[test]
    fn sync_status_forced_even_when_undeclared() {
        let schema = TableSchema::new("bare").field("id", FieldKind::Id);
        let rows = schema.decode_page(&[json!({"id": "x"})]).unwrap();
        assert_eq!(rows[0]["sync_status"], "synced");
    }

    #[test]
    fn one_bad_row_rejects_page() {
        let err = schema()
            .decode_page(&[
                json!({"id": "ok", "name": "fine"}),
                json!({"id": "bad", "name": {"nested": true}, "deleted_at": 5}),
                json!("not a row"),
            ])
            .unwrap_err();

        let issues = err.issues();
        assert_eq!(issues.len(), 3);
        assert_eq!(issues[0].path, "1.name");
        assert_eq!(issues[0].message, "Expected string, received object");
        assert_eq!(issues[1].path, "1.deleted_at");
        assert_eq!(issues[2].path, "2");
        assert!(issues.iter().all(|i| i.code == "invalid_type"));
    }

    #[test]
    fn missing_required_fields() {
        let err = schema().decode_page(&[json!({"price": 1})]).unwrap_err();
        let paths: Vec<&str> = err.issues().iter().map(|i| i.path.as_str()).collect();
        assert_eq!(paths, vec!["0.id", "0.name"]);
        assert!(err.issues().iter().all(|i| i.message == "Required"));
    }

    #[test]
    fn unknown_table_is_rejected() {
        let registry = SchemaRegistry::new();
        let err = registry.validate("ghosts", &[]).unwrap_err();
        assert_eq!(err, SchemaError::UnknownTable("ghosts".into()));
    }

    #[test]
    fn registry_register_and_lookup() {
        let mut registry = SchemaRegistry::new();
        registry.register(schema());
        assert!(registry.contains("things"));
        assert_eq!(registry.table_names(), vec!["things"]);
        assert!(registry.validate("things", &[]).unwrap().is_empty());
    }
}
