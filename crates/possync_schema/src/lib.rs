//! # possync schema
//!
//! Guards the pull write path: every page of rows received from the remote
//! API is decoded against its table's schema before it reaches the local
//! datastore.
//!
//! This crate provides:
//! - Field kinds and their coercion rules (wire type to storage type)
//! - `TableSchema`, a declarative list of fields for one table
//! - `SchemaRegistry`, a table-keyed registry of row decoders
//! - The built-in point-of-sale table catalog
//!
//! Validation is fail-closed: one bad row rejects the whole page.
//!
//! ```
//! use possync_schema::SchemaRegistry;
//! use serde_json::json;
//!
//! let registry = SchemaRegistry::pos();
//! let rows = registry
//!     .validate("clients", &[json!({"id": "c1", "name": "Ana", "approved": "1"})])
//!     .unwrap();
//! assert_eq!(rows[0]["approved"], 1);
//! assert_eq!(rows[0]["sync_status"], "synced");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod coerce;
mod error;
mod schema;
mod tables;

pub use coerce::{to_flag, to_json_string, to_number};
pub use error::{FieldIssue, SchemaError, SchemaResult};
pub use schema::{FieldKind, FieldSpec, SchemaRegistry, TableSchema};
pub use tables::POS_TABLES;
