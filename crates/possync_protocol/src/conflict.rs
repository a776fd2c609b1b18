//! Conflict resolution between a local and a server version of a row.
//!
//! The policy is last-writer-wins with a version tiebreak:
//! 1. local `updated_date` newer than the server's: local wins
//! 2. otherwise local `row_version` greater than the server's: local wins
//! 3. otherwise the server row wins unchanged
//!
//! A local win overlays the local fields on top of the server row, so
//! fields only the server knows about survive.

use crate::row::Row;
use chrono::{DateTime, NaiveDateTime};
use serde_json::Value;
use std::cmp::Ordering;

/// Outcome of comparing two versions of a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictResolution {
    /// Local version wins (merged over the server row).
    KeepLocal,
    /// Server version wins as-is.
    AcceptRemote,
}

/// Decides which version of a row wins.
pub fn decide(local: &Row, server: &Row) -> ConflictResolution {
    if compare_dates(local.get("updated_date"), server.get("updated_date"))
        == Some(Ordering::Greater)
    {
        return ConflictResolution::KeepLocal;
    }
    if compare_versions(local.get("row_version"), server.get("row_version"))
        == Some(Ordering::Greater)
    {
        return ConflictResolution::KeepLocal;
    }
    ConflictResolution::AcceptRemote
}

/// Resolves a conflict and returns the winning row.
pub fn resolve(local: &Row, server: &Row) -> Row {
    match decide(local, server) {
        ConflictResolution::KeepLocal => {
            let mut merged = server.clone();
            for (key, value) in local {
                merged.insert(key.clone(), value.clone());
            }
            merged
        }
        ConflictResolution::AcceptRemote => server.clone(),
    }
}

fn compare_dates(a: Option<&Value>, b: Option<&Value>) -> Option<Ordering> {
    match (a?, b?) {
        (Value::String(a), Value::String(b)) => match (parse_timestamp(a), parse_timestamp(b)) {
            (Some(a), Some(b)) => Some(a.cmp(&b)),
            _ => Some(a.cmp(b)),
        },
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        _ => None,
    }
}

fn compare_versions(a: Option<&Value>, b: Option<&Value>) -> Option<Ordering> {
    as_number(a?)?.partial_cmp(&as_number(b?)?)
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        _ => None,
    }
}

/// Parses RFC 3339 or `YYYY-MM-DD HH:MM:SS` (treated as UTC) into epoch millis.
fn parse_timestamp(s: &str) -> Option<i64> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp_millis());
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
        .ok()
        .map(|dt| dt.and_utc().timestamp_millis())
}
