//! Remote API messages.
//!
//! The remote API speaks JSON over HTTP:
//! - pull: `GET /{table}?lastSync&lastId&limit&deviceId&branchId`
//! - push: `POST /{table}` with the rows as the request body

use crate::row::Row;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Parameters of a single pull page request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequest {
    /// Timestamp half of the cursor.
    pub last_sync: String,
    /// Tie-breaking id half of the cursor.
    pub last_id: Option<String>,
    /// Maximum number of rows to return.
    pub limit: u32,
    /// Device performing the sync.
    pub device_id: String,
    /// Branch the device belongs to.
    pub branch_id: String,
}

impl PullRequest {
    /// Returns the request as URL query pairs, in wire order.
    ///
    /// A missing `lastId` is sent as an empty string.
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        vec![
            ("lastSync", self.last_sync.clone()),
            ("lastId", self.last_id.clone().unwrap_or_default()),
            ("limit", self.limit.to_string()),
            ("deviceId", self.device_id.clone()),
            ("branchId", self.branch_id.clone()),
        ]
    }
}

/// One page of rows returned by the pull endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PullPage {
    /// Rows in wire format.
    #[serde(default)]
    pub data: Vec<Value>,
    /// Whether another page is available after this one.
    #[serde(default)]
    pub has_more: bool,
    /// Timestamp half of the cursor for the next page.
    #[serde(default)]
    pub next_cursor: Option<String>,
    /// Id half of the cursor for the next page.
    #[serde(default, deserialize_with = "deserialize_opt_id")]
    pub next_id: Option<String>,
    /// Server clock at the time the page was produced.
    #[serde(default)]
    pub server_timestamp: Option<String>,
}

impl PullPage {
    /// Creates a page with the given rows and continuation flag.
    pub fn new(data: Vec<Value>, has_more: bool) -> Self {
        Self {
            data,
            has_more,
            ..Self::default()
        }
    }

    /// Sets the next cursor pair.
    pub fn with_cursor(mut self, next_cursor: impl Into<String>, next_id: Option<String>) -> Self {
        self.next_cursor = Some(next_cursor.into());
        self.next_id = next_id;
        self
    }

    /// Sets the server timestamp.
    pub fn with_server_timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.server_timestamp = Some(timestamp.into());
        self
    }

    /// Timestamp to persist as `last_sync` after this page.
    ///
    /// Falls back to the server timestamp, then to the cursor the page was
    /// requested with.
    pub fn resume_timestamp(&self, requested: &str) -> String {
        self.next_cursor
            .clone()
            .or_else(|| self.server_timestamp.clone())
            .unwrap_or_else(|| requested.to_string())
    }
}

/// A row the server refused during a push.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedRow {
    /// Id of the refused row, when the server could attribute the failure.
    #[serde(default, deserialize_with = "deserialize_opt_id")]
    pub id: Option<String>,
    /// Server supplied error detail.
    #[serde(default)]
    pub error: Value,
}

/// Response of the push endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PushOutcome {
    /// Ids of rows the server accepted.
    #[serde(default, deserialize_with = "deserialize_ids")]
    pub success: Vec<String>,
    /// Rows the server refused.
    #[serde(default)]
    pub failed: Vec<FailedRow>,
}

impl PushOutcome {
    /// Creates an outcome where every given id succeeded.
    pub fn accepted<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            success: ids.into_iter().map(Into::into).collect(),
            failed: Vec::new(),
        }
    }

    /// Adds a failed row.
    pub fn with_failure(mut self, id: Option<&str>, error: impl Into<Value>) -> Self {
        self.failed.push(FailedRow {
            id: id.map(str::to_string),
            error: error.into(),
        });
        self
    }

    /// Returns the subset of `rows` whose ids the server accepted, by id.
    pub fn succeeded_ids(&self, rows: &[Row]) -> Vec<String> {
        rows.iter()
            .filter_map(crate::row::row_id)
            .filter(|id| self.success.contains(id))
            .collect()
    }

    /// Joins the failure details into one message.
    pub fn failure_summary(&self) -> String {
        self.failed
            .iter()
            .map(|f| {
                let detail = match &f.error {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                match &f.id {
                    Some(id) => format!("{}: {}", id, detail),
                    None => detail,
                }
            })
            .collect::<Vec<_>>()
            .join("; ")
    }
}

fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn deserialize_ids<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let values = Option::<Vec<Value>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(values.iter().filter_map(id_string).collect())
}

fn deserialize_opt_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(id_string))
}
