//! Status stream emitted towards the UI.

use serde::{Deserialize, Serialize};

/// A status event produced during a sync run.
///
/// Events are emitted in the order the work completes. An `Error` without a
/// table is a run-level failure; with a table it reports one phase of that
/// table and the run carries on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SyncEvent {
    /// The run started.
    #[serde(rename = "start")]
    Start,
    /// The push phase of a table started.
    #[serde(rename = "push:table")]
    PushTable {
        /// Table name.
        table: String,
    },
    /// The pull phase of a table started.
    #[serde(rename = "pull:table")]
    PullTable {
        /// Table name.
        table: String,
    },
    /// Overall progress, 0 to 100.
    #[serde(rename = "progress")]
    Progress {
        /// Rounded percentage.
        percent: u8,
        /// Table whose page produced this update.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        table: Option<String>,
    },
    /// Something failed.
    #[serde(rename = "error")]
    Error {
        /// Affected table, `None` for run-level failures.
        #[serde(default)]
        table: Option<String>,
        /// Human readable message.
        message: String,
    },
    /// The run finished.
    #[serde(rename = "done")]
    Done,
}

impl SyncEvent {
    /// Creates a run-level error event.
    pub fn fatal(message: impl Into<String>) -> Self {
        SyncEvent::Error {
            table: None,
            message: message.into(),
        }
    }

    /// Creates a table-scoped error event.
    pub fn table_error(table: impl Into<String>, message: impl Into<String>) -> Self {
        SyncEvent::Error {
            table: Some(table.into()),
            message: message.into(),
        }
    }

    /// Returns true if this event ends a run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SyncEvent::Done | SyncEvent::Error { table: None, .. })
    }
}
