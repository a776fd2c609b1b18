//! Configuration for the sync engine.

use crate::error::{SyncError, SyncResult};
use std::time::Duration;

/// Cursor used for a table that has never been pulled.
pub const DEFAULT_BOOTSTRAP_TIMESTAMP: &str = "1970-01-01T00:00:00.000Z";

/// Configuration for sync operations.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Base URL of the remote API (e.g. "https://api.example.com/sync").
    pub api_base_url: String,
    /// Registered device id.
    pub device_id: Option<String>,
    /// Branch the device belongs to.
    pub branch_id: Option<String>,
    /// Tables to sync, in order.
    pub tables: Vec<String>,
    /// Maximum rows per pull page.
    pub pull_limit: u32,
    /// Maximum rows per push page.
    pub push_limit: u32,
    /// Cursor timestamp for first-time pulls.
    pub bootstrap_timestamp: String,
    /// Per-request timeout enforced by the HTTP client.
    pub request_timeout: Duration,
    /// Bearer token sent with every request.
    pub auth_token: Option<String>,
}

impl SyncConfig {
    /// Creates a new sync configuration.
    pub fn new(api_base_url: impl Into<String>) -> Self {
        Self {
            api_base_url: api_base_url.into(),
            device_id: None,
            branch_id: None,
            tables: Vec::new(),
            pull_limit: 100,
            push_limit: 100,
            bootstrap_timestamp: DEFAULT_BOOTSTRAP_TIMESTAMP.to_string(),
            request_timeout: Duration::from_secs(30),
            auth_token: None,
        }
    }

    /// Sets the device and branch identity.
    pub fn with_device(mut self, device_id: impl Into<String>, branch_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self.branch_id = Some(branch_id.into());
        self
    }

    /// Sets the ordered table list.
    pub fn with_tables<I, S>(mut self, tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tables = tables.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the pull page size.
    pub fn with_pull_limit(mut self, limit: u32) -> Self {
        self.pull_limit = limit;
        self
    }

    /// Sets the push page size.
    pub fn with_push_limit(mut self, limit: u32) -> Self {
        self.push_limit = limit;
        self
    }

    /// Sets the first-sync cursor timestamp.
    pub fn with_bootstrap_timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.bootstrap_timestamp = timestamp.into();
        self
    }

    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the bearer token.
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    /// Returns `(device_id, branch_id)`, or an error if either is missing.
    pub fn device_context(&self) -> SyncResult<(String, String)> {
        match (self.device_id.as_deref(), self.branch_id.as_deref()) {
            (Some(device), Some(branch)) if !device.is_empty() && !branch.is_empty() => {
                Ok((device.to_string(), branch.to_string()))
            }
            _ => Err(SyncError::DeviceNotRegistered),
        }
    }

    /// Number of tables used for progress weighting (at least one).
    pub(crate) fn table_count(&self) -> usize {
        self.tables.len().max(1)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new("")
    }
}
