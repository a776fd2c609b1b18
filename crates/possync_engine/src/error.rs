//! Error types for the sync engine.

use possync_schema::SchemaError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The remote API answered with a non-success status.
    #[error("remote api returned {status}: {body}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// Response body, possibly truncated.
        body: String,
    },

    /// Protocol error (unexpected message format).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Pulled rows failed their table schema.
    #[error(transparent)]
    Validation(#[from] SchemaError),

    /// The local datastore failed.
    #[error("datastore error: {0}")]
    Store(String),

    /// Sync was cancelled.
    #[error("sync cancelled")]
    Cancelled,

    /// Timeout.
    #[error("operation timed out")]
    Timeout,

    /// No device or branch is registered on this terminal.
    #[error("device not registered")]
    DeviceNotRegistered,

    /// A run of this kind is already in progress.
    #[error("a sync run is already in progress")]
    AlreadyRunning,

    /// The isolated worker crashed or exited unexpectedly.
    #[error("worker failed: {0}")]
    WorkerFailed(String),

    /// A channel to or from a worker closed.
    #[error("channel closed")]
    ChannelClosed,

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Creates a datastore error.
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store(message.into())
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Timeout => true,
            SyncError::Http { status, .. } => *status >= 500 || *status == 408 || *status == 429,
            _ => false,
        }
    }

    /// Returns true if this error is a schema validation failure.
    pub fn is_validation(&self) -> bool {
        matches!(self, SyncError::Validation(_))
    }
}
