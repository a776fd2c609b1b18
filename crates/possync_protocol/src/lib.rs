//! # possync protocol
//!
//! Shared types for the possync synchronization runtime.
//!
//! This crate provides:
//! - `Row` and row identity helpers
//! - Pull/push request and response types for the remote API
//! - Persistent sync records (`SyncCursor`, `RetryRecord`, `UpsertBatch`)
//! - The UI-facing status stream (`SyncEvent`)
//! - Last-writer-wins conflict resolution
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod conflict;
mod events;
mod messages;
mod records;
mod row;

pub use conflict::{decide, resolve, ConflictResolution};
pub use events::SyncEvent;
pub use messages::{FailedRow, PullPage, PullRequest, PushOutcome};
pub use records::{RetryKind, RetryRecord, SyncCursor, UpsertBatch};
pub use row::{row_id, Row, SYNCED, SYNC_STATUS_FIELD};
