//! # possync engine
//!
//! Bidirectional synchronization between a local POS datastore and the
//! remote multi-tenant API.
//!
//! This crate provides:
//! - The sync engine (per table: cursor-based pull, then paginated push)
//! - The datastore port (`SyncStore`) and an in-memory implementation
//! - The remote API port (`RemoteApi`) with an HTTP client and a mock
//! - Progress accounting and the retry queue
//!
//! ## Architecture
//!
//! Tables are processed sequentially in the configured order, pull before
//! push. Failures are isolated per table and per phase:
//! - transport errors write a retry record and end the current phase
//! - validation errors end the pull phase without a retry record
//! - partial push failures write one retry record for the page
//!
//! ## Key Invariants
//!
//! - A table's cursor advances only together with the rows of its page
//! - A pushed row is marked synced only when the server names it
//! - Progress never decreases within a run and never exceeds 100

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod engine;
mod error;
mod http;
mod memory;
mod progress;
mod store;
mod transport;

pub use config::{SyncConfig, DEFAULT_BOOTSTRAP_TIMESTAMP};
pub use engine::{CancelHandle, PushReport, RetryReport, RunSummary, SyncEngine, TableReport};
pub use error::{SyncError, SyncResult};
pub use http::HttpRemote;
pub use memory::{MemoryStore, StoreSnapshot, StoredRow};
pub use progress::ProgressTracker;
pub use store::SyncStore;
pub use transport::{MockRemote, PullScript, PushScript, RemoteApi, RemoteCall};
