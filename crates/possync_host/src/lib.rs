//! # possync host
//!
//! Host-side runtime for possync.
//!
//! This crate provides:
//! - The RPC bridge between isolated workers and the local datastore
//! - The sync worker (one engine per run on its own thread)
//! - The sync manager (run state machine, status relay, scheduler)
//! - The network monitor
//! - Product image sync (controller and worker)
//!
//! ## Architecture
//!
//! ```text
//! NetworkMonitor ──online/offline──> SyncManager ──spawn──> SyncWorker
//!                                        ^   │                  │
//!                       StoreCommand/reply   └── SyncEvent ──> subscribers
//!                                        └──────────────────────┘
//! ```
//!
//! Row sync and image sync each admit one run at a time; they may run
//! concurrently with each other.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
pub mod images;
mod manager;
mod network;
mod rpc;
mod worker;

pub use config::{HostConfig, DEFAULT_PROBE_URL};
pub use manager::{RunState, SyncManager};
pub use network::{ConnectivityProbe, HttpProbe, NetworkEvent, NetworkMonitor, NetworkStatus, ScriptedProbe};
pub use rpc::{dispatch, serve, HostMessage, PendingReplies, RpcOutcome, RpcStore, StoreCommand, StoreReply, WorkerMessage};
pub use worker::{
    HttpConnector, RemoteConnector, SyncWorker, WorkerHandle, WorkerMode, WorkerOutput, WorkerStart,
};
