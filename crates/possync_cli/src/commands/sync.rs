//! Sync command implementation.
//!
//! Loads a snapshot datastore, runs one sync (or a retry replay) through
//! an isolated worker and saves the snapshot back, even when the run fails.

use possync_engine::{MemoryStore, RetryReport, RunSummary, SyncConfig, SyncResult};
use possync_host::{HostConfig, HttpConnector, RemoteConnector, SyncManager};
use possync_protocol::SyncEvent;
use possync_schema::POS_TABLES;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::{error::RecvError, Receiver};
use tracing::{debug, info, warn};

/// Options of the sync command.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Snapshot datastore file.
    pub snapshot: PathBuf,
    /// Base URL of the remote API.
    pub api_url: String,
    /// Registered device id.
    pub device_id: Option<String>,
    /// Branch of the device.
    pub branch_id: Option<String>,
    /// Tables to sync; empty means every POS table.
    pub tables: Vec<String>,
    /// Bearer token.
    pub token: Option<String>,
    /// Pull page size.
    pub pull_limit: Option<u32>,
    /// Push page size.
    pub push_limit: Option<u32>,
    /// Replay the retry queue instead of running a sync.
    pub replay_retries: bool,
}

impl SyncOptions {
    /// Builds the engine configuration.
    pub fn config(&self) -> SyncConfig {
        let mut config = SyncConfig::new(&self.api_url);
        if let (Some(device), Some(branch)) = (&self.device_id, &self.branch_id) {
            config = config.with_device(device, branch);
        }
        config = if self.tables.is_empty() {
            config.with_tables(POS_TABLES.iter().copied())
        } else {
            config.with_tables(self.tables.iter().cloned())
        };
        if let Some(token) = &self.token {
            config = config.with_auth_token(token);
        }
        if let Some(limit) = self.pull_limit {
            config = config.with_pull_limit(limit);
        }
        if let Some(limit) = self.push_limit {
            config = config.with_push_limit(limit);
        }
        config
    }
}

/// Per-table line of a sync result.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct TableLine {
    /// Table name.
    pub table: String,
    /// Rows pulled.
    pub pulled: u64,
    /// Rows pushed.
    pub pushed: u64,
    /// Rows the server did not accept.
    pub failed: u64,
    /// Retry records written.
    pub retries_recorded: u32,
    /// First error of the table, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of a sync run.
#[derive(Debug, Serialize)]
pub struct SyncOutput {
    /// Whether the run was cancelled.
    pub cancelled: bool,
    /// Final progress percentage.
    pub progress: u8,
    /// Wall time in milliseconds.
    pub duration_ms: u128,
    /// Per-table outcome.
    pub tables: Vec<TableLine>,
}

impl From<RunSummary> for SyncOutput {
    fn from(summary: RunSummary) -> Self {
        let tables = summary
            .tables
            .into_iter()
            .map(|t| TableLine {
                error: t
                    .pull_error
                    .or(t.push_error)
                    .or_else(|| t.skipped.then(|| "skipped".to_string())),
                table: t.table,
                pulled: t.pulled,
                pushed: t.pushed,
                failed: t.failed,
                retries_recorded: t.retries_recorded,
            })
            .collect();
        Self {
            cancelled: summary.cancelled,
            progress: summary.progress,
            duration_ms: summary.duration.as_millis(),
            tables,
        }
    }
}

/// What a command execution produced.
#[derive(Debug)]
pub enum Outcome {
    /// A sync run finished.
    Sync(RunSummary),
    /// The retry queue was replayed.
    Retries(BTreeMap<String, RetryReport>),
}

/// Runs the sync command.
pub fn run(options: &SyncOptions, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(MemoryStore::load(&options.snapshot)?);
    let runtime = tokio::runtime::Runtime::new()?;
    let outcome = runtime.block_on(execute(
        options.config(),
        Arc::clone(&store),
        HttpConnector,
        options.replay_retries,
    ));
    store.save(&options.snapshot)?;
    debug!(snapshot = %options.snapshot.display(), "snapshot saved");

    match outcome? {
        Outcome::Sync(summary) => print_summary(SyncOutput::from(summary), format)?,
        Outcome::Retries(reports) => print_retries(&reports, format)?,
    }
    Ok(())
}

/// Runs one manager execution against `store`, logging its events.
pub(crate) async fn execute<C: RemoteConnector>(
    config: SyncConfig,
    store: Arc<MemoryStore>,
    connector: C,
    replay_retries: bool,
) -> SyncResult<Outcome> {
    let manager = SyncManager::new(config, HostConfig::default(), store, connector);
    let relay = tokio::spawn(log_events(manager.subscribe()));

    let outcome = if replay_retries {
        manager.replay_retries().await.map(Outcome::Retries)
    } else {
        manager.run_once().await.map(Outcome::Sync)
    };

    drop(manager);
    let _ = relay.await;
    outcome
}

async fn log_events(mut events: Receiver<SyncEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => {
                match &event {
                    SyncEvent::Start => info!("sync started"),
                    SyncEvent::PullTable { table } => info!(%table, "pulling"),
                    SyncEvent::PushTable { table } => info!(%table, "pushing"),
                    SyncEvent::Progress { percent, .. } => debug!(percent, "progress"),
                    SyncEvent::Error { table, message } => {
                        warn!(table = table.as_deref().unwrap_or("-"), %message, "sync error")
                    }
                    SyncEvent::Done => info!("sync finished"),
                }
                if event.is_terminal() {
                    break;
                }
            }
            Err(RecvError::Lagged(skipped)) => debug!(skipped, "status events dropped"),
            Err(RecvError::Closed) => break,
        }
    }
}

fn print_summary(output: SyncOutput, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&output)?),
        _ => {
            println!(
                "Sync {} in {} ms ({}%)",
                if output.cancelled { "cancelled" } else { "finished" },
                output.duration_ms,
                output.progress
            );
            for t in &output.tables {
                print!(
                    "  {:<24} pulled {:>6}  pushed {:>6}  failed {:>4}",
                    t.table, t.pulled, t.pushed, t.failed
                );
                match &t.error {
                    Some(error) => println!("  error: {}", error),
                    None => println!(),
                }
            }
        }
    }
    Ok(())
}

fn print_retries(reports: &BTreeMap<String, RetryReport>, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    match format {
        "json" => {
            let value: BTreeMap<&str, serde_json::Value> = reports
                .iter()
                .map(|(table, r)| {
                    (
                        table.as_str(),
                        serde_json::json!({
                            "replayed": r.replayed,
                            "removed": r.removed,
                            "failed": r.failed,
                        }),
                    )
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        _ => {
            println!("Retry replay:");
            for (table, r) in reports {
                println!(
                    "  {:<24} replayed {:>4}  removed {:>4}  failed {:>4}",
                    table, r.replayed, r.removed, r.failed
                );
            }
        }
    }
    Ok(())
}
