//! possync CLI
//!
//! Developer tools that drive the sync runtime against a JSON snapshot
//! datastore.
//!
//! # Commands
//!
//! - `validate` - Validate a page of rows against a table schema
//! - `resolve` - Resolve a conflict between a local and a server row
//! - `sync` - Run one sync (or replay the retry queue) for a snapshot
//! - `images` - Download missing product images for a snapshot

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Offline-first POS sync tools.
#[derive(Parser)]
#[command(name = "possync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    /// Output format (text, json)
    #[arg(global = true, short, long, default_value = "text")]
    format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a page of rows against a table schema
    Validate {
        /// Table whose schema applies
        #[arg(short, long)]
        table: String,

        /// JSON file: an array of rows, a pull page or a single row
        file: PathBuf,
    },

    /// Resolve a conflict between two versions of a row
    Resolve {
        /// JSON file holding the local row
        local: PathBuf,

        /// JSON file holding the server row
        server: PathBuf,
    },

    /// Run one sync against the remote API
    Sync {
        /// Snapshot datastore, created if missing
        #[arg(short, long)]
        snapshot: PathBuf,

        /// Base URL of the remote API
        #[arg(long)]
        api_url: String,

        /// Registered device id
        #[arg(long)]
        device_id: Option<String>,

        /// Branch of the device
        #[arg(long)]
        branch_id: Option<String>,

        /// Comma separated tables (default: every POS table)
        #[arg(long, value_delimiter = ',')]
        tables: Vec<String>,

        /// Bearer token
        #[arg(long)]
        token: Option<String>,

        /// Rows per pull page
        #[arg(long)]
        pull_limit: Option<u32>,

        /// Rows per push page
        #[arg(long)]
        push_limit: Option<u32>,

        /// Replay the retry queue instead of syncing
        #[arg(long)]
        replay_retries: bool,
    },

    /// Download missing product images
    Images {
        /// Snapshot datastore
        #[arg(short, long)]
        snapshot: PathBuf,

        /// Directory images are stored in
        #[arg(long)]
        storage: PathBuf,

        /// Per-download timeout in seconds
        #[arg(long, default_value = "30")]
        timeout: u64,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Validate { table, file } => {
            commands::validate::run(&table, &file, &cli.format)?;
        }
        Commands::Resolve { local, server } => {
            commands::resolve::run(&local, &server, &cli.format)?;
        }
        Commands::Sync {
            snapshot,
            api_url,
            device_id,
            branch_id,
            tables,
            token,
            pull_limit,
            push_limit,
            replay_retries,
        } => {
            let options = commands::sync::SyncOptions {
                snapshot,
                api_url,
                device_id,
                branch_id,
                tables,
                token,
                pull_limit,
                push_limit,
                replay_retries,
            };
            commands::sync::run(&options, &cli.format)?;
        }
        Commands::Images {
            snapshot,
            storage,
            timeout,
        } => {
            commands::images::run(&snapshot, &storage, Duration::from_secs(timeout), &cli.format)?;
        }
        Commands::Version => {
            println!("possync CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Tables: {}", possync_schema::POS_TABLES.join(", "));
        }
    }

    Ok(())
}
