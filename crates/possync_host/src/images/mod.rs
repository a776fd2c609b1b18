//! Product image synchronization.
//!
//! The [`ImageSyncController`] collects every product with a remote image,
//! hands the whole task list to an isolated [`ImageWorker`], and records a
//! local filename only when the worker reports that task's success.

mod catalog;
mod controller;
mod fetch;
mod worker;

pub use catalog::ImageCatalog;
pub use controller::{ImageSyncController, ImageSyncReport};
pub use fetch::{HttpImageFetcher, ImageFetcher, MockImageFetcher};
pub use worker::{ImageWorker, ImageWorkerHandle};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Column holding a product's remote image URL.
pub const IMAGE_URL_FIELD: &str = "image_url";

/// Local column holding the downloaded image filename.
pub const IMAGE_LOCAL_FIELD: &str = "image_local";

/// One product image to make available locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageTask {
    /// Product id.
    pub product_id: String,
    /// Remote image URL.
    pub remote_url: String,
    /// Filename recorded by a previous download, if any.
    #[serde(default)]
    pub existing_filename: Option<String>,
}

/// Work handed to the image worker in one message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageSyncConfig {
    /// Directory images are stored in.
    pub storage_path: PathBuf,
    /// Tasks, processed in order.
    pub tasks: Vec<ImageTask>,
}

/// Message to the image worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImageCommand {
    /// Process a task list.
    StartSync {
        /// Storage directory and tasks.
        config: ImageSyncConfig,
    },
    /// Stop after the task in progress.
    StopSync,
}

/// Severity of an image worker log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Diagnostic detail.
    Debug,
    /// Normal operation.
    Info,
    /// Something unexpected but recoverable.
    Warn,
    /// A failure.
    Error,
}

/// Message from the image worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImageEvent {
    /// A task's image is stored under `filename`.
    #[serde(rename_all = "camelCase")]
    SyncSuccess {
        /// Product id.
        product_id: String,
        /// Stored filename, relative to the storage directory.
        filename: String,
    },
    /// A task failed.
    #[serde(rename_all = "camelCase")]
    SyncError {
        /// Product id.
        product_id: String,
        /// Failure description.
        error: String,
    },
    /// Emitted after every task.
    SyncProgress {
        /// Tasks handled so far.
        processed: usize,
        /// Tasks in the list.
        total: usize,
    },
    /// Free-form log line.
    Log {
        /// Message text.
        message: String,
        /// Severity.
        level: LogLevel,
    },
    /// The task list is drained or the run was stopped.
    SyncCompleted,
}

/// Derives the local filename of a product image.
///
/// The result is `{product_id}_{basename}`, where basename is the last path
/// segment of the URL without query or fragment, restricted to
/// `[A-Za-z0-9._-]`. An empty basename becomes `image`.
pub fn image_filename(product_id: &str, url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or_default();
    let path = path.split_once("://").map_or(path, |(_, rest)| {
        rest.split_once('/').map_or("", |(_, path)| path)
    });
    let basename = path.rsplit('/').next().unwrap_or_default();

    let clean = |s: &str| -> String {
        s.chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    };

    let basename = clean(basename);
    let basename = match basename.trim_matches('.') {
        "" => "image".to_string(),
        _ => basename,
    };
    format!("{}_{}", clean(product_id), basename)
}
