//! Images command implementation.

use possync_engine::{MemoryStore, SyncResult};
use possync_host::images::{HttpImageFetcher, ImageFetcher, ImageSyncController, ImageSyncReport};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Image sync result.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct ImagesOutput {
    /// Products with a remote image.
    pub total: usize,
    /// Images downloaded in this run.
    pub downloaded: usize,
    /// Images already present.
    pub skipped: usize,
    /// Downloads that failed.
    pub failed: usize,
}

impl From<ImageSyncReport> for ImagesOutput {
    fn from(report: ImageSyncReport) -> Self {
        Self {
            total: report.total,
            downloaded: report.downloaded,
            skipped: report.skipped(),
            failed: report.failed,
        }
    }
}

/// Runs the images command.
pub fn run(
    snapshot: &Path,
    storage: &Path,
    timeout: Duration,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(MemoryStore::load(snapshot)?);
    let fetcher = HttpImageFetcher::new(timeout)?;
    let runtime = tokio::runtime::Runtime::new()?;
    let report = runtime.block_on(sync_images(Arc::clone(&store), fetcher, storage));
    store.save(snapshot)?;

    let output = ImagesOutput::from(report?);
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&output)?),
        _ => println!(
            "Images: {} total, {} downloaded, {} skipped, {} failed",
            output.total, output.downloaded, output.skipped, output.failed
        ),
    }
    Ok(())
}

pub(crate) async fn sync_images<F: ImageFetcher + 'static>(
    store: Arc<MemoryStore>,
    fetcher: F,
    storage: &Path,
) -> SyncResult<ImageSyncReport> {
    ImageSyncController::new(store, fetcher, storage).sync().await
}
