//! Image sync controller.

use super::{ImageCatalog, ImageCommand, ImageEvent, ImageFetcher, ImageSyncConfig, ImageWorker, LogLevel};
use parking_lot::Mutex;
use possync_engine::{SyncError, SyncResult};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

/// Outcome of one image sync run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageSyncReport {
    /// Tasks handed to the worker.
    pub total: usize,
    /// Tasks the worker got through.
    pub processed: usize,
    /// Images downloaded and recorded.
    pub downloaded: usize,
    /// Tasks that failed.
    pub failed: usize,
}

impl ImageSyncReport {
    /// Tasks skipped because their file was already present.
    pub fn skipped(&self) -> usize {
        self.processed.saturating_sub(self.downloaded + self.failed)
    }
}

/// Clears the running flag when a run ends, however it ends.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Drives image sync runs, one at a time.
pub struct ImageSyncController<C: ImageCatalog, F: ImageFetcher + 'static> {
    catalog: C,
    fetcher: Arc<F>,
    storage_path: PathBuf,
    is_running: AtomicBool,
    events: broadcast::Sender<ImageEvent>,
    active: Mutex<Option<mpsc::UnboundedSender<ImageCommand>>>,
}

impl<C: ImageCatalog, F: ImageFetcher + 'static> ImageSyncController<C, F> {
    /// Creates a controller storing images under `storage_path`.
    pub fn new(catalog: C, fetcher: F, storage_path: impl Into<PathBuf>) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            catalog,
            fetcher: Arc::new(fetcher),
            storage_path: storage_path.into(),
            is_running: AtomicBool::new(false),
            events,
            active: Mutex::new(None),
        }
    }

    /// Subscribes to worker events of every future run.
    pub fn subscribe(&self) -> broadcast::Receiver<ImageEvent> {
        self.events.subscribe()
    }

    /// Returns true while a run is in progress.
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    /// Asks the running worker to stop after its current task.
    pub fn stop(&self) -> bool {
        match self.active.lock().as_ref() {
            Some(worker) => worker.send(ImageCommand::StopSync).is_ok(),
            None => false,
        }
    }

    /// Downloads every missing product image.
    ///
    /// Fails with [`SyncError::AlreadyRunning`] if a run is in progress.
    pub async fn sync(&self) -> SyncResult<ImageSyncReport> {
        if self
            .is_running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("image sync already running");
            return Err(SyncError::AlreadyRunning);
        }
        let _running = RunningGuard(&self.is_running);

        let tasks = self.catalog.image_tasks().await?;
        let mut report = ImageSyncReport {
            total: tasks.len(),
            ..ImageSyncReport::default()
        };
        if tasks.is_empty() {
            debug!("no product images to sync");
            return Ok(report);
        }
        info!(tasks = tasks.len(), "image sync started");

        let mut worker = ImageWorker::spawn(Arc::clone(&self.fetcher))?;
        worker.send(ImageCommand::StartSync {
            config: ImageSyncConfig {
                storage_path: self.storage_path.clone(),
                tasks,
            },
        })?;
        *self.active.lock() = Some(worker.sender());

        let mut completed = false;
        while let Some(event) = worker.recv().await {
            match &event {
                ImageEvent::SyncSuccess { product_id, filename } => {
                    match self.catalog.set_local_image(product_id, filename).await {
                        Ok(()) => report.downloaded += 1,
                        Err(e) => {
                            warn!(%product_id, error = %e, "failed to record image");
                            report.failed += 1;
                        }
                    }
                }
                ImageEvent::SyncError { product_id, error } => {
                    warn!(%product_id, %error, "image download failed");
                    report.failed += 1;
                }
                ImageEvent::SyncProgress { processed, .. } => report.processed = *processed,
                ImageEvent::Log { message, level } => match level {
                    LogLevel::Debug => debug!(target: "possync::images", "{}", message),
                    LogLevel::Info => info!(target: "possync::images", "{}", message),
                    LogLevel::Warn => warn!(target: "possync::images", "{}", message),
                    LogLevel::Error => error!(target: "possync::images", "{}", message),
                },
                ImageEvent::SyncCompleted => completed = true,
            }
            let _ = self.events.send(event);
            if completed {
                break;
            }
        }

        *self.active.lock() = None;
        let terminated = worker.terminate().await;
        if !completed {
            let e = terminated
                .err()
                .unwrap_or_else(|| SyncError::WorkerFailed("image worker exited early".into()));
            error!(error = %e, "image worker failed");
            return Err(e);
        }

        info!(
            downloaded = report.downloaded,
            failed = report.failed,
            skipped = report.skipped(),
            "image sync finished"
        );
        Ok(report)
    }
}
