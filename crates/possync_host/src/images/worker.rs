//! Isolated image worker.
//!
//! Runs on its own thread with a single-threaded runtime. Each
//! `START_SYNC` is processed task by task; `STOP_SYNC` is honored between
//! tasks.

use super::{image_filename, ImageCommand, ImageEvent, ImageFetcher, ImageSyncConfig, ImageTask, LogLevel};
use possync_engine::{SyncError, SyncResult};
use std::path::Path;
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::mpsc;
use tracing::debug;

/// Host side of a running image worker.
pub struct ImageWorkerHandle {
    commands: mpsc::UnboundedSender<ImageCommand>,
    events: mpsc::UnboundedReceiver<ImageEvent>,
    thread: Option<JoinHandle<()>>,
}

impl ImageWorkerHandle {
    /// Sends a command to the worker.
    pub fn send(&self, command: ImageCommand) -> SyncResult<()> {
        self.commands.send(command).map_err(|_| SyncError::ChannelClosed)
    }

    /// Returns a sender that can reach the worker from elsewhere.
    pub fn sender(&self) -> mpsc::UnboundedSender<ImageCommand> {
        self.commands.clone()
    }

    /// Receives the next event; `None` once the worker is gone.
    pub async fn recv(&mut self) -> Option<ImageEvent> {
        self.events.recv().await
    }

    /// Terminates the worker and waits for its thread.
    ///
    /// The worker exits once its command channel closes. A panic becomes
    /// [`SyncError::WorkerFailed`].
    pub async fn terminate(mut self) -> SyncResult<()> {
        drop(self.commands);
        self.events.close();
        let Some(thread) = self.thread.take() else {
            return Ok(());
        };
        tokio::task::spawn_blocking(move || thread.join())
            .await
            .map_err(|e| SyncError::WorkerFailed(e.to_string()))?
            .map_err(|_| SyncError::WorkerFailed("image worker panicked".into()))
    }
}

/// Spawns image workers.
pub struct ImageWorker;

impl ImageWorker {
    /// Starts an image worker downloading through `fetcher`.
    pub fn spawn<F: ImageFetcher + 'static>(fetcher: Arc<F>) -> SyncResult<ImageWorkerHandle> {
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events) = mpsc::unbounded_channel();

        let thread = std::thread::Builder::new()
            .name("possync-images".into())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        let _ = events_tx.send(log(LogLevel::Error, format!("runtime failed: {}", e)));
                        let _ = events_tx.send(ImageEvent::SyncCompleted);
                        return;
                    }
                };
                runtime.block_on(serve(fetcher, commands_rx, events_tx));
            })?;

        Ok(ImageWorkerHandle {
            commands,
            events,
            thread: Some(thread),
        })
    }
}

fn log(level: LogLevel, message: impl Into<String>) -> ImageEvent {
    ImageEvent::Log {
        message: message.into(),
        level,
    }
}

async fn serve<F: ImageFetcher>(
    fetcher: Arc<F>,
    mut commands: mpsc::UnboundedReceiver<ImageCommand>,
    events: mpsc::UnboundedSender<ImageEvent>,
) {
    while let Some(command) = commands.recv().await {
        match command {
            ImageCommand::StartSync { config } => {
                process(&*fetcher, config, &mut commands, &events).await;
                let _ = events.send(ImageEvent::SyncCompleted);
            }
            ImageCommand::StopSync => debug!("stop requested while idle"),
        }
    }
}

async fn process<F: ImageFetcher + ?Sized>(
    fetcher: &F,
    config: ImageSyncConfig,
    commands: &mut mpsc::UnboundedReceiver<ImageCommand>,
    events: &mpsc::UnboundedSender<ImageEvent>,
) {
    let total = config.tasks.len();
    if let Err(e) = tokio::fs::create_dir_all(&config.storage_path).await {
        let _ = events.send(log(
            LogLevel::Error,
            format!("cannot create {}: {}", config.storage_path.display(), e),
        ));
        return;
    }
    let _ = events.send(log(LogLevel::Info, format!("syncing {} product images", total)));

    for (index, task) in config.tasks.iter().enumerate() {
        if stop_requested(commands) {
            let _ = events.send(log(LogLevel::Info, format!("stopped after {} of {}", index, total)));
            return;
        }

        match sync_one(fetcher, &config.storage_path, task).await {
            Ok(Some(filename)) => {
                let _ = events.send(ImageEvent::SyncSuccess {
                    product_id: task.product_id.clone(),
                    filename,
                });
            }
            Ok(None) => {
                let _ = events.send(log(
                    LogLevel::Debug,
                    format!("image for product {} already exists", task.product_id),
                ));
            }
            Err(e) => {
                let _ = events.send(ImageEvent::SyncError {
                    product_id: task.product_id.clone(),
                    error: e.to_string(),
                });
            }
        }
        let _ = events.send(ImageEvent::SyncProgress {
            processed: index + 1,
            total,
        });
    }
}

/// Drains pending commands; true if a stop is among them.
///
/// A `START_SYNC` arriving mid-run is dropped.
fn stop_requested(commands: &mut mpsc::UnboundedReceiver<ImageCommand>) -> bool {
    let mut stop = false;
    while let Ok(command) = commands.try_recv() {
        match command {
            ImageCommand::StopSync => stop = true,
            ImageCommand::StartSync { .. } => debug!("start ignored: already syncing"),
        }
    }
    stop
}

/// Returns the new filename, or `None` when the recorded file is present.
async fn sync_one<F: ImageFetcher + ?Sized>(
    fetcher: &F,
    storage: &Path,
    task: &ImageTask,
) -> SyncResult<Option<String>> {
    if let Some(existing) = &task.existing_filename {
        if tokio::fs::try_exists(storage.join(existing)).await.unwrap_or(false) {
            return Ok(None);
        }
    }

    let bytes = fetcher.fetch(&task.remote_url).await?;
    let filename = image_filename(&task.product_id, &task.remote_url);
    let target = storage.join(&filename);
    let partial = storage.join(format!("{}.part", filename));
    tokio::fs::write(&partial, &bytes).await?;
    tokio::fs::rename(&partial, &target).await?;
    debug!(product_id = %task.product_id, %filename, bytes = bytes.len(), "image stored");
    Ok(Some(filename))
}
