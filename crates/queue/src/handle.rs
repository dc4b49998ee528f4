//! Public face of the queue: spawning the worker and talking to it.

use std::sync::Arc;

use photolift_media::{AssetRetriever, AssetTransformer};
use photolift_uploader::ChunkedUploader;
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tracing::info;

use crate::batch::UploadBatch;
use crate::collab::{Authenticator, CollectionStore, DecisionProvider, IdleGuard, Moderator};
use crate::config::UploadConfig;
use crate::error::QueueError;
use crate::events::{PauseReason, QueueEvent};
use crate::item::{ItemId, NewUpload};
use crate::pipeline::Pipeline;
use crate::store::QueueStore;
use crate::worker::Worker;

/// Everything the worker needs, passed in at spawn.
pub struct QueueDeps {
    pub retriever: Arc<AssetRetriever>,
    pub transformer: Arc<AssetTransformer>,
    pub uploader: Arc<ChunkedUploader>,
    pub collections: Arc<dyn CollectionStore>,
    pub moderator: Arc<dyn Moderator>,
    pub authenticator: Arc<dyn Authenticator>,
    pub decisions: Arc<dyn DecisionProvider>,
    pub idle_guard: Arc<dyn IdleGuard>,
    pub store: Arc<dyn QueueStore>,
}

/// Observable worker status, published on every change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStatus {
    /// Item currently in the pipeline.
    pub active: Option<ItemId>,
    /// Items still in the queue, failed ones included.
    pub remaining: usize,
    /// Items a later run can make progress on: queued, finalizing, or interrupted.
    pub resumable: usize,
    pub paused: Option<PauseReason>,
    /// No item is active and none will start without a command.
    pub idle: bool,
    /// Payload bytes accepted by the server since spawn.
    pub bytes_uploaded: u64,
    pub completed_total: usize,
}

pub(crate) enum Command {
    Enqueue(Vec<NewUpload>, oneshot::Sender<Vec<ItemId>>),
    Cancel(ItemId, oneshot::Sender<Result<(), QueueError>>),
    CancelAll(oneshot::Sender<()>),
    Pause(oneshot::Sender<()>),
    Resume(oneshot::Sender<()>),
    Suspend(oneshot::Sender<()>),
    RetryFailed(oneshot::Sender<usize>),
    Snapshot(oneshot::Sender<UploadBatch>),
    Shutdown(oneshot::Sender<()>),
}

/// Spawns the queue worker.
pub struct UploadQueueManager;

impl UploadQueueManager {
    /// Loads the persisted queue and starts the worker on the current runtime.
    pub fn spawn(deps: QueueDeps, config: UploadConfig) -> Result<QueueHandle, QueueError> {
        let mut persisted = deps.store.load()?;
        persisted.recover();
        info!(
            items = persisted.items.len(),
            pending_moderation = persisted.pending_moderation.len(),
            "upload queue starting"
        );

        let (commands_tx, commands_rx) = mpsc::channel(64);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(QueueStatus::default());

        let pipeline = Arc::new(Pipeline {
            retriever: deps.retriever,
            transformer: deps.transformer,
            uploader: deps.uploader,
            collections: deps.collections,
            config: config.clone(),
        });
        let worker = Worker::new(
            pipeline,
            crate::worker::Collaborators {
                moderator: deps.moderator,
                authenticator: deps.authenticator,
                decisions: deps.decisions,
                idle_guard: deps.idle_guard,
                store: deps.store,
            },
            config,
            persisted,
            commands_rx,
            events_tx,
            status_tx,
        );
        tokio::spawn(worker.run());

        Ok(QueueHandle {
            commands: commands_tx,
            status: status_rx,
            events: Arc::new(Mutex::new(Some(events_rx))),
        })
    }
}

/// Cloneable handle to a running queue.
#[derive(Clone)]
pub struct QueueHandle {
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<QueueStatus>,
    events: Arc<Mutex<Option<mpsc::UnboundedReceiver<QueueEvent>>>>,
}

impl QueueHandle {
    /// Takes the event receiver. Can only be called once.
    pub async fn take_events(&self) -> Option<mpsc::UnboundedReceiver<QueueEvent>> {
        self.events.lock().await.take()
    }

    /// Latest published status.
    pub fn status(&self) -> QueueStatus {
        self.status.borrow().clone()
    }

    /// Receiver that wakes on every status change.
    pub fn subscribe_status(&self) -> watch::Receiver<QueueStatus> {
        self.status.clone()
    }

    /// Appends uploads to the end of the queue.
    pub async fn enqueue(&self, uploads: Vec<NewUpload>) -> Result<Vec<ItemId>, QueueError> {
        self.request(|tx| Command::Enqueue(uploads, tx)).await
    }

    /// Cancels one item. The active item stops at its next suspension point.
    pub async fn cancel(&self, id: ItemId) -> Result<(), QueueError> {
        self.request(|tx| Command::Cancel(id, tx)).await?
    }

    /// Cancels the in-flight request and every item.
    pub async fn cancel_all(&self) -> Result<(), QueueError> {
        self.request(Command::CancelAll).await
    }

    /// Stops taking new items once the current one finishes.
    pub async fn pause(&self) -> Result<(), QueueError> {
        self.request(Command::Pause).await
    }

    /// Restarts processing. Interrupted items are queued again.
    pub async fn resume(&self) -> Result<(), QueueError> {
        self.request(Command::Resume).await
    }

    /// Cancels the in-flight work as interrupted and pauses.
    pub async fn suspend(&self) -> Result<(), QueueError> {
        self.request(Command::Suspend).await
    }

    /// Queues every retryable failed item again. Returns how many.
    pub async fn retry_failed(&self) -> Result<usize, QueueError> {
        self.request(Command::RetryFailed).await
    }

    pub async fn snapshot(&self) -> Result<UploadBatch, QueueError> {
        self.request(Command::Snapshot).await
    }

    /// Stops the worker, interrupting the active item.
    pub async fn shutdown(&self) -> Result<(), QueueError> {
        self.request(Command::Shutdown).await
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, QueueError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| QueueError::Closed)?;
        rx.await.map_err(|_| QueueError::Closed)
    }
}
