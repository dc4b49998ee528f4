//! The queue worker: sole owner and mutator of the queue.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;

use photolift_media::RetrieveError;
use photolift_transfer::{ChunkPlan, ProgressGate};
use photolift_uploader::UploadError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::batch::BatchCounters;
use crate::collab::{
    Authenticator, Decision, DecisionProvider, FailurePrompt, IdleGuard, Moderator,
};
use crate::config::UploadConfig;
use crate::error::QueueError;
use crate::events::{ItemOutcome, PauseReason, QueueEvent};
use crate::handle::{Command, QueueStatus};
use crate::item::{FailureClass, FailureReason, FailureStage, ItemId, ItemState, UploadItem};
use crate::pipeline::{AttachError, Pipeline, StageProgress};
use crate::store::{ModerationEntry, PersistedQueue, QueueStore};

pub(crate) struct Collaborators {
    pub(crate) moderator: Arc<dyn Moderator>,
    pub(crate) authenticator: Arc<dyn Authenticator>,
    pub(crate) decisions: Arc<dyn DecisionProvider>,
    pub(crate) idle_guard: Arc<dyn IdleGuard>,
    pub(crate) store: Arc<dyn QueueStore>,
}

/// Who asked the active item to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CancelIntent {
    User,
    Interrupted,
}

struct Active {
    id: ItemId,
    cancel: CancellationToken,
    intent: Option<CancelIntent>,
}

/// How a pipeline run ended short of completion.
enum StageFailure {
    Cancelled(FailureStage),
    Failed(FailureReason),
    /// The item disappeared from the queue.
    Gone,
}

pub(crate) struct Worker {
    pipeline: Arc<Pipeline>,
    collab: Collaborators,
    config: UploadConfig,
    items: Vec<UploadItem>,
    pending_moderation: Vec<ModerationEntry>,
    counters: BatchCounters,
    commands: mpsc::Receiver<Command>,
    events: mpsc::UnboundedSender<QueueEvent>,
    status: watch::Sender<QueueStatus>,
    active: Option<Active>,
    /// Upload progress per item, kept across retries until the item leaves the queue.
    gates: HashMap<ItemId, ProgressGate>,
    paused: Option<PauseReason>,
    bytes_uploaded: u64,
    completed_total: usize,
    idle_announced: bool,
    guard_engaged: bool,
    last_remaining: Option<usize>,
    shutdown: CancellationToken,
    shutdown_replies: Vec<oneshot::Sender<()>>,
}

impl Worker {
    pub(crate) fn new(
        pipeline: Arc<Pipeline>,
        collab: Collaborators,
        config: UploadConfig,
        persisted: PersistedQueue,
        commands: mpsc::Receiver<Command>,
        events: mpsc::UnboundedSender<QueueEvent>,
        status: watch::Sender<QueueStatus>,
    ) -> Self {
        let mut counters = BatchCounters::default();
        counters.added(persisted.items.len());
        let paused = config.start_paused.then_some(PauseReason::Requested);
        // A fresh, empty queue has nothing to announce.
        let idle_announced =
            persisted.items.is_empty() && persisted.pending_moderation.is_empty();

        Self {
            pipeline,
            collab,
            config,
            items: persisted.items,
            pending_moderation: persisted.pending_moderation,
            counters,
            commands,
            events,
            status,
            active: None,
            gates: HashMap::new(),
            paused,
            bytes_uploaded: 0,
            completed_total: 0,
            idle_announced,
            guard_engaged: false,
            last_remaining: None,
            shutdown: CancellationToken::new(),
            shutdown_replies: Vec::new(),
        }
    }

    pub(crate) async fn run(mut self) {
        self.publish();

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }
            if self.paused.is_none()
                && let Some(id) = self.next_runnable()
            {
                self.idle_announced = false;
                self.process(id).await;
                continue;
            }

            self.settle().await;
            match self.commands.recv().await {
                Some(cmd) => self.handle_command(cmd),
                None => {
                    debug!("all queue handles dropped");
                    break;
                }
            }
        }

        self.release_guard();
        self.save();
        info!(remaining = self.items.len(), "upload queue stopped");
        for reply in self.shutdown_replies.drain(..) {
            let _ = reply.send(());
        }
    }

    // ---- item pipeline ----

    async fn process(&mut self, id: ItemId) {
        self.active = Some(Active {
            id,
            cancel: CancellationToken::new(),
            intent: None,
        });
        self.engage_guard();
        self.publish();

        let result = self.run_pipeline(id).await;
        let intent = self.active.take().and_then(|a| a.intent);
        let result = match (result, intent) {
            (Err(StageFailure::Failed(reason)), Some(_)) => {
                Err(StageFailure::Cancelled(reason.stage))
            }
            (result, _) => result,
        };

        match result {
            Ok(remote_id) => {
                self.delete_source(id).await;
                self.finish(id, ItemOutcome::Completed { remote_id });
            }
            Err(StageFailure::Gone) => {}
            Err(StageFailure::Cancelled(stage)) => match intent {
                Some(CancelIntent::Interrupted) => {
                    info!(%id, ?stage, "item interrupted");
                    self.set_state(
                        id,
                        ItemState::Failed {
                            reason: FailureReason::interrupted(stage),
                        },
                    );
                }
                _ => {
                    self.set_state(id, ItemState::Cancelled);
                    self.finish(id, ItemOutcome::Cancelled);
                }
            },
            Err(StageFailure::Failed(reason)) => self.handle_failure(id, reason).await,
        }
        self.publish();
    }

    async fn run_pipeline(&mut self, id: ItemId) -> Result<i64, StageFailure> {
        let cancel = self.active_token();
        let item = self.item(id).cloned().ok_or(StageFailure::Gone)?;

        if let Some(remote_id) = item.remote_id {
            info!(%id, remote_id, "bytes already on server, finalizing");
            return self.finalize(&item, remote_id, &cancel).await;
        }

        if let Some(item) = self.item_mut(id) {
            item.attempts += 1;
        }
        info!(%id, source = %item.source_ref, attempt = item.attempts + 1, "processing item");

        // Retrieval, re-run once after a re-login.
        let mut relogged = false;
        let raw = loop {
            self.set_state(id, ItemState::RetrievingAsset);
            let (tx, mut rx) = mpsc::unbounded_channel();
            let stage = self
                .pipeline
                .clone()
                .retrieve(item.clone(), tx, cancel.clone());
            match self.run_stage(id, stage, &mut rx).await {
                Ok(raw) => break raw,
                Err(RetrieveError::Cancelled) => {
                    return Err(StageFailure::Cancelled(FailureStage::Retrieval));
                }
                Err(e) => {
                    let reason = FailureReason::from_retrieve(&e);
                    if reason.class == FailureClass::Authorization
                        && !relogged
                        && self.relogin(id).await
                    {
                        relogged = true;
                        continue;
                    }
                    return Err(StageFailure::Failed(reason));
                }
            }
        };
        check_cancelled(&cancel, FailureStage::Retrieval)?;

        self.set_state(id, ItemState::Transforming);
        let stage = self.pipeline.clone().transform(item.clone(), raw);
        let asset = self
            .run_stage(id, stage, &mut closed_progress())
            .await
            .map_err(|e| StageFailure::Failed(FailureReason::from_transform(&e)))?;
        check_cancelled(&cancel, FailureStage::Transform)?;
        if asset.mime_fallback {
            self.emit(QueueEvent::MimeFallback { id });
        }

        let total_chunks = ChunkPlan::new(asset.payload.len(), self.config.chunk_size_bytes)
            .map_err(|e| {
                StageFailure::Failed(FailureReason::from_upload(&UploadError::from(e)))
            })?
            .total_chunks;

        // Upload, re-run once after a re-login.
        let mut relogged = false;
        let receipt = loop {
            self.set_state(
                id,
                ItemState::Uploading {
                    chunk_index: 0,
                    total_chunks,
                },
            );
            let (tx, mut rx) = mpsc::unbounded_channel();
            let stage = self.pipeline.clone().upload(
                asset.clone(),
                item.metadata.clone(),
                tx,
                cancel.clone(),
            );
            match self.run_stage(id, stage, &mut rx).await {
                Ok(receipt) => break receipt,
                Err(UploadError::Cancelled) => {
                    return Err(StageFailure::Cancelled(FailureStage::Upload));
                }
                Err(e) => {
                    let reason = FailureReason::from_upload(&e);
                    if reason.class == FailureClass::Authorization
                        && !relogged
                        && self.relogin(id).await
                    {
                        relogged = true;
                        continue;
                    }
                    return Err(StageFailure::Failed(reason));
                }
            }
        };

        self.bytes_uploaded += asset.payload.len() as u64;
        if let Some(item) = self.item_mut(id) {
            item.remote_id = Some(receipt.remote_id);
        }
        self.save();
        info!(%id, remote_id = receipt.remote_id, chunks = receipt.chunks_sent, "upload finished");
        check_cancelled(&cancel, FailureStage::Finalize)?;

        self.finalize(&item, receipt.remote_id, &cancel).await
    }

    async fn finalize(
        &mut self,
        item: &UploadItem,
        remote_id: i64,
        cancel: &CancellationToken,
    ) -> Result<i64, StageFailure> {
        let id = item.id;
        self.set_state(id, ItemState::Finalizing);

        let stage =
            self.pipeline
                .clone()
                .attach(remote_id, item.target_collection_id, cancel.clone());
        match self.run_stage(id, stage, &mut closed_progress()).await {
            Ok(()) => {}
            Err(AttachError::Cancelled) => {
                return Err(StageFailure::Cancelled(FailureStage::Finalize));
            }
            Err(AttachError::Failed(message)) => {
                warn!(%id, remote_id, %message, "finalize failed, upload kept");
                self.emit(QueueEvent::FinalizeFailed {
                    id,
                    remote_id,
                    message,
                });
            }
        }

        if self.config.moderate_uploads {
            self.pending_moderation.push(ModerationEntry {
                id,
                remote_id,
                collection_id: item.target_collection_id,
            });
            self.emit(QueueEvent::ModerationPending { id, remote_id });
        }

        self.set_state(id, ItemState::Completed);
        Ok(remote_id)
    }

    /// Removes a completed item's source when it asked for that.
    async fn delete_source(&mut self, id: ItemId) {
        let Some(source_ref) = self
            .item(id)
            .filter(|i| i.delete_after_upload)
            .map(|i| i.source_ref.clone())
        else {
            return;
        };
        let stage = self.pipeline.clone().delete_source(source_ref.clone());
        if let Err(e) = self.run_stage(id, stage, &mut closed_progress()).await {
            warn!(%id, %source_ref, error = %e, "uploaded source not deleted");
        }
    }

    /// Awaits `stage` while serving commands and forwarding its progress.
    async fn run_stage<T>(
        &mut self,
        id: ItemId,
        stage: impl Future<Output = T>,
        progress: &mut mpsc::UnboundedReceiver<StageProgress>,
    ) -> T {
        tokio::pin!(stage);
        let output = loop {
            tokio::select! {
                biased;
                Some(cmd) = self.commands.recv() => self.handle_command(cmd),
                Some(p) = progress.recv() => self.on_progress(id, p),
                output = &mut stage => break output,
            }
        };
        while let Ok(p) = progress.try_recv() {
            self.on_progress(id, p);
        }
        output
    }

    fn on_progress(&mut self, id: ItemId, progress: StageProgress) {
        match progress {
            StageProgress::Retrieval(fraction) => {
                self.emit(QueueEvent::RetrievalProgress { id, fraction });
            }
            StageProgress::Upload(p) => {
                let state = ItemState::Uploading {
                    chunk_index: p.chunk_index,
                    total_chunks: p.total_chunks,
                };
                if let Some(item) = self.item_mut(id)
                    && item.state != state
                {
                    // Chunk position is not persisted: a reload restarts the transfer anyway.
                    item.state = state.clone();
                    self.emit(QueueEvent::StateChanged { id, state });
                }
                let gate = self.gates.entry(id).or_default();
                if let Some(fraction) = gate.offer(p.fraction()) {
                    self.emit(QueueEvent::Progress { id, fraction });
                }
            }
        }
    }

    /// Returns true when the session was renewed.
    async fn relogin(&mut self, id: ItemId) -> bool {
        info!(%id, "authorization failed, logging in again");
        let authenticator = self.collab.authenticator.clone();
        let stage = async move { authenticator.relogin().await };
        match self.run_stage(id, stage, &mut closed_progress()).await {
            Ok(()) => true,
            Err(e) => {
                warn!(%id, error = %e, "re-login failed");
                false
            }
        }
    }

    async fn handle_failure(&mut self, id: ItemId, reason: FailureReason) {
        warn!(%id, %reason, "item failed");
        self.set_state(
            id,
            ItemState::Failed {
                reason: reason.clone(),
            },
        );
        self.publish();

        let Some(item) = self.item(id) else {
            return;
        };
        let prompt = FailurePrompt {
            id,
            source_ref: item.source_ref.clone(),
            reason: reason.clone(),
            retry_offered: item.is_retryable(),
        };

        let decisions = self.collab.decisions.clone();
        let shutdown = self.shutdown.clone();
        let retry_offered = prompt.retry_offered;
        let ask = async move {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => Decision::Defer,
                d = decisions.decide(&prompt) => d,
            }
        };
        let mut decision = self.run_stage(id, ask, &mut closed_progress()).await;
        if decision == Decision::Retry && !retry_offered {
            decision = Decision::Skip;
        }

        // The item may have been cancelled while the prompt was open.
        if self.item(id).is_none() {
            return;
        }
        debug!(%id, ?decision, "failure decision");

        match decision {
            Decision::Retry => self.set_state(id, ItemState::Queued),
            Decision::Skip => self.finish(id, ItemOutcome::Abandoned { reason }),
            Decision::Dismiss => {
                self.finish(id, ItemOutcome::Abandoned { reason });
                let queued: Vec<ItemId> = self
                    .items
                    .iter()
                    .filter(|i| i.state == ItemState::Queued)
                    .map(|i| i.id)
                    .collect();
                for other in queued {
                    self.set_state(other, ItemState::Cancelled);
                    self.finish(other, ItemOutcome::Cancelled);
                }
            }
            Decision::Defer => {
                let failed = self.deferred_failures();
                if failed >= self.config.max_failed_uploads && self.paused.is_none() {
                    warn!(failed, "failure budget reached, pausing");
                    self.pause(PauseReason::FailureBudget);
                }
            }
        }
    }

    // ---- commands ----

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Enqueue(uploads, reply) => {
                let mut ids = Vec::with_capacity(uploads.len());
                for upload in uploads {
                    let item = UploadItem::from_new(upload);
                    debug!(id = %item.id, source = %item.source_ref, "enqueued");
                    ids.push(item.id);
                    self.items.push(item);
                }
                self.counters.added(ids.len());
                self.idle_announced = false;
                self.save();
                self.publish();
                let _ = reply.send(ids);
            }
            Command::Cancel(id, reply) => {
                let _ = reply.send(self.cancel(id));
            }
            Command::CancelAll(reply) => {
                self.cancel_all();
                let _ = reply.send(());
            }
            Command::Pause(reply) => {
                if self.paused.is_none() {
                    self.pause(PauseReason::Requested);
                }
                let _ = reply.send(());
            }
            Command::Resume(reply) => {
                self.resume();
                let _ = reply.send(());
            }
            Command::Suspend(reply) => {
                self.interrupt_active();
                self.pause(PauseReason::Suspended);
                let _ = reply.send(());
            }
            Command::RetryFailed(reply) => {
                let ids: Vec<ItemId> = self
                    .items
                    .iter()
                    .filter(|i| i.state.failure().is_some() && i.is_retryable())
                    .map(|i| i.id)
                    .collect();
                for id in &ids {
                    self.set_state(*id, ItemState::Queued);
                }
                self.idle_announced = false;
                self.publish();
                let _ = reply.send(ids.len());
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(self.counters.snapshot(&self.items));
            }
            Command::Shutdown(reply) => {
                info!("upload queue shutting down");
                self.interrupt_active();
                self.shutdown.cancel();
                self.shutdown_replies.push(reply);
            }
        }
    }

    fn cancel(&mut self, id: ItemId) -> Result<(), QueueError> {
        if let Some(active) = self.active.as_mut()
            && active.id == id
        {
            info!(%id, "cancelling active item");
            active.intent = Some(CancelIntent::User);
            active.cancel.cancel();
            return Ok(());
        }
        if self.item(id).is_none() {
            return Err(QueueError::NotFound(id));
        }
        self.set_state(id, ItemState::Cancelled);
        self.finish(id, ItemOutcome::Cancelled);
        self.publish();
        Ok(())
    }

    fn cancel_all(&mut self) {
        info!(items = self.items.len(), "cancelling all items");
        let active_id = self.active.as_mut().map(|active| {
            active.intent = Some(CancelIntent::User);
            active.cancel.cancel();
            active.id
        });
        let ids: Vec<ItemId> = self
            .items
            .iter()
            .map(|i| i.id)
            .filter(|id| Some(*id) != active_id)
            .collect();
        for id in ids {
            self.set_state(id, ItemState::Cancelled);
            self.finish(id, ItemOutcome::Cancelled);
        }
        self.pending_moderation.clear();
        self.save();
        self.publish();
    }

    fn interrupt_active(&mut self) {
        if let Some(active) = self.active.as_mut() {
            info!(id = %active.id, "interrupting active item");
            active.intent.get_or_insert(CancelIntent::Interrupted);
            active.cancel.cancel();
        }
    }

    fn pause(&mut self, reason: PauseReason) {
        info!(?reason, "upload queue paused");
        self.paused = Some(reason);
        self.emit(QueueEvent::Paused { reason });
        self.publish();
    }

    fn resume(&mut self) {
        let interrupted: Vec<ItemId> = self
            .items
            .iter()
            .filter(|i| {
                i.state
                    .failure()
                    .is_some_and(|r| r.class == FailureClass::Interrupted)
            })
            .map(|i| i.id)
            .collect();
        for id in interrupted {
            self.set_state(id, ItemState::Queued);
        }
        if self.paused.take().is_some() {
            info!("upload queue resumed");
        }
        self.idle_announced = false;
        self.publish();
    }

    // ---- bookkeeping ----

    /// Runs when nothing can start: flushes moderation, releases the guard, announces idle.
    async fn settle(&mut self) {
        self.release_guard();
        if self.idle_announced {
            return;
        }
        self.idle_announced = true;
        self.counters.settle(self.items.len());
        if self.paused.is_some() {
            self.publish();
            return;
        }
        if !self.pending_moderation.is_empty() {
            self.flush_moderation().await;
        }
        self.publish();
        self.emit(QueueEvent::Idle);
    }

    async fn flush_moderation(&mut self) {
        let mut groups: BTreeMap<i64, Vec<i64>> = BTreeMap::new();
        for entry in &self.pending_moderation {
            groups
                .entry(entry.collection_id)
                .or_default()
                .push(entry.remote_id);
        }

        for (collection_id, remote_ids) in groups {
            let count = remote_ids.len();
            match self.collab.moderator.submit(collection_id, remote_ids).await {
                Ok(()) => {
                    info!(collection_id, count, "submitted for moderation");
                    self.pending_moderation
                        .retain(|e| e.collection_id != collection_id);
                }
                Err(e) => warn!(collection_id, error = %e, "moderation submit failed"),
            }
        }
        self.save();
    }

    fn next_runnable(&self) -> Option<ItemId> {
        self.items
            .iter()
            .find(|i| is_runnable(&i.state))
            .map(|i| i.id)
    }

    fn deferred_failures(&self) -> usize {
        self.items
            .iter()
            .filter_map(|i| i.state.failure())
            .filter(|r| r.class != FailureClass::Interrupted)
            .count()
    }

    fn finish(&mut self, id: ItemId, outcome: ItemOutcome) {
        let Some(pos) = self.items.iter().position(|i| i.id == id) else {
            return;
        };
        info!(%id, ?outcome, "item finished");
        self.emit(QueueEvent::ItemFinished { id, outcome });
        self.items.remove(pos);
        self.gates.remove(&id);
        self.counters.finished();
        self.completed_total += 1;
        self.save();
    }

    fn set_state(&mut self, id: ItemId, state: ItemState) {
        let Some(item) = self.item_mut(id) else {
            return;
        };
        item.state = state.clone();
        self.save();
        self.emit(QueueEvent::StateChanged { id, state });
    }

    fn item(&self, id: ItemId) -> Option<&UploadItem> {
        self.items.iter().find(|i| i.id == id)
    }

    fn item_mut(&mut self, id: ItemId) -> Option<&mut UploadItem> {
        self.items.iter_mut().find(|i| i.id == id)
    }

    fn active_token(&self) -> CancellationToken {
        self.active
            .as_ref()
            .map(|a| a.cancel.clone())
            .unwrap_or_else(CancellationToken::new)
    }

    fn engage_guard(&mut self) {
        if !self.guard_engaged {
            self.collab.idle_guard.engage();
            self.guard_engaged = true;
        }
    }

    fn release_guard(&mut self) {
        if self.guard_engaged {
            self.collab.idle_guard.release();
            self.guard_engaged = false;
        }
    }

    fn emit(&self, event: QueueEvent) {
        let _ = self.events.send(event);
    }

    fn save(&self) {
        let snapshot = PersistedQueue {
            items: self.items.clone(),
            pending_moderation: self.pending_moderation.clone(),
        };
        if let Err(e) = self.collab.store.save(&snapshot) {
            error!(error = %e, "failed to persist upload queue");
        }
    }

    fn publish(&mut self) {
        let remaining = self.items.len();
        if self.last_remaining != Some(remaining) {
            self.last_remaining = Some(remaining);
            self.emit(QueueEvent::Remaining { count: remaining });
        }

        let runnable = self.items.iter().any(|i| is_runnable(&i.state));
        let resumable = self
            .items
            .iter()
            .filter(|i| {
                is_runnable(&i.state)
                    || i.state
                        .failure()
                        .is_some_and(|r| r.class == FailureClass::Interrupted)
            })
            .count();
        let status = QueueStatus {
            active: self.active.as_ref().map(|a| a.id),
            remaining,
            resumable,
            paused: self.paused,
            idle: self.active.is_none() && (self.paused.is_some() || !runnable),
            bytes_uploaded: self.bytes_uploaded,
            completed_total: self.completed_total,
        };
        self.status.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }
}

fn is_runnable(state: &ItemState) -> bool {
    matches!(state, ItemState::Queued | ItemState::Finalizing)
}

fn check_cancelled(cancel: &CancellationToken, stage: FailureStage) -> Result<(), StageFailure> {
    if cancel.is_cancelled() {
        Err(StageFailure::Cancelled(stage))
    } else {
        Ok(())
    }
}

/// A progress receiver whose sender is already gone.
fn closed_progress() -> mpsc::UnboundedReceiver<StageProgress> {
    let (_, rx) = mpsc::unbounded_channel();
    rx
}
