//! Wires the pipeline together and drives one run.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use chrono::Local;
use photolift_background::{WindowEnd, run_window};
use photolift_media::{AssetRetriever, AssetTransformer, PassthroughCodec, TransformOptions};
use photolift_protocol::UploadMetadata;
use photolift_queue::{
    DeferAll, ItemOutcome, JsonFileStore, NewUpload, NoIdleGuard, QueueDeps, QueueEvent,
    QueueHandle, UploadQueueManager,
};
use photolift_uploader::{ChunkedUploader, Credentials, ReqwestTransport};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::Cli;
use crate::config::AppConfig;
use crate::fs_store::{FsAssetStore, kind_of, modified_at};
use crate::services::{
    DeadlineBudget, FixedCredentials, FormCollections, LogModerator, NextRunFile,
};

/// Runs the queue until it is idle, interrupted, or the background window ends.
pub async fn run(config: AppConfig, cli: Cli) -> anyhow::Result<()> {
    let queue = spawn_queue(&config)?;
    if let Some(events) = queue.take_events().await {
        tokio::spawn(log_events(events));
    }

    if cli.clear {
        queue.cancel_all().await?;
        info!("upload queue cleared");
        queue.shutdown().await?;
        return Ok(());
    }

    if cli.retry_failed {
        let requeued = queue.retry_failed().await?;
        info!(requeued, "failed items queued again");
    }

    // PassthroughCodec cannot resize or re-encode, so only stripping is offered.
    let options = TransformOptions {
        strip_private_metadata: config.strip_private_metadata,
        ..TransformOptions::default()
    };
    let uploads: Vec<NewUpload> = cli
        .files
        .iter()
        .map(|path| new_upload(path, &cli, &options))
        .collect::<anyhow::Result<_>>()?;
    if !uploads.is_empty() {
        let ids = queue.enqueue(uploads).await?;
        info!(count = ids.len(), "files queued");
    }

    if cli.background {
        run_background(&queue, &config).await;
    } else {
        run_foreground(&queue).await?;
    }

    let status = queue.status();
    info!(
        completed = status.completed_total,
        remaining = status.remaining,
        bytes = status.bytes_uploaded,
        "run finished"
    );
    queue.shutdown().await?;
    Ok(())
}

fn spawn_queue(config: &AppConfig) -> anyhow::Result<QueueHandle> {
    let mut transport = ReqwestTransport::new(&config.server_url, config.request_timeout())?;
    if !config.username.is_empty() {
        transport = transport.with_credentials(Credentials {
            username: config.username.clone(),
            password: config.password.clone(),
        });
    }

    let deps = QueueDeps {
        retriever: Arc::new(AssetRetriever::new(
            Arc::new(FsAssetStore),
            config.allowed_mime_types.clone(),
        )),
        transformer: Arc::new(AssetTransformer::new(Arc::new(PassthroughCodec))),
        uploader: Arc::new(ChunkedUploader::new(Arc::new(transport))),
        collections: Arc::new(FormCollections),
        moderator: Arc::new(LogModerator),
        authenticator: Arc::new(FixedCredentials),
        decisions: Arc::new(DeferAll),
        idle_guard: Arc::new(NoIdleGuard),
        store: Arc::new(JsonFileStore::new(config.state_file.clone())),
    };
    let queue = UploadQueueManager::spawn(deps, config.upload_config(true))
        .with_context(|| format!("loading queue from {}", config.state_file.display()))?;
    Ok(queue)
}

/// Builds the queue entry for a local file.
fn new_upload(path: &Path, cli: &Cli, options: &TransformOptions) -> anyhow::Result<NewUpload> {
    let path = std::fs::canonicalize(path)
        .with_context(|| format!("cannot queue {}", path.display()))?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let title = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    Ok(NewUpload {
        source_ref: path.to_string_lossy().into_owned(),
        target_collection_id: cli.collection,
        kind: kind_of(&path),
        transform_options: options.clone(),
        metadata: UploadMetadata {
            file_name,
            creation_date: modified_at(&path).unwrap_or_else(|| Local::now().naive_local()),
            title,
            category_id: cli.collection,
            privacy_level: cli.privacy_level,
            author: String::new(),
            description: String::new(),
            tag_ids: cli.tags.clone(),
            mime_type: String::new(),
        },
        delete_after_upload: cli.delete_after_upload,
    })
}

async fn run_foreground(queue: &QueueHandle) -> anyhow::Result<()> {
    let mut status = queue.subscribe_status();
    queue.resume().await?;
    tokio::select! {
        idle = status.wait_for(|s| s.idle) => {
            idle.context("upload queue stopped")?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("SIGINT received, suspending uploads");
            queue.suspend().await?;
        }
    }
    Ok(())
}

async fn run_background(queue: &QueueHandle, config: &AppConfig) {
    let expiration = CancellationToken::new();
    let trigger = expiration.clone();
    let signal = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("SIGINT received, ending window");
            trigger.cancel();
        }
    });

    let budget = DeadlineBudget::new(std::time::Duration::from_secs(config.window_secs));
    let scheduler = NextRunFile::new(config.state_file.with_file_name("next-window"));
    let report = run_window(
        queue,
        &budget,
        &scheduler,
        &config.background_config(),
        &expiration,
    )
    .await;
    signal.abort();

    match report.end {
        WindowEnd::Drained => info!(completed = report.completed, "queue drained"),
        end => info!(
            ?end,
            remaining = report.remaining,
            rescheduled = report.rescheduled,
            "window ended with work left"
        ),
    }
}

async fn log_events(mut events: mpsc::UnboundedReceiver<QueueEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            QueueEvent::StateChanged { id, state } => debug!(%id, ?state, "state changed"),
            QueueEvent::Progress { id, fraction } => {
                debug!(%id, percent = (fraction * 100.0).round(), "upload progress")
            }
            QueueEvent::RetrievalProgress { id, fraction } => {
                debug!(%id, percent = (fraction * 100.0).round(), "retrieval progress")
            }
            QueueEvent::Remaining { count } => info!(count, "items remaining"),
            QueueEvent::ItemFinished { id, outcome } => match outcome {
                ItemOutcome::Completed { remote_id } => info!(%id, remote_id, "upload complete"),
                ItemOutcome::Cancelled => info!(%id, "upload cancelled"),
                ItemOutcome::Abandoned { reason } => warn!(%id, %reason, "upload abandoned"),
            },
            QueueEvent::FinalizeFailed {
                id,
                remote_id,
                message,
            } => warn!(%id, remote_id, %message, "uploaded but not attached"),
            QueueEvent::MimeFallback { id } => warn!(%id, "unknown format, sent as image/jpeg"),
            QueueEvent::ModerationPending { id, remote_id } => {
                info!(%id, remote_id, "awaiting moderation")
            }
            QueueEvent::Paused { reason } => warn!(?reason, "upload queue paused"),
            QueueEvent::Idle => debug!("upload queue idle"),
        }
    }
}
