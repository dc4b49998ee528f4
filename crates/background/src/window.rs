//! One background execution window.

use std::time::Duration;

use chrono::Utc;
use photolift_protocol::BACKGROUND_TASK_ID;
use photolift_queue::{QueueHandle, QueueStatus};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::BackgroundConfig;
use crate::scheduler::{BackgroundScheduler, ScheduleRequest};

/// Time the OS still grants the current window.
pub trait WindowBudget: Send + Sync {
    fn remaining(&self) -> Duration;

    /// Asks for more time. Returns true if granted.
    fn request_extension(&self) -> bool;
}

/// Why the window ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowEnd {
    /// Nothing runnable is left.
    Drained,
    /// The OS signalled expiration.
    Expired,
    /// Remaining time fell below the safety margin and no extension was granted.
    OutOfTime,
    /// The byte budget was used up.
    ByteLimit,
    /// The queue paused itself.
    Paused,
    /// The queue worker is gone.
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowReport {
    pub end: WindowEnd,
    pub bytes_uploaded: u64,
    pub completed: usize,
    pub remaining: usize,
    /// A follow-up window was requested.
    pub rescheduled: bool,
}

/// Runs the queue for one background window.
///
/// Returns once the queue drains, pauses, or the window has to end. When
/// resumable items remain a follow-up window is requested from `scheduler`.
pub async fn run_window(
    queue: &QueueHandle,
    budget: &dyn WindowBudget,
    scheduler: &dyn BackgroundScheduler,
    config: &BackgroundConfig,
    expiration: &CancellationToken,
) -> WindowReport {
    let mut status_rx = queue.subscribe_status();
    let start = status_rx.borrow_and_update().clone();
    info!(
        remaining = start.remaining,
        budget_secs = budget.remaining().as_secs(),
        "background window started"
    );

    let end = if expiration.is_cancelled() {
        suspend(queue, config).await;
        WindowEnd::Expired
    } else if queue.resume().await.is_err() {
        WindowEnd::Stopped
    } else {
        drive(queue, budget, config, expiration).await
    };

    let status = queue.status();
    let rescheduled = status.resumable > 0 && reschedule(scheduler, config);
    let report = WindowReport {
        end,
        bytes_uploaded: status.bytes_uploaded.saturating_sub(start.bytes_uploaded),
        completed: status.completed_total.saturating_sub(start.completed_total),
        remaining: status.remaining,
        rescheduled,
    };
    info!(?report, "background window finished");
    report
}

async fn drive(
    queue: &QueueHandle,
    budget: &dyn WindowBudget,
    config: &BackgroundConfig,
    expiration: &CancellationToken,
) -> WindowEnd {
    let mut status_rx = queue.subscribe_status();
    let start_bytes = status_rx.borrow().bytes_uploaded;
    let mut byte_limited = false;
    let mut extended = false;

    let mut ticker = tokio::time::interval(config.tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let initial = status_rx.borrow_and_update().clone();
    if initial.idle {
        return idle_end(&initial, false);
    }

    loop {
        tokio::select! {
            biased;
            _ = expiration.cancelled() => {
                info!("background window expired");
                suspend(queue, config).await;
                return WindowEnd::Expired;
            }
            changed = status_rx.changed() => {
                if changed.is_err() {
                    return WindowEnd::Stopped;
                }
                let status = status_rx.borrow_and_update().clone();
                let sent = status.bytes_uploaded.saturating_sub(start_bytes);
                if !byte_limited && sent >= config.max_bytes_per_window {
                    info!(sent, "byte budget used, pausing after current item");
                    byte_limited = true;
                    if queue.pause().await.is_err() {
                        return WindowEnd::Stopped;
                    }
                    continue;
                }
                if status.idle {
                    return idle_end(&status, byte_limited);
                }
            }
            _ = ticker.tick() => {
                let remaining = budget.remaining();
                if remaining > config.safety_margin {
                    continue;
                }
                if !extended {
                    extended = true;
                    if budget.request_extension() {
                        info!("background window extended");
                        continue;
                    }
                }
                warn!(
                    remaining_ms = remaining.as_millis() as u64,
                    "window ending, suspending queue"
                );
                suspend(queue, config).await;
                return WindowEnd::OutOfTime;
            }
        }
    }
}

fn idle_end(status: &QueueStatus, byte_limited: bool) -> WindowEnd {
    if byte_limited {
        WindowEnd::ByteLimit
    } else if status.paused.is_some() {
        WindowEnd::Paused
    } else {
        WindowEnd::Drained
    }
}

/// Suspends the queue and waits, within the safety margin, for the active item to stop.
async fn suspend(queue: &QueueHandle, config: &BackgroundConfig) {
    if queue.suspend().await.is_err() {
        return;
    }
    let mut status_rx = queue.subscribe_status();
    let settled = tokio::time::timeout(
        config.safety_margin,
        status_rx.wait_for(|s| s.active.is_none()),
    )
    .await;
    if settled.is_err() {
        warn!("active item did not stop before the window ended");
    }
}

fn reschedule(scheduler: &dyn BackgroundScheduler, config: &BackgroundConfig) -> bool {
    let delay = config.effective_reschedule_delay();
    let request = ScheduleRequest {
        identifier: BACKGROUND_TASK_ID.to_string(),
        earliest_begin: Utc::now()
            + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::seconds(60)),
        requires_network: true,
        requires_external_power: config.requires_external_power,
    };
    debug!(?request, "requesting next background window");
    match scheduler.submit(request) {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "failed to schedule background window");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use bytes::Bytes;
    use photolift_media::{
        AssetDescriptor, AssetKind, AssetRetriever, AssetStore, AssetTransformer, ExportPreset,
        ExportedVideo, ImageRequest, PassthroughCodec, ProgressSink, RetrieveError,
    };
    use photolift_protocol::UploadMetadata;
    use photolift_queue::{
        Authenticator, CollectionStore, DeferAll, FailureClass, ItemState, MemoryStore,
        Moderator, NewUpload, NoIdleGuard, QueueDeps, UploadConfig, UploadQueueManager,
    };
    use photolift_uploader::{
        ByteProgress, ChunkRequest, ChunkTransport, ChunkedUploader, TransportResponse,
        UploadError,
    };
    use tokio::sync::Notify;

    use crate::scheduler::ScheduleError;

    const KB: usize = 1024;

    struct Photos;

    impl AssetStore for Photos {
        fn describe(
            &self,
            source_ref: &str,
        ) -> Pin<Box<dyn Future<Output = Result<AssetDescriptor, RetrieveError>> + Send + '_>>
        {
            let file_name = format!("{source_ref}.jpg");
            Box::pin(async move {
                Ok(AssetDescriptor {
                    kind: AssetKind::Image,
                    file_name,
                    pixel_width: 800,
                    pixel_height: 600,
                    mime_type: Some("image/jpeg".into()),
                    creation_date: None,
                    export_presets: vec![],
                })
            })
        }

        fn fetch_image(
            &self,
            _source_ref: &str,
            _request: ImageRequest,
            _progress: ProgressSink,
        ) -> Pin<Box<dyn Future<Output = Result<Bytes, RetrieveError>> + Send + '_>> {
            Box::pin(async {
                let mut data = vec![0u8; 2 * KB];
                data[..3].copy_from_slice(&[0xFF, 0xD8, 0xFF]);
                Ok(Bytes::from(data))
            })
        }

        fn export_video(
            &self,
            _source_ref: &str,
            _preset: ExportPreset,
            _progress: ProgressSink,
        ) -> Pin<Box<dyn Future<Output = Result<ExportedVideo, RetrieveError>> + Send + '_>>
        {
            Box::pin(async { Err(RetrieveError::UnsupportedFormat) })
        }
    }

    /// Acknowledges every chunk, or hangs once `hang` is set.
    #[derive(Default)]
    struct Server {
        hang: AtomicBool,
        posts: AtomicUsize,
        next_id: AtomicU64,
        started: Notify,
    }

    impl ChunkTransport for Server {
        fn post_chunk(
            &self,
            request: ChunkRequest,
            _progress: ByteProgress,
        ) -> Pin<Box<dyn Future<Output = Result<TransportResponse, UploadError>> + Send + '_>>
        {
            self.posts.fetch_add(1, Ordering::SeqCst);
            self.started.notify_one();
            let hang = self.hang.load(Ordering::SeqCst);
            Box::pin(async move {
                if hang {
                    std::future::pending::<()>().await;
                }
                let body = if request.index + 1 == request.total {
                    let id = 500 + self.next_id.fetch_add(1, Ordering::SeqCst);
                    format!(r#"{{"stat":"ok","result":{{"image_id":{id}}}}}"#)
                } else {
                    r#"{"stat":"ok"}"#.to_string()
                };
                Ok(TransportResponse {
                    status: 200,
                    body: Bytes::from(body),
                })
            })
        }
    }

    struct Accept;

    impl CollectionStore for Accept {
        fn attach(
            &self,
            _remote_id: i64,
            _collection_id: i64,
        ) -> Pin<Box<dyn Future<Output = Result<(), String>> + Send + '_>> {
            Box::pin(async { Ok(()) })
        }
    }

    impl Moderator for Accept {
        fn submit(
            &self,
            _collection_id: i64,
            _remote_ids: Vec<i64>,
        ) -> Pin<Box<dyn Future<Output = Result<(), String>> + Send + '_>> {
            Box::pin(async { Ok(()) })
        }
    }

    impl Authenticator for Accept {
        fn relogin(&self) -> Pin<Box<dyn Future<Output = Result<(), String>> + Send + '_>> {
            Box::pin(async { Ok(()) })
        }
    }

    struct Budget {
        remaining_ms: AtomicU64,
        grant: bool,
        extensions: AtomicUsize,
    }

    impl Budget {
        fn new(remaining: Duration, grant: bool) -> Self {
            Self {
                remaining_ms: AtomicU64::new(remaining.as_millis() as u64),
                grant,
                extensions: AtomicUsize::new(0),
            }
        }
    }

    impl WindowBudget for Budget {
        fn remaining(&self) -> Duration {
            Duration::from_millis(self.remaining_ms.load(Ordering::SeqCst))
        }

        fn request_extension(&self) -> bool {
            self.extensions.fetch_add(1, Ordering::SeqCst);
            if self.grant {
                self.remaining_ms.store(60_000, Ordering::SeqCst);
            }
            self.grant
        }
    }

    #[derive(Default)]
    struct Scheduler {
        requests: Mutex<Vec<ScheduleRequest>>,
    }

    impl BackgroundScheduler for Scheduler {
        fn submit(&self, request: ScheduleRequest) -> Result<(), ScheduleError> {
            self.requests.lock().unwrap().push(request);
            Ok(())
        }
    }

    fn config() -> BackgroundConfig {
        BackgroundConfig {
            tick: Duration::from_millis(10),
            safety_margin: Duration::from_secs(2),
            ..Default::default()
        }
    }

    async fn paused_queue(server: Arc<Server>) -> QueueHandle {
        let deps = QueueDeps {
            retriever: Arc::new(AssetRetriever::new(Arc::new(Photos), vec![])),
            transformer: Arc::new(AssetTransformer::new(Arc::new(PassthroughCodec))),
            uploader: Arc::new(ChunkedUploader::new(server)),
            collections: Arc::new(Accept),
            moderator: Arc::new(Accept),
            authenticator: Arc::new(Accept),
            decisions: Arc::new(DeferAll),
            idle_guard: Arc::new(NoIdleGuard),
            store: Arc::new(MemoryStore::new()),
        };
        let config = UploadConfig {
            chunk_size_bytes: KB,
            start_paused: true,
            ..Default::default()
        };
        UploadQueueManager::spawn(deps, config).unwrap()
    }

    fn upload(name: &str) -> NewUpload {
        NewUpload {
            source_ref: name.into(),
            target_collection_id: 3,
            kind: AssetKind::Image,
            transform_options: Default::default(),
            metadata: UploadMetadata {
                file_name: format!("{name}.jpg"),
                creation_date: Utc::now().naive_utc(),
                title: String::new(),
                category_id: 3,
                privacy_level: 0,
                author: String::new(),
                description: String::new(),
                tag_ids: vec![],
                mime_type: String::new(),
            },
            delete_after_upload: false,
        }
    }

    #[tokio::test]
    async fn drained_window_is_not_rescheduled() {
        let server = Arc::new(Server::default());
        let queue = paused_queue(server.clone()).await;
        queue.enqueue(vec![upload("a"), upload("b")]).await.unwrap();

        let budget = Budget::new(Duration::from_secs(30), false);
        let scheduler = Scheduler::default();
        let report = run_window(
            &queue,
            &budget,
            &scheduler,
            &config(),
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(report.end, WindowEnd::Drained);
        assert_eq!(report.completed, 2);
        assert_eq!(report.bytes_uploaded, 4 * KB as u64);
        assert_eq!(report.remaining, 0);
        assert!(!report.rescheduled);
        assert!(scheduler.requests.lock().unwrap().is_empty());
        assert_eq!(server.posts.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn expiration_mid_upload_interrupts_item() {
        let server = Arc::new(Server::default());
        server.hang.store(true, Ordering::SeqCst);
        let queue = paused_queue(server.clone()).await;
        queue.enqueue(vec![upload("a"), upload("b")]).await.unwrap();

        let expiration = CancellationToken::new();
        let trigger = expiration.clone();
        let watcher = server.clone();
        tokio::spawn(async move {
            watcher.started.notified().await;
            trigger.cancel();
        });

        let budget = Budget::new(Duration::from_secs(30), false);
        let scheduler = Scheduler::default();
        let before = Utc::now();
        let report = run_window(&queue, &budget, &scheduler, &config(), &expiration).await;

        assert_eq!(report.end, WindowEnd::Expired);
        assert_eq!(report.completed, 0);
        assert!(report.rescheduled);

        let batch = queue.snapshot().await.unwrap();
        let reason = batch.items[0].state.failure().unwrap();
        assert_eq!(reason.class, FailureClass::Interrupted);
        assert_eq!(batch.items[1].state, ItemState::Queued);

        let posts = server.posts.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(server.posts.load(Ordering::SeqCst), posts);
        assert_eq!(posts, 1);

        let requests = scheduler.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].identifier, "org.photolift.upload-manager");
        assert!(requests[0].earliest_begin >= before + chrono::Duration::seconds(60));
        assert!(requests[0].requires_network);
        assert!(!requests[0].requires_external_power);
    }

    #[tokio::test]
    async fn already_expired_window_starts_nothing() {
        let server = Arc::new(Server::default());
        let queue = paused_queue(server.clone()).await;
        queue.enqueue(vec![upload("a")]).await.unwrap();

        let expiration = CancellationToken::new();
        expiration.cancel();
        let budget = Budget::new(Duration::from_secs(30), false);
        let scheduler = Scheduler::default();
        let report = run_window(&queue, &budget, &scheduler, &config(), &expiration).await;

        assert_eq!(report.end, WindowEnd::Expired);
        assert_eq!(server.posts.load(Ordering::SeqCst), 0);
        assert!(report.rescheduled);
    }

    #[tokio::test]
    async fn low_budget_asks_for_extension_once_then_suspends() {
        let server = Arc::new(Server::default());
        server.hang.store(true, Ordering::SeqCst);
        let queue = paused_queue(server.clone()).await;
        queue.enqueue(vec![upload("a")]).await.unwrap();

        let budget = Budget::new(Duration::from_secs(1), false);
        let scheduler = Scheduler::default();
        let report = run_window(
            &queue,
            &budget,
            &scheduler,
            &config(),
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(report.end, WindowEnd::OutOfTime);
        assert_eq!(budget.extensions.load(Ordering::SeqCst), 1);
        assert!(report.rescheduled);
        assert!(queue.status().active.is_none());
    }

    #[tokio::test]
    async fn granted_extension_lets_queue_drain() {
        let server = Arc::new(Server::default());
        let queue = paused_queue(server.clone()).await;
        queue.enqueue(vec![upload("a")]).await.unwrap();

        let budget = Budget::new(Duration::from_secs(1), true);
        let scheduler = Scheduler::default();
        let report = run_window(
            &queue,
            &budget,
            &scheduler,
            &config(),
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(report.end, WindowEnd::Drained);
        assert_eq!(report.completed, 1);
        assert!(budget.extensions.load(Ordering::SeqCst) <= 1);
    }

    #[tokio::test]
    async fn byte_budget_pauses_after_current_item() {
        let server = Arc::new(Server::default());
        let queue = paused_queue(server.clone()).await;
        queue
            .enqueue(vec![upload("a"), upload("b"), upload("c"), upload("d")])
            .await
            .unwrap();

        let budget = Budget::new(Duration::from_secs(30), false);
        let scheduler = Scheduler::default();
        let config = BackgroundConfig {
            max_bytes_per_window: KB as u64,
            ..config()
        };
        let report =
            run_window(&queue, &budget, &scheduler, &config, &CancellationToken::new()).await;

        assert_eq!(report.end, WindowEnd::ByteLimit);
        assert!(report.completed >= 1 && report.completed < 4);
        assert_eq!(report.remaining, 4 - report.completed);
        assert!(report.rescheduled);
        assert!(queue.status().paused.is_some());
    }
}
