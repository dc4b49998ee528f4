//! Collaborators for a headless run.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::time::{Duration, Instant};

use photolift_background::{BackgroundScheduler, ScheduleError, ScheduleRequest, WindowBudget};
use photolift_queue::{Authenticator, CollectionStore, Moderator};
use tracing::{debug, info};

/// Collections are assigned through the `categoryId` field of the upload form,
/// so attaching only confirms the server handed back an id.
pub struct FormCollections;

impl CollectionStore for FormCollections {
    fn attach(
        &self,
        remote_id: i64,
        collection_id: i64,
    ) -> Pin<Box<dyn Future<Output = Result<(), String>> + Send + '_>> {
        Box::pin(async move {
            if remote_id <= 0 {
                return Err(format!("server returned invalid image id {remote_id}"));
            }
            debug!(remote_id, collection_id, "upload attached via category field");
            Ok(())
        })
    }
}

/// Reports uploads awaiting approval in the log.
pub struct LogModerator;

impl Moderator for LogModerator {
    fn submit(
        &self,
        collection_id: i64,
        remote_ids: Vec<i64>,
    ) -> Pin<Box<dyn Future<Output = Result<(), String>> + Send + '_>> {
        Box::pin(async move {
            info!(collection_id, ?remote_ids, "uploads awaiting moderation");
            Ok(())
        })
    }
}

/// Credentials come from the config file and cannot be refreshed mid-run.
pub struct FixedCredentials;

impl Authenticator for FixedCredentials {
    fn relogin(&self) -> Pin<Box<dyn Future<Output = Result<(), String>> + Send + '_>> {
        Box::pin(async {
            Err("server refused the configured credentials; update the config file".to_string())
        })
    }
}

/// Window that ends at a fixed instant.
pub struct DeadlineBudget {
    deadline: Instant,
}

impl DeadlineBudget {
    pub fn new(length: Duration) -> Self {
        Self {
            deadline: Instant::now() + length,
        }
    }
}

impl WindowBudget for DeadlineBudget {
    fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    fn request_extension(&self) -> bool {
        debug!("extension requested; deadline is fixed");
        false
    }
}

/// Records the next window's earliest start in a file for an external timer to pick up.
pub struct NextRunFile {
    path: PathBuf,
}

impl NextRunFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl BackgroundScheduler for NextRunFile {
    fn submit(&self, request: ScheduleRequest) -> Result<(), ScheduleError> {
        let line = format!(
            "{} {}\n",
            request.identifier,
            request.earliest_begin.to_rfc3339()
        );
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ScheduleError::Rejected(e.to_string()))?;
        }
        std::fs::write(&self.path, line).map_err(|e| ScheduleError::Rejected(e.to_string()))?;
        info!(
            path = %self.path.display(),
            earliest_begin = %request.earliest_begin,
            "next background window requested"
        );
        Ok(())
    }
}
