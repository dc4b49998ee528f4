//! Upload queue manager.
//!
//! A single worker task owns the queue and drives each item through
//! retrieval, transformation, chunked upload and finalization. Callers talk
//! to it through a [`QueueHandle`]; progress and outcomes flow back as
//! [`QueueEvent`]s.

pub mod batch;
pub mod collab;
pub mod config;
pub mod error;
pub mod events;
pub mod handle;
pub mod item;
mod pipeline;
pub mod store;
mod worker;


pub use batch::UploadBatch;
pub use collab::{
    Authenticator, CollectionStore, Decision, DecisionProvider, DeferAll, FailurePrompt,
    IdleGuard, Moderator, NoIdleGuard,
};
pub use config::UploadConfig;
pub use error::QueueError;
pub use events::{ItemOutcome, PauseReason, QueueEvent};
pub use handle::{QueueDeps, QueueHandle, QueueStatus, UploadQueueManager};
pub use item::{FailureClass, FailureReason, FailureStage, ItemId, ItemState, NewUpload, UploadItem};
pub use store::{JsonFileStore, MemoryStore, ModerationEntry, PersistedQueue, QueueStore};
