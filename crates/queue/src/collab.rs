//! Collaborators the queue worker depends on.
//!
//! Each trait is a seam the embedding application implements: the photo
//! server for collection and moderation calls, the session layer for
//! re-login, the UI (or a policy) for failure decisions, and the platform
//! for keeping the device awake.

use std::future::Future;
use std::pin::Pin;

use crate::item::{FailureReason, ItemId};

/// Attaches uploaded images to collections.
pub trait CollectionStore: Send + Sync {
    fn attach(
        &self,
        remote_id: i64,
        collection_id: i64,
    ) -> Pin<Box<dyn Future<Output = Result<(), String>> + Send + '_>>;
}

/// Submits uploaded images for moderation.
pub trait Moderator: Send + Sync {
    fn submit(
        &self,
        collection_id: i64,
        remote_ids: Vec<i64>,
    ) -> Pin<Box<dyn Future<Output = Result<(), String>> + Send + '_>>;
}

/// Renews the server session.
pub trait Authenticator: Send + Sync {
    fn relogin(&self) -> Pin<Box<dyn Future<Output = Result<(), String>> + Send + '_>>;
}

/// Answer to a failed item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Restart the item from retrieval.
    Retry,
    /// Drop the item and continue.
    Skip,
    /// Drop the item and everything still queued.
    Dismiss,
    /// Keep the item failed and continue with the next one.
    Defer,
}

/// What the decision provider is asked about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailurePrompt {
    pub id: ItemId,
    pub source_ref: String,
    pub reason: FailureReason,
    /// False for failures a retry cannot fix.
    pub retry_offered: bool,
}

/// Decides what happens to a failed item.
pub trait DecisionProvider: Send + Sync {
    fn decide(&self, prompt: &FailurePrompt)
    -> Pin<Box<dyn Future<Output = Decision> + Send + '_>>;
}

/// Defers every failure.
pub struct DeferAll;

impl DecisionProvider for DeferAll {
    fn decide(
        &self,
        _prompt: &FailurePrompt,
    ) -> Pin<Box<dyn Future<Output = Decision> + Send + '_>> {
        Box::pin(async { Decision::Defer })
    }
}

/// Keeps the device awake while an item is active.
pub trait IdleGuard: Send + Sync {
    fn engage(&self);
    fn release(&self);
}

/// Does nothing.
pub struct NoIdleGuard;

impl IdleGuard for NoIdleGuard {
    fn engage(&self) {}
    fn release(&self) {}
}
