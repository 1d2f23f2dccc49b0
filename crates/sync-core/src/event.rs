use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

use crate::error::Result;

/// The kind of filesystem action an [`FsEvent`] reports. A rename surfaces as
/// a `Deleted` for the old path followed by a `Created` for the new path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsAction {
    Created,
    Modified,
    Deleted,
}

/// A single raw filesystem change, as delivered by the platform watcher
/// before debouncing.
#[derive(Debug, Clone)]
pub struct FsEvent {
    pub path: PathBuf,
    pub action: FsAction,
    pub observed_at: DateTime<Utc>,
}

/// Platform-neutral source of filesystem change notifications for one or
/// more watched subtrees.
///
/// `watch` recurses into subdirectories. Re-watching an already-watched path
/// fails with [`crate::error::SyncError::AlreadyExists`]; watching a path
/// that is absent or not a directory fails with
/// [`crate::error::SyncError::InvalidArgument`]; exhausting the operating
/// system's watch descriptors fails with
/// [`crate::error::SyncError::ResourceExhausted`].
#[async_trait]
pub trait EventSource: Send + Sync {
    async fn watch(&self, path: &Path) -> Result<()>;
    async fn unwatch(&self, path: &Path) -> Result<()>;
    async fn is_watching(&self, path: &Path) -> bool;
    /// Stop all watches and release platform handles. Idempotent.
    async fn stop(&self) -> Result<()>;

    /// Register for the event stream. Per Design Notes §9, the source's
    /// user-facing callback is modeled as a bounded channel rather than a
    /// closure: each call returns a fresh receiver fed by the same internal
    /// broadcast.
    fn subscribe(&self) -> tokio::sync::broadcast::Receiver<FsEvent>;
}
