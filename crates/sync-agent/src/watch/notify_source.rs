use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashSet;
use notify::{Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use sync_core::{EventSource, FsAction, FsEvent, Result, SyncError};
use tokio::sync::broadcast;
use tracing::{debug, instrument, warn};

/// [`EventSource`] backed by the `notify` crate, recursing into watched
/// subtrees and fanning raw events out over a broadcast channel.
pub struct NotifyEventSource {
    watched: DashSet<PathBuf>,
    sender: broadcast::Sender<FsEvent>,
    watcher: Mutex<Option<RecommendedWatcher>>,
}

impl NotifyEventSource {
    pub fn new() -> Result<Self> {
        let (sender, _rx) = broadcast::channel(1024);
        let sender_clone = sender.clone();

        let watcher = RecommendedWatcher::new(
            move |res: std::result::Result<Event, notify::Error>| match res {
                Ok(event) => {
                    if let Some(action) = classify(&event.kind) {
                        for path in event.paths {
                            let _ = sender_clone.send(FsEvent {
                                path,
                                action,
                                observed_at: Utc::now(),
                            });
                        }
                    }
                }
                Err(e) => warn!("filesystem watch error: {e}"),
            },
            NotifyConfig::default(),
        )
        .map_err(|e| SyncError::Internal(format!("failed to create watcher: {e}")))?;

        Ok(Self {
            watched: DashSet::new(),
            sender,
            watcher: Mutex::new(Some(watcher)),
        })
    }
}

impl Default for NotifyEventSource {
    fn default() -> Self {
        Self::new().expect("failed to initialize platform watcher")
    }
}

fn classify(kind: &EventKind) -> Option<FsAction> {
    match kind {
        EventKind::Create(_) => Some(FsAction::Created),
        EventKind::Modify(_) => Some(FsAction::Modified),
        EventKind::Remove(_) => Some(FsAction::Deleted),
        _ => None,
    }
}

#[async_trait]
impl EventSource for NotifyEventSource {
    #[instrument(skip(self), level = "debug")]
    async fn watch(&self, path: &Path) -> Result<()> {
        if !path.exists() || !path.is_dir() {
            return Err(SyncError::InvalidArgument(format!(
                "{} is not a directory",
                path.display()
            )));
        }
        if self.watched.contains(path) {
            return Err(SyncError::AlreadyExists(path.display().to_string()));
        }

        let mut guard = self.watcher.lock().unwrap();
        let watcher = guard
            .as_mut()
            .ok_or_else(|| SyncError::Internal("watcher already stopped".into()))?;
        watcher
            .watch(path, RecursiveMode::Recursive)
            .map_err(|e| match e.kind {
                notify::ErrorKind::MaxFilesWatch => SyncError::ResourceExhausted(e.to_string()),
                _ => SyncError::Internal(e.to_string()),
            })?;
        drop(guard);

        self.watched.insert(path.to_path_buf());
        debug!("watching {}", path.display());
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn unwatch(&self, path: &Path) -> Result<()> {
        if self.watched.remove(path).is_none() {
            return Err(SyncError::NotFound(path.display().to_string()));
        }
        let mut guard = self.watcher.lock().unwrap();
        if let Some(watcher) = guard.as_mut() {
            let _ = watcher.unwatch(path);
        }
        Ok(())
    }

    async fn is_watching(&self, path: &Path) -> bool {
        self.watched.contains(path)
    }

    async fn stop(&self) -> Result<()> {
        let mut guard = self.watcher.lock().unwrap();
        *guard = None;
        self.watched.clear();
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<FsEvent> {
        self.sender.subscribe()
    }
}
