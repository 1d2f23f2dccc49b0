use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use sync_core::{
    ChangeType, Conflict, DetectedChange, EventSource, FileMetadata, FileSyncState, FolderStatus,
    MetadataStore, RemoteClient, Result, ResolutionTag, SyncError, SyncFolder, SyncFolderUpdate,
};
use tokio::sync::{broadcast, Mutex as AsyncMutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, warn};

use crate::debounce::Debouncer;
use crate::detector::ChangeDetector;
use crate::hash::hash_file;
use crate::resolver::ConflictResolver;

const REMOTE_OVERLAP: Duration = Duration::from_secs(15);
const MAX_TRANSFER_ATTEMPTS: u32 = 3;
const TRANSFER_DEADLINE: Duration = Duration::from_secs(120);
const DEBOUNCE_WINDOW: Duration = Duration::from_millis(500);

/// A status, change, or error notification the engine publishes for the
/// command/event channel to forward.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    FolderStatus {
        folder_id: String,
        status: FolderStatus,
    },
    FileChanged {
        folder_id: String,
        relative_path: String,
        state: FileSyncState,
    },
    Error {
        folder_id: String,
        relative_path: Option<String>,
        message: String,
    },
    AuthRequired,
}

/// Point-in-time snapshot returned by [`SyncEngine::state`].
#[derive(Debug, Clone)]
pub struct EngineState {
    pub authenticated: bool,
    pub folders: Vec<SyncFolder>,
}

/// Orchestrates per-folder reconciliation: detects divergence between local
/// and remote change sets, classifies conflicts, dispatches transfers with
/// bounded concurrency, and keeps the metadata store consistent.
pub struct SyncEngine {
    store: Arc<dyn MetadataStore>,
    remote: Arc<dyn RemoteClient>,
    event_source: Arc<dyn EventSource>,
    detector: ChangeDetector,
    authenticated: std::sync::atomic::AtomicBool,
    path_locks: DashMap<(String, String), Arc<AsyncMutex<()>>>,
    transfer_permits: Arc<Semaphore>,
    events: broadcast::Sender<EngineEvent>,
    cancellation: CancellationToken,
}

impl SyncEngine {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        remote: Arc<dyn RemoteClient>,
        event_source: Arc<dyn EventSource>,
        max_concurrent_transfers: usize,
    ) -> Self {
        let (events, _rx) = broadcast::channel(256);
        Self {
            store,
            remote,
            event_source,
            detector: ChangeDetector::new(),
            authenticated: std::sync::atomic::AtomicBool::new(false),
            path_locks: DashMap::new(),
            transfer_permits: Arc::new(Semaphore::new(max_concurrent_transfers)),
            events,
            cancellation: CancellationToken::new(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: EngineEvent) {
        let _ = self.events.send(event);
    }

    #[instrument(skip(self, password), level = "info")]
    pub async fn login(&self, username: &str, password: &str) -> Result<()> {
        self.remote.authenticate(username, password).await?;
        self.authenticated
            .store(true, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }

    pub fn logout(&self) {
        self.remote.logout();
        self.authenticated
            .store(false, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(std::sync::atomic::Ordering::SeqCst)
    }

    #[instrument(skip(self, folder), level = "info")]
    pub async fn add_folder(&self, folder: SyncFolder) -> Result<()> {
        self.store.put_folder(&folder).await?;
        if folder.enabled {
            self.event_source.watch(&PathBuf::from(&folder.local_path)).await.ok();
        }
        Ok(())
    }

    pub async fn remove_folder(&self, folder_id: &str) -> Result<()> {
        if let Some(folder) = self.store.get_folder(folder_id).await? {
            let _ = self.event_source.unwatch(&PathBuf::from(&folder.local_path)).await;
        }
        self.store.remove_folder(folder_id).await
    }

    pub async fn pause(&self, folder_id: &str) -> Result<()> {
        self.store.set_folder_status(folder_id, FolderStatus::Paused).await?;
        self.emit(EngineEvent::FolderStatus {
            folder_id: folder_id.to_string(),
            status: FolderStatus::Paused,
        });
        Ok(())
    }

    pub async fn resume(&self, folder_id: &str) -> Result<()> {
        self.store.set_folder_status(folder_id, FolderStatus::Idle).await?;
        self.emit(EngineEvent::FolderStatus {
            folder_id: folder_id.to_string(),
            status: FolderStatus::Idle,
        });
        self.reconcile_folder(folder_id).await
    }

    pub async fn state(&self) -> Result<EngineState> {
        Ok(EngineState {
            authenticated: self.is_authenticated(),
            folders: self.store.list_folders().await?,
        })
    }

    pub async fn update_folder(&self, folder_id: &str, update: &SyncFolderUpdate) -> Result<()> {
        self.store.update_folder(folder_id, update).await
    }

    pub async fn pending_conflicts(&self, folder_id: &str) -> Result<Vec<Conflict>> {
        self.store.pending_conflicts(folder_id).await
    }

    /// Dispatches a caller-supplied decision for a single pending conflict:
    /// maps `tag` to a [`sync_core::ConflictPolicy`], runs the
    /// [`ConflictResolver`] against it, and only marks the conflict resolved
    /// in the store once the transfer it implies has actually happened.
    pub async fn resolve_conflict(&self, conflict_id: &str, tag: ResolutionTag) -> Result<()> {
        let conflict = self
            .store
            .get_conflict(conflict_id)
            .await?
            .ok_or_else(|| SyncError::NotFound(conflict_id.to_string()))?;
        self.apply_manual_resolution(&conflict, tag).await?;
        self.store.resolve_conflict(conflict_id, tag).await
    }

    pub async fn resolve_all_conflicts(&self, folder_id: &str, tag: ResolutionTag) -> Result<usize> {
        let pending = self.store.pending_conflicts(folder_id).await?;
        let count = pending.len();
        for conflict in pending {
            self.apply_manual_resolution(&conflict, tag).await?;
            self.store.resolve_conflict(&conflict.id, tag).await?;
        }
        Ok(count)
    }

    /// Reconstructs a [`ConflictCandidate`] for `conflict`'s current on-disk
    /// and remote state, dispatches it through a [`ConflictResolver`] fixed
    /// to the policy `tag` implies, and brings [`FileMetadata`] back to
    /// `Synced` (or drops it, if the resolution deleted the path).
    async fn apply_manual_resolution(&self, conflict: &Conflict, tag: ResolutionTag) -> Result<()> {
        let policy = match tag {
            ResolutionTag::Local => sync_core::ConflictPolicy::PreferLocal,
            ResolutionTag::Remote => sync_core::ConflictPolicy::PreferRemote,
            ResolutionTag::Both => sync_core::ConflictPolicy::KeepBoth,
            ResolutionTag::Manual => {
                return Err(SyncError::InvalidArgument(
                    "manual resolution requires an explicit local, remote, or both choice".into(),
                ))
            }
        };
        let folder = self
            .store
            .get_folder(&conflict.folder_id)
            .await?
            .ok_or_else(|| SyncError::NotFound(conflict.folder_id.clone()))?;
        let local_root = PathBuf::from(&folder.local_path);
        let candidate = self.build_manual_candidate(&folder, conflict).await?;

        let resolver = ConflictResolver::new(policy);
        resolver
            .resolve(self.remote.as_ref(), &folder.remote_path, &local_root, &candidate)
            .await?;

        let local_path = local_root.join(&conflict.relative_path);
        if local_path.exists() {
            self.refresh_file_metadata(&conflict.folder_id, &local_root, &conflict.relative_path)
                .await;
        } else {
            let _ = self.store.delete_file(&conflict.folder_id, &conflict.relative_path).await;
        }
        Ok(())
    }

    /// Rebuilds a [`ConflictCandidate`] from a stored [`Conflict`] row by
    /// re-checking current presence on each side, rather than trusting the
    /// snapshot taken when the conflict was logged (which may be stale by
    /// the time a caller supplies a manual decision).
    async fn build_manual_candidate(&self, folder: &SyncFolder, conflict: &Conflict) -> Result<crate::detector::ConflictCandidate> {
        let local_root = PathBuf::from(&folder.local_path);
        let local_path = local_root.join(&conflict.relative_path);
        let local = if local_path.exists() {
            Some(DetectedChange {
                relative_path: conflict.relative_path.clone(),
                change_type: ChangeType::Modified,
                origin: sync_core::ChangeOrigin::Local,
                is_directory: local_path.is_dir(),
                size_bytes: None,
                content_hash: None,
                modified_at: conflict.local_modified_at.unwrap_or_else(Utc::now),
            })
        } else {
            None
        };

        let remote_entries = self.remote.list_directory(&folder.remote_path).await?;
        let remote = if remote_entries
            .iter()
            .any(|entry| entry.relative_path == conflict.relative_path)
        {
            Some(DetectedChange {
                relative_path: conflict.relative_path.clone(),
                change_type: ChangeType::Modified,
                origin: sync_core::ChangeOrigin::Remote,
                is_directory: false,
                size_bytes: None,
                content_hash: None,
                modified_at: conflict.remote_modified_at.unwrap_or_else(Utc::now),
            })
        } else {
            None
        };

        Ok(crate::detector::ConflictCandidate {
            relative_path: conflict.relative_path.clone(),
            classifier: conflict.classifier,
            local,
            remote,
        })
    }

    /// Re-establish platform watches for every enabled folder. Called once
    /// at startup, after folders are loaded from the metadata store.
    pub async fn restore_watches(&self) -> Result<()> {
        for folder in self.store.list_folders().await? {
            if folder.enabled {
                let _ = self.event_source.watch(&PathBuf::from(&folder.local_path)).await;
            }
        }
        Ok(())
    }

    /// Subscribes to the event source, debounces raw filesystem events, and
    /// reconciles the single changed path as each one is admitted. This is
    /// an optimization layered on top of [`Self::trigger_sync_all`], which
    /// remains the authoritative reconciliation path; it never substitutes
    /// for it.
    pub fn spawn_event_driven_path(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let mut events = self.event_source.subscribe();
        tokio::spawn(async move {
            let mut debouncer = Debouncer::new(DEBOUNCE_WINDOW);
            loop {
                let event = match events.recv().await {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                if !debouncer.admit(&event.path, event.action) {
                    continue;
                }
                let Some((folder_id, relative_path)) = self.resolve_folder_for_path(&event.path).await else {
                    continue;
                };
                if let Err(e) = self.reconcile_path(&folder_id, &relative_path).await {
                    warn!("event-driven reconciliation failed for {relative_path}: {e}");
                }
            }
        })
    }

    /// Finds the enabled folder that owns `absolute_path`, if any, and
    /// returns its id alongside the path normalized relative to its root.
    async fn resolve_folder_for_path(&self, absolute_path: &std::path::Path) -> Option<(String, String)> {
        let folders = self.store.list_folders().await.ok()?;
        for folder in folders {
            if !folder.enabled {
                continue;
            }
            let root = PathBuf::from(&folder.local_path);
            if let Ok(relative) = absolute_path.strip_prefix(&root) {
                if let Some(relative_path) = sync_core::normalize_relative_path(relative) {
                    return Some((folder.id, relative_path));
                }
            }
        }
        None
    }

    /// Reconciles a single path within a folder: uploads it if present
    /// locally, otherwise propagates the deletion to the remote and metadata
    /// store. Lighter-weight than [`Self::reconcile_folder`] and used only
    /// from the debounced event-driven path.
    #[instrument(skip(self), level = "debug")]
    async fn reconcile_path(&self, folder_id: &str, relative_path: &str) -> Result<()> {
        if !self.is_authenticated() {
            return Ok(());
        }
        let Some(folder) = self.store.get_folder(folder_id).await? else {
            return Ok(());
        };
        if !folder.enabled || folder.status == FolderStatus::Paused {
            return Ok(());
        }

        let local_root = PathBuf::from(&folder.local_path);
        let local_path = local_root.join(relative_path);
        let mut tasks = tokio::task::JoinSet::new();

        if local_path.exists() {
            let change = DetectedChange {
                relative_path: relative_path.to_string(),
                change_type: ChangeType::Modified,
                origin: sync_core::ChangeOrigin::Local,
                is_directory: local_path.is_dir(),
                size_bytes: None,
                content_hash: None,
                modified_at: Utc::now(),
            };
            self.spawn_upload(&mut tasks, folder_id, &folder.remote_path, &local_root, &change);
        } else {
            let change = DetectedChange {
                relative_path: relative_path.to_string(),
                change_type: ChangeType::Deleted,
                origin: sync_core::ChangeOrigin::Local,
                is_directory: false,
                size_bytes: None,
                content_hash: None,
                modified_at: Utc::now(),
            };
            self.spawn_remote_delete(&mut tasks, folder_id, &folder.remote_path, &change);
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!("event-driven transfer task panicked: {e}");
            }
        }
        Ok(())
    }

    /// Run one reconciliation pass for every enabled, non-paused folder.
    #[instrument(skip(self), level = "info")]
    pub async fn trigger_sync_all(&self) -> Result<()> {
        for folder in self.store.list_folders().await? {
            if folder.enabled && folder.status != FolderStatus::Paused {
                if let Err(e) = self.reconcile_folder(&folder.id).await {
                    warn!("reconciliation failed for folder {}: {e}", folder.id);
                }
            }
        }
        Ok(())
    }

    /// One reconciliation pass for a single folder, per the seven-step
    /// procedure: detect, classify, resolve conflicts, partition, dispatch
    /// transfers, update metadata, advance `lastSync`.
    #[instrument(skip(self), level = "info")]
    pub async fn reconcile_folder(&self, folder_id: &str) -> Result<()> {
        if !self.is_authenticated() {
            self.emit(EngineEvent::AuthRequired);
            return Ok(());
        }
        let Some(folder) = self.store.get_folder(folder_id).await? else {
            return Err(SyncError::NotFound(folder_id.to_string()));
        };
        if !folder.enabled {
            return Ok(());
        }

        let reconciliation_start = Utc::now();
        self.store.set_folder_status(folder_id, FolderStatus::Syncing).await?;
        self.emit(EngineEvent::FolderStatus {
            folder_id: folder_id.to_string(),
            status: FolderStatus::Syncing,
        });

        let local_root = PathBuf::from(&folder.local_path);
        let since = folder
            .last_sync_at
            .map(|t| t - chrono::Duration::from_std(REMOTE_OVERLAP).unwrap())
            .unwrap_or_else(|| DateTime::<Utc>::from_timestamp(0, 0).unwrap());

        let local_changes = self
            .detector
            .local_changes(self.store.as_ref(), folder_id, &local_root)
            .await?;
        let remote_changes = self
            .detector
            .remote_changes(self.remote.as_ref(), &folder.remote_path, since)
            .await?;

        let conflicts = self.detector.classify_conflicts(&local_changes, &remote_changes);
        let conflicting_paths: HashSet<&str> =
            conflicts.iter().map(|c| c.relative_path.as_str()).collect();

        let resolver = ConflictResolver::new(folder.conflict_policy);
        for candidate in &conflicts {
            match resolver
                .resolve(self.remote.as_ref(), &folder.remote_path, &local_root, candidate)
                .await
            {
                Ok((tag, _outcome)) => {
                    self.store
                        .log_conflict(&Conflict {
                            id: self.store.generate_id(),
                            folder_id: folder_id.to_string(),
                            relative_path: candidate.relative_path.clone(),
                            local_modified_at: candidate.local.as_ref().map(|c| c.modified_at),
                            remote_modified_at: candidate.remote.as_ref().map(|c| c.modified_at),
                            classifier: candidate.classifier,
                            resolution: Some(tag),
                            resolved_at: Some(Utc::now()),
                        })
                        .await?;
                    self.refresh_file_metadata(folder_id, &local_root, &candidate.relative_path)
                        .await;
                }
                Err(e) => {
                    warn!("conflict resolution failed for {}: {e}", candidate.relative_path);
                    self.store
                        .log_conflict(&Conflict {
                            id: self.store.generate_id(),
                            folder_id: folder_id.to_string(),
                            relative_path: candidate.relative_path.clone(),
                            local_modified_at: candidate.local.as_ref().map(|c| c.modified_at),
                            remote_modified_at: candidate.remote.as_ref().map(|c| c.modified_at),
                            classifier: candidate.classifier,
                            resolution: None,
                            resolved_at: None,
                        })
                        .await?;
                    self.store
                        .upsert_file(&FileMetadata {
                            folder_id: folder_id.to_string(),
                            relative_path: candidate.relative_path.clone(),
                            size_bytes: 0,
                            modified_at: Utc::now(),
                            content_hash: String::new(),
                            is_directory: false,
                            sync_state: FileSyncState::Conflict,
                        })
                        .await?;
                    self.emit(EngineEvent::Error {
                        folder_id: folder_id.to_string(),
                        relative_path: Some(candidate.relative_path.clone()),
                        message: e.to_string(),
                    });
                }
            }
        }

        let known_files_list = self.store.list_files(folder_id).await?;
        let known_files: HashMap<&str, &FileMetadata> = known_files_list
            .iter()
            .map(|f| (f.relative_path.as_str(), f))
            .collect();

        let non_conflicting_local: Vec<&DetectedChange> = local_changes
            .iter()
            .filter(|c| !conflicting_paths.contains(c.relative_path.as_str()))
            .collect();
        let non_conflicting_remote: Vec<&DetectedChange> = remote_changes
            .iter()
            .filter(|c| !conflicting_paths.contains(c.relative_path.as_str()))
            .filter(|c| {
                // A remote change whose content hash already matches what we
                // last synced needs no transfer; the remote rescan window
                // can legitimately resurface it.
                match (&c.content_hash, known_files.get(c.relative_path.as_str())) {
                    (Some(hash), Some(known)) => known.content_hash != *hash,
                    _ => true,
                }
            })
            .collect();

        let mut tasks = tokio::task::JoinSet::new();
        for change in non_conflicting_local {
            if change.change_type == ChangeType::Deleted {
                self.spawn_remote_delete(&mut tasks, folder_id, &folder.remote_path, change);
            } else {
                self.spawn_upload(&mut tasks, folder_id, &folder.remote_path, &local_root, change);
            }
        }
        for change in non_conflicting_remote {
            if change.change_type == ChangeType::Deleted {
                self.spawn_local_delete(&mut tasks, folder_id, &local_root, change);
            } else {
                self.spawn_download(&mut tasks, folder_id, &folder.remote_path, &local_root, change);
            }
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!("transfer task panicked: {e}");
            }
        }

        self.store.set_folder_last_sync(folder_id, reconciliation_start).await?;
        self.store.set_folder_status(folder_id, FolderStatus::Idle).await?;
        self.emit(EngineEvent::FolderStatus {
            folder_id: folder_id.to_string(),
            status: FolderStatus::Idle,
        });
        Ok(())
    }

    async fn refresh_file_metadata(&self, folder_id: &str, local_root: &std::path::Path, relative_path: &str) {
        let local_path = local_root.join(relative_path);
        if let Ok(hash) = hash_file(&local_path).await {
            if let Ok(meta) = std::fs::metadata(&local_path) {
                let _ = self
                    .store
                    .upsert_file(&FileMetadata {
                        folder_id: folder_id.to_string(),
                        relative_path: relative_path.to_string(),
                        size_bytes: meta.len(),
                        modified_at: Utc::now(),
                        content_hash: hash,
                        is_directory: false,
                        sync_state: FileSyncState::Synced,
                    })
                    .await;
            }
        }
    }

    fn path_lock(&self, folder_id: &str, relative_path: &str) -> Arc<AsyncMutex<()>> {
        self.path_locks
            .entry((folder_id.to_string(), relative_path.to_string()))
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    fn spawn_upload(
        &self,
        tasks: &mut tokio::task::JoinSet<()>,
        folder_id: &str,
        remote_root: &str,
        local_root: &std::path::Path,
        change: &DetectedChange,
    ) {
        let store = self.store.clone();
        let remote = self.remote.clone();
        let events = self.events.clone();
        let lock = self.path_lock(folder_id, &change.relative_path);
        let permits = self.transfer_permits.clone();
        let folder_id = folder_id.to_string();
        let remote_root = remote_root.to_string();
        let local_path = local_root.join(&change.relative_path);
        let relative_path = change.relative_path.clone();
        let is_directory = change.is_directory;

        tasks.spawn(async move {
            let _permit_guard = lock.lock().await;
            if is_directory {
                return;
            }
            let _permit = permits.acquire().await;
            let remote_path = format!("{}/{}", remote_root.trim_end_matches('/'), relative_path);
            let outcome = with_retry(|| async {
                let bytes = tokio::fs::read(&local_path)
                    .await
                    .map_err(SyncError::from)?;
                remote.upload(&bytes, &remote_path, None).await
            })
            .await;

            match outcome {
                Ok(()) => {
                    if let (Ok(hash), Ok(meta)) =
                        (hash_file(&local_path).await, std::fs::metadata(&local_path))
                    {
                        let _ = store
                            .upsert_file(&FileMetadata {
                                folder_id: folder_id.clone(),
                                relative_path: relative_path.clone(),
                                size_bytes: meta.len(),
                                modified_at: Utc::now(),
                                content_hash: hash,
                                is_directory: false,
                                sync_state: FileSyncState::Synced,
                            })
                            .await;
                        let _ = events.send(EngineEvent::FileChanged {
                            folder_id,
                            relative_path,
                            state: FileSyncState::Synced,
                        });
                    }
                }
                Err(e) => {
                    let _ = store
                        .upsert_file(&FileMetadata {
                            folder_id: folder_id.clone(),
                            relative_path: relative_path.clone(),
                            size_bytes: 0,
                            modified_at: Utc::now(),
                            content_hash: String::new(),
                            is_directory: false,
                            sync_state: FileSyncState::Error,
                        })
                        .await;
                    let _ = events.send(EngineEvent::Error {
                        folder_id,
                        relative_path: Some(relative_path),
                        message: e.to_string(),
                    });
                }
            }
        });
    }

    fn spawn_download(
        &self,
        tasks: &mut tokio::task::JoinSet<()>,
        folder_id: &str,
        remote_root: &str,
        local_root: &std::path::Path,
        change: &DetectedChange,
    ) {
        let store = self.store.clone();
        let remote = self.remote.clone();
        let events = self.events.clone();
        let lock = self.path_lock(folder_id, &change.relative_path);
        let permits = self.transfer_permits.clone();
        let folder_id = folder_id.to_string();
        let remote_root = remote_root.to_string();
        let local_path = local_root.join(&change.relative_path);
        let relative_path = change.relative_path.clone();
        let is_directory = change.is_directory;

        tasks.spawn(async move {
            let _guard = lock.lock().await;
            if is_directory {
                let _ = tokio::fs::create_dir_all(&local_path).await;
                return;
            }
            let _permit = permits.acquire().await;
            let remote_path = format!("{}/{}", remote_root.trim_end_matches('/'), relative_path);
            let outcome = with_retry(|| async {
                let bytes = remote.download(&remote_path).await?;
                if let Some(parent) = local_path.parent() {
                    tokio::fs::create_dir_all(parent).await.map_err(SyncError::from)?;
                }
                tokio::fs::write(&local_path, &bytes).await.map_err(SyncError::from)
            })
            .await;

            match outcome {
                Ok(()) => {
                    if let (Ok(hash), Ok(meta)) =
                        (hash_file(&local_path).await, std::fs::metadata(&local_path))
                    {
                        let _ = store
                            .upsert_file(&FileMetadata {
                                folder_id: folder_id.clone(),
                                relative_path: relative_path.clone(),
                                size_bytes: meta.len(),
                                modified_at: Utc::now(),
                                content_hash: hash,
                                is_directory: false,
                                sync_state: FileSyncState::Synced,
                            })
                            .await;
                        let _ = events.send(EngineEvent::FileChanged {
                            folder_id,
                            relative_path,
                            state: FileSyncState::Synced,
                        });
                    }
                }
                Err(e) => {
                    let _ = events.send(EngineEvent::Error {
                        folder_id,
                        relative_path: Some(relative_path),
                        message: e.to_string(),
                    });
                }
            }
        });
    }

    fn spawn_remote_delete(
        &self,
        tasks: &mut tokio::task::JoinSet<()>,
        folder_id: &str,
        remote_root: &str,
        change: &DetectedChange,
    ) {
        let store = self.store.clone();
        let remote = self.remote.clone();
        let lock = self.path_lock(folder_id, &change.relative_path);
        let folder_id = folder_id.to_string();
        let remote_path = format!(
            "{}/{}",
            remote_root.trim_end_matches('/'),
            change.relative_path
        );
        let relative_path = change.relative_path.clone();

        tasks.spawn(async move {
            let _guard = lock.lock().await;
            if with_retry(|| async { remote.delete(&remote_path).await }).await.is_ok() {
                let _ = store.delete_file(&folder_id, &relative_path).await;
            }
        });
    }

    fn spawn_local_delete(
        &self,
        tasks: &mut tokio::task::JoinSet<()>,
        folder_id: &str,
        local_root: &std::path::Path,
        change: &DetectedChange,
    ) {
        let store = self.store.clone();
        let lock = self.path_lock(folder_id, &change.relative_path);
        let folder_id = folder_id.to_string();
        let local_path = local_root.join(&change.relative_path);
        let relative_path = change.relative_path.clone();

        tasks.spawn(async move {
            let _guard = lock.lock().await;
            let removed = if local_path.is_dir() {
                tokio::fs::remove_dir_all(&local_path).await
            } else {
                tokio::fs::remove_file(&local_path).await
            };
            if removed.is_ok() || matches!(&removed, Err(e) if e.kind() == std::io::ErrorKind::NotFound) {
                let _ = store.delete_file(&folder_id, &relative_path).await;
            }
        });
    }

    pub async fn stop(&self) {
        self.cancellation.cancel();
        let _ = self.event_source.stop().await;
    }
}

/// Retries a transfer closure up to [`MAX_TRANSFER_ATTEMPTS`] times with
/// exponential backoff (1s, 2s, 4s) on transient errors; permanent errors
/// fail immediately. Each attempt is bounded by [`TRANSFER_DEADLINE`].
async fn with_retry<F, Fut>(mut op: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<()>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        let result = tokio::time::timeout(TRANSFER_DEADLINE, op()).await;
        let result = match result {
            Ok(r) => r,
            Err(_) => Err(SyncError::NetworkTransient("transfer deadline exceeded".into())),
        };

        match result {
            Ok(()) => return Ok(()),
            Err(e) if e.is_transient() && attempt < MAX_TRANSFER_ATTEMPTS => {
                let backoff = Duration::from_secs(1 << (attempt - 1));
                debug!("transient transfer error ({e}), retrying in {backoff:?}");
                tokio::time::sleep(backoff).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_remote::FakeRemoteClient;
    use crate::store::SqliteMetadataStore;
    use crate::watch::NotifyEventSource;
    use tempfile::TempDir;

    fn engine(store: Arc<dyn MetadataStore>, remote: Arc<dyn RemoteClient>) -> SyncEngine {
        let source = Arc::new(NotifyEventSource::new().unwrap());
        SyncEngine::new(store, remote, source, 4)
    }

    #[tokio::test]
    async fn fresh_upload_scenario() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("hello.txt"), b"hello\n").unwrap();

        let store: Arc<dyn MetadataStore> = Arc::new(SqliteMetadataStore::open_in_memory().unwrap());
        let fake = Arc::new(FakeRemoteClient::new());
        let remote: Arc<dyn RemoteClient> = fake.clone();
        let engine = engine(store.clone(), remote.clone());
        engine.login("user", "pass").await.unwrap();

        let folder = SyncFolder::new(
            store.generate_id(),
            dir.path().display().to_string(),
            "/remote/A".to_string(),
        );
        let folder_id = folder.id.clone();
        engine.add_folder(folder).await.unwrap();

        engine.reconcile_folder(&folder_id).await.unwrap();

        let files = store.list_files(&folder_id).await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(
            files[0].content_hash,
            "5891b5b522d5df086d0ff0b110fbd9d21bb4fc7163af34d08286a2e846f6be03"
        );
        assert_eq!(files[0].sync_state, FileSyncState::Synced);

        assert_eq!(fake.get("/remote/A/hello.txt"), Some(b"hello\n".to_vec()));
    }

    #[tokio::test]
    async fn convergence_after_clean_reconciliation_has_no_further_transfers() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("hello.txt"), b"hello\n").unwrap();

        let store: Arc<dyn MetadataStore> = Arc::new(SqliteMetadataStore::open_in_memory().unwrap());
        let remote: Arc<dyn RemoteClient> = Arc::new(FakeRemoteClient::new());
        let engine = engine(store.clone(), remote.clone());
        engine.login("user", "pass").await.unwrap();

        let folder = SyncFolder::new(
            store.generate_id(),
            dir.path().display().to_string(),
            "/remote/A".to_string(),
        );
        let folder_id = folder.id.clone();
        engine.add_folder(folder).await.unwrap();
        engine.reconcile_folder(&folder_id).await.unwrap();

        let mut rx = engine.subscribe();
        engine.reconcile_folder(&folder_id).await.unwrap();

        let mut saw_file_change = false;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, EngineEvent::FileChanged { .. }) {
                saw_file_change = true;
            }
        }
        assert!(!saw_file_change);
    }

    #[tokio::test]
    async fn reconcile_emits_auth_required_when_logged_out() {
        let dir = TempDir::new().unwrap();
        let store: Arc<dyn MetadataStore> = Arc::new(SqliteMetadataStore::open_in_memory().unwrap());
        let fake = Arc::new(FakeRemoteClient::new());
        fake.set_authenticated(false);
        let remote: Arc<dyn RemoteClient> = fake;
        let engine = engine(store.clone(), remote);

        let folder = SyncFolder::new(
            store.generate_id(),
            dir.path().display().to_string(),
            "/remote/A".to_string(),
        );
        let folder_id = folder.id.clone();
        engine.add_folder(folder).await.unwrap();

        let mut rx = engine.subscribe();
        engine.reconcile_folder(&folder_id).await.unwrap();

        assert!(matches!(rx.try_recv(), Ok(EngineEvent::AuthRequired)));
    }

    #[tokio::test]
    async fn resolve_conflict_dispatches_the_chosen_side_and_clears_sync_state() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"local wins").unwrap();

        let store: Arc<dyn MetadataStore> = Arc::new(SqliteMetadataStore::open_in_memory().unwrap());
        let fake = Arc::new(FakeRemoteClient::new());
        fake.seed("/remote/A/notes.txt", b"remote version".to_vec());
        let remote: Arc<dyn RemoteClient> = fake.clone();
        let engine = engine(store.clone(), remote.clone());
        engine.login("user", "pass").await.unwrap();

        let mut folder = SyncFolder::new(
            store.generate_id(),
            dir.path().display().to_string(),
            "/remote/A".to_string(),
        );
        folder.conflict_policy = sync_core::ConflictPolicy::Ask;
        let folder_id = folder.id.clone();
        engine.add_folder(folder).await.unwrap();

        // First reconciliation: both sides see the path as new, Ask can't
        // pick a side on its own, so this lands as a pending conflict.
        engine.reconcile_folder(&folder_id).await.unwrap();

        let pending = engine.pending_conflicts(&folder_id).await.unwrap();
        assert_eq!(pending.len(), 1);
        let conflict_id = pending[0].id.clone();

        let file = store.get_file(&folder_id, "notes.txt").await.unwrap().unwrap();
        assert_eq!(file.sync_state, FileSyncState::Conflict);

        engine.resolve_conflict(&conflict_id, ResolutionTag::Local).await.unwrap();

        assert_eq!(fake.get("/remote/A/notes.txt").unwrap(), b"local wins");
        let file = store.get_file(&folder_id, "notes.txt").await.unwrap().unwrap();
        assert_eq!(file.sync_state, FileSyncState::Synced);
        assert!(engine.pending_conflicts(&folder_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn resolve_conflict_rejects_the_manual_tag() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"local wins").unwrap();

        let store: Arc<dyn MetadataStore> = Arc::new(SqliteMetadataStore::open_in_memory().unwrap());
        let fake = Arc::new(FakeRemoteClient::new());
        fake.seed("/remote/A/notes.txt", b"remote version".to_vec());
        let remote: Arc<dyn RemoteClient> = fake;
        let engine = engine(store.clone(), remote);
        engine.login("user", "pass").await.unwrap();

        let mut folder = SyncFolder::new(
            store.generate_id(),
            dir.path().display().to_string(),
            "/remote/A".to_string(),
        );
        folder.conflict_policy = sync_core::ConflictPolicy::Ask;
        let folder_id = folder.id.clone();
        engine.add_folder(folder).await.unwrap();
        engine.reconcile_folder(&folder_id).await.unwrap();

        let pending = engine.pending_conflicts(&folder_id).await.unwrap();
        let conflict_id = pending[0].id.clone();

        let err = engine
            .resolve_conflict(&conflict_id, ResolutionTag::Manual)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidArgument(_)));
    }
}
