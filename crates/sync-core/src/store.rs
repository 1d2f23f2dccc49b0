use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::model::{Conflict, FileMetadata, ResolutionTag, SyncFolder, SyncFolderUpdate};

/// Durable state shared across components: sync folders, per-file metadata,
/// and the conflict log.
///
/// Implementations must be safe for concurrent callers and durable: once a
/// write returns successfully, a subsequent process crash and restart must
/// not lose it.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn put_folder(&self, folder: &SyncFolder) -> Result<()>;
    async fn update_folder(&self, folder_id: &str, update: &SyncFolderUpdate) -> Result<()>;
    async fn set_folder_status(
        &self,
        folder_id: &str,
        status: crate::model::FolderStatus,
    ) -> Result<()>;
    async fn set_folder_last_sync(
        &self,
        folder_id: &str,
        last_sync_at: DateTime<Utc>,
    ) -> Result<()>;
    async fn remove_folder(&self, folder_id: &str) -> Result<()>;
    async fn get_folder(&self, folder_id: &str) -> Result<Option<SyncFolder>>;
    async fn list_folders(&self) -> Result<Vec<SyncFolder>>;

    async fn upsert_file(&self, metadata: &FileMetadata) -> Result<()>;
    async fn get_file(&self, folder_id: &str, relative_path: &str) -> Result<Option<FileMetadata>>;
    async fn delete_file(&self, folder_id: &str, relative_path: &str) -> Result<()>;
    async fn list_files(&self, folder_id: &str) -> Result<Vec<FileMetadata>>;
    /// Prefix-scan for files whose metadata changed since `timestamp`.
    async fn changed_since(
        &self,
        folder_id: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<Vec<FileMetadata>>;

    async fn log_conflict(&self, conflict: &Conflict) -> Result<()>;
    async fn get_conflict(&self, conflict_id: &str) -> Result<Option<Conflict>>;
    async fn pending_conflicts(&self, folder_id: &str) -> Result<Vec<Conflict>>;
    async fn resolve_conflict(&self, conflict_id: &str, tag: ResolutionTag) -> Result<()>;

    /// Generate a globally-unique identifier (UUID v4 or equivalent).
    fn generate_id(&self) -> String;
}
