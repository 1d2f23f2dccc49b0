use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a [`SyncFolder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FolderStatus {
    Idle,
    Syncing,
    Paused,
    Error,
}

/// Conflict-resolution policy selector for a [`SyncFolder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictPolicy {
    Ask,
    #[default]
    LastWriteWins,
    PreferLocal,
    PreferRemote,
    KeepBoth,
}

/// A durable mapping between a local subtree and a remote subtree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncFolder {
    pub id: String,
    pub local_path: String,
    pub remote_path: String,
    pub enabled: bool,
    pub status: FolderStatus,
    pub conflict_policy: ConflictPolicy,
    pub created_at: DateTime<Utc>,
    pub last_sync_at: Option<DateTime<Utc>>,
}

impl SyncFolder {
    pub fn new(id: String, local_path: String, remote_path: String) -> Self {
        Self {
            id,
            local_path,
            remote_path,
            enabled: true,
            status: FolderStatus::Idle,
            conflict_policy: ConflictPolicy::default(),
            created_at: Utc::now(),
            last_sync_at: None,
        }
    }
}

/// Fields of a [`SyncFolder`] a user command may mutate.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SyncFolderUpdate {
    pub enabled: Option<bool>,
    pub conflict_policy: Option<ConflictPolicy>,
}

/// Sync state of a single known file or directory under a [`SyncFolder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileSyncState {
    Synced,
    PendingUpload,
    PendingDownload,
    Conflict,
    Error,
}

/// The engine's authoritative record of a file's last-known state.
///
/// Invariants: `(folder_id, relative_path)` is unique; a row in `Synced` state
/// carries a non-empty hash for regular files; deletions remove the row
/// outright rather than setting a tombstone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileMetadata {
    pub folder_id: String,
    pub relative_path: String,
    pub size_bytes: u64,
    pub modified_at: DateTime<Utc>,
    pub content_hash: String,
    pub is_directory: bool,
    pub sync_state: FileSyncState,
}

/// Classification of a conflicting pair of changes on the same path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictClassifier {
    ModifiedModified,
    ModifiedDeleted,
    DeletedModified,
    TypeMismatch,
}

/// How a conflict was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionTag {
    Local,
    Remote,
    Both,
    Manual,
}

/// A pair of incompatible changes on the same path during the same
/// reconciliation window. Retained for audit; never replayed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conflict {
    pub id: String,
    pub folder_id: String,
    pub relative_path: String,
    pub local_modified_at: Option<DateTime<Utc>>,
    pub remote_modified_at: Option<DateTime<Utc>>,
    pub classifier: ConflictClassifier,
    pub resolution: Option<ResolutionTag>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Conflict {
    pub fn is_pending(&self) -> bool {
        self.resolution.is_none()
    }
}

/// The kind of difference a [`DetectedChange`] represents, relative to the
/// last known state on its originating side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Created,
    Modified,
    Deleted,
}

/// Which side of the sync a [`DetectedChange`] was observed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOrigin {
    Local,
    Remote,
}

/// An in-memory record describing a single difference between a side and its
/// last known state. Never persisted directly; the Sync Engine turns these
/// into [`FileMetadata`] rows and [`Conflict`] rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectedChange {
    pub relative_path: String,
    pub change_type: ChangeType,
    pub origin: ChangeOrigin,
    pub is_directory: bool,
    pub size_bytes: Option<u64>,
    pub content_hash: Option<String>,
    pub modified_at: DateTime<Utc>,
}

/// Normalize a path to the engine's on-disk relative-path convention:
/// forward slashes, no leading separator, no `.`/`..` segments.
pub fn normalize_relative_path(path: &std::path::Path) -> Option<String> {
    let mut parts = Vec::new();
    for component in path.components() {
        match component {
            std::path::Component::Normal(part) => parts.push(part.to_str()?.to_string()),
            std::path::Component::CurDir => {}
            std::path::Component::ParentDir | std::path::Component::RootDir => return None,
            std::path::Component::Prefix(_) => return None,
        }
    }
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn normalizes_to_forward_slashes() {
        let normalized = normalize_relative_path(Path::new("docs/readme.md")).unwrap();
        assert_eq!(normalized, "docs/readme.md");
        assert!(!normalized.starts_with('/'));
    }

    #[test]
    fn rejects_parent_dir_segments() {
        assert!(normalize_relative_path(Path::new("../escape.txt")).is_none());
    }

    #[test]
    fn drops_current_dir_segments() {
        let normalized = normalize_relative_path(Path::new("./a/./b.txt")).unwrap();
        assert_eq!(normalized, "a/b.txt");
    }
}
