use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use sync_core::{
    normalize_relative_path, ChangeOrigin, ChangeType, ConflictClassifier, DetectedChange,
    MetadataStore, RemoteClient, Result, SyncError,
};
use tracing::{instrument, warn};

use crate::hash::hash_file;

/// Default names ignored during a local scan, in addition to any
/// dotfile/dotdirectory.
const DEFAULT_IGNORE: &[&str] = &[".DS_Store", "Thumbs.db", "desktop.ini"];

struct RawEntry {
    absolute_path: PathBuf,
    relative_path: String,
    is_directory: bool,
    size_bytes: u64,
    modified_at: DateTime<Utc>,
}

/// Transforms raw filesystem and remote inputs into canonical
/// [`DetectedChange`] sets and classifies conflicts between them. Holds no
/// mutable state and never writes to the [`MetadataStore`].
pub struct ChangeDetector {
    ignore: Vec<String>,
}

impl ChangeDetector {
    pub fn new() -> Self {
        Self {
            ignore: DEFAULT_IGNORE.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn is_ignored(&self, file_name: &str) -> bool {
        file_name.starts_with('.') || self.ignore.iter().any(|p| p == file_name)
    }

    fn walk(&self, root: &Path) -> Result<Vec<RawEntry>> {
        let mut out = Vec::new();
        let mut queue = VecDeque::new();
        queue.push_back(PathBuf::new());

        while let Some(relative_dir) = queue.pop_front() {
            let absolute_dir = root.join(&relative_dir);
            let entries = std::fs::read_dir(&absolute_dir)?;
            for entry in entries {
                let entry = entry?;
                let file_name = entry.file_name();
                let file_name_str = file_name.to_string_lossy();
                if self.is_ignored(&file_name_str) {
                    continue;
                }

                let file_type = entry.file_type()?;
                if file_type.is_symlink() {
                    continue;
                }

                let absolute_path = entry.path();
                let relative_path_buf = relative_dir.join(&file_name);
                let Some(relative_path) = normalize_relative_path(&relative_path_buf) else {
                    continue;
                };

                let metadata = entry.metadata()?;
                let modified_at: DateTime<Utc> = metadata.modified()?.into();

                if file_type.is_dir() {
                    queue.push_back(relative_path_buf);
                    out.push(RawEntry {
                        absolute_path,
                        relative_path,
                        is_directory: true,
                        size_bytes: 0,
                        modified_at,
                    });
                } else if file_type.is_file() {
                    out.push(RawEntry {
                        absolute_path,
                        relative_path,
                        is_directory: false,
                        size_bytes: metadata.len(),
                        modified_at,
                    });
                }
            }
        }
        Ok(out)
    }

    /// Walk `local_root` and diff against the metadata store's known state
    /// for `folder_id`.
    #[instrument(skip(self, store), level = "debug")]
    pub async fn local_changes(
        &self,
        store: &dyn MetadataStore,
        folder_id: &str,
        local_root: &Path,
    ) -> Result<Vec<DetectedChange>> {
        let existing: HashMap<String, _> = store
            .list_files(folder_id)
            .await?
            .into_iter()
            .map(|m| (m.relative_path.clone(), m))
            .collect();

        let entries = {
            let root = local_root.to_path_buf();
            let ignore = self.ignore.clone();
            let detector = ChangeDetector { ignore };
            tokio::task::spawn_blocking(move || detector.walk(&root))
                .await
                .map_err(|e| SyncError::Internal(format!("scan task panicked: {e}")))??
        };

        let mut seen = HashSet::new();
        let mut changes = Vec::new();

        for entry in &entries {
            seen.insert(entry.relative_path.clone());
            let known = existing.get(&entry.relative_path);

            if entry.is_directory {
                if known.is_none() {
                    changes.push(DetectedChange {
                        relative_path: entry.relative_path.clone(),
                        change_type: ChangeType::Created,
                        origin: ChangeOrigin::Local,
                        is_directory: true,
                        size_bytes: None,
                        content_hash: None,
                        modified_at: entry.modified_at,
                    });
                }
                continue;
            }

            let hash = match hash_file(&entry.absolute_path).await {
                Ok(h) => h,
                Err(e) => {
                    warn!("failed to hash {}: {e}", entry.absolute_path.display());
                    continue;
                }
            };

            let change_type = match known {
                None => Some(ChangeType::Created),
                Some(row) if row.is_directory => Some(ChangeType::Modified),
                Some(row) if row.size_bytes != entry.size_bytes || row.content_hash != hash => {
                    Some(ChangeType::Modified)
                }
                _ => None,
            };

            if let Some(change_type) = change_type {
                changes.push(DetectedChange {
                    relative_path: entry.relative_path.clone(),
                    change_type,
                    origin: ChangeOrigin::Local,
                    is_directory: false,
                    size_bytes: Some(entry.size_bytes),
                    content_hash: Some(hash),
                    modified_at: entry.modified_at,
                });
            }
        }

        for (path, row) in &existing {
            if !seen.contains(path) {
                changes.push(DetectedChange {
                    relative_path: path.clone(),
                    change_type: ChangeType::Deleted,
                    origin: ChangeOrigin::Local,
                    is_directory: row.is_directory,
                    size_bytes: None,
                    content_hash: None,
                    modified_at: Utc::now(),
                });
            }
        }

        Ok(changes)
    }

    /// Request a remote change set since `since` and map it to the
    /// canonical shape. Grounded in the polling change-detection loop: a
    /// periodic "changes since" call compared against last-known state.
    #[instrument(skip(self, remote), level = "debug")]
    pub async fn remote_changes(
        &self,
        remote: &dyn RemoteClient,
        remote_root: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<DetectedChange>> {
        let changes = remote.list_changes_since(remote_root, since).await?;
        Ok(changes
            .into_iter()
            .map(|c| DetectedChange {
                relative_path: c.relative_path,
                change_type: if c.deleted {
                    ChangeType::Deleted
                } else {
                    ChangeType::Modified
                },
                origin: ChangeOrigin::Remote,
                is_directory: c.is_directory,
                size_bytes: c.size_bytes,
                content_hash: c.content_hash,
                modified_at: c.modified_at,
            })
            .collect())
    }

    /// Pair local and remote changes by relative path and classify the
    /// conflicting ones. Both sides deleting the same path is not a
    /// conflict: that surfaces as an idempotent deletion on the caller's
    /// side instead.
    pub fn classify_conflicts(
        &self,
        local: &[DetectedChange],
        remote: &[DetectedChange],
    ) -> Vec<ConflictCandidate> {
        let local_map: HashMap<&str, &DetectedChange> =
            local.iter().map(|c| (c.relative_path.as_str(), c)).collect();
        let remote_map: HashMap<&str, &DetectedChange> =
            remote.iter().map(|c| (c.relative_path.as_str(), c)).collect();

        let mut out = Vec::new();
        for (path, local_change) in &local_map {
            let Some(remote_change) = remote_map.get(path) else {
                continue;
            };

            if local_change.is_directory != remote_change.is_directory {
                out.push(ConflictCandidate {
                    relative_path: path.to_string(),
                    classifier: ConflictClassifier::TypeMismatch,
                    local: Some((*local_change).clone()),
                    remote: Some((*remote_change).clone()),
                });
                continue;
            }

            let classifier = match (local_change.change_type, remote_change.change_type) {
                (ChangeType::Deleted, ChangeType::Deleted) => continue,
                (ChangeType::Deleted, _) => ConflictClassifier::DeletedModified,
                (_, ChangeType::Deleted) => ConflictClassifier::ModifiedDeleted,
                _ => ConflictClassifier::ModifiedModified,
            };

            out.push(ConflictCandidate {
                relative_path: path.to_string(),
                classifier,
                local: Some((*local_change).clone()),
                remote: Some((*remote_change).clone()),
            });
        }
        out
    }
}

impl Default for ChangeDetector {
    fn default() -> Self {
        Self::new()
    }
}

/// A single path with incompatible local and remote changes, pending
/// resolution.
#[derive(Debug, Clone)]
pub struct ConflictCandidate {
    pub relative_path: String,
    pub classifier: ConflictClassifier,
    pub local: Option<DetectedChange>,
    pub remote: Option<DetectedChange>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteMetadataStore;
    use tempfile::TempDir;

    #[tokio::test]
    async fn detects_created_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"hi").unwrap();
        let store = SqliteMetadataStore::open_in_memory().unwrap();
        let detector = ChangeDetector::new();

        let changes = detector.local_changes(&store, "f1", dir.path()).await.unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].change_type, ChangeType::Created);
        assert_eq!(changes[0].relative_path, "a.txt");
    }

    #[tokio::test]
    async fn skips_hidden_and_ignored_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(".hidden"), b"x").unwrap();
        std::fs::write(dir.path().join("Thumbs.db"), b"x").unwrap();
        let store = SqliteMetadataStore::open_in_memory().unwrap();
        let detector = ChangeDetector::new();

        let changes = detector.local_changes(&store, "f1", dir.path()).await.unwrap();
        assert!(changes.is_empty());
    }

    #[tokio::test]
    async fn detects_deleted_file() {
        use sync_core::{FileMetadata, FileSyncState, SyncFolder};

        let dir = TempDir::new().unwrap();
        let store = SqliteMetadataStore::open_in_memory().unwrap();
        let folder = SyncFolder::new("f1".to_string(), dir.path().display().to_string(), "/r".to_string());
        store.put_folder(&folder).await.unwrap();
        store
            .upsert_file(&FileMetadata {
                folder_id: "f1".to_string(),
                relative_path: "gone.txt".to_string(),
                size_bytes: 3,
                modified_at: Utc::now(),
                content_hash: "abc".to_string(),
                is_directory: false,
                sync_state: FileSyncState::Synced,
            })
            .await
            .unwrap();

        let detector = ChangeDetector::new();
        let changes = detector.local_changes(&store, "f1", dir.path()).await.unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].change_type, ChangeType::Deleted);
    }

    #[test]
    fn classifies_modified_modified() {
        let detector = ChangeDetector::new();
        let local = vec![DetectedChange {
            relative_path: "a.txt".into(),
            change_type: ChangeType::Modified,
            origin: ChangeOrigin::Local,
            is_directory: false,
            size_bytes: Some(1),
            content_hash: Some("h1".into()),
            modified_at: Utc::now(),
        }];
        let remote = vec![DetectedChange {
            relative_path: "a.txt".into(),
            change_type: ChangeType::Modified,
            origin: ChangeOrigin::Remote,
            is_directory: false,
            size_bytes: Some(2),
            content_hash: Some("h2".into()),
            modified_at: Utc::now(),
        }];

        let conflicts = detector.classify_conflicts(&local, &remote);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].classifier, ConflictClassifier::ModifiedModified);
    }

    #[test]
    fn both_sides_deleted_is_not_a_conflict() {
        let detector = ChangeDetector::new();
        let local = vec![DetectedChange {
            relative_path: "a.txt".into(),
            change_type: ChangeType::Deleted,
            origin: ChangeOrigin::Local,
            is_directory: false,
            size_bytes: None,
            content_hash: None,
            modified_at: Utc::now(),
        }];
        let remote = vec![DetectedChange {
            relative_path: "a.txt".into(),
            change_type: ChangeType::Deleted,
            origin: ChangeOrigin::Remote,
            is_directory: false,
            size_bytes: None,
            content_hash: None,
            modified_at: Utc::now(),
        }];

        assert!(detector.classify_conflicts(&local, &remote).is_empty());
    }
}
