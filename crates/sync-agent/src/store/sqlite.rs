use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use sync_core::{
    Conflict, ConflictClassifier, ConflictPolicy, FileMetadata, FileSyncState, FolderStatus,
    MetadataStore, Result, ResolutionTag, SyncError, SyncFolder, SyncFolderUpdate,
};
use tokio::sync::Mutex;
use tracing::instrument;
use uuid::Uuid;

const MIGRATIONS: &[&str] = &[
    r#"
    CREATE TABLE schema_version (version INTEGER NOT NULL);
    INSERT INTO schema_version (version) VALUES (0);

    CREATE TABLE sync_folder (
        id TEXT PRIMARY KEY,
        local_path TEXT NOT NULL,
        remote_path TEXT NOT NULL,
        enabled INTEGER NOT NULL,
        status TEXT NOT NULL,
        conflict_policy TEXT NOT NULL,
        created_at TEXT NOT NULL,
        last_sync_at TEXT
    );

    CREATE TABLE file_metadata (
        folder_id TEXT NOT NULL REFERENCES sync_folder(id) ON DELETE CASCADE,
        relative_path TEXT NOT NULL,
        size_bytes INTEGER NOT NULL,
        modified_at TEXT NOT NULL,
        content_hash TEXT NOT NULL,
        is_directory INTEGER NOT NULL,
        sync_state TEXT NOT NULL,
        PRIMARY KEY (folder_id, relative_path)
    );

    CREATE TABLE conflict (
        id TEXT PRIMARY KEY,
        folder_id TEXT NOT NULL REFERENCES sync_folder(id) ON DELETE CASCADE,
        relative_path TEXT NOT NULL,
        local_modified_at TEXT,
        remote_modified_at TEXT,
        classifier TEXT NOT NULL,
        resolution TEXT,
        resolved_at TEXT
    );
    "#,
];

/// `rusqlite`-backed [`MetadataStore`]. A single connection behind a
/// `tokio::sync::Mutex` gives single-writer semantics; SQLite's own
/// transactional guarantees provide durability after a successful write.
pub struct SqliteMetadataStore {
    conn: Mutex<Connection>,
}

impl SqliteMetadataStore {
    pub fn open(path: &std::path::Path) -> Result<Self> {
        let mut conn = Connection::open(path)
            .map_err(|e| SyncError::Internal(format!("failed to open metadata store: {e}")))?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(|e| SyncError::Internal(e.to_string()))?;
        run_migrations(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()
            .map_err(|e| SyncError::Internal(format!("failed to open metadata store: {e}")))?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(|e| SyncError::Internal(e.to_string()))?;
        run_migrations(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

fn run_migrations(conn: &mut Connection) -> Result<()> {
    let has_version: bool = conn
        .query_row(
            "SELECT count(*) FROM sqlite_master WHERE type = 'table' AND name = 'schema_version'",
            [],
            |row| row.get::<_, i64>(0),
        )
        .map(|count| count > 0)
        .unwrap_or(false);

    let current_version: i64 = if has_version {
        conn.query_row("SELECT version FROM schema_version", [], |row| row.get(0))
            .map_err(|e| SyncError::Internal(e.to_string()))?
    } else {
        -1
    };

    for (index, migration) in MIGRATIONS.iter().enumerate() {
        if index as i64 > current_version {
            conn.execute_batch(migration)
                .map_err(|e| SyncError::Internal(format!("migration {index} failed: {e}")))?;
        }
    }
    Ok(())
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| SyncError::Internal(format!("malformed timestamp {s}: {e}")))
}

fn folder_status_str(status: FolderStatus) -> &'static str {
    match status {
        FolderStatus::Idle => "idle",
        FolderStatus::Syncing => "syncing",
        FolderStatus::Paused => "paused",
        FolderStatus::Error => "error",
    }
}

fn parse_folder_status(s: &str) -> Result<FolderStatus> {
    match s {
        "idle" => Ok(FolderStatus::Idle),
        "syncing" => Ok(FolderStatus::Syncing),
        "paused" => Ok(FolderStatus::Paused),
        "error" => Ok(FolderStatus::Error),
        other => Err(SyncError::Internal(format!("unknown folder status {other}"))),
    }
}

fn conflict_policy_str(policy: ConflictPolicy) -> &'static str {
    match policy {
        ConflictPolicy::Ask => "ask",
        ConflictPolicy::LastWriteWins => "last-write-wins",
        ConflictPolicy::PreferLocal => "prefer-local",
        ConflictPolicy::PreferRemote => "prefer-remote",
        ConflictPolicy::KeepBoth => "keep-both",
    }
}

fn parse_conflict_policy(s: &str) -> Result<ConflictPolicy> {
    match s {
        "ask" => Ok(ConflictPolicy::Ask),
        "last-write-wins" => Ok(ConflictPolicy::LastWriteWins),
        "prefer-local" => Ok(ConflictPolicy::PreferLocal),
        "prefer-remote" => Ok(ConflictPolicy::PreferRemote),
        "keep-both" => Ok(ConflictPolicy::KeepBoth),
        other => Err(SyncError::Internal(format!("unknown conflict policy {other}"))),
    }
}

fn sync_state_str(state: FileSyncState) -> &'static str {
    match state {
        FileSyncState::Synced => "synced",
        FileSyncState::PendingUpload => "pending_upload",
        FileSyncState::PendingDownload => "pending_download",
        FileSyncState::Conflict => "conflict",
        FileSyncState::Error => "error",
    }
}

fn parse_sync_state(s: &str) -> Result<FileSyncState> {
    match s {
        "synced" => Ok(FileSyncState::Synced),
        "pending_upload" => Ok(FileSyncState::PendingUpload),
        "pending_download" => Ok(FileSyncState::PendingDownload),
        "conflict" => Ok(FileSyncState::Conflict),
        "error" => Ok(FileSyncState::Error),
        other => Err(SyncError::Internal(format!("unknown sync state {other}"))),
    }
}

fn classifier_str(classifier: ConflictClassifier) -> &'static str {
    match classifier {
        ConflictClassifier::ModifiedModified => "modified-modified",
        ConflictClassifier::ModifiedDeleted => "modified-deleted",
        ConflictClassifier::DeletedModified => "deleted-modified",
        ConflictClassifier::TypeMismatch => "type-mismatch",
    }
}

fn parse_classifier(s: &str) -> Result<ConflictClassifier> {
    match s {
        "modified-modified" => Ok(ConflictClassifier::ModifiedModified),
        "modified-deleted" => Ok(ConflictClassifier::ModifiedDeleted),
        "deleted-modified" => Ok(ConflictClassifier::DeletedModified),
        "type-mismatch" => Ok(ConflictClassifier::TypeMismatch),
        other => Err(SyncError::Internal(format!("unknown classifier {other}"))),
    }
}

fn resolution_str(tag: ResolutionTag) -> &'static str {
    match tag {
        ResolutionTag::Local => "local",
        ResolutionTag::Remote => "remote",
        ResolutionTag::Both => "both",
        ResolutionTag::Manual => "manual",
    }
}

fn parse_resolution(s: &str) -> Result<ResolutionTag> {
    match s {
        "local" => Ok(ResolutionTag::Local),
        "remote" => Ok(ResolutionTag::Remote),
        "both" => Ok(ResolutionTag::Both),
        "manual" => Ok(ResolutionTag::Manual),
        other => Err(SyncError::Internal(format!("unknown resolution {other}"))),
    }
}

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    #[instrument(skip(self, folder), level = "debug")]
    async fn put_folder(&self, folder: &SyncFolder) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO sync_folder
                (id, local_path, remote_path, enabled, status, conflict_policy, created_at, last_sync_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(id) DO UPDATE SET
                local_path = excluded.local_path,
                remote_path = excluded.remote_path,
                enabled = excluded.enabled,
                status = excluded.status,
                conflict_policy = excluded.conflict_policy,
                created_at = excluded.created_at,
                last_sync_at = excluded.last_sync_at",
            params![
                folder.id,
                folder.local_path,
                folder.remote_path,
                folder.enabled as i64,
                folder_status_str(folder.status),
                conflict_policy_str(folder.conflict_policy),
                folder.created_at.to_rfc3339(),
                folder.last_sync_at.map(|t| t.to_rfc3339()),
            ],
        )
        .map_err(|e| SyncError::Internal(e.to_string()))?;
        Ok(())
    }

    #[instrument(skip(self, update), level = "debug")]
    async fn update_folder(&self, folder_id: &str, update: &SyncFolderUpdate) -> Result<()> {
        let conn = self.conn.lock().await;
        if let Some(enabled) = update.enabled {
            conn.execute(
                "UPDATE sync_folder SET enabled = ?1 WHERE id = ?2",
                params![enabled as i64, folder_id],
            )
            .map_err(|e| SyncError::Internal(e.to_string()))?;
        }
        if let Some(policy) = update.conflict_policy {
            conn.execute(
                "UPDATE sync_folder SET conflict_policy = ?1 WHERE id = ?2",
                params![conflict_policy_str(policy), folder_id],
            )
            .map_err(|e| SyncError::Internal(e.to_string()))?;
        }
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn set_folder_status(&self, folder_id: &str, status: FolderStatus) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE sync_folder SET status = ?1 WHERE id = ?2",
            params![folder_status_str(status), folder_id],
        )
        .map_err(|e| SyncError::Internal(e.to_string()))?;
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn set_folder_last_sync(&self, folder_id: &str, at: DateTime<Utc>) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE sync_folder SET last_sync_at = ?1 WHERE id = ?2",
            params![at.to_rfc3339(), folder_id],
        )
        .map_err(|e| SyncError::Internal(e.to_string()))?;
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn remove_folder(&self, folder_id: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute("DELETE FROM sync_folder WHERE id = ?1", params![folder_id])
            .map_err(|e| SyncError::Internal(e.to_string()))?;
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn get_folder(&self, folder_id: &str) -> Result<Option<SyncFolder>> {
        let conn = self.conn.lock().await;
        let row = conn
            .query_row(
                "SELECT id, local_path, remote_path, enabled, status, conflict_policy, created_at, last_sync_at
                 FROM sync_folder WHERE id = ?1",
                params![folder_id],
                row_to_folder,
            )
            .optional()
            .map_err(|e| SyncError::Internal(e.to_string()))?;
        Ok(row)
    }

    #[instrument(skip(self), level = "debug")]
    async fn list_folders(&self) -> Result<Vec<SyncFolder>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(
                "SELECT id, local_path, remote_path, enabled, status, conflict_policy, created_at, last_sync_at
                 FROM sync_folder",
            )
            .map_err(|e| SyncError::Internal(e.to_string()))?;
        let rows = stmt
            .query_map([], row_to_folder)
            .map_err(|e| SyncError::Internal(e.to_string()))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(|e| SyncError::Internal(e.to_string()))?);
        }
        Ok(out)
    }

    #[instrument(skip(self, metadata), level = "debug")]
    async fn upsert_file(&self, metadata: &FileMetadata) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO file_metadata
                (folder_id, relative_path, size_bytes, modified_at, content_hash, is_directory, sync_state)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(folder_id, relative_path) DO UPDATE SET
                size_bytes = excluded.size_bytes,
                modified_at = excluded.modified_at,
                content_hash = excluded.content_hash,
                is_directory = excluded.is_directory,
                sync_state = excluded.sync_state",
            params![
                metadata.folder_id,
                metadata.relative_path,
                metadata.size_bytes as i64,
                metadata.modified_at.to_rfc3339(),
                metadata.content_hash,
                metadata.is_directory as i64,
                sync_state_str(metadata.sync_state),
            ],
        )
        .map_err(|e| SyncError::Internal(e.to_string()))?;
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn get_file(&self, folder_id: &str, relative_path: &str) -> Result<Option<FileMetadata>> {
        let conn = self.conn.lock().await;
        let row = conn
            .query_row(
                "SELECT folder_id, relative_path, size_bytes, modified_at, content_hash, is_directory, sync_state
                 FROM file_metadata WHERE folder_id = ?1 AND relative_path = ?2",
                params![folder_id, relative_path],
                row_to_file,
            )
            .optional()
            .map_err(|e| SyncError::Internal(e.to_string()))?;
        Ok(row)
    }

    #[instrument(skip(self), level = "debug")]
    async fn delete_file(&self, folder_id: &str, relative_path: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "DELETE FROM file_metadata WHERE folder_id = ?1 AND relative_path = ?2",
            params![folder_id, relative_path],
        )
        .map_err(|e| SyncError::Internal(e.to_string()))?;
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn list_files(&self, folder_id: &str) -> Result<Vec<FileMetadata>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(
                "SELECT folder_id, relative_path, size_bytes, modified_at, content_hash, is_directory, sync_state
                 FROM file_metadata WHERE folder_id = ?1",
            )
            .map_err(|e| SyncError::Internal(e.to_string()))?;
        let rows = stmt
            .query_map(params![folder_id], row_to_file)
            .map_err(|e| SyncError::Internal(e.to_string()))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(|e| SyncError::Internal(e.to_string()))?);
        }
        Ok(out)
    }

    #[instrument(skip(self), level = "debug")]
    async fn changed_since(&self, folder_id: &str, since: DateTime<Utc>) -> Result<Vec<FileMetadata>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(
                "SELECT folder_id, relative_path, size_bytes, modified_at, content_hash, is_directory, sync_state
                 FROM file_metadata WHERE folder_id = ?1 AND modified_at > ?2",
            )
            .map_err(|e| SyncError::Internal(e.to_string()))?;
        let rows = stmt
            .query_map(params![folder_id, since.to_rfc3339()], row_to_file)
            .map_err(|e| SyncError::Internal(e.to_string()))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(|e| SyncError::Internal(e.to_string()))?);
        }
        Ok(out)
    }

    #[instrument(skip(self, conflict), level = "debug")]
    async fn log_conflict(&self, conflict: &Conflict) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO conflict
                (id, folder_id, relative_path, local_modified_at, remote_modified_at, classifier, resolution, resolved_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                conflict.id,
                conflict.folder_id,
                conflict.relative_path,
                conflict.local_modified_at.map(|t| t.to_rfc3339()),
                conflict.remote_modified_at.map(|t| t.to_rfc3339()),
                classifier_str(conflict.classifier),
                conflict.resolution.map(resolution_str),
                conflict.resolved_at.map(|t| t.to_rfc3339()),
            ],
        )
        .map_err(|e| SyncError::Internal(e.to_string()))?;
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn get_conflict(&self, conflict_id: &str) -> Result<Option<Conflict>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(
                "SELECT id, folder_id, relative_path, local_modified_at, remote_modified_at, classifier, resolution, resolved_at
                 FROM conflict WHERE id = ?1",
            )
            .map_err(|e| SyncError::Internal(e.to_string()))?;
        let mut rows = stmt
            .query_map(params![conflict_id], row_to_conflict)
            .map_err(|e| SyncError::Internal(e.to_string()))?;
        match rows.next() {
            Some(row) => Ok(Some(row.map_err(|e| SyncError::Internal(e.to_string()))??)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self), level = "debug")]
    async fn pending_conflicts(&self, folder_id: &str) -> Result<Vec<Conflict>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(
                "SELECT id, folder_id, relative_path, local_modified_at, remote_modified_at, classifier, resolution, resolved_at
                 FROM conflict WHERE folder_id = ?1 AND resolution IS NULL",
            )
            .map_err(|e| SyncError::Internal(e.to_string()))?;
        let rows = stmt
            .query_map(params![folder_id], row_to_conflict)
            .map_err(|e| SyncError::Internal(e.to_string()))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(|e| SyncError::Internal(e.to_string()))??);
        }
        Ok(out)
    }

    #[instrument(skip(self), level = "debug")]
    async fn resolve_conflict(&self, conflict_id: &str, tag: ResolutionTag) -> Result<()> {
        let conn = self.conn.lock().await;
        let changed = conn
            .execute(
                "UPDATE conflict SET resolution = ?1, resolved_at = ?2 WHERE id = ?3",
                params![resolution_str(tag), Utc::now().to_rfc3339(), conflict_id],
            )
            .map_err(|e| SyncError::Internal(e.to_string()))?;
        if changed == 0 {
            return Err(SyncError::NotFound(conflict_id.to_string()));
        }
        Ok(())
    }

    fn generate_id(&self) -> String {
        Uuid::new_v4().to_string()
    }
}

fn row_to_folder(row: &rusqlite::Row) -> rusqlite::Result<SyncFolder> {
    let status_str: String = row.get(4)?;
    let policy_str: String = row.get(5)?;
    let created_str: String = row.get(6)?;
    let last_sync_str: Option<String> = row.get(7)?;

    Ok(SyncFolder {
        id: row.get(0)?,
        local_path: row.get(1)?,
        remote_path: row.get(2)?,
        enabled: row.get::<_, i64>(3)? != 0,
        status: parse_folder_status(&status_str).unwrap_or(FolderStatus::Idle),
        conflict_policy: parse_conflict_policy(&policy_str).unwrap_or_default(),
        created_at: parse_timestamp(&created_str).unwrap_or_else(|_| Utc::now()),
        last_sync_at: last_sync_str.and_then(|s| parse_timestamp(&s).ok()),
    })
}

fn row_to_file(row: &rusqlite::Row) -> rusqlite::Result<FileMetadata> {
    let modified_str: String = row.get(3)?;
    let state_str: String = row.get(6)?;
    Ok(FileMetadata {
        folder_id: row.get(0)?,
        relative_path: row.get(1)?,
        size_bytes: row.get::<_, i64>(2)? as u64,
        modified_at: parse_timestamp(&modified_str).unwrap_or_else(|_| Utc::now()),
        content_hash: row.get(4)?,
        is_directory: row.get::<_, i64>(5)? != 0,
        sync_state: parse_sync_state(&state_str).unwrap_or(FileSyncState::Error),
    })
}

fn row_to_conflict(row: &rusqlite::Row) -> rusqlite::Result<Result<Conflict>> {
    let local_ts: Option<String> = row.get(3)?;
    let remote_ts: Option<String> = row.get(4)?;
    let classifier_str: String = row.get(5)?;
    let resolution_str: Option<String> = row.get(6)?;
    let resolved_str: Option<String> = row.get(7)?;

    let id: String = row.get(0)?;
    let folder_id: String = row.get(1)?;
    let relative_path: String = row.get(2)?;

    Ok((|| {
        Ok(Conflict {
            id,
            folder_id,
            relative_path,
            local_modified_at: local_ts.and_then(|s| parse_timestamp(&s).ok()),
            remote_modified_at: remote_ts.and_then(|s| parse_timestamp(&s).ok()),
            classifier: parse_classifier(&classifier_str)?,
            resolution: resolution_str.map(|s| parse_resolution(&s)).transpose()?,
            resolved_at: resolved_str.and_then(|s| parse_timestamp(&s).ok()),
        })
    })())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sync_core::normalize_relative_path;
    use std::path::Path;

    fn sample_folder(store: &SqliteMetadataStore) -> SyncFolder {
        SyncFolder::new(store.generate_id(), "/local/A".into(), "/remote/A".into())
    }

    #[tokio::test]
    async fn put_and_get_folder_round_trips() {
        let store = SqliteMetadataStore::open_in_memory().unwrap();
        let folder = sample_folder(&store);
        store.put_folder(&folder).await.unwrap();

        let fetched = store.get_folder(&folder.id).await.unwrap().unwrap();
        assert_eq!(fetched.id, folder.id);
        assert_eq!(fetched.local_path, folder.local_path);
        assert_eq!(fetched.status, FolderStatus::Idle);
    }

    #[tokio::test]
    async fn upsert_file_is_idempotent() {
        let store = SqliteMetadataStore::open_in_memory().unwrap();
        let folder = sample_folder(&store);
        store.put_folder(&folder).await.unwrap();

        let path = normalize_relative_path(Path::new("docs/readme.md")).unwrap();
        let meta = FileMetadata {
            folder_id: folder.id.clone(),
            relative_path: path,
            size_bytes: 12,
            modified_at: Utc::now(),
            content_hash: "deadbeef".into(),
            is_directory: false,
            sync_state: FileSyncState::Synced,
        };
        store.upsert_file(&meta).await.unwrap();
        store.upsert_file(&meta).await.unwrap();

        let files = store.list_files(&folder.id).await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].content_hash, "deadbeef");
    }

    #[tokio::test]
    async fn removing_folder_cascades_files_and_conflicts() {
        let store = SqliteMetadataStore::open_in_memory().unwrap();
        let folder = sample_folder(&store);
        store.put_folder(&folder).await.unwrap();
        store
            .upsert_file(&FileMetadata {
                folder_id: folder.id.clone(),
                relative_path: "a.txt".into(),
                size_bytes: 1,
                modified_at: Utc::now(),
                content_hash: "h".into(),
                is_directory: false,
                sync_state: FileSyncState::Synced,
            })
            .await
            .unwrap();
        store
            .log_conflict(&Conflict {
                id: store.generate_id(),
                folder_id: folder.id.clone(),
                relative_path: "a.txt".into(),
                local_modified_at: None,
                remote_modified_at: None,
                classifier: ConflictClassifier::ModifiedModified,
                resolution: None,
                resolved_at: None,
            })
            .await
            .unwrap();

        store.remove_folder(&folder.id).await.unwrap();

        assert!(store.list_files(&folder.id).await.unwrap().is_empty());
        assert!(store.pending_conflicts(&folder.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn pending_conflicts_excludes_resolved() {
        let store = SqliteMetadataStore::open_in_memory().unwrap();
        let folder = sample_folder(&store);
        store.put_folder(&folder).await.unwrap();
        let conflict_id = store.generate_id();
        store
            .log_conflict(&Conflict {
                id: conflict_id.clone(),
                folder_id: folder.id.clone(),
                relative_path: "a.txt".into(),
                local_modified_at: None,
                remote_modified_at: None,
                classifier: ConflictClassifier::ModifiedModified,
                resolution: None,
                resolved_at: None,
            })
            .await
            .unwrap();

        assert_eq!(store.pending_conflicts(&folder.id).await.unwrap().len(), 1);
        store
            .resolve_conflict(&conflict_id, ResolutionTag::Remote)
            .await
            .unwrap();
        assert!(store.pending_conflicts(&folder.id).await.unwrap().is_empty());
    }
}
