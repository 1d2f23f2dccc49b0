use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A single change reported by the remote server since a given timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteChange {
    pub relative_path: String,
    pub deleted: bool,
    pub is_directory: bool,
    pub size_bytes: Option<u64>,
    pub content_hash: Option<String>,
    pub modified_at: DateTime<Utc>,
}

/// A single entry in a remote directory listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteEntry {
    pub relative_path: String,
    pub is_directory: bool,
    pub size_bytes: u64,
    pub modified_at: DateTime<Utc>,
}

/// Per-file permission set returned by the remote server.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Permissions {
    pub can_read: bool,
    pub can_write: bool,
    pub can_delete: bool,
    pub can_share: bool,
}

/// Narrow interface over the remote storage server's HTTP API.
///
/// Implementations treat 2xx as success, 401 as an authentication failure
/// (the caller should re-authenticate), 408/429/5xx as transient
/// ([`crate::error::SyncError::NetworkTransient`], subject to the engine's
/// retry policy), and all other non-2xx statuses as permanent.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Authenticate and obtain a bearer token; the implementation caches it
    /// internally for subsequent calls.
    async fn authenticate(&self, username: &str, password: &str) -> Result<String>;

    /// Drop any cached bearer token; subsequent calls fail with
    /// [`crate::error::SyncError::NotAuthenticated`] until `authenticate` is
    /// called again.
    fn logout(&self);

    async fn list_changes_since(
        &self,
        remote_root: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<RemoteChange>>;

    async fn list_directory(&self, remote_path: &str) -> Result<Vec<RemoteEntry>>;

    async fn upload(&self, data: &[u8], remote_path: &str, mountpoint: Option<&str>) -> Result<()>;

    async fn download(&self, remote_path: &str) -> Result<Vec<u8>>;

    async fn delete(&self, remote_path: &str) -> Result<()>;

    async fn permissions(&self, remote_path: &str) -> Result<Permissions>;
}
