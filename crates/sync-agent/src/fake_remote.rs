//! In-memory [`RemoteClient`] fake used to drive Sync Engine tests without a
//! live HTTP server. Distinct from the real `HttpRemoteClient` in the
//! `sync-remote` crate, which is exercised against `wiremock` instead.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use sync_core::{Permissions, RemoteChange, RemoteClient, RemoteEntry, Result, SyncError};

struct Object {
    bytes: Vec<u8>,
    modified_at: DateTime<Utc>,
    deleted: bool,
}

fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

pub struct FakeRemoteClient {
    objects: Mutex<HashMap<String, Object>>,
    authenticated: Mutex<bool>,
    failing_uploads: Mutex<HashSet<String>>,
}

impl FakeRemoteClient {
    pub fn new() -> Self {
        Self {
            objects: Mutex::new(HashMap::new()),
            authenticated: Mutex::new(true),
            failing_uploads: Mutex::new(HashSet::new()),
        }
    }

    /// The next `upload` targeting `remote_path` fails with a permanent
    /// error; consumed on use, so later uploads to the same path succeed.
    pub fn fail_next_upload_to(&self, remote_path: &str) {
        self.failing_uploads.lock().unwrap().insert(remote_path.to_string());
    }

    pub fn seed(&self, remote_path: &str, bytes: Vec<u8>) {
        self.objects.lock().unwrap().insert(
            remote_path.to_string(),
            Object {
                bytes,
                modified_at: Utc::now(),
                deleted: false,
            },
        );
    }

    pub fn get(&self, remote_path: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .unwrap()
            .get(remote_path)
            .filter(|o| !o.deleted)
            .map(|o| o.bytes.clone())
    }

    pub fn set_authenticated(&self, value: bool) {
        *self.authenticated.lock().unwrap() = value;
    }
}

impl Default for FakeRemoteClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteClient for FakeRemoteClient {
    async fn authenticate(&self, _username: &str, _password: &str) -> Result<String> {
        *self.authenticated.lock().unwrap() = true;
        Ok("fake-token".to_string())
    }

    fn logout(&self) {
        *self.authenticated.lock().unwrap() = false;
    }

    async fn list_changes_since(
        &self,
        remote_root: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<RemoteChange>> {
        if !*self.authenticated.lock().unwrap() {
            return Err(SyncError::NotAuthenticated);
        }
        let prefix = format!("{}/", remote_root.trim_end_matches('/'));
        let objects = self.objects.lock().unwrap();
        Ok(objects
            .iter()
            .filter(|(path, obj)| path.starts_with(&prefix) && obj.modified_at > since)
            .map(|(path, obj)| RemoteChange {
                relative_path: path[prefix.len()..].to_string(),
                deleted: obj.deleted,
                is_directory: false,
                size_bytes: Some(obj.bytes.len() as u64),
                content_hash: if obj.deleted {
                    None
                } else {
                    Some(content_hash(&obj.bytes))
                },
                modified_at: obj.modified_at,
            })
            .collect())
    }

    async fn list_directory(&self, remote_path: &str) -> Result<Vec<RemoteEntry>> {
        let prefix = format!("{}/", remote_path.trim_end_matches('/'));
        let objects = self.objects.lock().unwrap();
        Ok(objects
            .iter()
            .filter(|(path, obj)| path.starts_with(&prefix) && !obj.deleted)
            .map(|(path, obj)| RemoteEntry {
                relative_path: path[prefix.len()..].to_string(),
                is_directory: false,
                size_bytes: obj.bytes.len() as u64,
                modified_at: obj.modified_at,
            })
            .collect())
    }

    async fn upload(&self, data: &[u8], remote_path: &str, _mountpoint: Option<&str>) -> Result<()> {
        if !*self.authenticated.lock().unwrap() {
            return Err(SyncError::NotAuthenticated);
        }
        if self.failing_uploads.lock().unwrap().remove(remote_path) {
            return Err(SyncError::NetworkPermanent("simulated upload failure".into()));
        }
        self.objects.lock().unwrap().insert(
            remote_path.to_string(),
            Object {
                bytes: data.to_vec(),
                modified_at: Utc::now(),
                deleted: false,
            },
        );
        Ok(())
    }

    async fn download(&self, remote_path: &str) -> Result<Vec<u8>> {
        let objects = self.objects.lock().unwrap();
        match objects.get(remote_path) {
            Some(obj) if !obj.deleted => Ok(obj.bytes.clone()),
            _ => Err(SyncError::NotFound(remote_path.to_string())),
        }
    }

    async fn delete(&self, remote_path: &str) -> Result<()> {
        let mut objects = self.objects.lock().unwrap();
        if let Some(obj) = objects.get_mut(remote_path) {
            obj.deleted = true;
            obj.modified_at = Utc::now();
        }
        Ok(())
    }

    async fn permissions(&self, _remote_path: &str) -> Result<Permissions> {
        Ok(Permissions {
            can_read: true,
            can_write: true,
            can_delete: true,
            can_share: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upload_then_download_round_trips() {
        let client = FakeRemoteClient::new();
        client.upload(b"hello", "/r/a.txt", None).await.unwrap();
        assert_eq!(client.download("/r/a.txt").await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn delete_then_download_not_found() {
        let client = FakeRemoteClient::new();
        client.upload(b"hello", "/r/a.txt", None).await.unwrap();
        client.delete("/r/a.txt").await.unwrap();
        assert!(matches!(
            client.download("/r/a.txt").await,
            Err(SyncError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn unauthenticated_upload_fails() {
        let client = FakeRemoteClient::new();
        client.logout();
        assert!(matches!(
            client.upload(b"x", "/r/a.txt", None).await,
            Err(SyncError::NotAuthenticated)
        ));
    }
}
