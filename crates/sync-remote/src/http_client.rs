use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use sync_core::{Permissions, RemoteChange, RemoteClient, RemoteEntry, Result, SyncError};
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};

/// HTTP-backed [`RemoteClient`] for the remote storage server.
///
/// Grounded in the REST-over-`reqwest` shape of the teacher's KV client
/// (bearer-token auth, status-code-driven error classification): see
/// `docx-storage-cloudflare/src/kv.rs`.
pub struct HttpRemoteClient {
    http: Client,
    base_url: String,
    token: RwLock<Option<String>>,
}

impl HttpRemoteClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into(),
            token: RwLock::new(None),
        }
    }

    async fn bearer(&self) -> Result<String> {
        self.token
            .read()
            .await
            .clone()
            .ok_or(SyncError::NotAuthenticated)
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path.trim_start_matches('/'))
    }

    /// Classify a non-2xx response per §6: 401 is an authentication
    /// failure, 408/429/5xx are transient, everything else is permanent.
    fn classify(status: StatusCode, body: &str) -> SyncError {
        if status == StatusCode::UNAUTHORIZED {
            SyncError::NotAuthenticated
        } else if status == StatusCode::REQUEST_TIMEOUT
            || status == StatusCode::TOO_MANY_REQUESTS
            || status.is_server_error()
        {
            SyncError::NetworkTransient(format!("{}: {}", status, body))
        } else {
            SyncError::NetworkPermanent(format!("{}: {}", status, body))
        }
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(Self::classify(status, &body))
    }
}

#[async_trait]
impl RemoteClient for HttpRemoteClient {
    #[instrument(skip(self, password), level = "debug")]
    async fn authenticate(&self, username: &str, password: &str) -> Result<String> {
        #[derive(serde::Serialize)]
        struct LoginRequest<'a> {
            username: &'a str,
            password: &'a str,
        }
        #[derive(serde::Deserialize)]
        struct LoginResponse {
            token: String,
        }

        let response = self
            .http
            .post(self.url("api/auth/login"))
            .json(&LoginRequest { username, password })
            .send()
            .await
            .map_err(|e| SyncError::NetworkTransient(e.to_string()))?;
        let response = Self::check_status(response).await?;
        let parsed: LoginResponse = response
            .json()
            .await
            .map_err(|e| SyncError::NetworkPermanent(format!("malformed login response: {e}")))?;

        *self.token.write().await = Some(parsed.token.clone());
        debug!("authenticated as {username}");
        Ok(parsed.token)
    }

    fn logout(&self) {
        if let Ok(mut guard) = self.token.try_write() {
            *guard = None;
        }
    }

    #[instrument(skip(self), level = "debug")]
    async fn list_changes_since(
        &self,
        remote_root: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<RemoteChange>> {
        let token = self.bearer().await?;
        let response = self
            .http
            .get(self.url("api/folders/changes"))
            .bearer_auth(token)
            .query(&[("path", remote_root), ("since", &since.to_rfc3339())])
            .send()
            .await
            .map_err(|e| SyncError::NetworkTransient(e.to_string()))?;
        let response = Self::check_status(response).await?;
        response
            .json()
            .await
            .map_err(|e| SyncError::NetworkPermanent(format!("malformed changes response: {e}")))
    }

    #[instrument(skip(self), level = "debug")]
    async fn list_directory(&self, remote_path: &str) -> Result<Vec<RemoteEntry>> {
        let token = self.bearer().await?;
        let response = self
            .http
            .get(self.url("api/folders/list"))
            .bearer_auth(token)
            .query(&[("path", remote_path)])
            .send()
            .await
            .map_err(|e| SyncError::NetworkTransient(e.to_string()))?;
        let response = Self::check_status(response).await?;
        response
            .json()
            .await
            .map_err(|e| SyncError::NetworkPermanent(format!("malformed list response: {e}")))
    }

    #[instrument(skip(self, data), level = "debug", fields(data_len = data.len()))]
    async fn upload(&self, data: &[u8], remote_path: &str, mountpoint: Option<&str>) -> Result<()> {
        let token = self.bearer().await?;
        let mut request = self
            .http
            .put(self.url(&format!("api/files/{remote_path}")))
            .bearer_auth(token)
            .body(data.to_vec());
        if let Some(mount) = mountpoint {
            request = request.query(&[("mountpoint", mount)]);
        }
        let response = request
            .send()
            .await
            .map_err(|e| SyncError::NetworkTransient(e.to_string()))?;
        Self::check_status(response).await?;
        debug!("uploaded {} bytes to {remote_path}", data.len());
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn download(&self, remote_path: &str) -> Result<Vec<u8>> {
        let token = self.bearer().await?;
        let response = self
            .http
            .get(self.url(&format!("api/files/{remote_path}")))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| SyncError::NetworkTransient(e.to_string()))?;
        let response = Self::check_status(response).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| SyncError::NetworkTransient(e.to_string()))?;
        Ok(bytes.to_vec())
    }

    #[instrument(skip(self), level = "debug")]
    async fn delete(&self, remote_path: &str) -> Result<()> {
        let token = self.bearer().await?;
        let response = self
            .http
            .delete(self.url(&format!("api/files/{remote_path}")))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| SyncError::NetworkTransient(e.to_string()))?;
        Self::check_status(response).await?;
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn permissions(&self, remote_path: &str) -> Result<Permissions> {
        let token = self.bearer().await?;
        let response = self
            .http
            .get(self.url(&format!("api/files/{remote_path}/permissions")))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| SyncError::NetworkTransient(e.to_string()))?;
        let response = Self::check_status(response).await?;
        response.json().await.map_err(|e| {
            warn!("malformed permissions response: {e}");
            SyncError::NetworkPermanent(format!("malformed permissions response: {e}"))
        })
    }
}
