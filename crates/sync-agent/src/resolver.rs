use std::path::{Path, PathBuf};

use chrono::Utc;
use sync_core::{ConflictPolicy, RemoteClient, Result, ResolutionTag, SyncError};
use tracing::instrument;

use crate::detector::ConflictCandidate;

/// Outcome of resolving a single conflict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionOutcome {
    Uploaded,
    Downloaded,
    Renamed,
}

/// Executes a conflict-resolution policy against a single conflict and
/// performs the resolving transfer(s). The policy in effect is fixed at
/// construction: a resolver never picks up a new default mid-run.
pub struct ConflictResolver {
    policy: ConflictPolicy,
}

impl ConflictResolver {
    pub fn new(policy: ConflictPolicy) -> Self {
        Self { policy }
    }

    #[instrument(skip(self, remote, candidate), level = "debug", fields(path = %candidate.relative_path))]
    pub async fn resolve(
        &self,
        remote: &dyn RemoteClient,
        remote_root: &str,
        local_root: &Path,
        candidate: &ConflictCandidate,
    ) -> Result<(ResolutionTag, ResolutionOutcome)> {
        match self.policy {
            ConflictPolicy::Ask => Err(SyncError::Conflict(
                "manual resolution required: ask policy has no caller-provided decision".into(),
            )),
            ConflictPolicy::LastWriteWins => self.resolve_last_write_wins(remote, remote_root, local_root, candidate).await,
            ConflictPolicy::PreferLocal => self.resolve_prefer_local(remote, remote_root, local_root, candidate).await,
            ConflictPolicy::PreferRemote => self.resolve_prefer_remote(remote, remote_root, local_root, candidate).await,
            ConflictPolicy::KeepBoth => self.resolve_keep_both(remote, remote_root, local_root, candidate).await,
        }
    }

    async fn resolve_last_write_wins(
        &self,
        remote: &dyn RemoteClient,
        remote_root: &str,
        local_root: &Path,
        candidate: &ConflictCandidate,
    ) -> Result<(ResolutionTag, ResolutionOutcome)> {
        let local_ts = candidate.local.as_ref().map(|c| c.modified_at);
        let remote_ts = candidate.remote.as_ref().map(|c| c.modified_at);

        // Ties, and any side that's absent, resolve in favor of the remote.
        let prefer_local = match (local_ts, remote_ts) {
            (Some(l), Some(r)) => l > r,
            (Some(_), None) => true,
            _ => false,
        };

        if prefer_local {
            self.upload_side(remote, remote_root, local_root, candidate).await?;
            Ok((ResolutionTag::Local, ResolutionOutcome::Uploaded))
        } else {
            self.download_side(remote, remote_root, local_root, candidate).await?;
            Ok((ResolutionTag::Remote, ResolutionOutcome::Downloaded))
        }
    }

    async fn resolve_prefer_local(
        &self,
        remote: &dyn RemoteClient,
        remote_root: &str,
        local_root: &Path,
        candidate: &ConflictCandidate,
    ) -> Result<(ResolutionTag, ResolutionOutcome)> {
        if candidate.local.is_some() {
            self.upload_side(remote, remote_root, local_root, candidate).await?;
        } else {
            remote
                .delete(&remote_path(remote_root, &candidate.relative_path))
                .await?;
        }
        Ok((ResolutionTag::Local, ResolutionOutcome::Uploaded))
    }

    async fn resolve_prefer_remote(
        &self,
        remote: &dyn RemoteClient,
        remote_root: &str,
        local_root: &Path,
        candidate: &ConflictCandidate,
    ) -> Result<(ResolutionTag, ResolutionOutcome)> {
        if candidate.remote.is_some() {
            self.download_side(remote, remote_root, local_root, candidate).await?;
        } else {
            let local_path = local_root.join(&candidate.relative_path);
            if local_path.exists() {
                std::fs::remove_file(&local_path)?;
            }
        }
        Ok((ResolutionTag::Remote, ResolutionOutcome::Downloaded))
    }

    /// Local keeps its original name; the remote version lands under a
    /// `<stem>_conflict_<unix_seconds><ext>` sibling, and both local copies
    /// get pushed to the remote. All three operations must succeed, or the
    /// resolver unwinds whatever it already performed.
    async fn resolve_keep_both(
        &self,
        remote: &dyn RemoteClient,
        remote_root: &str,
        local_root: &Path,
        candidate: &ConflictCandidate,
    ) -> Result<(ResolutionTag, ResolutionOutcome)> {
        let local_path = local_root.join(&candidate.relative_path);
        let conflict_relative = conflict_copy_name(&candidate.relative_path);
        let conflict_local_path = local_root.join(&conflict_relative);

        let mut downloaded = false;
        let mut uploaded_original = false;
        let mut remote_bytes_for_unwind: Option<Vec<u8>> = None;

        let result: Result<()> = async {
            let remote_bytes = remote
                .download(&remote_path(remote_root, &candidate.relative_path))
                .await?;
            std::fs::write(&conflict_local_path, &remote_bytes)?;
            downloaded = true;
            remote_bytes_for_unwind = Some(remote_bytes.clone());

            let original_bytes = std::fs::read(&local_path)?;
            remote
                .upload(
                    &original_bytes,
                    &remote_path(remote_root, &candidate.relative_path),
                    None,
                )
                .await?;
            uploaded_original = true;

            remote
                .upload(&remote_bytes, &remote_path(remote_root, &conflict_relative), None)
                .await?;
            Ok(())
        }
        .await;

        if let Err(e) = result {
            if downloaded {
                let _ = std::fs::remove_file(&conflict_local_path);
            }
            if uploaded_original {
                if let Some(remote_bytes) = remote_bytes_for_unwind {
                    let _ = remote
                        .upload(&remote_bytes, &remote_path(remote_root, &candidate.relative_path), None)
                        .await;
                }
            }
            return Err(e);
        }

        Ok((ResolutionTag::Both, ResolutionOutcome::Renamed))
    }

    async fn upload_side(
        &self,
        remote: &dyn RemoteClient,
        remote_root: &str,
        local_root: &Path,
        candidate: &ConflictCandidate,
    ) -> Result<()> {
        let local_path = local_root.join(&candidate.relative_path);
        let bytes = std::fs::read(&local_path)?;
        remote
            .upload(&bytes, &remote_path(remote_root, &candidate.relative_path), None)
            .await
    }

    async fn download_side(
        &self,
        remote: &dyn RemoteClient,
        remote_root: &str,
        local_root: &Path,
        candidate: &ConflictCandidate,
    ) -> Result<()> {
        let bytes = remote
            .download(&remote_path(remote_root, &candidate.relative_path))
            .await?;
        let local_path = local_root.join(&candidate.relative_path);
        if let Some(parent) = local_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&local_path, &bytes)?;
        Ok(())
    }
}

fn remote_path(remote_root: &str, relative_path: &str) -> String {
    format!("{}/{}", remote_root.trim_end_matches('/'), relative_path)
}

fn conflict_copy_name(relative_path: &str) -> String {
    let path = PathBuf::from(relative_path);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let parent = path.parent().filter(|p| !p.as_os_str().is_empty());
    let file_name = format!("{stem}_conflict_{}{ext}", Utc::now().timestamp());
    match parent {
        Some(parent) => format!("{}/{}", parent.display(), file_name),
        None => file_name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::ConflictCandidate;
    use sync_core::{ChangeOrigin, ChangeType, ConflictClassifier, DetectedChange};
    use tempfile::TempDir;

    #[test]
    fn conflict_copy_name_inserts_suffix_before_extension() {
        let name = conflict_copy_name("docs/notes.txt");
        assert!(name.starts_with("docs/notes_conflict_"));
        assert!(name.ends_with(".txt"));
    }

    fn change(origin: ChangeOrigin, ts_offset_secs: i64) -> DetectedChange {
        DetectedChange {
            relative_path: "notes.txt".into(),
            change_type: ChangeType::Modified,
            origin,
            is_directory: false,
            size_bytes: Some(5),
            content_hash: Some("h".into()),
            modified_at: Utc::now() + chrono::Duration::seconds(ts_offset_secs),
        }
    }

    #[tokio::test]
    async fn last_write_wins_prefers_newer_remote_on_tie() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"local").unwrap();

        let remote = crate::fake_remote::FakeRemoteClient::new();
        remote.seed(
            "/remote/A/notes.txt",
            b"remote bytes".to_vec(),
        );

        let candidate = ConflictCandidate {
            relative_path: "notes.txt".into(),
            classifier: ConflictClassifier::ModifiedModified,
            local: Some(change(ChangeOrigin::Local, 0)),
            remote: Some(change(ChangeOrigin::Remote, 0)),
        };

        let resolver = ConflictResolver::new(ConflictPolicy::LastWriteWins);
        let (tag, outcome) = resolver
            .resolve(&remote, "/remote/A", dir.path(), &candidate)
            .await
            .unwrap();

        assert_eq!(tag, ResolutionTag::Remote);
        assert_eq!(outcome, ResolutionOutcome::Downloaded);
        assert_eq!(
            std::fs::read(dir.path().join("notes.txt")).unwrap(),
            b"remote bytes"
        );
    }

    #[tokio::test]
    async fn last_write_wins_prefers_strictly_newer_local() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"local bytes").unwrap();
        let remote = crate::fake_remote::FakeRemoteClient::new();

        let candidate = ConflictCandidate {
            relative_path: "notes.txt".into(),
            classifier: ConflictClassifier::ModifiedModified,
            local: Some(change(ChangeOrigin::Local, 10)),
            remote: Some(change(ChangeOrigin::Remote, 0)),
        };

        let resolver = ConflictResolver::new(ConflictPolicy::LastWriteWins);
        let (tag, _) = resolver
            .resolve(&remote, "/remote/A", dir.path(), &candidate)
            .await
            .unwrap();

        assert_eq!(tag, ResolutionTag::Local);
        assert_eq!(
            remote.get("/remote/A/notes.txt").unwrap(),
            b"local bytes"
        );
    }

    #[tokio::test]
    async fn keep_both_produces_local_and_remote_copies() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"local bytes").unwrap();
        let remote = crate::fake_remote::FakeRemoteClient::new();
        remote.seed("/remote/A/notes.txt", b"remote bytes".to_vec());

        let candidate = ConflictCandidate {
            relative_path: "notes.txt".into(),
            classifier: ConflictClassifier::ModifiedModified,
            local: Some(change(ChangeOrigin::Local, 0)),
            remote: Some(change(ChangeOrigin::Remote, 0)),
        };

        let resolver = ConflictResolver::new(ConflictPolicy::KeepBoth);
        let (tag, outcome) = resolver
            .resolve(&remote, "/remote/A", dir.path(), &candidate)
            .await
            .unwrap();

        assert_eq!(tag, ResolutionTag::Both);
        assert_eq!(outcome, ResolutionOutcome::Renamed);
        assert_eq!(
            std::fs::read(dir.path().join("notes.txt")).unwrap(),
            b"local bytes"
        );
        assert_eq!(remote.get("/remote/A/notes.txt").unwrap(), b"local bytes");

        let entries: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        assert!(entries.iter().any(|n| n.starts_with("notes_conflict_")));
    }

    #[tokio::test]
    async fn keep_both_restores_remote_when_conflict_copy_upload_fails() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"local bytes").unwrap();
        let remote = crate::fake_remote::FakeRemoteClient::new();
        remote.seed("/remote/A/notes.txt", b"remote bytes".to_vec());

        let candidate = ConflictCandidate {
            relative_path: "notes.txt".into(),
            classifier: ConflictClassifier::ModifiedModified,
            local: Some(change(ChangeOrigin::Local, 0)),
            remote: Some(change(ChangeOrigin::Remote, 0)),
        };

        // The conflict-copy upload fails; the original-path upload (which ran
        // first) must be unwound back to its pre-resolution content.
        let conflict_relative = super::conflict_copy_name("notes.txt");
        remote.fail_next_upload_to(&format!("/remote/A/{conflict_relative}"));

        let resolver = ConflictResolver::new(ConflictPolicy::KeepBoth);
        let err = resolver
            .resolve(&remote, "/remote/A", dir.path(), &candidate)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::NetworkPermanent(_)));

        assert_eq!(remote.get("/remote/A/notes.txt").unwrap(), b"remote bytes");
    }
}
