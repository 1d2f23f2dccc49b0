use std::io::Read;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use sync_core::Result;
use tracing::instrument;

/// 64 KiB read buffer for streaming hashes, sized to avoid loading whole
/// files into memory the way the teacher's content-hash check does.
const BLOCK_SIZE: usize = 64 * 1024;

/// Streaming SHA-256 content hash, run on the blocking thread pool.
#[instrument(level = "debug")]
pub async fn hash_file(path: &Path) -> Result<String> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || hash_file_sync(&path))
        .await
        .map_err(|e| sync_core::SyncError::Internal(format!("hash task panicked: {e}")))?
}

fn hash_file_sync(path: &PathBuf) -> Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; BLOCK_SIZE];
    loop {
        let read = file.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}
