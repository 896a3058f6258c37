//! Local filesystem adapter (secondary/driven adapter)
//!
//! Implements [`LocalFileSystem`] using `tokio::fs` for async file
//! operations.
//!
//! ## Design Decisions
//!
//! - **Atomic writes**: write-to-temp + rename in the target directory, so
//!   a crash never leaves a half-written file under the final name.
//! - **Streamed hashing**: SHA-256 over 64 KiB chunks; memory stays
//!   bounded regardless of file size.
//! - **mtime stamping**: after a transfer the server's modification time
//!   is written onto the local file, since it is the single source of
//!   truth for change detection.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;
use tracing::debug;

use tidemark_core::domain::newtypes::ContentHash;
use tidemark_core::ports::local_fs::{FileState, LocalFileSystem};

/// Read chunk size for streamed hashing
const HASH_CHUNK_BYTES: usize = 64 * 1024;

/// Adapter that bridges the [`LocalFileSystem`] port to the real
/// filesystem.
///
/// Zero-sized: all operations derive their context from the path
/// arguments. The mapping between remote paths and local paths lives in
/// the engine.
#[derive(Debug, Clone, Default)]
pub struct TokioFileSystem;

impl TokioFileSystem {
    /// Create a new `TokioFileSystem`.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl LocalFileSystem for TokioFileSystem {
    async fn enumerate(&self, dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
        let mut entries = tokio::fs::read_dir(dir).await?;
        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            paths.push(entry.path());
        }
        Ok(paths)
    }

    async fn stat(&self, path: &Path) -> anyhow::Result<FileState> {
        let metadata = match tokio::fs::metadata(path).await {
            Ok(m) => m,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Ok(FileState::not_found());
            }
            Err(e) => return Err(e.into()),
        };

        let modified = metadata
            .modified()
            .ok()
            .map(|t| DateTime::<Utc>::from(t));

        Ok(FileState {
            exists: true,
            is_file: metadata.is_file(),
            size: metadata.len(),
            modified,
        })
    }

    async fn read(&self, path: &Path) -> anyhow::Result<Vec<u8>> {
        Ok(tokio::fs::read(path).await?)
    }

    async fn write(&self, path: &Path, data: &[u8]) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Temp file in the same directory so the rename stays on one
        // filesystem and is atomic.
        let tmp_path = {
            let mut p = path.as_os_str().to_owned();
            p.push(".tmp");
            PathBuf::from(p)
        };

        debug!(path = %path.display(), bytes = data.len(), "writing via temp file");
        tokio::fs::write(&tmp_path, data).await?;
        tokio::fs::rename(&tmp_path, path).await?;
        Ok(())
    }

    async fn delete(&self, path: &Path) -> anyhow::Result<()> {
        let metadata = match tokio::fs::metadata(path).await {
            Ok(m) => m,
            // Already gone: deletion is idempotent.
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        if metadata.is_dir() {
            tokio::fs::remove_dir_all(path).await?;
        } else {
            tokio::fs::remove_file(path).await?;
        }
        Ok(())
    }

    async fn create_dir_all(&self, path: &Path) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(path).await?;
        Ok(())
    }

    async fn set_mtime(&self, path: &Path, mtime: DateTime<Utc>) -> anyhow::Result<()> {
        let path = path.to_path_buf();
        let system_time: SystemTime = mtime.into();
        tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
            let file = std::fs::OpenOptions::new().write(true).open(&path)?;
            file.set_modified(system_time)?;
            Ok(())
        })
        .await??;
        Ok(())
    }

    async fn compute_hash(&self, path: &Path) -> anyhow::Result<ContentHash> {
        let mut file = tokio::fs::File::open(path).await?;
        let mut hasher = Sha256::new();
        let mut buffer = vec![0u8; HASH_CHUNK_BYTES];

        loop {
            let read = file.read(&mut buffer).await?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
        }

        let digest: [u8; 32] = hasher.finalize().into();
        Ok(ContentHash::from_digest(&digest))
    }
}
