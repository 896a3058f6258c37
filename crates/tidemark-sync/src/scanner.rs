//! Local subtree scanner
//!
//! Walks the local mirror of one selected folder and produces a
//! [`LocalRecord`] per regular file: canonical remote path, size, mtime and
//! streamed SHA-256. Entries whose stat or hash fails (permission errors,
//! files held by other processes) are logged and elided, never fatal.
//! Cancellation is honored between files.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use tidemark_core::domain::paths::PathKey;
use tidemark_core::domain::records::LocalRecord;
use tidemark_core::ports::local_fs::LocalFileSystem;

use crate::error::EngineError;

/// Walks local subtrees and hashes their files
pub struct LocalScanner {
    fs: Arc<dyn LocalFileSystem>,
}

impl LocalScanner {
    /// Create a scanner over the given filesystem port
    #[must_use]
    pub fn new(fs: Arc<dyn LocalFileSystem>) -> Self {
        Self { fs }
    }

    /// Scan the local mirror of `remote_folder` rooted at `local_root`
    ///
    /// `local_root` is the on-disk directory corresponding to
    /// `remote_folder`. A missing root yields an empty scan (the folder
    /// has not been mirrored yet), not an error.
    pub async fn scan(
        &self,
        local_root: &Path,
        remote_folder: &PathKey,
        token: &CancellationToken,
    ) -> Result<Vec<LocalRecord>, EngineError> {
        let root_state = match self.fs.stat(local_root).await {
            Ok(state) => state,
            Err(err) => {
                warn!(
                    dir = %local_root.display(),
                    error = %err,
                    "cannot stat scan root, skipping folder"
                );
                return Ok(Vec::new());
            }
        };
        if !root_state.is_directory() {
            debug!(
                dir = %local_root.display(),
                "scan root absent or not a directory, nothing to scan"
            );
            return Ok(Vec::new());
        }

        let mut records = Vec::new();
        let mut pending: Vec<PathBuf> = vec![local_root.to_path_buf()];

        while let Some(dir) = pending.pop() {
            let entries = match self.fs.enumerate(&dir).await {
                Ok(entries) => entries,
                Err(err) => {
                    warn!(
                        dir = %dir.display(),
                        error = %err,
                        "cannot enumerate directory, skipping"
                    );
                    continue;
                }
            };

            for entry in entries {
                if token.is_cancelled() {
                    return Err(EngineError::Cancelled);
                }

                let state = match self.fs.stat(&entry).await {
                    Ok(state) => state,
                    Err(err) => {
                        warn!(
                            path = %entry.display(),
                            error = %err,
                            "cannot stat entry, skipping"
                        );
                        continue;
                    }
                };

                if state.is_directory() {
                    pending.push(entry);
                    continue;
                }
                if !state.is_regular_file() {
                    continue;
                }

                let hash = match self.fs.compute_hash(&entry).await {
                    Ok(hash) => hash,
                    Err(err) => {
                        warn!(
                            path = %entry.display(),
                            error = %err,
                            "cannot hash file, skipping"
                        );
                        continue;
                    }
                };

                let Ok(relative) = entry.strip_prefix(local_root) else {
                    warn!(path = %entry.display(), "entry escaped scan root, skipping");
                    continue;
                };

                records.push(LocalRecord {
                    path: remote_folder.join(&relative.to_string_lossy()),
                    size_bytes: state.size,
                    mtime_utc: state.modified.unwrap_or_else(Utc::now),
                    content_hash: hash,
                });
            }
        }

        debug!(
            folder = %remote_folder,
            files = records.len(),
            "local scan complete"
        );
        Ok(records)
    }
}
