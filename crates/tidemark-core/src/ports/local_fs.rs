//! Local filesystem port (driven/secondary port)
//!
//! Hierarchical byte storage under the local mirror root. Paths are plain
//! `std::path` values; mapping between local paths and remote [`PathKey`]s
//! is the engine's job, not the filesystem's.
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` because filesystem errors are adapter-specific.
//! - `compute_hash` streams the file so memory stays bounded on large
//!   files.
//! - `set_mtime` exists because the server's modification time is the
//!   single source of truth after an upload or download completes.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::domain::newtypes::ContentHash;

/// Snapshot of a path's state on the local filesystem
#[derive(Debug, Clone)]
pub struct FileState {
    /// Whether the path exists on disk
    pub exists: bool,
    /// Whether this is a regular file (false for directories)
    pub is_file: bool,
    /// Size in bytes (0 for directories or non-existent paths)
    pub size: u64,
    /// Last modification time (None if unavailable)
    pub modified: Option<DateTime<Utc>>,
}

impl FileState {
    /// State representing a non-existent path
    #[must_use]
    pub fn not_found() -> Self {
        Self {
            exists: false,
            is_file: false,
            size: 0,
            modified: None,
        }
    }

    /// True when the path exists and is a regular file
    #[must_use]
    pub fn is_regular_file(&self) -> bool {
        self.exists && self.is_file
    }

    /// True when the path exists and is a directory
    #[must_use]
    pub fn is_directory(&self) -> bool {
        self.exists && !self.is_file
    }
}

/// Port trait for local filesystem operations
#[async_trait::async_trait]
pub trait LocalFileSystem: Send + Sync {
    /// List the immediate entries of a directory
    async fn enumerate(&self, dir: &Path) -> anyhow::Result<Vec<PathBuf>>;

    /// Stat one path
    ///
    /// Non-existence is reported as `FileState::not_found()`, not as an
    /// error; permission and sharing failures are errors the caller may
    /// elide.
    async fn stat(&self, path: &Path) -> anyhow::Result<FileState>;

    /// Read an entire file
    async fn read(&self, path: &Path) -> anyhow::Result<Vec<u8>>;

    /// Write a file atomically (temp + rename), creating parents as needed
    async fn write(&self, path: &Path, data: &[u8]) -> anyhow::Result<()>;

    /// Delete a file or directory tree
    async fn delete(&self, path: &Path) -> anyhow::Result<()>;

    /// Create a directory and any missing parents
    async fn create_dir_all(&self, path: &Path) -> anyhow::Result<()>;

    /// Set a file's modification time
    async fn set_mtime(&self, path: &Path, mtime: DateTime<Utc>) -> anyhow::Result<()>;

    /// Compute the streamed SHA-256 of a file's contents
    async fn compute_hash(&self, path: &Path) -> anyhow::Result<ContentHash>;
}
