//! Sync record value types
//!
//! Three record shapes flow through a sync round:
//!
//! - [`LocalRecord`] - produced by the local scanner, never persisted.
//! - [`RemoteRecord`] - produced by the delta processor or the remote
//!   walker.
//! - [`SyncRecord`] - the persisted baseline of last-known-synced state
//!   for one path.
//!
//! All three are immutable values. [`SyncRecord`] mutation goes through
//! `with_*` helpers that return a new value; the reconciler never mutates
//! a record in place.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::newtypes::{ContentHash, ContentTag, EntityTag, HashedAccountId, RemoteItemId};
use super::paths::PathKey;

// ============================================================================
// Status and direction
// ============================================================================

/// Persisted status of a sync record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Local and remote agree; baseline fields are authoritative
    Synced,
    /// An upload was planned or started but has not completed
    PendingUpload,
    /// A download was planned or started but has not completed
    PendingDownload,
    /// The last transfer for this path failed; retried next session
    Failed,
    /// Force the next reconciliation to treat the remote side as changed,
    /// regardless of cTag
    SyncOnly,
}

impl SyncStatus {
    /// Stable string form used by stores and logs
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Synced => "synced",
            SyncStatus::PendingUpload => "pending_upload",
            SyncStatus::PendingDownload => "pending_download",
            SyncStatus::Failed => "failed",
            SyncStatus::SyncOnly => "sync_only",
        }
    }

    /// Parse the stable string form
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "synced" => Some(SyncStatus::Synced),
            "pending_upload" => Some(SyncStatus::PendingUpload),
            "pending_download" => Some(SyncStatus::PendingDownload),
            "failed" => Some(SyncStatus::Failed),
            "sync_only" => Some(SyncStatus::SyncOnly),
            _ => None,
        }
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Direction of the transfer that produced the current record state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncDirection {
    /// Local content was pushed to the remote service
    Upload,
    /// Remote content was pulled to the local directory
    Download,
}

impl SyncDirection {
    /// Stable string form used by stores and logs
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncDirection::Upload => "upload",
            SyncDirection::Download => "download",
        }
    }

    /// Parse the stable string form
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "upload" => Some(SyncDirection::Upload),
            "download" => Some(SyncDirection::Download),
            _ => None,
        }
    }
}

// ============================================================================
// Scanner and delta outputs
// ============================================================================

/// Snapshot of one local file, produced on demand by the scanner
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalRecord {
    /// Canonical remote path this file maps to
    pub path: PathKey,
    /// File size in bytes
    pub size_bytes: u64,
    /// Local modification time
    pub mtime_utc: DateTime<Utc>,
    /// SHA-256 of the file contents
    pub content_hash: ContentHash,
}

/// Snapshot of one remote item, produced by delta or the walker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteRecord {
    /// Service-assigned item id
    pub remote_item_id: RemoteItemId,
    /// Canonical remote path
    pub path: PathKey,
    /// Item size in bytes (0 for folders and deleted items)
    pub size_bytes: u64,
    /// Remote modification time
    pub mtime_utc: DateTime<Utc>,
    /// Content-version tag, when the service reported one
    pub ctag: Option<ContentTag>,
    /// Entity-version tag, when the service reported one
    pub etag: Option<EntityTag>,
    /// Whether the item is a folder
    pub is_folder: bool,
    /// Whether the item was deleted since the last delta pull
    pub is_deleted: bool,
}

// ============================================================================
// Persisted baseline
// ============================================================================

/// Persisted baseline of last-known-synced state for one path
///
/// Invariants:
/// - `path` is unique per account (case-insensitive).
/// - When `status` is [`SyncStatus::Synced`], `remote_item_id`, `ctag` and
///   `local_hash` are all populated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRecord {
    /// Hashed account this record belongs to
    pub account: HashedAccountId,
    /// Service item id, once known
    pub remote_item_id: Option<RemoteItemId>,
    /// Canonical remote path
    pub path: PathKey,
    /// Size at last sync
    pub size_bytes: u64,
    /// Modification time at last sync (server time once synced)
    pub mtime_utc: DateTime<Utc>,
    /// Content-version tag at last sync
    pub ctag: Option<ContentTag>,
    /// Entity-version tag at last sync
    pub etag: Option<EntityTag>,
    /// Local content hash at last sync
    pub local_hash: Option<ContentHash>,
    /// Record status
    pub status: SyncStatus,
    /// Direction of the last completed transfer
    pub last_direction: Option<SyncDirection>,
    /// Whether the path is inside the user's selection
    pub is_selected: bool,
}

impl SyncRecord {
    /// Baseline for a path first seen locally, before its upload completes
    #[must_use]
    pub fn pending_upload(account: HashedAccountId, local: &LocalRecord) -> Self {
        Self {
            account,
            remote_item_id: None,
            path: local.path.clone(),
            size_bytes: local.size_bytes,
            mtime_utc: local.mtime_utc,
            ctag: None,
            etag: None,
            local_hash: Some(local.content_hash.clone()),
            status: SyncStatus::PendingUpload,
            last_direction: None,
            is_selected: true,
        }
    }

    /// Baseline for a path first seen remotely, before its download completes
    #[must_use]
    pub fn pending_download(account: HashedAccountId, remote: &RemoteRecord) -> Self {
        Self {
            account,
            remote_item_id: Some(remote.remote_item_id.clone()),
            path: remote.path.clone(),
            size_bytes: remote.size_bytes,
            mtime_utc: remote.mtime_utc,
            ctag: remote.ctag.clone(),
            etag: remote.etag.clone(),
            local_hash: None,
            status: SyncStatus::PendingDownload,
            last_direction: None,
            is_selected: true,
        }
    }

    /// Synced baseline for a first-sync match, where local and remote were
    /// already identical
    #[must_use]
    pub fn first_sync_match(
        account: HashedAccountId,
        local: &LocalRecord,
        remote: &RemoteRecord,
    ) -> Self {
        Self {
            account,
            remote_item_id: Some(remote.remote_item_id.clone()),
            path: remote.path.clone(),
            size_bytes: remote.size_bytes,
            mtime_utc: remote.mtime_utc,
            ctag: remote.ctag.clone(),
            etag: remote.etag.clone(),
            local_hash: Some(local.content_hash.clone()),
            status: SyncStatus::Synced,
            last_direction: None,
            is_selected: true,
        }
    }

    /// Copy marked failed, remembering which direction was being attempted
    /// so the next session resumes it
    #[must_use]
    pub fn with_failed_after(self, direction: SyncDirection) -> Self {
        Self {
            status: SyncStatus::Failed,
            last_direction: Some(direction),
            ..self
        }
    }

    /// Copy reflecting a completed upload, stamped with the server's view
    /// of the item
    #[must_use]
    pub fn with_uploaded(self, remote: &RemoteRecord, local_hash: ContentHash) -> Self {
        Self {
            remote_item_id: Some(remote.remote_item_id.clone()),
            size_bytes: remote.size_bytes,
            mtime_utc: remote.mtime_utc,
            ctag: remote.ctag.clone(),
            etag: remote.etag.clone(),
            local_hash: Some(local_hash),
            status: SyncStatus::Synced,
            last_direction: Some(SyncDirection::Upload),
            ..self
        }
    }

    /// Copy reflecting a completed download, with the hash computed from
    /// the bytes that landed on disk
    #[must_use]
    pub fn with_downloaded(self, remote: &RemoteRecord, local_hash: ContentHash) -> Self {
        Self {
            remote_item_id: Some(remote.remote_item_id.clone()),
            size_bytes: remote.size_bytes,
            mtime_utc: remote.mtime_utc,
            ctag: remote.ctag.clone(),
            etag: remote.etag.clone(),
            local_hash: Some(local_hash),
            status: SyncStatus::Synced,
            last_direction: Some(SyncDirection::Download),
            ..self
        }
    }

    /// True when the `Synced` field invariant holds
    #[must_use]
    pub fn synced_invariant_holds(&self) -> bool {
        self.status != SyncStatus::Synced
            || (self.remote_item_id.is_some() && self.ctag.is_some() && self.local_hash.is_some())
    }
}
