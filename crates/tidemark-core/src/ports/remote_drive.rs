//! Remote drive port (driven/secondary port)
//!
//! This module defines the interface for interacting with the hosted file
//! service. The core depends on nothing more specific than this trait; the
//! wire protocol behind it is an adapter concern.
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` because errors at port boundaries are
//!   adapter-specific and don't need domain-level classification. The
//!   engine classifies transient / resync / not-found cases from the error
//!   chain text, so adapters should surface the service's status wording
//!   (`429`, `503`, `410 Gone`, `404`) in their error messages.
//! - `RemoteItem` is a port-level DTO, not a domain entity; the delta
//!   processor maps it to `RemoteRecord`.
//! - Transfer methods accept a `CancellationToken`; implementations must
//!   abort in-flight requests when it fires.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::domain::newtypes::{AccountId, CursorToken, RemoteItemId};
use crate::domain::paths::PathKey;

/// Callback reporting `(bytes_sent, total_bytes)` during an upload
pub type UploadProgressFn = Box<dyn Fn(u64, u64) + Send + Sync>;

/// A single item as reported by the remote service
///
/// Port-level DTO. Optional fields are absent for deleted items and for
/// folders, matching what delta feeds actually carry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteItem {
    /// Service-assigned item identifier
    pub id: String,
    /// Item name (file or folder name)
    pub name: String,
    /// Full service path (None for deleted items)
    pub path: Option<String>,
    /// Size in bytes (None for folders or deleted items)
    pub size: Option<u64>,
    /// Last modified timestamp (None for deleted items)
    pub last_modified_utc: Option<DateTime<Utc>>,
    /// Content-version tag (None for folders)
    pub ctag: Option<String>,
    /// Entity-version tag
    pub etag: Option<String>,
    /// Whether this item is a folder
    pub is_folder: bool,
    /// Whether this item has been deleted since the last delta
    pub is_deleted: bool,
    /// Drive the item belongs to, when the service reports it
    pub drive_id: Option<String>,
}

/// One page of the delta stream
#[derive(Debug, Clone)]
pub struct DeltaPage {
    /// Changed items, with the deleted flag set where applicable
    pub items: Vec<RemoteItem>,
    /// Cursor for the next request - intermediate while `done` is false,
    /// the resumption point to persist once `done` is true
    pub next_cursor: CursorToken,
    /// Whether this is the terminal page of the round
    pub done: bool,
}

/// Port trait for remote drive operations
///
/// ## Implementation Notes
///
/// - Per-request deadlines are the adapter's responsibility; the core
///   imposes no wall-clock timeout of its own.
/// - `delta` with `None` starts a full enumeration; with `Some(cursor)` it
///   resumes from that point. An expired cursor must surface as an error
///   mentioning `410` or `Gone` so the engine can fall back to a full walk.
#[async_trait::async_trait]
pub trait RemoteDriveClient: Send + Sync {
    /// Fetch the drive root item
    async fn root(&self, account: &AccountId) -> anyhow::Result<RemoteItem>;

    /// List the immediate children of a folder
    async fn children(
        &self,
        account: &AccountId,
        parent_id: &RemoteItemId,
    ) -> anyhow::Result<Vec<RemoteItem>>;

    /// Fetch metadata for a single item
    async fn item(&self, account: &AccountId, id: &RemoteItemId) -> anyhow::Result<RemoteItem>;

    /// Fetch one page of the delta stream
    async fn delta(
        &self,
        account: &AccountId,
        cursor: Option<&CursorToken>,
    ) -> anyhow::Result<DeltaPage>;

    /// Download an item's content to `dest_path`
    async fn download(
        &self,
        account: &AccountId,
        item_id: &RemoteItemId,
        dest_path: &Path,
        token: &CancellationToken,
    ) -> anyhow::Result<()>;

    /// Upload a local file to `remote_path`, reporting byte progress
    ///
    /// Returns the uploaded item as the server sees it; the server's
    /// modification time in the result is authoritative.
    async fn upload(
        &self,
        account: &AccountId,
        src_path: &Path,
        remote_path: &PathKey,
        progress: Option<UploadProgressFn>,
        token: &CancellationToken,
    ) -> anyhow::Result<RemoteItem>;

    /// Delete an item
    async fn delete(
        &self,
        account: &AccountId,
        item_id: &RemoteItemId,
        token: &CancellationToken,
    ) -> anyhow::Result<()>;
}
