//! Metadata store port (driven/secondary port)
//!
//! Durable storage for everything the core persists between sessions:
//! sync records, delta cursors, conflict rows, session logs, and the
//! selected-folder set. The on-disk format is opaque to the core.
//!
//! ## Design Notes
//!
//! - Every API is keyed by [`HashedAccountId`] - the raw account id never
//!   reaches a store implementation.
//! - `save_batch` must be atomic: either every record in the batch is
//!   visible afterwards or none is. The transfer executor relies on this
//!   to keep a failed batch retryable from its pre-batch state.
//! - Path keys compare case-insensitively; implementations index by the
//!   folded form and store the preserved spelling alongside it.

use crate::domain::conflict::ConflictRow;
use crate::domain::cursor::DeltaCursor;
use crate::domain::newtypes::{DriveId, HashedAccountId, SessionId};
use crate::domain::paths::PathKey;
use crate::domain::records::SyncRecord;
use crate::domain::session::SessionLog;

/// Port trait for persistent sync state
#[async_trait::async_trait]
pub trait MetadataStore: Send + Sync {
    // --- Sync record operations ---

    /// Save one sync record (insert or update, keyed by account + path)
    async fn save_record(&self, record: &SyncRecord) -> anyhow::Result<()>;

    /// Save a batch of sync records atomically
    async fn save_batch(&self, records: &[SyncRecord]) -> anyhow::Result<()>;

    /// Fetch the record for one path
    async fn get_record(
        &self,
        account: &HashedAccountId,
        path: &PathKey,
    ) -> anyhow::Result<Option<SyncRecord>>;

    /// Fetch every record for an account
    async fn records_for_account(
        &self,
        account: &HashedAccountId,
    ) -> anyhow::Result<Vec<SyncRecord>>;

    /// Delete the record for one path (no-op when absent)
    async fn delete_record(
        &self,
        account: &HashedAccountId,
        path: &PathKey,
    ) -> anyhow::Result<()>;

    // --- Selection operations ---

    /// Fetch the selected-folder set for an account
    async fn selected_folders(&self, account: &HashedAccountId) -> anyhow::Result<Vec<PathKey>>;

    /// Replace the selected-folder set for an account
    async fn set_selected_folders(
        &self,
        account: &HashedAccountId,
        folders: &[PathKey],
    ) -> anyhow::Result<()>;

    // --- Delta cursor operations ---

    /// Fetch the stored cursor for an account's drive
    async fn delta_cursor(
        &self,
        account: &HashedAccountId,
        drive_id: &DriveId,
    ) -> anyhow::Result<Option<DeltaCursor>>;

    /// Replace the stored cursor atomically
    async fn save_delta_cursor(&self, cursor: &DeltaCursor) -> anyhow::Result<()>;

    /// Drop the stored cursor (forces a full walk next round)
    async fn clear_delta_cursor(
        &self,
        account: &HashedAccountId,
        drive_id: &DriveId,
    ) -> anyhow::Result<()>;

    // --- Conflict operations ---

    /// Record a conflict
    ///
    /// Implementations keep at most one unresolved row per
    /// `(account, path)`; saving a second unresolved conflict for the same
    /// path replaces the first.
    async fn save_conflict(&self, row: &ConflictRow) -> anyhow::Result<()>;

    /// Fetch unresolved conflicts, newest first
    async fn get_unresolved_conflicts(
        &self,
        account: &HashedAccountId,
    ) -> anyhow::Result<Vec<ConflictRow>>;

    // --- Session log operations ---

    /// Save a session log row (insert or update)
    async fn save_session(&self, log: &SessionLog) -> anyhow::Result<()>;

    /// Fetch a session log row
    async fn get_session(&self, id: &SessionId) -> anyhow::Result<Option<SessionLog>>;
}
