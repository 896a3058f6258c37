//! Progress snapshot published to subscribers
//!
//! Snapshots flow through a single-writer broadcast channel; a subscriber
//! observes the latest snapshot on attach. Publication is totally ordered
//! per account - only the session coordinator writes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::newtypes::HashedAccountId;
use super::paths::PathKey;

/// Observable state of an account's sync lifecycle
///
/// `Idle → Queued → Running → {Completed | Paused | Failed} → Idle`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    /// No session in flight
    Idle,
    /// A session was accepted but has not started its round yet
    Queued,
    /// A session is scanning, reconciling or transferring
    Running,
    /// The last session finished successfully
    Completed,
    /// The last session was cancelled
    Paused,
    /// The last session failed
    Failed,
}

impl SyncState {
    /// True for states a subscriber can treat as terminal
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SyncState::Completed | SyncState::Paused | SyncState::Failed
        )
    }
}

/// One published view of sync progress for an account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    /// Hashed account the snapshot describes
    pub account: HashedAccountId,
    /// Lifecycle state
    pub status: SyncState,
    /// Files planned for transfer this session
    pub total_files: u64,
    /// Files whose transfer completed
    pub completed_files: u64,
    /// Bytes planned for transfer this session
    pub total_bytes: u64,
    /// Bytes transferred so far
    pub completed_bytes: u64,
    /// Downloads currently in flight
    pub files_downloading: u64,
    /// Uploads currently in flight
    pub files_uploading: u64,
    /// Files deleted so far this session
    pub files_deleted: u64,
    /// Conflicts recorded so far this session
    pub conflicts_detected: u64,
    /// Moving-average throughput in MB/s
    pub mb_per_sec: f64,
    /// Estimated seconds remaining, when throughput is meaningful
    pub eta_secs: Option<u64>,
    /// Folder currently being scanned, during the scan phase
    pub scanning_folder: Option<PathKey>,
    /// When the snapshot was produced
    pub last_update_utc: DateTime<Utc>,
}

impl ProgressSnapshot {
    /// Snapshot for an account with no session in flight
    #[must_use]
    pub fn idle(account: HashedAccountId) -> Self {
        Self {
            account,
            status: SyncState::Idle,
            total_files: 0,
            completed_files: 0,
            total_bytes: 0,
            completed_bytes: 0,
            files_downloading: 0,
            files_uploading: 0,
            files_deleted: 0,
            conflicts_detected: 0,
            mb_per_sec: 0.0,
            eta_secs: None,
            scanning_folder: None,
            last_update_utc: Utc::now(),
        }
    }

    /// Copy with a replaced lifecycle state and a fresh timestamp
    #[must_use]
    pub fn with_status(self, status: SyncState) -> Self {
        Self {
            status,
            last_update_utc: Utc::now(),
            ..self
        }
    }
}
