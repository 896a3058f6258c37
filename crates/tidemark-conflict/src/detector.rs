//! Conflict detection logic
//!
//! Classifies one path given up to three views of it:
//!
//! - `local` - what the scanner found on disk
//! - `remote` - what delta or the walker reported
//! - `baseline` - the persisted record of the last synchronized state
//!
//! The classification follows a fixed table; divergence against the
//! baseline is judged with deliberately asymmetric thresholds. The remote
//! service's mtime is authoritative and precise, so a remote change needs a
//! differing cTag plus a corroborating signal (wide 1-hour mtime window as
//! fallback). Local mtimes may be coarse, so the local side compares hashes
//! when it can and falls back to size or a narrow 1-second mtime window.

use chrono::{DateTime, Utc};
use tracing::debug;

use tidemark_core::domain::records::{LocalRecord, RemoteRecord, SyncRecord, SyncStatus};
use tidemark_core::domain::SyncDirection;

/// Two first-sync copies within this window (and of equal size) are taken
/// to be the same file
const FIRST_SYNC_MTIME_WINDOW_SECS: i64 = 60;

/// Local mtime slack when no hash is available for comparison
const LOCAL_MTIME_SLACK_SECS: i64 = 1;

/// Remote mtime corroboration window for a cTag change
const REMOTE_MTIME_SLACK_SECS: i64 = 3600;

/// Action the reconciler should take for one path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Push the local copy to the remote service
    Upload,
    /// Pull the remote copy to the local directory
    Download,
    /// First-sync match: record as synced without transferring
    RecordSynced,
    /// Both sides changed; record a conflict row and transfer nothing
    Conflict,
    /// The local copy was deleted; delete the remote item
    DeleteRemote,
    /// The remote item was deleted; delete the local file
    DeleteLocal,
    /// Both sides are gone; drop the baseline row
    DropBaseline,
    /// Nothing changed
    Skip,
}

/// Classifies local/remote/baseline triples into sync outcomes
pub struct ConflictDetector;

impl ConflictDetector {
    /// Classify one path
    ///
    /// `remote` must be a live file record: the reconciler strips folders
    /// and translates deleted delta entries into an absent remote side
    /// before calling in.
    #[must_use]
    pub fn classify(
        local: Option<&LocalRecord>,
        remote: Option<&RemoteRecord>,
        baseline: Option<&SyncRecord>,
    ) -> Outcome {
        match (local, remote, baseline) {
            // Nothing anywhere. Only reachable through a stale join key.
            (None, None, None) => Outcome::Skip,

            // New on exactly one side
            (Some(_), None, None) => Outcome::Upload,
            (None, Some(_), None) => Outcome::Download,

            // First sync with copies on both sides
            (Some(local), Some(remote), None) => Self::classify_first_sync(local, remote),

            // Both sides present with history
            (Some(local), Some(remote), Some(baseline)) => {
                Self::classify_tracked(local, remote, baseline)
            }

            // One side vanished
            (None, Some(remote), Some(baseline)) => {
                if baseline.status == SyncStatus::Synced {
                    Outcome::DeleteRemote
                } else {
                    // The path never finished syncing; the remote copy is
                    // the only content left. Treat it as new remote.
                    debug!(
                        path = %remote.path,
                        status = %baseline.status,
                        "local side gone before first successful sync, downloading"
                    );
                    Outcome::Download
                }
            }
            (Some(local), None, Some(baseline)) => {
                if baseline.status == SyncStatus::Synced {
                    Outcome::DeleteLocal
                } else {
                    debug!(
                        path = %local.path,
                        status = %baseline.status,
                        "remote side gone before first successful sync, uploading"
                    );
                    Outcome::Upload
                }
            }

            // Both sides gone
            (None, None, Some(_)) => Outcome::DropBaseline,
        }
    }

    /// First sync: no baseline, copies on both sides
    ///
    /// Equal size and near-equal mtime means the copies are the same file
    /// and can be recorded as synced without a transfer; anything else is a
    /// conflict for the user to resolve.
    fn classify_first_sync(local: &LocalRecord, remote: &RemoteRecord) -> Outcome {
        let drift = mtime_delta_secs(local.mtime_utc, remote.mtime_utc);
        if local.size_bytes == remote.size_bytes && drift <= FIRST_SYNC_MTIME_WINDOW_SECS {
            Outcome::RecordSynced
        } else {
            debug!(
                path = %local.path,
                local_size = local.size_bytes,
                remote_size = remote.size_bytes,
                mtime_drift_secs = drift,
                "first-sync copies differ"
            );
            Outcome::Conflict
        }
    }

    /// Tracked path: all three views present
    fn classify_tracked(
        local: &LocalRecord,
        remote: &RemoteRecord,
        baseline: &SyncRecord,
    ) -> Outcome {
        // A transfer that was planned or failed resumes in its original
        // direction, unless the opposite side moved in the meantime.
        match pending_direction(baseline) {
            Some(SyncDirection::Upload) => {
                return if Self::remote_diverges(remote, baseline) {
                    Outcome::Conflict
                } else {
                    Outcome::Upload
                };
            }
            Some(SyncDirection::Download) => {
                return if Self::local_diverges(local, baseline) {
                    Outcome::Conflict
                } else {
                    Outcome::Download
                };
            }
            None => {}
        }

        let local_changed = Self::local_diverges(local, baseline);
        let remote_changed =
            baseline.status == SyncStatus::SyncOnly || Self::remote_diverges(remote, baseline);

        match (local_changed, remote_changed) {
            (true, false) => Outcome::Upload,
            (false, true) => Outcome::Download,
            (true, true) => Outcome::Conflict,
            (false, false) => Outcome::Skip,
        }
    }

    /// Local divergence from the baseline
    ///
    /// Hash comparison when both hashes are known; otherwise size or a
    /// narrow mtime window.
    #[must_use]
    pub fn local_diverges(local: &LocalRecord, baseline: &SyncRecord) -> bool {
        if let Some(base_hash) = &baseline.local_hash {
            return local.content_hash != *base_hash;
        }
        local.size_bytes != baseline.size_bytes
            || mtime_delta_secs(local.mtime_utc, baseline.mtime_utc) > LOCAL_MTIME_SLACK_SECS
    }

    /// Remote divergence from the baseline
    ///
    /// A differing cTag alone is not enough when the baseline never stored
    /// one; it must be corroborated by a size change or a large mtime
    /// drift.
    #[must_use]
    pub fn remote_diverges(remote: &RemoteRecord, baseline: &SyncRecord) -> bool {
        let ctag_differs = remote.ctag != baseline.ctag;
        ctag_differs
            && (baseline.ctag.is_some()
                || remote.size_bytes != baseline.size_bytes
                || mtime_delta_secs(remote.mtime_utc, baseline.mtime_utc)
                    > REMOTE_MTIME_SLACK_SECS)
    }
}

/// Direction a non-synced baseline is still trying to complete
fn pending_direction(baseline: &SyncRecord) -> Option<SyncDirection> {
    match baseline.status {
        SyncStatus::PendingUpload => Some(SyncDirection::Upload),
        SyncStatus::PendingDownload => Some(SyncDirection::Download),
        // A failed transfer retries in the direction it was going; an
        // unknown direction defaults to upload, which re-establishes the
        // authoritative remote version first.
        SyncStatus::Failed => Some(match baseline.last_direction {
            Some(SyncDirection::Download) => SyncDirection::Download,
            _ => SyncDirection::Upload,
        }),
        SyncStatus::Synced | SyncStatus::SyncOnly => None,
    }
}

/// Absolute mtime delta in whole seconds
fn mtime_delta_secs(a: DateTime<Utc>, b: DateTime<Utc>) -> i64 {
    (a - b).num_seconds().abs()
}
