//! Deletion service
//!
//! Applies the deletions a reconciliation round decided on: local files
//! whose remote counterpart disappeared, remote items whose local file was
//! removed, and baseline rows with nothing left on either side. Each item
//! is handled independently - one failed deletion is logged and counted,
//! never fatal to the rest.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use tidemark_core::domain::records::SyncRecord;
use tidemark_core::ports::local_fs::LocalFileSystem;
use tidemark_core::ports::metadata_store::MetadataStore;
use tidemark_core::ports::remote_drive::RemoteDriveClient;
use tokio::sync::mpsc;

use crate::error::{EngineError, RemoteError};
use crate::progress::ProgressEvent;
use crate::reconciler::{local_path_for, SessionContext};

/// Counters for one deletion run
#[derive(Debug, Default, Clone, Copy)]
pub struct DeletionTotals {
    /// Files removed on either side
    pub files_deleted: u64,
    /// Deletions that failed and stay for the next session
    pub failures: u64,
}

/// Applies local and remote deletions with independent failure handling
pub struct DeletionService {
    client: Arc<dyn RemoteDriveClient>,
    store: Arc<dyn MetadataStore>,
    fs: Arc<dyn LocalFileSystem>,
}

impl DeletionService {
    /// Create a deletion service over the given ports
    #[must_use]
    pub fn new(
        client: Arc<dyn RemoteDriveClient>,
        store: Arc<dyn MetadataStore>,
        fs: Arc<dyn LocalFileSystem>,
    ) -> Self {
        Self { client, store, fs }
    }

    /// Apply the planned deletions
    ///
    /// A failed local or remote deletion leaves its record in place so the
    /// next session reclassifies it; store failures are session-fatal.
    pub async fn run(
        &self,
        ctx: &SessionContext,
        local_deletes: &[SyncRecord],
        remote_deletes: &[SyncRecord],
        drop_baselines: &[SyncRecord],
        events: &mpsc::Sender<ProgressEvent>,
        token: &CancellationToken,
    ) -> Result<DeletionTotals, EngineError> {
        let mut totals = DeletionTotals::default();

        for record in local_deletes {
            if token.is_cancelled() {
                return Err(EngineError::Cancelled);
            }

            let local_path = local_path_for(&ctx.local_root, &record.path);
            match self.fs.delete(&local_path).await {
                Ok(()) => {
                    self.store
                        .delete_record(&ctx.hashed, &record.path)
                        .await
                        .map_err(EngineError::Store)?;
                    totals.files_deleted += 1;
                    let _ = events.send(ProgressEvent::Deleted).await;
                    debug!(path = %record.path, "local file deleted (remote deleted)");
                }
                Err(err) => {
                    warn!(
                        account = %ctx.hashed.short(),
                        path = %record.path,
                        error = %err,
                        "local deletion failed, keeping record for next session"
                    );
                    totals.failures += 1;
                }
            }
        }

        for record in remote_deletes {
            if token.is_cancelled() {
                return Err(EngineError::Cancelled);
            }

            let Some(item_id) = record.remote_item_id.as_ref() else {
                // Nothing remote to delete; the row itself is stale.
                self.store
                    .delete_record(&ctx.hashed, &record.path)
                    .await
                    .map_err(EngineError::Store)?;
                continue;
            };

            match self.client.delete(&ctx.account, item_id, token).await {
                Ok(()) => {
                    self.store
                        .delete_record(&ctx.hashed, &record.path)
                        .await
                        .map_err(EngineError::Store)?;
                    totals.files_deleted += 1;
                    let _ = events.send(ProgressEvent::Deleted).await;
                    debug!(path = %record.path, "remote item deleted (local deleted)");
                }
                Err(err) => match RemoteError::classify(err) {
                    RemoteError::NotFound(_) => {
                        // Already gone remotely; converge by dropping the row.
                        self.store
                            .delete_record(&ctx.hashed, &record.path)
                            .await
                            .map_err(EngineError::Store)?;
                        totals.files_deleted += 1;
                        let _ = events.send(ProgressEvent::Deleted).await;
                    }
                    fault => {
                        warn!(
                            account = %ctx.hashed.short(),
                            path = %record.path,
                            fault = %fault,
                            "remote deletion failed, keeping record for next session"
                        );
                        totals.failures += 1;
                    }
                },
            }
        }

        for record in drop_baselines {
            self.store
                .delete_record(&ctx.hashed, &record.path)
                .await
                .map_err(EngineError::Store)?;
            debug!(path = %record.path, "baseline dropped (gone on both sides)");
        }

        Ok(totals)
    }
}
