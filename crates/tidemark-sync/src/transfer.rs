//! Transfer executor
//!
//! Runs the planned uploads and downloads through two bounded-parallel
//! worker pools, one per direction. Uploads drain completely before the
//! first download starts: if a path somehow needs both, the upload
//! establishes the authoritative remote version first.
//!
//! Completed records accumulate into batches of fifty and flush atomically
//! to the metadata store; a final flush follows pool drain. The executor
//! itself never retries a failed transfer - the record is marked failed
//! and the next session reclassifies it, which keeps a session a
//! well-defined observable unit.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use tidemark_core::config::Config;
use tidemark_core::domain::newtypes::{AccountId, HashedAccountId};
use tidemark_core::domain::records::{SyncDirection, SyncRecord};
use tidemark_core::ports::local_fs::LocalFileSystem;
use tidemark_core::ports::metadata_store::MetadataStore;
use tidemark_core::ports::remote_drive::{RemoteDriveClient, UploadProgressFn};

use crate::delta::map_remote_item;
use crate::error::EngineError;
use crate::progress::ProgressEvent;
use crate::reconciler::{SessionContext, TransferTask};

/// Completed records per atomic store flush
pub const BATCH_SIZE: usize = 50;

/// Counters for one executor run
#[derive(Debug, Default, Clone, Copy)]
pub struct TransferTotals {
    /// Uploads that completed successfully
    pub files_uploaded: u64,
    /// Downloads that completed successfully
    pub files_downloaded: u64,
    /// Bytes pushed to the remote service
    pub bytes_uploaded: u64,
    /// Bytes pulled from the remote service
    pub bytes_downloaded: u64,
    /// Transfers that failed and were marked for the next session
    pub failures: u64,
}

/// Result of one worker's file
struct FileResult {
    started: bool,
    succeeded: bool,
    bytes: u64,
}

/// Everything a pool worker needs, shared per pool
struct WorkerCtx {
    client: Arc<dyn RemoteDriveClient>,
    store: Arc<dyn MetadataStore>,
    fs: Arc<dyn LocalFileSystem>,
    account: AccountId,
    hashed: HashedAccountId,
    events: mpsc::Sender<ProgressEvent>,
    records: mpsc::Sender<SyncRecord>,
    token: CancellationToken,
}

/// Bounded-parallel upload and download pools
pub struct TransferExecutor {
    client: Arc<dyn RemoteDriveClient>,
    store: Arc<dyn MetadataStore>,
    fs: Arc<dyn LocalFileSystem>,
    upload_permits: usize,
    download_permits: usize,
}

impl TransferExecutor {
    /// Create an executor with the configured permit counts
    #[must_use]
    pub fn new(
        client: Arc<dyn RemoteDriveClient>,
        store: Arc<dyn MetadataStore>,
        fs: Arc<dyn LocalFileSystem>,
        config: &Config,
    ) -> Self {
        Self {
            client,
            store,
            fs,
            upload_permits: config.transfers.upload_parallelism.max(1),
            download_permits: config.transfers.download_parallelism.max(1),
        }
    }

    /// Run the planned transfers: uploads first, then downloads
    pub async fn run(
        &self,
        ctx: &SessionContext,
        uploads: Vec<TransferTask>,
        downloads: Vec<TransferTask>,
        events: &mpsc::Sender<ProgressEvent>,
        token: &CancellationToken,
    ) -> Result<TransferTotals, EngineError> {
        let mut totals = TransferTotals::default();

        let up = self
            .run_pool(
                ctx,
                SyncDirection::Upload,
                uploads,
                self.upload_permits,
                events,
                token,
            )
            .await?;
        totals.files_uploaded = up.0;
        totals.bytes_uploaded = up.1;
        totals.failures += up.2;

        if token.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let down = self
            .run_pool(
                ctx,
                SyncDirection::Download,
                downloads,
                self.download_permits,
                events,
                token,
            )
            .await?;
        totals.files_downloaded = down.0;
        totals.bytes_downloaded = down.1;
        totals.failures += down.2;

        if token.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        Ok(totals)
    }

    /// Run one direction's pool; returns (succeeded, bytes, failures)
    async fn run_pool(
        &self,
        ctx: &SessionContext,
        direction: SyncDirection,
        tasks: Vec<TransferTask>,
        permits: usize,
        events: &mpsc::Sender<ProgressEvent>,
        token: &CancellationToken,
    ) -> Result<(u64, u64, u64), EngineError> {
        if tasks.is_empty() {
            return Ok((0, 0, 0));
        }

        let (record_tx, record_rx) = mpsc::channel::<SyncRecord>(BATCH_SIZE * 2);
        let batcher = tokio::spawn(flush_batches(self.store.clone(), record_rx));

        let worker_ctx = Arc::new(WorkerCtx {
            client: self.client.clone(),
            store: self.store.clone(),
            fs: self.fs.clone(),
            account: ctx.account.clone(),
            hashed: ctx.hashed.clone(),
            events: events.clone(),
            records: record_tx,
            token: token.clone(),
        });

        let semaphore = Arc::new(Semaphore::new(permits));
        let mut pool: JoinSet<Result<FileResult, EngineError>> = JoinSet::new();

        for task in tasks {
            let worker_ctx = worker_ctx.clone();
            let semaphore = semaphore.clone();
            pool.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return Ok(FileResult {
                        started: false,
                        succeeded: false,
                        bytes: 0,
                    });
                };
                match direction {
                    SyncDirection::Upload => upload_one(&worker_ctx, task).await,
                    SyncDirection::Download => download_one(&worker_ctx, task).await,
                }
            });
        }

        // The batcher finishes once every worker clone of the record
        // sender is gone.
        drop(worker_ctx);

        let mut succeeded: u64 = 0;
        let mut bytes: u64 = 0;
        let mut failures: u64 = 0;
        let mut fatal: Option<EngineError> = None;

        while let Some(joined) = pool.join_next().await {
            match joined {
                Ok(Ok(result)) => {
                    if result.succeeded {
                        succeeded += 1;
                        bytes += result.bytes;
                    } else if result.started {
                        failures += 1;
                    }
                }
                Ok(Err(err)) => {
                    if fatal.is_none() {
                        fatal = Some(err);
                    }
                }
                Err(join_err) => {
                    if fatal.is_none() {
                        fatal = Some(EngineError::Other(anyhow::anyhow!(
                            "transfer worker panicked: {join_err}"
                        )));
                    }
                }
            }
        }

        // Final flush: whatever the workers managed to complete is durable
        // even when the session is about to report failure or pause.
        let batch_result = batcher
            .await
            .map_err(|e| EngineError::Other(anyhow::anyhow!("record batcher panicked: {e}")))?;
        if let Err(err) = batch_result {
            return Err(EngineError::Store(err));
        }

        if let Some(err) = fatal {
            return Err(err);
        }

        debug!(
            direction = direction.as_str(),
            succeeded, failures, bytes, "transfer pool drained"
        );
        Ok((succeeded, bytes, failures))
    }
}

/// Accumulate completed records and flush them atomically in batches
async fn flush_batches(
    store: Arc<dyn MetadataStore>,
    mut records: mpsc::Receiver<SyncRecord>,
) -> anyhow::Result<()> {
    let mut batch: Vec<SyncRecord> = Vec::with_capacity(BATCH_SIZE);

    while let Some(record) = records.recv().await {
        batch.push(record);
        if batch.len() >= BATCH_SIZE {
            store.save_batch(&batch).await?;
            batch.clear();
        }
    }

    if !batch.is_empty() {
        store.save_batch(&batch).await?;
    }
    Ok(())
}

/// Upload one file and record the result
async fn upload_one(ctx: &WorkerCtx, task: TransferTask) -> Result<FileResult, EngineError> {
    if ctx.token.is_cancelled() {
        // Never started; the baseline (if any) stays untouched and the
        // next session reclassifies the path.
        return Ok(FileResult {
            started: false,
            succeeded: false,
            bytes: 0,
        });
    }

    let Some(local) = task.local.as_ref() else {
        warn!(path = %task.path, "upload task without local record, skipping");
        return Ok(FileResult {
            started: false,
            succeeded: false,
            bytes: 0,
        });
    };

    // Pre-insert a pending record so a crash mid-upload leaves a durable
    // trace of the attempt.
    let base = match task.baseline.clone() {
        Some(baseline) => baseline,
        None => {
            let pending = SyncRecord::pending_upload(ctx.hashed.clone(), local);
            ctx.store
                .save_record(&pending)
                .await
                .map_err(EngineError::Store)?;
            pending
        }
    };

    let _ = ctx
        .events
        .send(ProgressEvent::TransferStarted(SyncDirection::Upload))
        .await;

    let progress: UploadProgressFn = {
        let events = ctx.events.clone();
        let last_seen = AtomicU64::new(0);
        Box::new(move |bytes_sent, _total| {
            let prev = last_seen.swap(bytes_sent, Ordering::AcqRel);
            let delta = bytes_sent.saturating_sub(prev);
            if delta > 0 {
                // Lossy on purpose: a lagging consumer coalesces display
                // updates instead of stalling the upload.
                let _ = events.try_send(ProgressEvent::BytesMoved(delta));
            }
        })
    };

    let uploaded = ctx
        .client
        .upload(
            &ctx.account,
            &task.local_path,
            &task.path,
            Some(progress),
            &ctx.token,
        )
        .await;

    match uploaded {
        Ok(item) => {
            let Some(remote) = map_remote_item(&item, Some(task.path.clone())) else {
                warn!(path = %task.path, "upload response unusable, marking failed");
                return fail_transfer(ctx, base, SyncDirection::Upload, task.size_bytes).await;
            };

            // The server's mtime is the single source of truth; stamp it
            // onto the local file so the next scan sees no phantom change.
            if let Err(err) = ctx.fs.set_mtime(&task.local_path, remote.mtime_utc).await {
                warn!(path = %task.path, error = %err, "cannot stamp server mtime on local file");
            }

            let record = base.with_uploaded(&remote, local.content_hash.clone());
            let _ = ctx.records.send(record).await;
            let _ = ctx
                .events
                .send(ProgressEvent::TransferFinished {
                    direction: SyncDirection::Upload,
                    bytes: task.size_bytes,
                    succeeded: true,
                })
                .await;

            Ok(FileResult {
                started: true,
                succeeded: true,
                bytes: task.size_bytes,
            })
        }
        Err(err) => {
            warn!(
                account = %ctx.hashed.short(),
                path = %task.path,
                error = %format!("{err:#}"),
                "upload failed"
            );
            fail_transfer(ctx, base, SyncDirection::Upload, task.size_bytes).await
        }
    }
}

/// Download one file and record the result
async fn download_one(ctx: &WorkerCtx, task: TransferTask) -> Result<FileResult, EngineError> {
    if ctx.token.is_cancelled() {
        return Ok(FileResult {
            started: false,
            succeeded: false,
            bytes: 0,
        });
    }

    let Some(remote) = task.remote.clone() else {
        warn!(path = %task.path, "download task without remote record, skipping");
        return Ok(FileResult {
            started: false,
            succeeded: false,
            bytes: 0,
        });
    };

    let _ = ctx
        .events
        .send(ProgressEvent::TransferStarted(SyncDirection::Download))
        .await;

    let result: anyhow::Result<SyncRecord> = async {
        if let Some(parent) = task.local_path.parent() {
            ctx.fs.create_dir_all(parent).await?;
        }

        ctx.client
            .download(
                &ctx.account,
                &remote.remote_item_id,
                &task.local_path,
                &ctx.token,
            )
            .await?;

        // Hash what actually landed on disk, not what the server claims.
        let local_hash = ctx.fs.compute_hash(&task.local_path).await?;

        if let Err(err) = ctx.fs.set_mtime(&task.local_path, remote.mtime_utc).await {
            warn!(path = %task.path, error = %err, "cannot stamp server mtime on local file");
        }

        let base = task
            .baseline
            .clone()
            .unwrap_or_else(|| SyncRecord::pending_download(ctx.hashed.clone(), &remote));
        Ok(base.with_downloaded(&remote, local_hash))
    }
    .await;

    match result {
        Ok(record) => {
            let _ = ctx.records.send(record).await;
            let _ = ctx
                .events
                .send(ProgressEvent::TransferFinished {
                    direction: SyncDirection::Download,
                    bytes: task.size_bytes,
                    succeeded: true,
                })
                .await;
            let _ = ctx
                .events
                .try_send(ProgressEvent::BytesMoved(task.size_bytes));

            Ok(FileResult {
                started: true,
                succeeded: true,
                bytes: task.size_bytes,
            })
        }
        Err(err) => {
            warn!(
                account = %ctx.hashed.short(),
                path = %task.path,
                error = %format!("{err:#}"),
                "download failed"
            );

            if ctx.token.is_cancelled() {
                // A cancelled download leaves no record: partial bytes stay
                // on disk and the next session reclassifies the path.
                let _ = ctx
                    .events
                    .send(ProgressEvent::TransferFinished {
                        direction: SyncDirection::Download,
                        bytes: task.size_bytes,
                        succeeded: false,
                    })
                    .await;
                return Ok(FileResult {
                    started: true,
                    succeeded: false,
                    bytes: 0,
                });
            }

            let base = task
                .baseline
                .clone()
                .unwrap_or_else(|| SyncRecord::pending_download(ctx.hashed.clone(), &remote));
            fail_transfer(ctx, base, SyncDirection::Download, task.size_bytes).await
        }
    }
}

/// Mark a transfer failed: durable record plus progress bookkeeping
async fn fail_transfer(
    ctx: &WorkerCtx,
    base: SyncRecord,
    direction: SyncDirection,
    bytes: u64,
) -> Result<FileResult, EngineError> {
    let _ = ctx.records.send(base.with_failed_after(direction)).await;
    let _ = ctx
        .events
        .send(ProgressEvent::TransferFinished {
            direction,
            bytes,
            succeeded: false,
        })
        .await;
    Ok(FileResult {
        started: true,
        succeeded: false,
        bytes: 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_size_matches_store_contract() {
        assert_eq!(BATCH_SIZE, 50);
    }

    #[test]
    fn test_totals_default_is_zero() {
        let totals = TransferTotals::default();
        assert_eq!(totals.files_uploaded, 0);
        assert_eq!(totals.bytes_downloaded, 0);
        assert_eq!(totals.failures, 0);
    }
}
