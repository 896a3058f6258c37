//! Reconciliation engine
//!
//! Drives one sync round for one account: load the selection and baseline,
//! scan local folders in parallel, discover remote changes through the
//! delta processor, compute the three-way join, and hand the resulting
//! plan to the transfer executor and deletion service. The delta cursor is
//! persisted only after every batch derived from the round has been
//! committed.
//!
//! ## Remote coverage
//!
//! An incremental delta round reports only what changed, so a baseline
//! path missing from the delta output means "unchanged", not "deleted" -
//! deletions arrive as explicit tombstones. For those unchanged paths the
//! join synthesizes a remote view from the baseline. A full enumeration
//! (first sync, expired cursor) reports complete remote state, so there
//! absence really is absence.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use tidemark_conflict::{ConflictDetector, Outcome};
use tidemark_core::config::Config;
use tidemark_core::domain::conflict::ConflictRow;
use tidemark_core::domain::cursor::DeltaCursor;
use tidemark_core::domain::newtypes::{AccountId, DriveId, HashedAccountId, RemoteItemId};
use tidemark_core::domain::paths::PathKey;
use tidemark_core::domain::progress::SyncState;
use tidemark_core::domain::records::{LocalRecord, RemoteRecord, SyncRecord};
use tidemark_core::domain::session::SessionTotals;
use tidemark_core::ports::local_fs::LocalFileSystem;
use tidemark_core::ports::metadata_store::MetadataStore;
use tidemark_core::ports::remote_drive::RemoteDriveClient;

use crate::deletion::DeletionService;
use crate::delta::DeltaProcessor;
use crate::error::{EngineError, RemoteError};
use crate::progress::ProgressEvent;
use crate::retry::call_remote;
use crate::scanner::LocalScanner;
use crate::transfer::{TransferExecutor, BATCH_SIZE};

/// Everything a session needs to know about its account
#[derive(Debug, Clone)]
pub struct SessionContext {
    /// Raw account id, held in memory only
    pub account: AccountId,
    /// Hashed id used for every persisted row and log line
    pub hashed: HashedAccountId,
    /// Drive the session operates on
    pub drive_id: DriveId,
    /// Local mirror root
    pub local_root: PathBuf,
}

/// One planned transfer
#[derive(Debug, Clone)]
pub struct TransferTask {
    /// Canonical remote path
    pub path: PathKey,
    /// Local mirror path
    pub local_path: PathBuf,
    /// Bytes to move
    pub size_bytes: u64,
    /// Local view, when present
    pub local: Option<LocalRecord>,
    /// Remote view, when present
    pub remote: Option<RemoteRecord>,
    /// Baseline record, when present
    pub baseline: Option<SyncRecord>,
}

/// Output of the planning phase of one round
#[derive(Debug, Default)]
pub struct SyncPlan {
    /// Files to push to the remote service
    pub uploads: Vec<TransferTask>,
    /// Files to pull to the local mirror
    pub downloads: Vec<TransferTask>,
    /// Freshly detected conflicts
    pub conflicts: Vec<ConflictRow>,
    /// First-sync matches recorded as synced without a transfer
    pub record_synced: Vec<SyncRecord>,
    /// Baselines whose local file must be deleted
    pub local_deletes: Vec<SyncRecord>,
    /// Baselines whose remote item must be deleted
    pub remote_deletes: Vec<SyncRecord>,
    /// Baselines gone on both sides
    pub drop_baselines: Vec<SyncRecord>,
    /// Cursor candidate to persist once the round commits
    pub final_cursor: Option<DeltaCursor>,
    /// Whether the stored cursor was invalidated this round
    pub resync_performed: bool,
}

impl SyncPlan {
    /// Files planned for transfer
    #[must_use]
    pub fn transfer_files(&self) -> u64 {
        (self.uploads.len() + self.downloads.len()) as u64
    }

    /// Bytes planned for transfer
    #[must_use]
    pub fn transfer_bytes(&self) -> u64 {
        self.uploads
            .iter()
            .chain(self.downloads.iter())
            .map(|t| t.size_bytes)
            .sum()
    }

    /// True when the round has nothing to do
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.uploads.is_empty()
            && self.downloads.is_empty()
            && self.conflicts.is_empty()
            && self.record_synced.is_empty()
            && self.local_deletes.is_empty()
            && self.remote_deletes.is_empty()
            && self.drop_baselines.is_empty()
    }
}

/// Merges local, remote and baseline state into transfer plans and runs
/// them
pub struct Reconciler {
    client: Arc<dyn RemoteDriveClient>,
    store: Arc<dyn MetadataStore>,
    fs: Arc<dyn LocalFileSystem>,
    config: Config,
    processor: DeltaProcessor,
}

impl Reconciler {
    /// Create a reconciler over the given ports
    #[must_use]
    pub fn new(
        client: Arc<dyn RemoteDriveClient>,
        store: Arc<dyn MetadataStore>,
        fs: Arc<dyn LocalFileSystem>,
        config: Config,
    ) -> Self {
        let processor = DeltaProcessor::new(client.clone());
        Self {
            client,
            store,
            fs,
            config,
            processor,
        }
    }

    /// Resolve the session context for an account
    ///
    /// Touches the drive root once to learn the drive id.
    pub async fn session_context(
        &self,
        account: AccountId,
        hashed: HashedAccountId,
    ) -> Result<SessionContext, EngineError> {
        let root = call_remote("remote_root", || {
            let account = account.clone();
            async move { self.client.root(&account).await }
        })
        .await
        .map_err(|fault| match fault {
            RemoteError::NotFound(_) => EngineError::RootNotFound("/".to_string()),
            fault => EngineError::Remote(fault),
        })?;

        let drive_id = root
            .drive_id
            .and_then(|d| DriveId::new(d).ok())
            .unwrap_or_else(DriveId::default_drive);

        Ok(SessionContext {
            account,
            hashed,
            drive_id,
            local_root: self.config.sync.local_root.clone(),
        })
    }

    /// Run one full round: plan, transfer, delete, commit
    #[instrument(skip_all, fields(account = %ctx.hashed.short()))]
    pub async fn run_round(
        &self,
        ctx: &SessionContext,
        events: &mpsc::Sender<ProgressEvent>,
        token: &CancellationToken,
    ) -> Result<SessionTotals, EngineError> {
        let plan = self.plan(ctx, events, token).await?;

        let conflicts_detected = plan.conflicts.len() as u64;
        let _ = events
            .send(ProgressEvent::PlanTotals {
                files: plan.transfer_files(),
                bytes: plan.transfer_bytes(),
                conflicts: conflicts_detected,
            })
            .await;

        info!(
            uploads = plan.uploads.len(),
            downloads = plan.downloads.len(),
            conflicts = plan.conflicts.len(),
            local_deletes = plan.local_deletes.len(),
            remote_deletes = plan.remote_deletes.len(),
            "reconciliation plan ready"
        );

        // Conflicts and first-sync matches are durable before any transfer
        // starts.
        for conflict in &plan.conflicts {
            self.store
                .save_conflict(conflict)
                .await
                .map_err(EngineError::Store)?;
        }
        for chunk in plan.record_synced.chunks(BATCH_SIZE) {
            self.store
                .save_batch(chunk)
                .await
                .map_err(EngineError::Store)?;
        }

        let executor = TransferExecutor::new(
            self.client.clone(),
            self.store.clone(),
            self.fs.clone(),
            &self.config,
        );
        let transfer_totals = executor
            .run(ctx, plan.uploads, plan.downloads, events, token)
            .await?;

        let deletion = DeletionService::new(self.client.clone(), self.store.clone(), self.fs.clone());
        let deletion_totals = deletion
            .run(
                ctx,
                &plan.local_deletes,
                &plan.remote_deletes,
                &plan.drop_baselines,
                events,
                token,
            )
            .await?;

        // Only now, with every batch committed, may the cursor advance.
        if let Some(cursor) = &plan.final_cursor {
            self.store
                .save_delta_cursor(cursor)
                .await
                .map_err(EngineError::Store)?;
            debug!(drive = %cursor.drive_id, "delta cursor advanced");
        }

        Ok(SessionTotals {
            files_uploaded: transfer_totals.files_uploaded,
            files_downloaded: transfer_totals.files_downloaded,
            files_deleted: deletion_totals.files_deleted,
            conflicts_detected,
            total_bytes: transfer_totals.bytes_uploaded + transfer_totals.bytes_downloaded,
        })
    }

    /// Plan one round without executing it
    pub async fn plan(
        &self,
        ctx: &SessionContext,
        events: &mpsc::Sender<ProgressEvent>,
        token: &CancellationToken,
    ) -> Result<SyncPlan, EngineError> {
        if token.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        // Step 1: selection and baseline
        let selection = self
            .store
            .selected_folders(&ctx.hashed)
            .await
            .map_err(EngineError::Store)?;
        if selection.is_empty() {
            debug!("selection is empty, nothing to reconcile");
            return Ok(SyncPlan::default());
        }

        let baselines: HashMap<PathKey, SyncRecord> = self
            .store
            .records_for_account(&ctx.hashed)
            .await
            .map_err(EngineError::Store)?
            .into_iter()
            .map(|record| (record.path.clone(), record))
            .collect();

        // Step 2: local scans, bounded parallel
        let local = self.scan_selection(ctx, &selection, events, token).await?;

        // Step 3: remote discovery
        let stored_cursor = self
            .store
            .delta_cursor(&ctx.hashed, &ctx.drive_id)
            .await
            .map_err(EngineError::Store)?;

        let mut on_page = {
            let events = events.clone();
            move |_pages: u32, _items: u64| {
                let _ = events.try_send(ProgressEvent::State(SyncState::Running));
            }
        };

        let changes = self
            .processor
            .collect_changes(
                &ctx.account,
                stored_cursor.map(|c| c.token),
                &selection,
                self.config.sync.first_sync_max_files,
                &mut on_page,
                token,
            )
            .await?;

        if changes.resync_performed {
            self.store
                .clear_delta_cursor(&ctx.hashed, &ctx.drive_id)
                .await
                .map_err(EngineError::Store)?;
        }

        // Step 4: assemble the remote view
        let mut remote_files: HashMap<PathKey, RemoteRecord> = HashMap::new();
        for record in changes.upserts {
            if record.is_folder || record.is_deleted {
                continue;
            }
            remote_files.entry(record.path.clone()).or_insert(record);
        }

        let id_to_path: HashMap<RemoteItemId, PathKey> = baselines
            .values()
            .filter_map(|b| b.remote_item_id.clone().map(|id| (id, b.path.clone())))
            .collect();
        let mut deleted_paths: HashSet<PathKey> = HashSet::new();
        for deletion in &changes.deletions {
            let path = deletion
                .path
                .clone()
                .or_else(|| id_to_path.get(&deletion.item_id).cloned());
            match path {
                Some(path) => {
                    deleted_paths.insert(path);
                }
                None => {
                    debug!(id = %deletion.item_id, "tombstone for untracked item, ignoring");
                }
            }
        }

        // Step 5: three-way join over the union of paths
        let mut paths: HashSet<PathKey> = HashSet::new();
        paths.extend(local.keys().cloned());
        paths.extend(remote_files.keys().cloned());
        paths.extend(baselines.keys().cloned());

        let unresolved: HashSet<PathKey> = self
            .store
            .get_unresolved_conflicts(&ctx.hashed)
            .await
            .map_err(EngineError::Store)?
            .into_iter()
            .map(|row| row.path)
            .collect();

        let mut plan = SyncPlan {
            final_cursor: changes
                .final_cursor
                .map(|t| DeltaCursor::advanced(ctx.hashed.clone(), ctx.drive_id.clone(), t)),
            resync_performed: changes.resync_performed,
            ..SyncPlan::default()
        };

        for path in paths {
            if token.is_cancelled() {
                return Err(EngineError::Cancelled);
            }

            // Paths outside the selection carry no work this session.
            if !selection.iter().any(|root| path.starts_with(root)) {
                continue;
            }

            let local_view = local.get(&path);
            let baseline_view = baselines.get(&path);

            // A synthesized record stands in for "unchanged remotely" on
            // incremental rounds.
            let synthesized;
            let remote_view = if deleted_paths.contains(&path) {
                None
            } else if let Some(record) = remote_files.get(&path) {
                Some(record)
            } else if !changes.full_coverage {
                match baseline_view.and_then(unchanged_remote_from_baseline) {
                    Some(record) => {
                        synthesized = record;
                        Some(&synthesized)
                    }
                    None => None,
                }
            } else {
                None
            };

            let outcome = ConflictDetector::classify(local_view, remote_view, baseline_view);
            self.apply_outcome(
                ctx,
                &path,
                outcome,
                local_view,
                remote_view,
                baseline_view,
                &unresolved,
                &mut plan,
            );
        }

        Ok(plan)
    }

    /// Scan every selected folder, bounded by the scan parallelism permit
    /// count
    async fn scan_selection(
        &self,
        ctx: &SessionContext,
        selection: &[PathKey],
        events: &mpsc::Sender<ProgressEvent>,
        token: &CancellationToken,
    ) -> Result<HashMap<PathKey, LocalRecord>, EngineError> {
        let semaphore = Arc::new(Semaphore::new(self.config.transfers.scan_parallelism));
        let mut tasks: JoinSet<Result<Vec<LocalRecord>, EngineError>> = JoinSet::new();

        for folder in selection {
            let semaphore = semaphore.clone();
            let scanner = LocalScanner::new(self.fs.clone());
            let folder = folder.clone();
            let local_root = local_path_for(&ctx.local_root, &folder);
            let token = token.clone();
            let events = events.clone();

            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| EngineError::Cancelled)?;
                let _ = events
                    .send(ProgressEvent::Scanning(Some(folder.clone())))
                    .await;
                scanner.scan(&local_root, &folder, &token).await
            });
        }

        let mut local: HashMap<PathKey, LocalRecord> = HashMap::new();
        let mut failure: Option<EngineError> = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(records)) => {
                    if failure.is_none() {
                        for record in records {
                            local.entry(record.path.clone()).or_insert(record);
                        }
                    }
                }
                Ok(Err(err)) => {
                    // Keep draining so no scan task outlives the round.
                    if failure.is_none() {
                        failure = Some(err);
                    }
                }
                Err(join_err) => {
                    if failure.is_none() {
                        failure = Some(EngineError::Other(anyhow::anyhow!(
                            "scan task panicked: {join_err}"
                        )));
                    }
                }
            }
        }

        let _ = events.send(ProgressEvent::Scanning(None)).await;

        match failure {
            Some(err) => Err(err),
            None => Ok(local),
        }
    }

    /// Route one classification outcome into the plan
    #[allow(clippy::too_many_arguments)]
    fn apply_outcome(
        &self,
        ctx: &SessionContext,
        path: &PathKey,
        outcome: Outcome,
        local: Option<&LocalRecord>,
        remote: Option<&RemoteRecord>,
        baseline: Option<&SyncRecord>,
        unresolved: &HashSet<PathKey>,
        plan: &mut SyncPlan,
    ) {
        let task = || TransferTask {
            path: path.clone(),
            local_path: local_path_for(&ctx.local_root, path),
            size_bytes: match outcome {
                Outcome::Download => remote.map(|r| r.size_bytes).unwrap_or(0),
                _ => local.map(|l| l.size_bytes).unwrap_or(0),
            },
            local: local.cloned(),
            remote: remote.cloned(),
            baseline: baseline.cloned(),
        };

        match outcome {
            Outcome::Upload => {
                if local.is_some() {
                    plan.uploads.push(task());
                } else {
                    warn!(path = %path, "upload classified without a local record, skipping");
                }
            }
            Outcome::Download => {
                if remote.is_some() {
                    plan.downloads.push(task());
                } else {
                    warn!(path = %path, "download classified without a remote record, skipping");
                }
            }
            Outcome::RecordSynced => {
                if let (Some(local), Some(remote)) = (local, remote) {
                    plan.record_synced.push(SyncRecord::first_sync_match(
                        ctx.hashed.clone(),
                        local,
                        remote,
                    ));
                }
            }
            Outcome::Conflict => {
                // At most one unresolved row per (account, path).
                if unresolved.contains(path) {
                    debug!(path = %path, "conflict already recorded, not duplicating");
                    return;
                }
                if let (Some(local), Some(remote)) = (local, remote) {
                    plan.conflicts.push(ConflictRow::detected(
                        ctx.hashed.clone(),
                        path.clone(),
                        local.mtime_utc,
                        remote.mtime_utc,
                        local.size_bytes,
                        remote.size_bytes,
                    ));
                }
            }
            Outcome::DeleteRemote => {
                if let Some(baseline) = baseline {
                    plan.remote_deletes.push(baseline.clone());
                }
            }
            Outcome::DeleteLocal => {
                if let Some(baseline) = baseline {
                    plan.local_deletes.push(baseline.clone());
                }
            }
            Outcome::DropBaseline => {
                if let Some(baseline) = baseline {
                    plan.drop_baselines.push(baseline.clone());
                }
            }
            Outcome::Skip => {}
        }
    }
}

/// Local mirror path of a canonical remote path
pub(crate) fn local_path_for(local_root: &std::path::Path, path: &PathKey) -> PathBuf {
    local_root.join(path.as_str().trim_start_matches('/'))
}

/// Remote view standing in for "unchanged since baseline" on incremental
/// rounds
fn unchanged_remote_from_baseline(baseline: &SyncRecord) -> Option<RemoteRecord> {
    let remote_item_id = baseline.remote_item_id.clone()?;
    Some(RemoteRecord {
        remote_item_id,
        path: baseline.path.clone(),
        size_bytes: baseline.size_bytes,
        mtime_utc: baseline.mtime_utc,
        ctag: baseline.ctag.clone(),
        etag: baseline.etag.clone(),
        is_folder: false,
        is_deleted: false,
    })
}
