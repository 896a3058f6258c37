//! Session coordinator
//!
//! Owns the per-account session lifecycle: single-flight admission through
//! a compare-and-swap flag, the linked cancellation token, the session-log
//! row, and the broadcast progress channel. A second `start_sync` while a
//! session is running is a silent no-op; terminal states stay observable
//! until the next session begins.
//!
//! State flow: `Idle → Queued → Running → {Completed | Paused | Failed}`,
//! then back to `Idle` implicitly when the next session is admitted.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use tidemark_core::config::Config;
use tidemark_core::domain::conflict::ConflictRow;
use tidemark_core::domain::newtypes::{AccountId, HashedAccountId};
use tidemark_core::domain::progress::{ProgressSnapshot, SyncState};
use tidemark_core::domain::session::{SessionLog, SessionTotals};
use tidemark_core::ports::auth::AuthProvider;
use tidemark_core::ports::local_fs::LocalFileSystem;
use tidemark_core::ports::metadata_store::MetadataStore;
use tidemark_core::ports::remote_drive::RemoteDriveClient;

use crate::error::EngineError;
use crate::progress::{self, ProgressEvent, PROGRESS_CHANNEL_CAPACITY};
use crate::reconciler::Reconciler;

/// Terminal result of one `run_once` invocation
#[derive(Debug, Clone, PartialEq)]
pub enum SessionOutcome {
    /// The round finished; totals are final
    Completed(SessionTotals),
    /// The session was cancelled before finishing
    Paused,
    /// The session failed; the message explains why
    Failed(String),
    /// Another session for the account was already in flight
    AlreadyRunning,
}

/// Per-account coordination state
struct AccountSlot {
    /// Single-flight flag, compare-and-swap only
    running: AtomicBool,
    /// Broadcast publisher; subscribers see the latest snapshot on attach
    publisher: watch::Sender<ProgressSnapshot>,
    /// Cancellation token of the in-flight session
    cancel: Mutex<CancellationToken>,
}

/// Single-flight session coordination and progress publication
pub struct SessionCoordinator {
    client: Arc<dyn RemoteDriveClient>,
    auth: Arc<dyn AuthProvider>,
    store: Arc<dyn MetadataStore>,
    fs: Arc<dyn LocalFileSystem>,
    config: Config,
    slots: DashMap<HashedAccountId, Arc<AccountSlot>>,
}

impl SessionCoordinator {
    /// Create a coordinator over the given ports
    #[must_use]
    pub fn new(
        client: Arc<dyn RemoteDriveClient>,
        auth: Arc<dyn AuthProvider>,
        store: Arc<dyn MetadataStore>,
        fs: Arc<dyn LocalFileSystem>,
        config: Config,
    ) -> Self {
        Self {
            client,
            auth,
            store,
            fs,
            config: config.normalized(),
            slots: DashMap::new(),
        }
    }

    /// Start a sync session, fire-and-forget
    ///
    /// Single-flight per account: when a session is already running this is
    /// a silent no-op. `token` is the caller's cancellation root; the
    /// session runs on a child token also reachable through
    /// [`stop_sync`](Self::stop_sync).
    pub fn start_sync(self: &Arc<Self>, account: AccountId, token: CancellationToken) {
        let coordinator = self.clone();
        tokio::spawn(async move {
            coordinator.run_once(account, token).await;
        });
    }

    /// Signal cancellation to the account's in-flight session, if any
    pub fn stop_sync(&self, account: &AccountId) {
        let hashed = self.hash(account);
        if let Some(slot) = self.slots.get(&hashed) {
            if let Ok(token) = slot.cancel.try_lock() {
                token.cancel();
            }
            info!(account = %hashed.short(), "stop requested");
        }
    }

    /// Subscribe to the account's progress snapshots
    ///
    /// The receiver observes the latest snapshot immediately on attach.
    pub fn subscribe(&self, account: &AccountId) -> watch::Receiver<ProgressSnapshot> {
        let hashed = self.hash(account);
        self.slot(&hashed).publisher.subscribe()
    }

    /// Unresolved conflicts recorded for the account
    pub async fn get_conflicts(&self, account: &AccountId) -> anyhow::Result<Vec<ConflictRow>> {
        let hashed = self.hash(account);
        self.store.get_unresolved_conflicts(&hashed).await
    }

    /// Run one session to its terminal state
    ///
    /// The synchronous core of [`start_sync`](Self::start_sync); exposed so
    /// embedders can await the outcome directly.
    pub async fn run_once(&self, account: AccountId, token: CancellationToken) -> SessionOutcome {
        let hashed = self.hash(&account);
        let slot = self.slot(&hashed);

        // Single-flight admission.
        if slot
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(account = %hashed.short(), "session already in flight, ignoring start");
            return SessionOutcome::AlreadyRunning;
        }

        let session_token = token.child_token();
        *slot.cancel.lock().await = session_token.clone();

        let outcome = self
            .run_session(&account, &hashed, &slot, session_token)
            .await;

        // The flag clears on every path, or the account would be wedged.
        slot.running.store(false, Ordering::Release);
        outcome
    }

    /// Drive one admitted session through plan, transfer and finalization
    async fn run_session(
        &self,
        account: &AccountId,
        hashed: &HashedAccountId,
        slot: &AccountSlot,
        token: CancellationToken,
    ) -> SessionOutcome {
        let queued = ProgressSnapshot::idle(hashed.clone()).with_status(SyncState::Queued);
        slot.publisher.send_replace(queued.clone());

        let (event_tx, event_rx) = mpsc::channel(PROGRESS_CHANNEL_CAPACITY);
        let pump = tokio::spawn(progress::pump(queued, event_rx, slot.publisher.clone()));

        let session_log = if self.config.sync.detailed_logging {
            Some(SessionLog::open(hashed.clone()))
        } else {
            None
        };

        let result = self
            .run_guarded(account, hashed, session_log.as_ref(), &event_tx, &token)
            .await;

        let (terminal, outcome) = match &result {
            Ok(totals) => {
                info!(
                    account = %hashed.short(),
                    uploaded = totals.files_uploaded,
                    downloaded = totals.files_downloaded,
                    deleted = totals.files_deleted,
                    conflicts = totals.conflicts_detected,
                    bytes = totals.total_bytes,
                    "session completed"
                );
                (SyncState::Completed, SessionOutcome::Completed(*totals))
            }
            Err(EngineError::Cancelled) => {
                info!(account = %hashed.short(), "session paused by cancellation");
                (SyncState::Paused, SessionOutcome::Paused)
            }
            Err(err) => {
                error!(
                    account = %hashed.short(),
                    error = %format!("{err:#}"),
                    "session failed"
                );
                (SyncState::Failed, SessionOutcome::Failed(err.to_string()))
            }
        };

        let _ = event_tx.send(ProgressEvent::State(terminal)).await;
        drop(event_tx);
        // Wait for the pump so the terminal snapshot is the last publish of
        // this session: publication stays totally ordered per account.
        let _ = pump.await;

        if let Some(log) = session_log {
            let finalized = match &result {
                Ok(totals) => log.completed(*totals),
                Err(EngineError::Cancelled) => log.paused(SessionTotals::default()),
                Err(err) => log.failed(err.to_string()),
            };
            if let Err(err) = self.store.save_session(&finalized).await {
                warn!(
                    account = %hashed.short(),
                    error = %err,
                    "cannot persist session log"
                );
            }
        }

        outcome
    }

    /// The failable portion of a session: auth gate, session-log row,
    /// reconciliation round
    async fn run_guarded(
        &self,
        account: &AccountId,
        hashed: &HashedAccountId,
        session_log: Option<&SessionLog>,
        event_tx: &mpsc::Sender<ProgressEvent>,
        token: &CancellationToken,
    ) -> Result<SessionTotals, EngineError> {
        if let Some(log) = session_log {
            self.store
                .save_session(log)
                .await
                .map_err(EngineError::Store)?;
        }

        // Auth refusal fails the session immediately, before any remote or
        // local work.
        self.auth
            .credentials(account)
            .await
            .map_err(EngineError::Auth)?;

        let _ = event_tx
            .send(ProgressEvent::State(SyncState::Running))
            .await;

        let reconciler = Reconciler::new(
            self.client.clone(),
            self.store.clone(),
            self.fs.clone(),
            self.config.clone(),
        );
        let ctx = reconciler
            .session_context(account.clone(), hashed.clone())
            .await?;
        reconciler.run_round(&ctx, event_tx, token).await
    }

    fn hash(&self, account: &AccountId) -> HashedAccountId {
        account.hashed(&self.config.privacy.account_salt)
    }

    fn slot(&self, hashed: &HashedAccountId) -> Arc<AccountSlot> {
        self.slots
            .entry(hashed.clone())
            .or_insert_with(|| {
                let (publisher, _) = watch::channel(ProgressSnapshot::idle(hashed.clone()));
                Arc::new(AccountSlot {
                    running: AtomicBool::new(false),
                    publisher,
                    cancel: Mutex::new(CancellationToken::new()),
                })
            })
            .clone()
    }
}
