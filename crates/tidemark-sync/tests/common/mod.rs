//! Shared in-memory port implementations for engine tests

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use tokio_util::sync::CancellationToken;

use tidemark_core::domain::conflict::ConflictRow;
use tidemark_core::domain::cursor::DeltaCursor;
use tidemark_core::domain::newtypes::{
    AccountId, CursorToken, DriveId, HashedAccountId, RemoteItemId, SessionId,
};
use tidemark_core::domain::paths::PathKey;
use tidemark_core::domain::records::SyncRecord;
use tidemark_core::domain::session::SessionLog;
use tidemark_core::ports::auth::{AuthProvider, BearerCredentials};
use tidemark_core::ports::metadata_store::MetadataStore;
use tidemark_core::ports::remote_drive::{
    DeltaPage, RemoteDriveClient, RemoteItem, UploadProgressFn,
};

/// Fixed server-side clock base for deterministic mtimes
pub fn server_time(offset_secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 5, 1, 10, 0, 0).unwrap() + chrono::Duration::seconds(offset_secs)
}

/// Install a test subscriber once, so `RUST_LOG=debug cargo test` shows
/// engine traces
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ============================================================================
// Mock remote drive
// ============================================================================

struct MockFile {
    item: RemoteItem,
    content: Vec<u8>,
}

struct DriveState {
    next_id: u64,
    next_cursor: u64,
    /// Folder items keyed by folded path
    folders: HashMap<String, RemoteItem>,
    /// File items keyed by folded path
    files: HashMap<String, MockFile>,
    /// Tombstones handed out by the next delta call
    tombstones: Vec<RemoteItem>,
}

/// Scriptable in-memory remote drive
pub struct MockDrive {
    state: Mutex<DriveState>,
    pub upload_calls: AtomicU64,
    pub download_calls: AtomicU64,
    pub delete_calls: AtomicU64,
    pub delta_calls: AtomicU64,
    /// Artificial latency injected into delta pulls
    pub delta_delay_ms: AtomicU64,
    pub fail_uploads: AtomicBool,
}

impl MockDrive {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(DriveState {
                next_id: 1,
                next_cursor: 1,
                folders: HashMap::new(),
                files: HashMap::new(),
                tombstones: Vec::new(),
            }),
            upload_calls: AtomicU64::new(0),
            download_calls: AtomicU64::new(0),
            delete_calls: AtomicU64::new(0),
            delta_calls: AtomicU64::new(0),
            delta_delay_ms: AtomicU64::new(0),
            fail_uploads: AtomicBool::new(false),
        }
    }

    pub fn add_folder(&self, path: &str) {
        let key = PathKey::canonical(path);
        let mut state = self.state.lock().unwrap();
        let id = format!("D{}", state.next_id);
        state.next_id += 1;
        state.folders.insert(
            key.folded().to_string(),
            RemoteItem {
                id,
                name: key.file_name().unwrap_or("root").to_string(),
                path: Some(key.as_str().to_string()),
                size: None,
                last_modified_utc: Some(server_time(0)),
                ctag: None,
                etag: Some("e-folder".to_string()),
                is_folder: true,
                is_deleted: false,
                drive_id: Some("drive1".to_string()),
            },
        );
    }

    pub fn add_file(
        &self,
        path: &str,
        content: &[u8],
        mtime: DateTime<Utc>,
        ctag: &str,
    ) -> String {
        let key = PathKey::canonical(path);
        let mut state = self.state.lock().unwrap();
        let id = format!("F{}", state.next_id);
        state.next_id += 1;
        state.files.insert(
            key.folded().to_string(),
            MockFile {
                item: RemoteItem {
                    id: id.clone(),
                    name: key.file_name().unwrap_or_default().to_string(),
                    path: Some(key.as_str().to_string()),
                    size: Some(content.len() as u64),
                    last_modified_utc: Some(mtime),
                    ctag: Some(ctag.to_string()),
                    etag: Some(format!("e-{ctag}")),
                    is_folder: false,
                    is_deleted: false,
                    drive_id: Some("drive1".to_string()),
                },
                content: content.to_vec(),
            },
        );
        id
    }

    /// Remove a file and queue its tombstone for the next delta pull
    pub fn delete_file_with_tombstone(&self, path: &str, include_path: bool) {
        let key = PathKey::canonical(path);
        let mut state = self.state.lock().unwrap();
        if let Some(file) = state.files.remove(key.folded()) {
            state.tombstones.push(RemoteItem {
                path: include_path.then(|| key.as_str().to_string()),
                is_deleted: true,
                size: None,
                last_modified_utc: None,
                ctag: None,
                etag: None,
                ..file.item
            });
        }
    }

    pub fn file_exists(&self, path: &str) -> bool {
        let key = PathKey::canonical(path);
        self.state.lock().unwrap().files.contains_key(key.folded())
    }

    fn parent_of(path: &str) -> Option<PathKey> {
        PathKey::canonical(path).parent()
    }
}

#[async_trait::async_trait]
impl RemoteDriveClient for MockDrive {
    async fn root(&self, _account: &AccountId) -> anyhow::Result<RemoteItem> {
        Ok(RemoteItem {
            id: "ROOT".to_string(),
            name: "root".to_string(),
            path: Some("/".to_string()),
            size: None,
            last_modified_utc: Some(server_time(0)),
            ctag: None,
            etag: Some("e-root".to_string()),
            is_folder: true,
            is_deleted: false,
            drive_id: Some("drive1".to_string()),
        })
    }

    async fn children(
        &self,
        _account: &AccountId,
        parent_id: &RemoteItemId,
    ) -> anyhow::Result<Vec<RemoteItem>> {
        let state = self.state.lock().unwrap();

        let parent_path = if parent_id.as_str() == "ROOT" {
            PathKey::root()
        } else {
            match state
                .folders
                .values()
                .find(|item| item.id == parent_id.as_str())
                .and_then(|item| item.path.as_deref())
            {
                Some(path) => PathKey::canonical(path),
                None => anyhow::bail!("404 folder not found: {parent_id}"),
            }
        };

        let mut children: Vec<RemoteItem> = Vec::new();
        for item in state.folders.values() {
            if let Some(path) = item.path.as_deref() {
                if Self::parent_of(path) == Some(parent_path.clone()) {
                    children.push(item.clone());
                }
            }
        }
        for file in state.files.values() {
            if let Some(path) = file.item.path.as_deref() {
                if Self::parent_of(path) == Some(parent_path.clone()) {
                    children.push(file.item.clone());
                }
            }
        }
        Ok(children)
    }

    async fn item(&self, _account: &AccountId, id: &RemoteItemId) -> anyhow::Result<RemoteItem> {
        let state = self.state.lock().unwrap();
        state
            .folders
            .values()
            .find(|item| item.id == id.as_str())
            .cloned()
            .or_else(|| {
                state
                    .files
                    .values()
                    .find(|file| file.item.id == id.as_str())
                    .map(|file| file.item.clone())
            })
            .ok_or_else(|| anyhow::anyhow!("404 item not found: {id}"))
    }

    async fn delta(
        &self,
        _account: &AccountId,
        _cursor: Option<&CursorToken>,
    ) -> anyhow::Result<DeltaPage> {
        let delay = self.delta_delay_ms.load(Ordering::Acquire);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.delta_calls.fetch_add(1, Ordering::AcqRel);

        let mut state = self.state.lock().unwrap();
        let mut items: Vec<RemoteItem> = state.folders.values().cloned().collect();
        items.extend(state.files.values().map(|f| f.item.clone()));
        items.append(&mut state.tombstones);

        let cursor = format!("cursor-{}", state.next_cursor);
        state.next_cursor += 1;

        Ok(DeltaPage {
            items,
            next_cursor: CursorToken::new(cursor)?,
            done: true,
        })
    }

    async fn download(
        &self,
        _account: &AccountId,
        item_id: &RemoteItemId,
        dest_path: &Path,
        token: &CancellationToken,
    ) -> anyhow::Result<()> {
        self.download_calls.fetch_add(1, Ordering::AcqRel);
        if token.is_cancelled() {
            anyhow::bail!("download aborted by cancellation");
        }
        let content = {
            let state = self.state.lock().unwrap();
            state
                .files
                .values()
                .find(|file| file.item.id == item_id.as_str())
                .map(|file| file.content.clone())
                .ok_or_else(|| anyhow::anyhow!("404 item not found: {item_id}"))?
        };
        std::fs::write(dest_path, content)?;
        Ok(())
    }

    async fn upload(
        &self,
        _account: &AccountId,
        src_path: &Path,
        remote_path: &PathKey,
        progress: Option<UploadProgressFn>,
        token: &CancellationToken,
    ) -> anyhow::Result<RemoteItem> {
        self.upload_calls.fetch_add(1, Ordering::AcqRel);
        if token.is_cancelled() {
            anyhow::bail!("upload aborted by cancellation");
        }
        if self.fail_uploads.load(Ordering::Acquire) {
            anyhow::bail!("503 service unavailable");
        }

        let content = std::fs::read(src_path)?;
        if let Some(progress) = progress {
            progress(content.len() as u64, content.len() as u64);
        }

        let mut state = self.state.lock().unwrap();
        let seq = state.next_id;
        state.next_id += 1;
        let item = RemoteItem {
            id: format!("F{seq}"),
            name: remote_path.file_name().unwrap_or_default().to_string(),
            path: Some(remote_path.as_str().to_string()),
            size: Some(content.len() as u64),
            last_modified_utc: Some(server_time(seq as i64)),
            ctag: Some(format!("c{seq}")),
            etag: Some(format!("e{seq}")),
            is_folder: false,
            is_deleted: false,
            drive_id: Some("drive1".to_string()),
        };
        state.files.insert(
            remote_path.folded().to_string(),
            MockFile {
                item: item.clone(),
                content,
            },
        );
        Ok(item)
    }

    async fn delete(
        &self,
        _account: &AccountId,
        item_id: &RemoteItemId,
        _token: &CancellationToken,
    ) -> anyhow::Result<()> {
        self.delete_calls.fetch_add(1, Ordering::AcqRel);
        let mut state = self.state.lock().unwrap();
        let key = state
            .files
            .iter()
            .find(|(_, file)| file.item.id == item_id.as_str())
            .map(|(key, _)| key.clone());
        match key {
            Some(key) => {
                state.files.remove(&key);
                Ok(())
            }
            None => anyhow::bail!("404 item not found: {item_id}"),
        }
    }
}

// ============================================================================
// Mock metadata store
// ============================================================================

type RecordKey = (String, String);

/// In-memory metadata store
pub struct MockStore {
    records: Mutex<HashMap<RecordKey, SyncRecord>>,
    selection: Mutex<HashMap<String, Vec<PathKey>>>,
    cursors: Mutex<HashMap<(String, String), DeltaCursor>>,
    conflicts: Mutex<Vec<ConflictRow>>,
    sessions: Mutex<HashMap<SessionId, SessionLog>>,
    pub batch_calls: AtomicU64,
    pub fail_batches: AtomicBool,
}

impl MockStore {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            selection: Mutex::new(HashMap::new()),
            cursors: Mutex::new(HashMap::new()),
            conflicts: Mutex::new(Vec::new()),
            sessions: Mutex::new(HashMap::new()),
            batch_calls: AtomicU64::new(0),
            fail_batches: AtomicBool::new(false),
        }
    }

    fn key(account: &HashedAccountId, path: &PathKey) -> RecordKey {
        (account.as_str().to_string(), path.folded().to_string())
    }

    pub fn seed_record(&self, record: SyncRecord) {
        let key = Self::key(&record.account, &record.path);
        self.records.lock().unwrap().insert(key, record);
    }

    pub fn seed_selection(&self, account: &HashedAccountId, folders: &[&str]) {
        self.selection.lock().unwrap().insert(
            account.as_str().to_string(),
            folders.iter().map(|f| PathKey::canonical(f)).collect(),
        );
    }

    pub fn seed_cursor(&self, cursor: DeltaCursor) {
        let key = (
            cursor.account.as_str().to_string(),
            cursor.drive_id.as_str().to_string(),
        );
        self.cursors.lock().unwrap().insert(key, cursor);
    }

    pub fn record(&self, account: &HashedAccountId, path: &str) -> Option<SyncRecord> {
        let key = Self::key(account, &PathKey::canonical(path));
        self.records.lock().unwrap().get(&key).cloned()
    }

    pub fn all_records(&self, account: &HashedAccountId) -> Vec<SyncRecord> {
        self.records
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.account == *account)
            .cloned()
            .collect()
    }

    pub fn cursor(&self, account: &HashedAccountId, drive: &str) -> Option<DeltaCursor> {
        self.cursors
            .lock()
            .unwrap()
            .get(&(account.as_str().to_string(), drive.to_string()))
            .cloned()
    }

    pub fn conflict_count(&self, account: &HashedAccountId) -> usize {
        self.conflicts
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.account == *account && !c.resolved)
            .count()
    }

    pub fn session_logs(&self) -> Vec<SessionLog> {
        self.sessions.lock().unwrap().values().cloned().collect()
    }
}

#[async_trait::async_trait]
impl MetadataStore for MockStore {
    async fn save_record(&self, record: &SyncRecord) -> anyhow::Result<()> {
        self.seed_record(record.clone());
        Ok(())
    }

    async fn save_batch(&self, records: &[SyncRecord]) -> anyhow::Result<()> {
        if self.fail_batches.load(Ordering::Acquire) {
            anyhow::bail!("database is locked");
        }
        self.batch_calls.fetch_add(1, Ordering::AcqRel);
        let mut map = self.records.lock().unwrap();
        for record in records {
            map.insert(Self::key(&record.account, &record.path), record.clone());
        }
        Ok(())
    }

    async fn get_record(
        &self,
        account: &HashedAccountId,
        path: &PathKey,
    ) -> anyhow::Result<Option<SyncRecord>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .get(&Self::key(account, path))
            .cloned())
    }

    async fn records_for_account(
        &self,
        account: &HashedAccountId,
    ) -> anyhow::Result<Vec<SyncRecord>> {
        Ok(self.all_records(account))
    }

    async fn delete_record(
        &self,
        account: &HashedAccountId,
        path: &PathKey,
    ) -> anyhow::Result<()> {
        self.records.lock().unwrap().remove(&Self::key(account, path));
        Ok(())
    }

    async fn selected_folders(&self, account: &HashedAccountId) -> anyhow::Result<Vec<PathKey>> {
        Ok(self
            .selection
            .lock()
            .unwrap()
            .get(account.as_str())
            .cloned()
            .unwrap_or_default())
    }

    async fn set_selected_folders(
        &self,
        account: &HashedAccountId,
        folders: &[PathKey],
    ) -> anyhow::Result<()> {
        self.selection
            .lock()
            .unwrap()
            .insert(account.as_str().to_string(), folders.to_vec());
        Ok(())
    }

    async fn delta_cursor(
        &self,
        account: &HashedAccountId,
        drive_id: &DriveId,
    ) -> anyhow::Result<Option<DeltaCursor>> {
        Ok(self
            .cursors
            .lock()
            .unwrap()
            .get(&(
                account.as_str().to_string(),
                drive_id.as_str().to_string(),
            ))
            .cloned())
    }

    async fn save_delta_cursor(&self, cursor: &DeltaCursor) -> anyhow::Result<()> {
        self.seed_cursor(cursor.clone());
        Ok(())
    }

    async fn clear_delta_cursor(
        &self,
        account: &HashedAccountId,
        drive_id: &DriveId,
    ) -> anyhow::Result<()> {
        self.cursors.lock().unwrap().remove(&(
            account.as_str().to_string(),
            drive_id.as_str().to_string(),
        ));
        Ok(())
    }

    async fn save_conflict(&self, row: &ConflictRow) -> anyhow::Result<()> {
        let mut conflicts = self.conflicts.lock().unwrap();
        conflicts.retain(|existing| {
            existing.resolved || existing.account != row.account || existing.path != row.path
        });
        conflicts.push(row.clone());
        Ok(())
    }

    async fn get_unresolved_conflicts(
        &self,
        account: &HashedAccountId,
    ) -> anyhow::Result<Vec<ConflictRow>> {
        Ok(self
            .conflicts
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.account == *account && !c.resolved)
            .cloned()
            .collect())
    }

    async fn save_session(&self, log: &SessionLog) -> anyhow::Result<()> {
        self.sessions.lock().unwrap().insert(log.id, log.clone());
        Ok(())
    }

    async fn get_session(&self, id: &SessionId) -> anyhow::Result<Option<SessionLog>> {
        Ok(self.sessions.lock().unwrap().get(id).cloned())
    }
}

// ============================================================================
// Mock auth provider
// ============================================================================

/// Auth provider that grants or refuses unconditionally
pub struct MockAuth {
    pub refuse: AtomicBool,
}

impl MockAuth {
    pub fn granting() -> Self {
        Self {
            refuse: AtomicBool::new(false),
        }
    }

    pub fn refusing() -> Self {
        Self {
            refuse: AtomicBool::new(true),
        }
    }
}

#[async_trait::async_trait]
impl AuthProvider for MockAuth {
    async fn credentials(&self, _account: &AccountId) -> anyhow::Result<BearerCredentials> {
        if self.refuse.load(Ordering::Acquire) {
            anyhow::bail!("401 unauthorized: consent revoked");
        }
        Ok(BearerCredentials {
            access_token: "bearer-test".to_string(),
            expires_at: Utc::now() + chrono::Duration::hours(1),
        })
    }
}
