//! Delta pagination processor
//!
//! Discovers remote mutations without re-scanning the whole drive by
//! draining the service's incremental-change pages until the server hands
//! back a terminal cursor. When no cursor exists (first sync) or the
//! server declares the stored one expired, discovery falls back to a full
//! enumeration: a fresh delta round from the beginning plus a
//! [`RemoteWalker`] pass over each selected folder, deduplicated by path
//! with the first occurrence winning.
//!
//! The terminal cursor returned here is only a candidate: the reconciler
//! persists it after - and only after - every record derived from the
//! round has been committed.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tidemark_core::domain::newtypes::{AccountId, ContentTag, CursorToken, EntityTag, RemoteItemId};
use tidemark_core::domain::paths::PathKey;
use tidemark_core::domain::records::RemoteRecord;
use tidemark_core::ports::remote_drive::{RemoteDriveClient, RemoteItem};

use crate::error::{EngineError, RemoteError};
use crate::retry::call_remote;
use crate::walker::RemoteWalker;

/// Explicit deletion reported by the delta stream
///
/// Tombstones sometimes arrive without a path; the reconciler resolves
/// those against the baseline by item id.
#[derive(Debug, Clone)]
pub struct DeltaDeletion {
    /// Id of the deleted item
    pub item_id: RemoteItemId,
    /// Path of the deleted item, when the service still reported one
    pub path: Option<PathKey>,
}

/// Result of one remote-discovery round
#[derive(Debug)]
pub struct RemoteChanges {
    /// Live items (files and folders), deduplicated by path
    pub upserts: Vec<RemoteRecord>,
    /// Explicit tombstones from the delta stream
    pub deletions: Vec<DeltaDeletion>,
    /// Terminal cursor candidate, to persist after downstream commit
    pub final_cursor: Option<CursorToken>,
    /// True when the round enumerated full remote state (walker or initial
    /// delta), so an absent path means the item does not exist remotely.
    /// False for incremental rounds, where absence means "unchanged".
    pub full_coverage: bool,
    /// Whether the stored cursor was invalidated and must be cleared
    pub resync_performed: bool,
    /// Delta pages drained
    pub pages_processed: u32,
    /// Delta items seen across all pages
    pub items_processed: u64,
}

/// Outcome of draining delta pages once
enum PagePull {
    Done {
        upserts: Vec<RemoteRecord>,
        deletions: Vec<DeltaDeletion>,
        final_cursor: CursorToken,
        pages: u32,
        items: u64,
    },
    ResyncRequired,
}

/// Pages through the remote delta stream, with full-walk fallback
pub struct DeltaProcessor {
    client: Arc<dyn RemoteDriveClient>,
    walker: RemoteWalker,
}

impl DeltaProcessor {
    /// Create a processor over the given remote drive client
    #[must_use]
    pub fn new(client: Arc<dyn RemoteDriveClient>) -> Self {
        let walker = RemoteWalker::new(client.clone());
        Self { client, walker }
    }

    /// Discover remote changes for one sync round
    ///
    /// With a cursor: drains incremental pages. Without one, or when the
    /// server signals that the cursor expired: performs a fresh delta
    /// enumeration plus a walker pass over `selection`, merged keep-first.
    /// `on_page` fires after every drained page with the running page and
    /// item counts.
    pub async fn collect_changes(
        &self,
        account: &AccountId,
        cursor: Option<CursorToken>,
        selection: &[PathKey],
        max_files: Option<u64>,
        on_page: &mut (dyn FnMut(u32, u64) + Send),
        token: &CancellationToken,
    ) -> Result<RemoteChanges, EngineError> {
        let mut resync_performed = false;

        if let Some(cursor) = cursor {
            match self.pull_pages(account, Some(&cursor), on_page, token).await? {
                PagePull::Done {
                    upserts,
                    deletions,
                    final_cursor,
                    pages,
                    items,
                } => {
                    return Ok(RemoteChanges {
                        upserts,
                        deletions,
                        final_cursor: Some(final_cursor),
                        full_coverage: false,
                        resync_performed: false,
                        pages_processed: pages,
                        items_processed: items,
                    });
                }
                PagePull::ResyncRequired => {
                    info!("delta cursor expired, falling back to full enumeration");
                    resync_performed = true;
                }
            }
        }

        self.full_enumeration(account, selection, max_files, resync_performed, on_page, token)
            .await
    }

    /// Full enumeration: delta-from-scratch plus walker over the
    /// selection, deduplicated by path keeping the first occurrence
    async fn full_enumeration(
        &self,
        account: &AccountId,
        selection: &[PathKey],
        max_files: Option<u64>,
        resync_performed: bool,
        on_page: &mut (dyn FnMut(u32, u64) + Send),
        token: &CancellationToken,
    ) -> Result<RemoteChanges, EngineError> {
        let mut by_path: HashMap<PathKey, RemoteRecord> = HashMap::new();
        let mut deletions = Vec::new();
        let mut final_cursor = None;
        let mut pages = 0;
        let mut items = 0;

        match self.pull_pages(account, None, on_page, token).await {
            Ok(PagePull::Done {
                upserts,
                deletions: initial_deletions,
                final_cursor: cursor,
                pages: p,
                items: i,
            }) => {
                for record in upserts {
                    by_path.entry(record.path.clone()).or_insert(record);
                }
                deletions = initial_deletions;
                final_cursor = Some(cursor);
                pages = p;
                items = i;
            }
            Ok(PagePull::ResyncRequired) => {
                // From-scratch enumeration cannot itself require a resync;
                // treat it like an unavailable delta endpoint.
                warn!("initial delta enumeration signalled resync, relying on walker only");
            }
            Err(EngineError::Cancelled) => return Err(EngineError::Cancelled),
            Err(err) => {
                warn!(
                    error = %err,
                    "initial delta enumeration failed, relying on walker only"
                );
            }
        }

        for folder in selection {
            if token.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            let walked = self.walker.walk(account, folder, max_files, token).await?;
            for record in walked {
                by_path.entry(record.path.clone()).or_insert(record);
            }
        }

        debug!(
            upserts = by_path.len(),
            deletions = deletions.len(),
            has_cursor = final_cursor.is_some(),
            "full remote enumeration complete"
        );

        Ok(RemoteChanges {
            upserts: by_path.into_values().collect(),
            deletions,
            final_cursor,
            full_coverage: true,
            resync_performed,
            pages_processed: pages,
            items_processed: items,
        })
    }

    /// Drain delta pages until the server returns the terminal cursor
    async fn pull_pages(
        &self,
        account: &AccountId,
        cursor: Option<&CursorToken>,
        on_page: &mut (dyn FnMut(u32, u64) + Send),
        token: &CancellationToken,
    ) -> Result<PagePull, EngineError> {
        let mut upserts: Vec<RemoteRecord> = Vec::new();
        let mut deletions: Vec<DeltaDeletion> = Vec::new();
        let mut seen_deleted: HashSet<String> = HashSet::new();
        let mut pages: u32 = 0;
        let mut items: u64 = 0;
        let mut next = cursor.cloned();

        loop {
            if token.is_cancelled() {
                return Err(EngineError::Cancelled);
            }

            let page = match call_remote("delta_page", || {
                let cursor_ref = next.clone();
                async move { self.client.delta(account, cursor_ref.as_ref()).await }
            })
            .await
            {
                Ok(page) => page,
                Err(RemoteError::CursorExpired(_)) => return Ok(PagePull::ResyncRequired),
                Err(fault) => return Err(EngineError::Remote(fault)),
            };

            pages += 1;
            items += page.items.len() as u64;

            for item in &page.items {
                if item.is_deleted {
                    let Ok(item_id) = RemoteItemId::new(item.id.clone()) else {
                        warn!(id = %item.id, "skipping tombstone with invalid item id");
                        continue;
                    };
                    if seen_deleted.insert(item.id.clone()) {
                        deletions.push(DeltaDeletion {
                            item_id,
                            path: item.path.as_deref().map(PathKey::canonical),
                        });
                    }
                } else if let Some(record) = map_remote_item(item, None) {
                    upserts.push(record);
                }
            }

            on_page(pages, items);

            if page.done {
                debug!(pages, items, "delta stream drained");
                return Ok(PagePull::Done {
                    upserts,
                    deletions,
                    final_cursor: page.next_cursor,
                    pages,
                    items,
                });
            }
            next = Some(page.next_cursor);
        }
    }
}

/// Map a port-level item to a [`RemoteRecord`]
///
/// `resolved_path` wins over the item's own path; items with neither are
/// dropped with a warning, as are items whose id fails validation.
pub(crate) fn map_remote_item(
    item: &RemoteItem,
    resolved_path: Option<PathKey>,
) -> Option<RemoteRecord> {
    let path = match resolved_path.or_else(|| item.path.as_deref().map(PathKey::canonical)) {
        Some(path) => path,
        None => {
            warn!(id = %item.id, name = %item.name, "skipping remote item without a path");
            return None;
        }
    };

    let remote_item_id = match RemoteItemId::new(item.id.clone()) {
        Ok(id) => id,
        Err(err) => {
            warn!(path = %path, error = %err, "skipping remote item with invalid id");
            return None;
        }
    };

    Some(RemoteRecord {
        remote_item_id,
        path,
        size_bytes: item.size.unwrap_or(0),
        mtime_utc: item.last_modified_utc.unwrap_or_else(Utc::now),
        ctag: item.ctag.clone().and_then(|t| ContentTag::new(t).ok()),
        etag: item.etag.clone().and_then(|t| EntityTag::new(t).ok()),
        is_folder: item.is_folder,
        is_deleted: item.is_deleted,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::Mutex;

    use tidemark_core::ports::remote_drive::{DeltaPage, UploadProgressFn};

    fn file_item(id: &str, path: &str, size: u64, ctag: &str) -> RemoteItem {
        RemoteItem {
            id: id.to_string(),
            name: path.rsplit('/').next().unwrap_or_default().to_string(),
            path: Some(path.to_string()),
            size: Some(size),
            last_modified_utc: Some(Utc::now()),
            ctag: Some(ctag.to_string()),
            etag: Some("e1".to_string()),
            is_folder: false,
            is_deleted: false,
            drive_id: Some("drive1".to_string()),
        }
    }

    fn tombstone(id: &str, path: Option<&str>) -> RemoteItem {
        RemoteItem {
            id: id.to_string(),
            name: String::new(),
            path: path.map(str::to_string),
            size: None,
            last_modified_utc: None,
            ctag: None,
            etag: None,
            is_folder: false,
            is_deleted: true,
            drive_id: Some("drive1".to_string()),
        }
    }

    fn page(items: Vec<RemoteItem>, cursor: &str, done: bool) -> DeltaPage {
        DeltaPage {
            items,
            next_cursor: CursorToken::new(cursor).unwrap(),
            done,
        }
    }

    /// Client that serves a scripted sequence of delta pages (or errors)
    struct PagedClient {
        pages: Mutex<Vec<anyhow::Result<DeltaPage>>>,
    }

    impl PagedClient {
        fn new(pages: Vec<anyhow::Result<DeltaPage>>) -> Self {
            Self {
                pages: Mutex::new(pages),
            }
        }
    }

    #[async_trait::async_trait]
    impl RemoteDriveClient for PagedClient {
        async fn root(&self, _account: &AccountId) -> anyhow::Result<RemoteItem> {
            let mut root = file_item("ROOT", "/", 0, "c0");
            root.is_folder = true;
            Ok(root)
        }

        async fn children(
            &self,
            _account: &AccountId,
            parent_id: &RemoteItemId,
        ) -> anyhow::Result<Vec<RemoteItem>> {
            // A single selected folder exists remotely, with no files.
            if parent_id.as_str() == "ROOT" {
                let mut docs = file_item("DOCS", "/Docs", 0, "c0");
                docs.name = "Docs".to_string();
                docs.is_folder = true;
                docs.ctag = None;
                return Ok(vec![docs]);
            }
            Ok(Vec::new())
        }

        async fn item(
            &self,
            _account: &AccountId,
            _id: &RemoteItemId,
        ) -> anyhow::Result<RemoteItem> {
            anyhow::bail!("not scripted")
        }

        async fn delta(
            &self,
            _account: &AccountId,
            _cursor: Option<&CursorToken>,
        ) -> anyhow::Result<DeltaPage> {
            let mut pages = self.pages.lock().unwrap();
            if pages.is_empty() {
                anyhow::bail!("delta script exhausted");
            }
            pages.remove(0)
        }

        async fn download(
            &self,
            _account: &AccountId,
            _item_id: &RemoteItemId,
            _dest_path: &Path,
            _token: &CancellationToken,
        ) -> anyhow::Result<()> {
            anyhow::bail!("not scripted")
        }

        async fn upload(
            &self,
            _account: &AccountId,
            _src_path: &Path,
            _remote_path: &PathKey,
            _progress: Option<UploadProgressFn>,
            _token: &CancellationToken,
        ) -> anyhow::Result<RemoteItem> {
            anyhow::bail!("not scripted")
        }

        async fn delete(
            &self,
            _account: &AccountId,
            _item_id: &RemoteItemId,
            _token: &CancellationToken,
        ) -> anyhow::Result<()> {
            anyhow::bail!("not scripted")
        }
    }

    fn account() -> AccountId {
        AccountId::new("acct").unwrap()
    }

    #[tokio::test]
    async fn test_drains_pages_until_terminal_cursor() {
        let client = Arc::new(PagedClient::new(vec![
            Ok(page(
                vec![file_item("F1", "/Docs/a.txt", 5, "c1")],
                "mid",
                false,
            )),
            Ok(page(
                vec![file_item("F2", "/Docs/b.txt", 7, "c2")],
                "final",
                true,
            )),
        ]));
        let processor = DeltaProcessor::new(client);

        let mut page_calls = Vec::new();
        let changes = processor
            .collect_changes(
                &account(),
                Some(CursorToken::new("start").unwrap()),
                &[],
                None,
                &mut |pages, items| page_calls.push((pages, items)),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(changes.pages_processed, 2);
        assert_eq!(changes.items_processed, 2);
        assert_eq!(changes.upserts.len(), 2);
        assert_eq!(changes.final_cursor.unwrap().as_str(), "final");
        assert!(!changes.full_coverage);
        assert!(!changes.resync_performed);
        assert_eq!(page_calls, vec![(1, 1), (2, 2)]);
    }

    #[tokio::test]
    async fn test_tombstones_split_from_upserts() {
        let client = Arc::new(PagedClient::new(vec![Ok(page(
            vec![
                file_item("F1", "/Docs/a.txt", 5, "c1"),
                tombstone("F9", Some("/Docs/old.txt")),
                tombstone("F8", None),
            ],
            "final",
            true,
        ))]));
        let processor = DeltaProcessor::new(client);

        let changes = processor
            .collect_changes(
                &account(),
                Some(CursorToken::new("start").unwrap()),
                &[],
                None,
                &mut |_, _| {},
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(changes.upserts.len(), 1);
        assert_eq!(changes.deletions.len(), 2);
        let with_path = changes
            .deletions
            .iter()
            .find(|d| d.item_id.as_str() == "F9")
            .unwrap();
        assert_eq!(with_path.path.as_ref().unwrap().as_str(), "/Docs/old.txt");
        let without_path = changes
            .deletions
            .iter()
            .find(|d| d.item_id.as_str() == "F8")
            .unwrap();
        assert!(without_path.path.is_none());
    }

    #[tokio::test]
    async fn test_expired_cursor_falls_back_to_full_enumeration() {
        // First call (with cursor) reports 410 Gone; the retried
        // from-scratch enumeration succeeds.
        let client = Arc::new(PagedClient::new(vec![
            Err(anyhow::anyhow!("delta cursor expired (410 Gone)")),
            Ok(page(
                vec![file_item("F1", "/Docs/a.txt", 5, "c1")],
                "fresh",
                true,
            )),
        ]));
        let processor = DeltaProcessor::new(client);

        let changes = processor
            .collect_changes(
                &account(),
                Some(CursorToken::new("stale").unwrap()),
                &[PathKey::canonical("/Docs")],
                None,
                &mut |_, _| {},
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(changes.resync_performed);
        assert!(changes.full_coverage);
        assert_eq!(changes.upserts.len(), 1);
        assert_eq!(changes.final_cursor.unwrap().as_str(), "fresh");
    }

    #[tokio::test]
    async fn test_no_cursor_enumerates_and_dedupes_keep_first() {
        // Delta-from-scratch reports the file with cTag c-delta; the
        // walker pass would report nothing extra (empty children). The
        // delta occurrence must win.
        let client = Arc::new(PagedClient::new(vec![Ok(page(
            vec![file_item("F1", "/Docs/a.txt", 5, "c-delta")],
            "fresh",
            true,
        ))]));
        let processor = DeltaProcessor::new(client);

        let changes = processor
            .collect_changes(
                &account(),
                None,
                &[PathKey::canonical("/Docs")],
                None,
                &mut |_, _| {},
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(changes.full_coverage);
        assert!(!changes.resync_performed);
        assert_eq!(changes.upserts.len(), 1);
        assert_eq!(
            changes.upserts[0].ctag.as_ref().unwrap().as_str(),
            "c-delta"
        );
    }

    #[tokio::test]
    async fn test_cancellation_propagates() {
        let client = Arc::new(PagedClient::new(vec![]));
        let processor = DeltaProcessor::new(client);
        let token = CancellationToken::new();
        token.cancel();

        let result = processor
            .collect_changes(
                &account(),
                Some(CursorToken::new("start").unwrap()),
                &[],
                None,
                &mut |_, _| {},
                &token,
            )
            .await;
        assert!(matches!(result, Err(EngineError::Cancelled)));
    }

    #[test]
    fn test_map_remote_item_requires_path() {
        let mut item = file_item("F1", "/Docs/a.txt", 5, "c1");
        item.path = None;
        assert!(map_remote_item(&item, None).is_none());
        assert!(map_remote_item(&item, Some(PathKey::canonical("/Docs/a.txt"))).is_some());
    }

    #[test]
    fn test_map_remote_item_strips_service_prefix() {
        let item = file_item("F1", "/drive/root:/Docs/a.txt", 5, "c1");
        let record = map_remote_item(&item, None).unwrap();
        assert_eq!(record.path.as_str(), "/Docs/a.txt");
    }
}
