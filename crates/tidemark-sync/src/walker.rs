//! Full remote tree walk
//!
//! Fallback discovery path for when no delta cursor is available (first
//! sync) or the server invalidated one. Traverses a selected folder
//! depth-first through `children` listings and emits a [`RemoteRecord`]
//! per live file; folder traversal is internal bookkeeping only.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use tidemark_core::domain::newtypes::{AccountId, RemoteItemId};
use tidemark_core::domain::paths::PathKey;
use tidemark_core::domain::records::RemoteRecord;
use tidemark_core::ports::remote_drive::RemoteDriveClient;

use crate::delta::map_remote_item;
use crate::error::{EngineError, RemoteError};
use crate::retry::call_remote;

/// Depth-first walker over the remote folder tree
pub struct RemoteWalker {
    client: Arc<dyn RemoteDriveClient>,
}

impl RemoteWalker {
    /// Create a walker over the given remote drive client
    #[must_use]
    pub fn new(client: Arc<dyn RemoteDriveClient>) -> Self {
        Self { client }
    }

    /// Walk `folder` and return a record per live file beneath it
    ///
    /// `max_files` caps the number of files collected, bounding
    /// initial-scan latency on very large folders; the truncation is
    /// logged.
    ///
    /// # Errors
    /// [`EngineError::RootNotFound`] when `folder` cannot be resolved from
    /// the drive root.
    pub async fn walk(
        &self,
        account: &AccountId,
        folder: &PathKey,
        max_files: Option<u64>,
        token: &CancellationToken,
    ) -> Result<Vec<RemoteRecord>, EngineError> {
        let folder_id = self.resolve_folder(account, folder).await?;

        let mut records = Vec::new();
        let mut pending: Vec<(RemoteItemId, PathKey)> = vec![(folder_id, folder.clone())];

        while let Some((parent_id, parent_path)) = pending.pop() {
            if token.is_cancelled() {
                return Err(EngineError::Cancelled);
            }

            let children = call_remote("remote_children", || {
                let id = parent_id.clone();
                async move { self.client.children(account, &id).await }
            })
            .await?;

            for child in children {
                if token.is_cancelled() {
                    return Err(EngineError::Cancelled);
                }
                if child.is_deleted {
                    continue;
                }

                let child_path = parent_path.join(&child.name);

                if child.is_folder {
                    match RemoteItemId::new(child.id.clone()) {
                        Ok(id) => pending.push((id, child_path)),
                        Err(err) => {
                            warn!(path = %child_path, error = %err, "skipping folder with invalid id");
                        }
                    }
                    continue;
                }

                if let Some(record) = map_remote_item(&child, Some(child_path)) {
                    records.push(record);
                }

                if let Some(cap) = max_files {
                    if records.len() as u64 >= cap {
                        warn!(
                            folder = %folder,
                            cap,
                            "file-count cap reached, truncating remote walk"
                        );
                        return Ok(records);
                    }
                }
            }
        }

        debug!(folder = %folder, files = records.len(), "remote walk complete");
        Ok(records)
    }

    /// Resolve a folder path to its item id by walking name segments from
    /// the drive root (case-insensitive)
    async fn resolve_folder(
        &self,
        account: &AccountId,
        folder: &PathKey,
    ) -> Result<RemoteItemId, EngineError> {
        let root = call_remote("remote_root", || async {
            self.client.root(account).await
        })
        .await
        .map_err(|fault| match fault {
            RemoteError::NotFound(_) => EngineError::RootNotFound(folder.as_str().to_string()),
            fault => EngineError::Remote(fault),
        })?;

        let mut current = RemoteItemId::new(root.id.clone())
            .map_err(|err| EngineError::Other(anyhow::anyhow!("invalid root item id: {err}")))?;

        for segment in folder.as_str().split('/').filter(|s| !s.is_empty()) {
            let children = call_remote("remote_children", || {
                let id = current.clone();
                async move { self.client.children(account, &id).await }
            })
            .await?;

            let needle = segment.to_lowercase();
            let next = children.into_iter().find(|child| {
                child.is_folder && !child.is_deleted && child.name.to_lowercase() == needle
            });

            match next {
                Some(child) => {
                    current = RemoteItemId::new(child.id).map_err(|err| {
                        EngineError::Other(anyhow::anyhow!("invalid folder item id: {err}"))
                    })?;
                }
                None => {
                    return Err(EngineError::RootNotFound(folder.as_str().to_string()));
                }
            }
        }

        Ok(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::Mutex;

    use chrono::Utc;
    use tidemark_core::domain::newtypes::CursorToken;
    use tidemark_core::domain::paths::PathKey;
    use tidemark_core::ports::remote_drive::{DeltaPage, RemoteItem, UploadProgressFn};

    fn item(id: &str, name: &str, is_folder: bool) -> RemoteItem {
        RemoteItem {
            id: id.to_string(),
            name: name.to_string(),
            path: None,
            size: if is_folder { None } else { Some(10) },
            last_modified_utc: Some(Utc::now()),
            ctag: if is_folder { None } else { Some("c1".into()) },
            etag: Some("e1".into()),
            is_folder,
            is_deleted: false,
            drive_id: Some("drive1".into()),
        }
    }

    /// Scripted children tree keyed by parent item id
    struct TreeClient {
        children: Mutex<HashMap<String, Vec<RemoteItem>>>,
    }

    impl TreeClient {
        fn new(children: HashMap<String, Vec<RemoteItem>>) -> Self {
            Self {
                children: Mutex::new(children),
            }
        }
    }

    #[async_trait::async_trait]
    impl RemoteDriveClient for TreeClient {
        async fn root(&self, _account: &AccountId) -> anyhow::Result<RemoteItem> {
            Ok(item("ROOT", "root", true))
        }

        async fn children(
            &self,
            _account: &AccountId,
            parent_id: &RemoteItemId,
        ) -> anyhow::Result<Vec<RemoteItem>> {
            Ok(self
                .children
                .lock()
                .unwrap()
                .get(parent_id.as_str())
                .cloned()
                .unwrap_or_default())
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
            anyhow::bail!("not scripted")
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

    fn docs_tree() -> HashMap<String, Vec<RemoteItem>> {
        let mut tree = HashMap::new();
        tree.insert("ROOT".to_string(), vec![item("DOCS", "Docs", true)]);
        tree.insert(
            "DOCS".to_string(),
            vec![
                item("F1", "a.txt", false),
                item("SUB", "Sub", true),
                item("F2", "b.txt", false),
            ],
        );
        tree.insert("SUB".to_string(), vec![item("F3", "c.txt", false)]);
        tree
    }

    #[tokio::test]
    async fn test_walk_emits_files_only_with_folder_paths() {
        let walker = RemoteWalker::new(Arc::new(TreeClient::new(docs_tree())));
        let mut records = walker
            .walk(
                &account(),
                &PathKey::canonical("/Docs"),
                None,
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        records.sort_by(|a, b| a.path.cmp(&b.path));

        let paths: Vec<_> = records.iter().map(|r| r.path.as_str()).collect();
        assert_eq!(paths, vec!["/Docs/a.txt", "/Docs/b.txt", "/Docs/Sub/c.txt"]);
        assert!(records.iter().all(|r| !r.is_folder));
    }

    #[tokio::test]
    async fn test_walk_resolves_folder_case_insensitively() {
        let walker = RemoteWalker::new(Arc::new(TreeClient::new(docs_tree())));
        let records = walker
            .walk(
                &account(),
                &PathKey::canonical("/docs"),
                None,
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(records.len(), 3);
    }

    #[tokio::test]
    async fn test_walk_missing_root_fails_not_found() {
        let walker = RemoteWalker::new(Arc::new(TreeClient::new(docs_tree())));
        let result = walker
            .walk(
                &account(),
                &PathKey::canonical("/Missing"),
                None,
                &CancellationToken::new(),
            )
            .await;
        assert!(matches!(result, Err(EngineError::RootNotFound(p)) if p == "/Missing"));
    }

    #[tokio::test]
    async fn test_walk_enforces_file_cap() {
        let walker = RemoteWalker::new(Arc::new(TreeClient::new(docs_tree())));
        let records = walker
            .walk(
                &account(),
                &PathKey::canonical("/Docs"),
                Some(2),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(records.len(), 2);
    }

    #[tokio::test]
    async fn test_walk_honors_cancellation() {
        let walker = RemoteWalker::new(Arc::new(TreeClient::new(docs_tree())));
        let token = CancellationToken::new();
        token.cancel();
        let result = walker
            .walk(&account(), &PathKey::canonical("/Docs"), None, &token)
            .await;
        assert!(matches!(result, Err(EngineError::Cancelled)));
    }
}
