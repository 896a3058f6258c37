//! SQLite implementation of the metadata store port
//!
//! Handles all domain type serialization/deserialization and SQL query
//! construction.
//!
//! ## Type Mapping
//!
//! | Domain Type       | SQL Type | Strategy                              |
//! |-------------------|----------|---------------------------------------|
//! | HashedAccountId   | TEXT     | hex string via `as_str()` / `new()`   |
//! | PathKey           | TEXT ×2  | folded key column + preserved column  |
//! | RemoteItemId      | TEXT     | string via `as_str()` / `new()`       |
//! | ContentTag/EntityTag | TEXT  | string via `as_str()` / `new()`       |
//! | ContentHash       | TEXT     | hex string via `as_str()` / `new()`   |
//! | CursorToken       | TEXT     | string via `as_str()` / `new()`       |
//! | ConflictId/SessionId | TEXT  | UUID string via `to_string()` / `FromStr` |
//! | DateTime<Utc>     | TEXT     | ISO 8601 via `to_rfc3339()`           |
//! | SyncStatus et al. | TEXT     | stable string form via `as_str()` / `parse()` |

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use tidemark_core::domain::conflict::{ConflictRow, Resolution};
use tidemark_core::domain::cursor::DeltaCursor;
use tidemark_core::domain::newtypes::{
    ConflictId, ContentHash, ContentTag, CursorToken, DriveId, EntityTag, HashedAccountId,
    RemoteItemId, SessionId,
};
use tidemark_core::domain::paths::PathKey;
use tidemark_core::domain::records::{SyncDirection, SyncRecord, SyncStatus};
use tidemark_core::domain::session::{SessionLog, SessionStatus, SessionTotals};
use tidemark_core::ports::metadata_store::MetadataStore;

use crate::StoreError;

/// SQLite-based implementation of the metadata store port
///
/// All operations go through a connection pool; `save_batch` wraps its
/// writes in one transaction so a batch commits entirely or not at all.
pub struct SqliteMetadataStore {
    pool: SqlitePool,
}

impl SqliteMetadataStore {
    /// Creates a new store over the given connection pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

// ============================================================================
// Helper functions for type conversion
// ============================================================================

/// Serialize a SessionStatus to a string for storage
///
/// Simple states are stored as plain strings; the Failed variant is stored
/// as `failed:<message>`.
fn session_status_to_string(status: &SessionStatus) -> String {
    match status {
        SessionStatus::Running => "running".to_string(),
        SessionStatus::Completed => "completed".to_string(),
        SessionStatus::Paused => "paused".to_string(),
        SessionStatus::Failed(msg) => format!("failed:{}", msg),
    }
}

/// Deserialize a SessionStatus from its stored string representation
fn session_status_from_string(s: &str) -> Result<SessionStatus, StoreError> {
    match s {
        "running" => Ok(SessionStatus::Running),
        "completed" => Ok(SessionStatus::Completed),
        "paused" => Ok(SessionStatus::Paused),
        s if s.starts_with("failed:") => Ok(SessionStatus::Failed(s[7..].to_string())),
        other => Err(StoreError::Serialization(format!(
            "Unknown session status: {}",
            other
        ))),
    }
}

/// Parse a DateTime<Utc> from an ISO 8601 string
fn parse_datetime(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            StoreError::Serialization(format!("Failed to parse datetime '{}': {}", s, e))
        })
}

/// Parse an optional DateTime<Utc> from an optional string
fn parse_optional_datetime(s: Option<String>) -> Result<Option<DateTime<Utc>>, StoreError> {
    match s {
        Some(ref val) if !val.is_empty() => parse_datetime(val).map(Some),
        _ => Ok(None),
    }
}

// ============================================================================
// Row mapping functions
// ============================================================================

fn sync_record_from_row(row: &SqliteRow) -> Result<SyncRecord, StoreError> {
    let account: String = row.get("account_hash");
    let path: String = row.get("path");
    let remote_item_id: Option<String> = row.get("remote_item_id");
    let size_bytes: i64 = row.get("size_bytes");
    let mtime: String = row.get("mtime_utc");
    let ctag: Option<String> = row.get("ctag");
    let etag: Option<String> = row.get("etag");
    let local_hash: Option<String> = row.get("local_hash");
    let status: String = row.get("status");
    let last_direction: Option<String> = row.get("last_direction");
    let is_selected: i64 = row.get("is_selected");

    Ok(SyncRecord {
        account: HashedAccountId::new(account)
            .map_err(|e| StoreError::Serialization(e.to_string()))?,
        remote_item_id: remote_item_id
            .map(RemoteItemId::new)
            .transpose()
            .map_err(|e| StoreError::Serialization(e.to_string()))?,
        path: PathKey::canonical(&path),
        size_bytes: size_bytes as u64,
        mtime_utc: parse_datetime(&mtime)?,
        ctag: ctag
            .map(ContentTag::new)
            .transpose()
            .map_err(|e| StoreError::Serialization(e.to_string()))?,
        etag: etag
            .map(EntityTag::new)
            .transpose()
            .map_err(|e| StoreError::Serialization(e.to_string()))?,
        local_hash: local_hash
            .map(ContentHash::new)
            .transpose()
            .map_err(|e| StoreError::Serialization(e.to_string()))?,
        status: SyncStatus::parse(&status)
            .ok_or_else(|| StoreError::Serialization(format!("Unknown sync status: {status}")))?,
        last_direction: last_direction
            .map(|d| {
                SyncDirection::parse(&d).ok_or_else(|| {
                    StoreError::Serialization(format!("Unknown sync direction: {d}"))
                })
            })
            .transpose()?,
        is_selected: is_selected != 0,
    })
}

fn conflict_from_row(row: &SqliteRow) -> Result<ConflictRow, StoreError> {
    let id: String = row.get("id");
    let account: String = row.get("account_hash");
    let path: String = row.get("path");
    let local_mtime: String = row.get("local_mtime");
    let remote_mtime: String = row.get("remote_mtime");
    let local_size: i64 = row.get("local_size");
    let remote_size: i64 = row.get("remote_size");
    let detected: String = row.get("detected_utc");
    let resolution: String = row.get("resolution");
    let resolved: i64 = row.get("resolved");

    Ok(ConflictRow {
        id: id
            .parse::<ConflictId>()
            .map_err(|e| StoreError::Serialization(e.to_string()))?,
        account: HashedAccountId::new(account)
            .map_err(|e| StoreError::Serialization(e.to_string()))?,
        path: PathKey::canonical(&path),
        local_mtime: parse_datetime(&local_mtime)?,
        remote_mtime: parse_datetime(&remote_mtime)?,
        local_size: local_size as u64,
        remote_size: remote_size as u64,
        detected_utc: parse_datetime(&detected)?,
        resolution: Resolution::parse(&resolution).ok_or_else(|| {
            StoreError::Serialization(format!("Unknown resolution: {resolution}"))
        })?,
        resolved: resolved != 0,
    })
}

fn session_from_row(row: &SqliteRow) -> Result<SessionLog, StoreError> {
    let id: String = row.get("id");
    let account: String = row.get("account_hash");
    let started: String = row.get("started_utc");
    let completed: Option<String> = row.get("completed_utc");
    let status: String = row.get("status");
    let files_uploaded: i64 = row.get("files_uploaded");
    let files_downloaded: i64 = row.get("files_downloaded");
    let files_deleted: i64 = row.get("files_deleted");
    let conflicts_detected: i64 = row.get("conflicts_detected");
    let total_bytes: i64 = row.get("total_bytes");

    Ok(SessionLog {
        id: id
            .parse::<SessionId>()
            .map_err(|e| StoreError::Serialization(e.to_string()))?,
        account: HashedAccountId::new(account)
            .map_err(|e| StoreError::Serialization(e.to_string()))?,
        started_utc: parse_datetime(&started)?,
        completed_utc: parse_optional_datetime(completed)?,
        status: session_status_from_string(&status)?,
        totals: SessionTotals {
            files_uploaded: files_uploaded as u64,
            files_downloaded: files_downloaded as u64,
            files_deleted: files_deleted as u64,
            conflicts_detected: conflicts_detected as u64,
            total_bytes: total_bytes as u64,
        },
    })
}

fn cursor_from_row(row: &SqliteRow) -> Result<DeltaCursor, StoreError> {
    let account: String = row.get("account_hash");
    let drive_id: String = row.get("drive_id");
    let token: String = row.get("token");
    let advanced: String = row.get("last_advanced_utc");

    Ok(DeltaCursor {
        account: HashedAccountId::new(account)
            .map_err(|e| StoreError::Serialization(e.to_string()))?,
        drive_id: DriveId::new(drive_id).map_err(|e| StoreError::Serialization(e.to_string()))?,
        token: CursorToken::new(token).map_err(|e| StoreError::Serialization(e.to_string()))?,
        last_advanced_utc: parse_datetime(&advanced)?,
    })
}

// ============================================================================
// SQL statements
// ============================================================================

const UPSERT_RECORD: &str = "\
    INSERT OR REPLACE INTO sync_records \
    (account_hash, path_key, path, remote_item_id, size_bytes, mtime_utc, \
     ctag, etag, local_hash, status, last_direction, is_selected) \
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)";

fn bind_record<'q>(
    query: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    record: &'q SyncRecord,
) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    query
        .bind(record.account.as_str())
        .bind(record.path.folded())
        .bind(record.path.as_str())
        .bind(record.remote_item_id.as_ref().map(|id| id.as_str()))
        .bind(record.size_bytes as i64)
        .bind(record.mtime_utc.to_rfc3339())
        .bind(record.ctag.as_ref().map(|t| t.as_str()))
        .bind(record.etag.as_ref().map(|t| t.as_str()))
        .bind(record.local_hash.as_ref().map(|h| h.as_str()))
        .bind(record.status.as_str())
        .bind(record.last_direction.map(|d| d.as_str()))
        .bind(record.is_selected as i64)
}

// ============================================================================
// MetadataStore implementation
// ============================================================================

#[async_trait::async_trait]
impl MetadataStore for SqliteMetadataStore {
    async fn save_record(&self, record: &SyncRecord) -> anyhow::Result<()> {
        bind_record(sqlx::query(UPSERT_RECORD), record)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn save_batch(&self, records: &[SyncRecord]) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;
        for record in records {
            bind_record(sqlx::query(UPSERT_RECORD), record)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        tracing::debug!(records = records.len(), "sync record batch committed");
        Ok(())
    }

    async fn get_record(
        &self,
        account: &HashedAccountId,
        path: &PathKey,
    ) -> anyhow::Result<Option<SyncRecord>> {
        let row = sqlx::query(
            "SELECT * FROM sync_records WHERE account_hash = ? AND path_key = ?",
        )
        .bind(account.as_str())
        .bind(path.folded())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| sync_record_from_row(&r)).transpose().map_err(Into::into)
    }

    async fn records_for_account(
        &self,
        account: &HashedAccountId,
    ) -> anyhow::Result<Vec<SyncRecord>> {
        let rows = sqlx::query("SELECT * FROM sync_records WHERE account_hash = ?")
            .bind(account.as_str())
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(sync_record_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(Into::into)
    }

    async fn delete_record(
        &self,
        account: &HashedAccountId,
        path: &PathKey,
    ) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM sync_records WHERE account_hash = ? AND path_key = ?")
            .bind(account.as_str())
            .bind(path.folded())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn selected_folders(&self, account: &HashedAccountId) -> anyhow::Result<Vec<PathKey>> {
        let rows = sqlx::query(
            "SELECT path FROM selected_folders WHERE account_hash = ? ORDER BY path_key",
        )
        .bind(account.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| PathKey::canonical(&row.get::<String, _>("path")))
            .collect())
    }

    async fn set_selected_folders(
        &self,
        account: &HashedAccountId,
        folders: &[PathKey],
    ) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM selected_folders WHERE account_hash = ?")
            .bind(account.as_str())
            .execute(&mut *tx)
            .await?;
        for folder in folders {
            sqlx::query(
                "INSERT OR REPLACE INTO selected_folders (account_hash, path_key, path) \
                 VALUES (?, ?, ?)",
            )
            .bind(account.as_str())
            .bind(folder.folded())
            .bind(folder.as_str())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn delta_cursor(
        &self,
        account: &HashedAccountId,
        drive_id: &DriveId,
    ) -> anyhow::Result<Option<DeltaCursor>> {
        let row = sqlx::query(
            "SELECT * FROM delta_cursors WHERE account_hash = ? AND drive_id = ?",
        )
        .bind(account.as_str())
        .bind(drive_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| cursor_from_row(&r)).transpose().map_err(Into::into)
    }

    async fn save_delta_cursor(&self, cursor: &DeltaCursor) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO delta_cursors \
             (account_hash, drive_id, token, last_advanced_utc) VALUES (?, ?, ?, ?)",
        )
        .bind(cursor.account.as_str())
        .bind(cursor.drive_id.as_str())
        .bind(cursor.token.as_str())
        .bind(cursor.last_advanced_utc.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn clear_delta_cursor(
        &self,
        account: &HashedAccountId,
        drive_id: &DriveId,
    ) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM delta_cursors WHERE account_hash = ? AND drive_id = ?")
            .bind(account.as_str())
            .bind(drive_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn save_conflict(&self, row: &ConflictRow) -> anyhow::Result<()> {
        // OR REPLACE collapses onto the partial unique index: a second
        // unresolved conflict for the same path replaces the first.
        sqlx::query(
            "INSERT OR REPLACE INTO conflicts \
             (id, account_hash, path_key, path, local_mtime, remote_mtime, \
              local_size, remote_size, detected_utc, resolution, resolved) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(row.id.to_string())
        .bind(row.account.as_str())
        .bind(row.path.folded())
        .bind(row.path.as_str())
        .bind(row.local_mtime.to_rfc3339())
        .bind(row.remote_mtime.to_rfc3339())
        .bind(row.local_size as i64)
        .bind(row.remote_size as i64)
        .bind(row.detected_utc.to_rfc3339())
        .bind(row.resolution.as_str())
        .bind(row.resolved as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_unresolved_conflicts(
        &self,
        account: &HashedAccountId,
    ) -> anyhow::Result<Vec<ConflictRow>> {
        let rows = sqlx::query(
            "SELECT * FROM conflicts WHERE account_hash = ? AND resolved = 0 \
             ORDER BY detected_utc DESC",
        )
        .bind(account.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(conflict_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(Into::into)
    }

    async fn save_session(&self, log: &SessionLog) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO session_logs \
             (id, account_hash, started_utc, completed_utc, status, files_uploaded, \
              files_downloaded, files_deleted, conflicts_detected, total_bytes) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(log.id.to_string())
        .bind(log.account.as_str())
        .bind(log.started_utc.to_rfc3339())
        .bind(log.completed_utc.map(|t| t.to_rfc3339()))
        .bind(session_status_to_string(&log.status))
        .bind(log.totals.files_uploaded as i64)
        .bind(log.totals.files_downloaded as i64)
        .bind(log.totals.files_deleted as i64)
        .bind(log.totals.conflicts_detected as i64)
        .bind(log.totals.total_bytes as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_session(&self, id: &SessionId) -> anyhow::Result<Option<SessionLog>> {
        let row = sqlx::query("SELECT * FROM session_logs WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| session_from_row(&r)).transpose().map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_status_roundtrip() {
        for status in [
            SessionStatus::Running,
            SessionStatus::Completed,
            SessionStatus::Paused,
            SessionStatus::Failed("delta pull failed".to_string()),
        ] {
            let stored = session_status_to_string(&status);
            assert_eq!(session_status_from_string(&stored).unwrap(), status);
        }
    }

    #[test]
    fn test_session_status_unknown() {
        assert!(session_status_from_string("exploded").is_err());
    }

    #[test]
    fn test_parse_datetime_rfc3339() {
        let parsed = parse_datetime("2026-05-01T10:00:00+00:00").unwrap();
        assert_eq!(parsed.to_rfc3339(), "2026-05-01T10:00:00+00:00");
        assert!(parse_datetime("yesterday-ish").is_err());
    }

    #[test]
    fn test_parse_optional_datetime() {
        assert_eq!(parse_optional_datetime(None).unwrap(), None);
        assert_eq!(parse_optional_datetime(Some(String::new())).unwrap(), None);
        assert!(parse_optional_datetime(Some("2026-05-01T10:00:00Z".into()))
            .unwrap()
            .is_some());
    }
}
