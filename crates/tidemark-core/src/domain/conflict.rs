//! Conflict row value type
//!
//! A conflict is recorded when both sides of a path changed relative to the
//! baseline (or when a first sync finds two differing copies). The core only
//! detects and records; resolution is external user action that sets the
//! resolved flag.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::newtypes::{ConflictId, HashedAccountId};
use super::paths::PathKey;

/// How a recorded conflict is to be resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// No decision yet
    Pending,
    /// Keep the local copy; upload it over the remote version
    KeepLocal,
    /// Keep the remote copy; overwrite the local file
    KeepRemote,
    /// Keep both; the local copy is renamed aside
    KeepBoth,
}

impl Resolution {
    /// Stable string form used by stores
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::Pending => "pending",
            Resolution::KeepLocal => "keep_local",
            Resolution::KeepRemote => "keep_remote",
            Resolution::KeepBoth => "keep_both",
        }
    }

    /// Parse the stable string form
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Resolution::Pending),
            "keep_local" => Some(Resolution::KeepLocal),
            "keep_remote" => Some(Resolution::KeepRemote),
            "keep_both" => Some(Resolution::KeepBoth),
            _ => None,
        }
    }
}

/// Persisted record of one detected conflict
///
/// At most one unresolved row exists per `(account, path)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictRow {
    /// Row id
    pub id: ConflictId,
    /// Hashed account
    pub account: HashedAccountId,
    /// Conflicting path
    pub path: PathKey,
    /// Local modification time at detection
    pub local_mtime: DateTime<Utc>,
    /// Remote modification time at detection
    pub remote_mtime: DateTime<Utc>,
    /// Local size at detection
    pub local_size: u64,
    /// Remote size at detection
    pub remote_size: u64,
    /// When the conflict was detected
    pub detected_utc: DateTime<Utc>,
    /// Chosen resolution, if any
    pub resolution: Resolution,
    /// Whether the conflict has been resolved externally
    pub resolved: bool,
}

impl ConflictRow {
    /// Record a freshly detected, unresolved conflict
    #[must_use]
    pub fn detected(
        account: HashedAccountId,
        path: PathKey,
        local_mtime: DateTime<Utc>,
        remote_mtime: DateTime<Utc>,
        local_size: u64,
        remote_size: u64,
    ) -> Self {
        Self {
            id: ConflictId::new(),
            account,
            path,
            local_mtime,
            remote_mtime,
            local_size,
            remote_size,
            detected_utc: Utc::now(),
            resolution: Resolution::Pending,
            resolved: false,
        }
    }

    /// Copy with a resolution applied
    #[must_use]
    pub fn with_resolution(self, resolution: Resolution) -> Self {
        Self {
            resolution,
            resolved: true,
            ..self
        }
    }
}
