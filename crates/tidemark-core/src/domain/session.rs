//! Session log value type
//!
//! One [`SessionLog`] row tracks one invocation of `start_sync` from
//! initialization through its terminal state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::newtypes::{HashedAccountId, SessionId};

/// Terminal and in-flight states of a sync session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Session is currently running
    Running,
    /// Session completed successfully
    Completed,
    /// Session was cancelled; partial work is reclassified next session
    Paused,
    /// Session failed with an error message
    Failed(String),
}

impl SessionStatus {
    /// Returns true if the session is still in progress
    #[must_use]
    pub fn is_running(&self) -> bool {
        matches!(self, SessionStatus::Running)
    }

    /// Returns true if the session has finished (successfully or not)
    #[must_use]
    pub fn is_finished(&self) -> bool {
        !self.is_running()
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Running => write!(f, "running"),
            SessionStatus::Completed => write!(f, "completed"),
            SessionStatus::Paused => write!(f, "paused"),
            SessionStatus::Failed(msg) => write!(f, "failed: {}", msg),
        }
    }
}

/// Counters accumulated over one session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionTotals {
    /// Files uploaded to the remote service
    pub files_uploaded: u64,
    /// Files downloaded from the remote service
    pub files_downloaded: u64,
    /// Files deleted on either side
    pub files_deleted: u64,
    /// Conflicts recorded during reconciliation
    pub conflicts_detected: u64,
    /// Bytes moved in either direction
    pub total_bytes: u64,
}

/// Persisted record of one sync session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionLog {
    /// Row id
    pub id: SessionId,
    /// Hashed account
    pub account: HashedAccountId,
    /// When the session started
    pub started_utc: DateTime<Utc>,
    /// When the session reached a terminal state (None while running)
    pub completed_utc: Option<DateTime<Utc>>,
    /// Current status
    pub status: SessionStatus,
    /// Accumulated counters
    pub totals: SessionTotals,
}

impl SessionLog {
    /// Open a new running session row
    #[must_use]
    pub fn open(account: HashedAccountId) -> Self {
        Self {
            id: SessionId::new(),
            account,
            started_utc: Utc::now(),
            completed_utc: None,
            status: SessionStatus::Running,
            totals: SessionTotals::default(),
        }
    }

    /// Copy marked completed with final totals
    #[must_use]
    pub fn completed(self, totals: SessionTotals) -> Self {
        Self {
            completed_utc: Some(Utc::now()),
            status: SessionStatus::Completed,
            totals,
            ..self
        }
    }

    /// Copy marked paused (cancelled)
    #[must_use]
    pub fn paused(self, totals: SessionTotals) -> Self {
        Self {
            completed_utc: Some(Utc::now()),
            status: SessionStatus::Paused,
            totals,
            ..self
        }
    }

    /// Copy marked failed with a reason
    #[must_use]
    pub fn failed(self, reason: impl Into<String>) -> Self {
        Self {
            completed_utc: Some(Utc::now()),
            status: SessionStatus::Failed(reason.into()),
            ..self
        }
    }
}
