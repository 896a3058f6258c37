//! Delta cursor value type

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::newtypes::{CursorToken, DriveId, HashedAccountId};

/// Persisted resumption point for the remote delta stream
///
/// Either absent (first sync) or pointing at a valid server-side resumption
/// point. Replaced atomically at the end of every successful delta round and
/// never mutated mid-round: a cursor is persisted only after every record
/// derived from its round has been committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaCursor {
    /// Hashed account the cursor belongs to
    pub account: HashedAccountId,
    /// Drive the cursor tracks
    pub drive_id: DriveId,
    /// Opaque server token
    pub token: CursorToken,
    /// When the cursor was last advanced
    pub last_advanced_utc: DateTime<Utc>,
}

impl DeltaCursor {
    /// Build a cursor advanced to `token` as of now
    #[must_use]
    pub fn advanced(account: HashedAccountId, drive_id: DriveId, token: CursorToken) -> Self {
        Self {
            account,
            drive_id,
            token,
            last_advanced_utc: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::newtypes::AccountId;

    #[test]
    fn test_advanced_stamps_time() {
        let before = Utc::now();
        let cursor = DeltaCursor::advanced(
            AccountId::new("a").unwrap().hashed("s"),
            DriveId::new("drive1").unwrap(),
            CursorToken::new("tok").unwrap(),
        );
        assert!(cursor.last_advanced_utc >= before);
        assert_eq!(cursor.token.as_str(), "tok");
    }
}
