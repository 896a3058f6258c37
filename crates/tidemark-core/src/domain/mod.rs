//! Domain value types for the synchronization core
//!
//! Everything in this module is a plain value: construction validates,
//! mutation happens by building a new value (`with_*` helpers), and no
//! type here performs I/O.

pub mod conflict;
pub mod cursor;
pub mod errors;
pub mod newtypes;
pub mod paths;
pub mod progress;
pub mod records;
pub mod session;

pub use conflict::{ConflictRow, Resolution};
pub use cursor::DeltaCursor;
pub use errors::DomainError;
pub use newtypes::{
    AccountId, ConflictId, ContentHash, ContentTag, CursorToken, DriveId, EntityTag,
    HashedAccountId, RemoteItemId, SessionId,
};
pub use paths::PathKey;
pub use progress::{ProgressSnapshot, SyncState};
pub use records::{LocalRecord, RemoteRecord, SyncDirection, SyncRecord, SyncStatus};
pub use session::{SessionLog, SessionStatus};
