//! Engine error types
//!
//! Two layers. [`RemoteError`] classifies the failure of one remote drive
//! call: port errors arrive as adapter-specific `anyhow` chains carrying
//! the service's status wording, and [`RemoteError::classify`] inspects
//! that wording exactly once - everything downstream (the retry loop, the
//! cursor fallback, deletion convergence) matches on the variant instead
//! of re-reading error text.
//!
//! [`EngineError`] is the session level. Per-file transfer errors are
//! recovered inside the pools (the record is marked failed and the pool
//! continues); only failures that end the session reach this enum, and
//! the session coordinator maps each variant to a terminal progress
//! state.

use thiserror::Error;

/// Session-level failures of one sync round
#[derive(Debug, Error)]
pub enum EngineError {
    /// The auth provider refused to yield credentials. Never retried
    /// within the session.
    #[error("account is not authenticated")]
    Auth(#[source] anyhow::Error),

    /// A selection root could not be resolved on the remote side
    #[error("remote folder not found: {0}")]
    RootNotFound(String),

    /// The metadata store failed; the in-flight batch is retried next
    /// session from its pre-batch state
    #[error("metadata store failure")]
    Store(#[source] anyhow::Error),

    /// The session was cancelled; surfaces as `Paused`
    #[error("session cancelled")]
    Cancelled,

    /// A remote call failed for good, after any transient retries
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// Anything else
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EngineError {
    /// True when this error represents cooperative cancellation
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, EngineError::Cancelled)
    }
}

// ============================================================================
// Remote fault classification
// ============================================================================

/// Markers of rate limiting, server-side failure and interrupted transport
const TRANSIENT_MARKERS: &[&str] = &[
    "network",
    "connection",
    "timeout",
    "dns",
    "reset by peer",
    "broken pipe",
    "429",
    "too many requests",
    "rate limit",
    "500",
    "502",
    "503",
    "504",
    "server error",
];

/// Markers of an invalidated delta cursor
const CURSOR_EXPIRED_MARKERS: &[&str] = &["410", "gone", "resync"];

/// Markers of a missing remote item
const NOT_FOUND_MARKERS: &[&str] = &["404", "not found", "does not exist"];

/// One remote drive call's failure, classified
///
/// Cursor expiry outranks the transient markers: a `410 Gone` wrapped in
/// transport noise must trigger the full-enumeration fallback, never a
/// blind retry.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// Rate limiting, 5xx, or an interrupted connection; a retry may
    /// succeed
    #[error("transient remote failure")]
    Transient(#[source] anyhow::Error),

    /// The server declared the delta cursor expired; requires a full
    /// enumeration
    #[error("delta cursor expired")]
    CursorExpired(#[source] anyhow::Error),

    /// The item or folder does not exist remotely
    #[error("remote item not found")]
    NotFound(#[source] anyhow::Error),

    /// Anything else; retrying would not help
    #[error(transparent)]
    Permanent(anyhow::Error),
}

impl RemoteError {
    /// Classify an adapter error into a fault variant
    ///
    /// The only place in the engine that reads error text.
    #[must_use]
    pub fn classify(err: anyhow::Error) -> Self {
        let chain = format!("{err:#}").to_lowercase();
        let has = |markers: &[&str]| markers.iter().any(|marker| chain.contains(marker));

        if has(CURSOR_EXPIRED_MARKERS) {
            RemoteError::CursorExpired(err)
        } else if has(NOT_FOUND_MARKERS) {
            RemoteError::NotFound(err)
        } else if has(TRANSIENT_MARKERS) {
            RemoteError::Transient(err)
        } else {
            RemoteError::Permanent(err)
        }
    }

    /// True when a retry might succeed
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Transient(_))
    }
}
