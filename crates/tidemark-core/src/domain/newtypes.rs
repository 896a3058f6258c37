//! Domain newtypes with validation
//!
//! This module provides strongly-typed wrappers for domain identifiers and
//! values. Each newtype ensures data validity at construction time.
//!
//! ## Privacy
//!
//! The raw [`AccountId`] never appears in persisted rows or log lines; every
//! persisted or logged reference uses the salted one-way [`HashedAccountId`]
//! derived from it. `AccountId` deliberately implements neither `Display`
//! nor a revealing `Debug`.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::errors::DomainError;

// ============================================================================
// Account identity
// ============================================================================

/// Opaque identifier of a remote account, as issued by the service.
///
/// Held only in the in-memory session context. Use [`AccountId::hashed`] to
/// derive the token that is allowed into rows and logs.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct AccountId(String);

impl AccountId {
    /// Create a new AccountId
    ///
    /// # Errors
    /// Returns an error if the id is empty
    pub fn new(id: impl Into<String>) -> Result<Self, DomainError> {
        let id = id.into();
        if id.is_empty() {
            return Err(DomainError::InvalidAccountId(
                "account id cannot be empty".to_string(),
            ));
        }
        Ok(Self(id))
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Derive the salted one-way hash of this account id.
    ///
    /// The derivation is SHA-256 over `salt ‖ raw id`, hex-encoded lowercase.
    /// Stable for the life of the account as long as the salt is stable.
    #[must_use]
    pub fn hashed(&self, salt: &str) -> HashedAccountId {
        let mut hasher = Sha256::new();
        hasher.update(salt.as_bytes());
        hasher.update(self.0.as_bytes());
        let digest = hasher.finalize();

        let mut hex = String::with_capacity(64);
        for byte in digest {
            use std::fmt::Write;
            let _ = write!(hex, "{byte:02x}");
        }
        HashedAccountId(hex)
    }
}

impl fmt::Debug for AccountId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        // Raw account ids must not leak into debug output or logs.
        write!(f, "AccountId(<redacted>)")
    }
}

/// One-way salted hash of an account id.
///
/// The only account-identifying token that persisted rows and log lines
/// may carry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct HashedAccountId(String);

impl HashedAccountId {
    /// Create a HashedAccountId from an already-derived hex digest
    ///
    /// # Errors
    /// Returns an error unless the value is exactly 64 lowercase hex chars
    pub fn new(hex: impl Into<String>) -> Result<Self, DomainError> {
        let hex = hex.into();
        if hex.len() != 64 || !hex.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
        {
            return Err(DomainError::InvalidHashedAccountId(hex));
        }
        Ok(Self(hex))
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short prefix for compact log fields
    #[must_use]
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl Display for HashedAccountId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for HashedAccountId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

impl TryFrom<String> for HashedAccountId {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<HashedAccountId> for String {
    fn from(id: HashedAccountId) -> Self {
        id.0
    }
}

// ============================================================================
// Drive and item identity
// ============================================================================

/// Identifier of a drive within the remote service
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DriveId(String);

impl DriveId {
    /// The placeholder drive for services that report no drive id
    #[must_use]
    pub fn default_drive() -> Self {
        Self("default".to_string())
    }

    /// Create a new DriveId
    ///
    /// # Errors
    /// Returns an error if the id is empty
    pub fn new(id: impl Into<String>) -> Result<Self, DomainError> {
        let id = id.into();
        if id.is_empty() {
            return Err(DomainError::InvalidDriveId(
                "drive id cannot be empty".to_string(),
            ));
        }
        Ok(Self(id))
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for DriveId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DriveId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

impl TryFrom<String> for DriveId {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<DriveId> for String {
    fn from(id: DriveId) -> Self {
        id.0
    }
}

/// Remote item ID (service-assigned identifier)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RemoteItemId(String);

impl RemoteItemId {
    /// Create a new RemoteItemId
    ///
    /// # Errors
    /// Returns an error if the ID is empty or contains invalid characters
    pub fn new(id: impl Into<String>) -> Result<Self, DomainError> {
        let id = id.into();
        if id.is_empty() {
            return Err(DomainError::InvalidRemoteItemId(
                "remote item id cannot be empty".to_string(),
            ));
        }

        // Service item ids are alphanumeric with a small set of special chars
        if !id
            .chars()
            .all(|c| c.is_alphanumeric() || c == '!' || c == '-' || c == '_' || c == '.')
        {
            return Err(DomainError::InvalidRemoteItemId(format!(
                "remote item id contains invalid characters: {id}"
            )));
        }

        Ok(Self(id))
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for RemoteItemId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RemoteItemId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

impl TryFrom<String> for RemoteItemId {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<RemoteItemId> for String {
    fn from(id: RemoteItemId) -> Self {
        id.0
    }
}

// ============================================================================
// Version tags
// ============================================================================

/// Server-assigned content-version tag; changes whenever any byte of the
/// file changes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentTag(String);

impl ContentTag {
    /// Create a new ContentTag
    ///
    /// # Errors
    /// Returns an error if the tag is empty
    pub fn new(tag: impl Into<String>) -> Result<Self, DomainError> {
        let tag = tag.into();
        if tag.is_empty() {
            return Err(DomainError::InvalidTag("cTag cannot be empty".to_string()));
        }
        Ok(Self(tag))
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ContentTag {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for ContentTag {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<ContentTag> for String {
    fn from(tag: ContentTag) -> Self {
        tag.0
    }
}

/// Server-assigned entity-version tag; changes for any metadata or
/// content change.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityTag(String);

impl EntityTag {
    /// Create a new EntityTag
    ///
    /// # Errors
    /// Returns an error if the tag is empty
    pub fn new(tag: impl Into<String>) -> Result<Self, DomainError> {
        let tag = tag.into();
        if tag.is_empty() {
            return Err(DomainError::InvalidTag("eTag cannot be empty".to_string()));
        }
        Ok(Self(tag))
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for EntityTag {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for EntityTag {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<EntityTag> for String {
    fn from(tag: EntityTag) -> Self {
        tag.0
    }
}

// ============================================================================
// Content hash
// ============================================================================

/// SHA-256 content hash, hex-encoded uppercase (64 chars)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentHash(String);

impl ContentHash {
    /// Expected hex length of a SHA-256 digest
    const EXPECTED_LEN: usize = 64;

    /// Create a new ContentHash from its hex representation
    ///
    /// # Errors
    /// Returns an error unless the value is 64 uppercase hex characters
    pub fn new(hash: impl Into<String>) -> Result<Self, DomainError> {
        let hash = hash.into();
        if hash.len() != Self::EXPECTED_LEN {
            return Err(DomainError::InvalidHash(format!(
                "hash has wrong length: expected {} chars, got {}",
                Self::EXPECTED_LEN,
                hash.len()
            )));
        }
        if !hash
            .chars()
            .all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c))
        {
            return Err(DomainError::InvalidHash(format!(
                "hash is not uppercase hex: {hash}"
            )));
        }
        Ok(Self(hash))
    }

    /// Build a ContentHash from a raw 32-byte digest
    #[must_use]
    pub fn from_digest(digest: &[u8; 32]) -> Self {
        let mut hex = String::with_capacity(Self::EXPECTED_LEN);
        for byte in digest {
            use std::fmt::Write;
            let _ = write!(hex, "{byte:02X}");
        }
        Self(hex)
    }

    /// Compute the hash of an in-memory buffer
    #[must_use]
    pub fn of_bytes(data: &[u8]) -> Self {
        let digest: [u8; 32] = Sha256::digest(data).into();
        Self::from_digest(&digest)
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ContentHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ContentHash {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

impl TryFrom<String> for ContentHash {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<ContentHash> for String {
    fn from(hash: ContentHash) -> Self {
        hash.0
    }
}

// ============================================================================
// Delta cursor token
// ============================================================================

/// Opaque server token enabling incremental listing of changes (delta)
///
/// The token is opaque - we don't validate its contents, only that it's
/// non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CursorToken(String);

impl CursorToken {
    /// Create a new CursorToken
    ///
    /// # Errors
    /// Returns an error if the token is empty
    pub fn new(token: impl Into<String>) -> Result<Self, DomainError> {
        let token = token.into();
        if token.is_empty() {
            return Err(DomainError::InvalidCursorToken(
                "cursor token cannot be empty".to_string(),
            ));
        }
        Ok(Self(token))
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for CursorToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for CursorToken {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<CursorToken> for String {
    fn from(token: CursorToken) -> Self {
        token.0
    }
}

// ============================================================================
// UUID-based row ids
// ============================================================================

/// Identifier for conflict rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConflictId(Uuid);

impl ConflictId {
    /// Create a new random ConflictId
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a ConflictId from an existing UUID
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID value
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ConflictId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for ConflictId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ConflictId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| DomainError::InvalidId(format!("Invalid ConflictId: {e}")))
    }
}

/// Identifier for session log rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Create a new random SessionId
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a SessionId from an existing UUID
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID value
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for SessionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SessionId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| DomainError::InvalidId(format!("Invalid SessionId: {e}")))
    }
}

// ============================================================================
// Tests
// ============================================================================
