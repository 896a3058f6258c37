//! Domain error types
//!
//! This module defines error types specific to domain operations,
//! including validation failures and malformed identifiers.

use thiserror::Error;

/// Errors that can occur in domain operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Invalid account identifier
    #[error("Invalid account id: {0}")]
    InvalidAccountId(String),

    /// Invalid hashed account identifier (expected 64 lowercase hex chars)
    #[error("Invalid hashed account id: {0}")]
    InvalidHashedAccountId(String),

    /// Invalid remote item identifier
    #[error("Invalid remote item id: {0}")]
    InvalidRemoteItemId(String),

    /// Invalid content hash (expected SHA-256 as 64 uppercase hex chars)
    #[error("Invalid content hash: {0}")]
    InvalidHash(String),

    /// Invalid delta cursor token
    #[error("Invalid cursor token: {0}")]
    InvalidCursorToken(String),

    /// Invalid drive identifier
    #[error("Invalid drive id: {0}")]
    InvalidDriveId(String),

    /// Invalid version tag (cTag / eTag)
    #[error("Invalid version tag: {0}")]
    InvalidTag(String),

    /// ID parsing error
    #[error("Invalid ID format: {0}")]
    InvalidId(String),

    /// Generic validation failure
    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DomainError::InvalidAccountId("".to_string());
        assert_eq!(err.to_string(), "Invalid account id: ");

        let err = DomainError::InvalidHash("xyz".to_string());
        assert_eq!(err.to_string(), "Invalid content hash: xyz");
    }

    #[test]
    fn test_error_equality() {
        assert_eq!(
            DomainError::InvalidDriveId("d".into()),
            DomainError::InvalidDriveId("d".into())
        );
        assert_ne!(
            DomainError::InvalidDriveId("d".into()),
            DomainError::InvalidDriveId("e".into())
        );
    }
}
