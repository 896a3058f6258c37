//! Tidemark Store - SQLite implementation of the metadata store port
//!
//! Persists sync records, delta cursors, conflict rows, session logs and
//! the selected-folder set. The schema lives in `src/migrations/` and is
//! applied on pool initialization. Every row is keyed by the hashed
//! account id; the raw id never reaches this crate.

pub mod pool;
pub mod repository;

use thiserror::Error;

pub use pool::DatabasePool;
pub use repository::SqliteMetadataStore;

/// Errors raised by the store adapter
#[derive(Debug, Error)]
pub enum StoreError {
    /// Could not open or create the database
    #[error("Database connection failed: {0}")]
    ConnectionFailed(String),

    /// Schema migration failed
    #[error("Database migration failed: {0}")]
    MigrationFailed(String),

    /// A stored value could not be mapped back to its domain type
    #[error("Serialization error: {0}")]
    Serialization(String),
}
