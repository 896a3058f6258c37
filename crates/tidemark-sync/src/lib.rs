//! Tidemark Sync - reconciliation engine, delta processor and transfer
//! executor
//!
//! Provides:
//! - Incremental remote change discovery through the delta cursor, with a
//!   full-walk fallback for first syncs and expired cursors
//! - Three-way reconciliation of local, remote and baseline state into
//!   upload/download/delete/conflict plans
//! - Bounded-parallel transfer execution with durable batched record
//!   updates, throughput tracking and cancellation
//! - Single-flight session coordination with broadcast progress snapshots

pub mod coordinator;
pub mod deletion;
pub mod delta;
pub mod error;
pub mod filesystem;
pub mod progress;
pub mod reconciler;
pub mod retry;
pub mod scanner;
pub mod transfer;
pub mod walker;

pub use coordinator::{SessionCoordinator, SessionOutcome};
pub use error::{EngineError, RemoteError};
pub use reconciler::{Reconciler, SyncPlan};
