//! Tidemark Core - Domain logic and business rules
//!
//! This crate contains the hexagonal architecture core with:
//! - **Domain value types** - `SyncRecord`, `RemoteRecord`, `LocalRecord`,
//!   `ConflictRow`, `SessionLog`, `DeltaCursor`, `ProgressSnapshot`
//! - **Path canonicalization** - `PathKey` with case-insensitive lookup and
//!   case-preserving display
//! - **Port definitions** - Traits for adapters: `RemoteDriveClient`,
//!   `AuthProvider`, `MetadataStore`, `LocalFileSystem`
//!
//! # Architecture
//!
//! This crate follows the hexagonal (ports & adapters) architecture pattern.
//! The domain module contains pure value types with no I/O. Ports define
//! trait interfaces that adapter crates implement. The sync engine in
//! `tidemark-sync` orchestrates domain values through the port interfaces.

pub mod config;
pub mod domain;
pub mod ports;
