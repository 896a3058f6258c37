//! Port definitions (driven/secondary ports)
//!
//! Traits the synchronization core consumes. Adapter crates implement them;
//! the engine never sees anything more specific than these interfaces.

pub mod auth;
pub mod local_fs;
pub mod metadata_store;
pub mod remote_drive;

pub use auth::{AuthProvider, BearerCredentials};
pub use local_fs::{FileState, LocalFileSystem};
pub use metadata_store::MetadataStore;
pub use remote_drive::{DeltaPage, RemoteDriveClient, RemoteItem, UploadProgressFn};
