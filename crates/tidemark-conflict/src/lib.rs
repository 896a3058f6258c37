//! Tidemark Conflict - three-way change classification
//!
//! Given the local, remote and baseline view of one path, decides whether
//! to upload, download, delete, record a conflict, or do nothing. The
//! reconciler calls [`detector::ConflictDetector::classify`] once per path
//! in the joined set.

pub mod detector;

pub use detector::{ConflictDetector, Outcome};
