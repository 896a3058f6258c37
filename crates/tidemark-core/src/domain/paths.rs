//! Remote path canonicalization
//!
//! The remote service spells the same path several ways depending on which
//! endpoint produced it: `/drive/root:/X`, `/drives/{id}/root:/X`, or a bare
//! `/X`. [`PathKey`] reduces all of them to the canonical `/X` form.
//!
//! Canonical form: starts with `/`, no service prefix, no trailing `/`.
//! Comparison, hashing and ordering are case-insensitive; the original
//! spelling is preserved for display and storage. Canonicalization never
//! fails - inputs that match no known shape pass through with only prefix
//! stripping applied.

use std::cmp::Ordering;
use std::fmt::{self, Display, Formatter};
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Prefix used by single-drive endpoints
const DRIVE_ROOT_PREFIX: &str = "/drive/root:";

/// Prefix used by multi-drive endpoints, with an embedded drive id
const DRIVES_PREFIX: &str = "/drives/";

/// Marker closing the drive-id segment in multi-drive paths
const ROOT_MARKER: &str = "/root:";

/// Canonical remote path with case-insensitive identity
///
/// Two keys are equal when their canonical forms match ignoring case;
/// `as_str` still returns the case-preserved spelling from the first
/// construction.
#[derive(Debug, Clone)]
pub struct PathKey {
    /// Case-preserved canonical path
    path: String,
    /// Lowercased form used for Eq / Hash / Ord
    folded: String,
}

impl PathKey {
    /// Canonicalize any service path flavor into a `PathKey`
    ///
    /// Never fails: unknown shapes are passed through with only prefix
    /// stripping and slash normalization applied.
    #[must_use]
    pub fn canonical(input: &str) -> Self {
        let stripped = strip_service_prefix(input);

        let mut path = if stripped.starts_with('/') {
            stripped.to_string()
        } else {
            format!("/{stripped}")
        };

        // No trailing slash, except for the root itself
        while path.len() > 1 && path.ends_with('/') {
            path.pop();
        }

        let folded = path.to_lowercase();
        Self { path, folded }
    }

    /// The root path `/`
    #[must_use]
    pub fn root() -> Self {
        Self::canonical("/")
    }

    /// Case-preserved canonical path
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.path
    }

    /// Case-folded form used for lookups
    #[must_use]
    pub fn folded(&self) -> &str {
        &self.folded
    }

    /// Display form (same as `as_str`, provided for symmetry with
    /// `canonical`)
    #[must_use]
    pub fn display(&self) -> &str {
        &self.path
    }

    /// True if this key names the drive root
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.path == "/"
    }

    /// Join a relative path below this key
    ///
    /// Backslashes are accepted as separators; empty and `.` segments are
    /// dropped.
    #[must_use]
    pub fn join(&self, relative: &str) -> Self {
        let mut joined = if self.is_root() {
            String::new()
        } else {
            self.path.clone()
        };

        for segment in relative.split(['/', '\\']) {
            if segment.is_empty() || segment == "." {
                continue;
            }
            joined.push('/');
            joined.push_str(segment);
        }

        if joined.is_empty() {
            Self::root()
        } else {
            Self::canonical(&joined)
        }
    }

    /// Parent key, or `None` at the root
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        match self.path.rfind('/') {
            Some(0) => Some(Self::root()),
            Some(idx) => Some(Self::canonical(&self.path[..idx])),
            None => None,
        }
    }

    /// Final path segment, or `None` at the root
    #[must_use]
    pub fn file_name(&self) -> Option<&str> {
        if self.is_root() {
            return None;
        }
        self.path.rsplit('/').next()
    }

    /// Case-insensitive prefix test on whole segments
    ///
    /// `/Docs/Sub` starts with `/docs` but not with `/do`.
    #[must_use]
    pub fn starts_with(&self, ancestor: &PathKey) -> bool {
        if ancestor.is_root() {
            return true;
        }
        let prefix = &ancestor.folded;
        self.folded == *prefix
            || (self.folded.starts_with(prefix)
                && self.folded.as_bytes().get(prefix.len()) == Some(&b'/'))
    }

    /// Path relative to `ancestor`, without a leading slash
    ///
    /// Returns `None` when this key is not below `ancestor`.
    #[must_use]
    pub fn relative_to(&self, ancestor: &PathKey) -> Option<&str> {
        if !self.starts_with(ancestor) {
            return None;
        }
        if ancestor.is_root() {
            return Some(self.path.trim_start_matches('/'));
        }
        if self.folded == ancestor.folded {
            return Some("");
        }
        self.path
            .get(ancestor.path.len() + 1..)
            .map(|rest| rest.trim_start_matches('/'))
    }
}

/// Strip the service-specific prefix from a raw path, if present
fn strip_service_prefix(input: &str) -> &str {
    if let Some(rest) = input.strip_prefix(DRIVE_ROOT_PREFIX) {
        return rest;
    }
    if input.starts_with(DRIVES_PREFIX) {
        if let Some(marker) = input.find(ROOT_MARKER) {
            return &input[marker + ROOT_MARKER.len()..];
        }
    }
    input
}

impl PartialEq for PathKey {
    fn eq(&self, other: &Self) -> bool {
        self.folded == other.folded
    }
}

impl Eq for PathKey {}

impl Hash for PathKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.folded.hash(state);
    }
}

impl PartialOrd for PathKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PathKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.folded.cmp(&other.folded)
    }
}

impl Display for PathKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path)
    }
}

impl From<&str> for PathKey {
    fn from(s: &str) -> Self {
        Self::canonical(s)
    }
}

impl Serialize for PathKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.path)
    }
}

impl<'de> Deserialize<'de> for PathKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::canonical(&raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_bare_path_passes_through() {
        let key = PathKey::canonical("/Docs/report.txt");
        assert_eq!(key.as_str(), "/Docs/report.txt");
    }

    #[test]
    fn test_drive_root_prefix_stripped() {
        let key = PathKey::canonical("/drive/root:/Docs/report.txt");
        assert_eq!(key.as_str(), "/Docs/report.txt");
    }

    #[test]
    fn test_drives_prefix_stripped() {
        let key = PathKey::canonical("/drives/b!xyz123/root:/Docs/report.txt");
        assert_eq!(key.as_str(), "/Docs/report.txt");
    }

    #[test]
    fn test_missing_leading_slash_added() {
        let key = PathKey::canonical("Docs/report.txt");
        assert_eq!(key.as_str(), "/Docs/report.txt");
    }

    #[test]
    fn test_trailing_slash_removed() {
        let key = PathKey::canonical("/Docs/");
        assert_eq!(key.as_str(), "/Docs");
    }

    #[test]
    fn test_root_survives() {
        assert_eq!(PathKey::canonical("/").as_str(), "/");
        assert_eq!(PathKey::canonical("/drive/root:/").as_str(), "/");
        assert!(PathKey::canonical("/").is_root());
    }

    #[test]
    fn test_unknown_shape_passes_through() {
        // Not a recognized prefix: only slash normalization applies.
        let key = PathKey::canonical("/driveX/root:/weird");
        assert_eq!(key.as_str(), "/driveX/root:/weird");
    }

    #[test]
    fn test_case_insensitive_identity_case_preserving_display() {
        let a = PathKey::canonical("/Docs/Report.TXT");
        let b = PathKey::canonical("/docs/report.txt");
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "/Docs/Report.TXT");

        let mut map = HashMap::new();
        map.insert(a.clone(), 1);
        assert_eq!(map.get(&b), Some(&1));
    }

    #[test]
    fn test_join() {
        let root = PathKey::canonical("/Docs");
        assert_eq!(root.join("sub/file.txt").as_str(), "/Docs/sub/file.txt");
        assert_eq!(root.join("sub\\file.txt").as_str(), "/Docs/sub/file.txt");
        assert_eq!(PathKey::root().join("a").as_str(), "/a");
        assert_eq!(root.join("").as_str(), "/Docs");
    }

    #[test]
    fn test_parent_and_file_name() {
        let key = PathKey::canonical("/Docs/Sub/file.txt");
        assert_eq!(key.file_name(), Some("file.txt"));
        assert_eq!(key.parent().unwrap().as_str(), "/Docs/Sub");
        assert_eq!(
            key.parent().unwrap().parent().unwrap().as_str(),
            "/Docs"
        );
        assert!(PathKey::root().parent().is_none());
        assert!(PathKey::root().file_name().is_none());
    }

    #[test]
    fn test_starts_with_whole_segments() {
        let child = PathKey::canonical("/Docs/Sub/file.txt");
        assert!(child.starts_with(&PathKey::canonical("/docs")));
        assert!(child.starts_with(&PathKey::canonical("/Docs/Sub")));
        assert!(child.starts_with(&PathKey::root()));
        assert!(!child.starts_with(&PathKey::canonical("/Do")));
        assert!(!child.starts_with(&PathKey::canonical("/Other")));
    }

    #[test]
    fn test_relative_to() {
        let child = PathKey::canonical("/Docs/Sub/file.txt");
        assert_eq!(
            child.relative_to(&PathKey::canonical("/docs")),
            Some("Sub/file.txt")
        );
        assert_eq!(child.relative_to(&PathKey::root()), Some("Docs/Sub/file.txt"));
        assert_eq!(child.relative_to(&PathKey::canonical("/Other")), None);
    }

    #[test]
    fn test_serde_preserves_case() {
        let key = PathKey::canonical("/Docs/Report.TXT");
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, "\"/Docs/Report.TXT\"");
        let parsed: PathKey = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, key);
    }
}
