/// Path normalization for handle matching
///
/// Both the caller's target path and every kernel-resolved handle path are
/// reduced to the same canonical form: backslash separators, lower case, no
/// `\\?\` or `\\.\` device prefix. Matching is deliberately loose: two
/// normalized paths are equivalent when either one ends with the other, which
/// tolerates differing volume-naming conventions (`C:\x` vs `\Device\...\x`)
/// at the cost of possible false matches on shared path tails.
use crate::config::types::{LiberationError, Result};
use serde::Serialize;
use std::fmt;
use std::path::Path;

const UNC_DEVICE_PREFIX: &str = r"\\?\unc\";
const LONG_PATH_PREFIX: &str = r"\\?\";
const DEVICE_NAMESPACE_PREFIX: &str = r"\\.\";

/// Canonical lower-cased, backslash-separated, prefix-stripped path
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct NormalizedPath(String);

impl NormalizedPath {
    /// Resolve `path` against the working directory and normalize it
    pub fn resolve(path: &Path) -> Result<Self> {
        let absolute = std::path::absolute(path).map_err(|source| LiberationError::PathResolution {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::from_kernel_path(&absolute.to_string_lossy()))
    }

    /// Normalize a path that is already absolute, such as one returned by
    /// `GetFinalPathNameByHandleW`
    pub fn from_kernel_path(raw: &str) -> Self {
        Self(canonical_form(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Suffix containment in either direction. Empty paths never match.
    pub fn is_equivalent(&self, other: &NormalizedPath) -> bool {
        if self.is_empty() || other.is_empty() {
            return false;
        }
        self.0.ends_with(other.as_str()) || other.0.ends_with(self.as_str())
    }
}

impl fmt::Display for NormalizedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn canonical_form(raw: &str) -> String {
    let lowered = raw.replace('/', "\\").to_lowercase();

    if let Some(rest) = lowered.strip_prefix(UNC_DEVICE_PREFIX) {
        return format!(r"\\{}", rest);
    }
    if let Some(rest) = lowered.strip_prefix(LONG_PATH_PREFIX) {
        return rest.to_string();
    }
    if let Some(rest) = lowered.strip_prefix(DEVICE_NAMESPACE_PREFIX) {
        return rest.to_string();
    }
    lowered
}
