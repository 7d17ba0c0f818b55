//! Lexical validation of candidate file paths.
//!
//! A candidate may only name a file strictly inside the working copy. This
//! module checks the path text; symlink resolution happens in
//! [`crate::io::apply`].

use std::fmt;
use std::path::{Component, Path, PathBuf};

/// Why a candidate path was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathViolation {
    pub path: String,
    pub reason: &'static str,
}

impl fmt::Display for PathViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "refusing candidate path '{}': {}", self.path, self.reason)
    }
}

impl std::error::Error for PathViolation {}

/// Validate `raw` as a relative file path that stays inside the working copy.
///
/// Returns the normalized relative path (`.` components removed). Rejects empty
/// paths, absolute paths, parent traversal, and anything under `.git/`.
pub fn validate_relative(raw: &str) -> Result<PathBuf, PathViolation> {
    let violation = |reason| PathViolation {
        path: raw.to_string(),
        reason,
    };
    if raw.trim().is_empty() {
        return Err(violation("path is empty"));
    }
    if raw.contains('\0') {
        return Err(violation("path contains a NUL byte"));
    }
    // Backslashes would be separators on Windows; refuse them everywhere so a
    // path means the same thing on every platform.
    if raw.contains('\\') {
        return Err(violation("path contains a backslash"));
    }

    let mut normalized = PathBuf::new();
    for component in Path::new(raw).components() {
        match component {
            Component::Normal(part) => normalized.push(part),
            Component::CurDir => {}
            Component::ParentDir => return Err(violation("path traverses to a parent directory")),
            Component::RootDir | Component::Prefix(_) => {
                return Err(violation("path is absolute"));
            }
        }
    }

    if normalized.as_os_str().is_empty() {
        return Err(violation("path names the working-copy root"));
    }
    if normalized
        .components()
        .next()
        .is_some_and(|first| first.as_os_str() == ".git")
    {
        return Err(violation("path is inside the git directory"));
    }
    Ok(normalized)
}
