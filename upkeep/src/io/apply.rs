//! Candidate Applier: write a candidate's full replacement into the working copy.
//!
//! The path text is checked by [`validate_relative`]; here every existing
//! component along the path is additionally resolved so a symlink inside the
//! repository cannot redirect the write outside of it.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

use crate::core::path::{PathViolation, validate_relative};
use crate::core::types::Candidate;

/// Write `candidate.new_content` to `root/candidate.file`, creating parent directories.
///
/// Returns the absolute path written. A [`PathViolation`] (recoverable through
/// `downcast_ref`) means nothing was written.
pub fn apply_candidate(root: &Path, candidate: &Candidate) -> Result<PathBuf> {
    let relative = validate_relative(&candidate.file)?;
    let canonical_root =
        fs::canonicalize(root).with_context(|| format!("resolve {}", root.display()))?;
    ensure_contained(&canonical_root, &relative, &candidate.file)?;

    let target = canonical_root.join(&relative);
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    fs::write(&target, &candidate.new_content)
        .with_context(|| format!("write {}", target.display()))?;
    debug!(file = %relative.display(), bytes = candidate.new_content.len(), "candidate applied");
    Ok(target)
}

/// Every existing prefix of `relative` must resolve inside `root`.
fn ensure_contained(root: &Path, relative: &Path, raw: &str) -> Result<(), PathViolation> {
    let mut current = root.to_path_buf();
    for component in relative.components() {
        current.push(component);
        let Ok(meta) = fs::symlink_metadata(&current) else {
            // Nothing exists from here on; create_dir_all/write stay under `current`.
            return Ok(());
        };
        if meta.file_type().is_symlink() {
            let resolved = fs::canonicalize(&current).map_err(|_| PathViolation {
                path: raw.to_string(),
                reason: "path goes through a dangling symlink",
            })?;
            if !resolved.starts_with(root) {
                return Err(PathViolation {
                    path: raw.to_string(),
                    reason: "path resolves outside the working copy through a symlink",
                });
            }
        }
    }
    Ok(())
}
