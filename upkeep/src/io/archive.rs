//! Audit archive: snapshots, rejected diffs, decision records, tool logs.
//!
//! Layout under the artifacts directory, one folder per repository slug:
//!
//! ```text
//! <owner>__<name>/
//!   decision.json
//!   snapshots/<tag>/...        copy of the working copy (no .git)
//!   snapshots/<tag>/MANIFEST.sha256
//!   rejected/<n>.diff
//!   tools/<label>/{tests,lint}.log
//! ```
//!
//! Writing the same key twice replaces the earlier artifact.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, instrument};
use walkdir::WalkDir;

use crate::core::allowlist::RepoId;
use crate::core::types::DecisionOutcome;
use crate::io::config::write_atomic;

pub const MANIFEST_FILE: &str = "MANIFEST.sha256";
pub const DECISION_FILE: &str = "decision.json";

/// Durable, per-repository audit storage.
#[derive(Debug, Clone)]
pub struct Archive {
    root: PathBuf,
}

impl Archive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn repo_dir(&self, repo: &RepoId) -> PathBuf {
        self.root.join(repo.slug())
    }

    pub fn snapshot_dir(&self, repo: &RepoId, tag: &str) -> PathBuf {
        self.repo_dir(repo).join("snapshots").join(tag)
    }

    /// Directory receiving raw quality-tool output for one assessment.
    pub fn tool_log_dir(&self, repo: &RepoId, label: &str) -> PathBuf {
        self.repo_dir(repo).join("tools").join(label)
    }

    pub fn rejection_path(&self, repo: &RepoId, ordinal: u32) -> PathBuf {
        self.repo_dir(repo)
            .join("rejected")
            .join(format!("{ordinal}.diff"))
    }

    pub fn decision_path(&self, repo: &RepoId) -> PathBuf {
        self.repo_dir(repo).join(DECISION_FILE)
    }

    /// Copy the working copy (minus `.git`) to `snapshots/<tag>/` with a SHA-256 manifest.
    #[instrument(skip_all, fields(repo = %repo, tag))]
    pub fn snapshot(&self, repo: &RepoId, working_copy: &Path, tag: &str) -> Result<PathBuf> {
        if tag.is_empty() || tag.contains(['/', '\\']) || tag.starts_with('.') {
            return Err(anyhow!("invalid snapshot tag '{tag}'"));
        }
        let dest = self.snapshot_dir(repo, tag);
        if dest.exists() {
            fs::remove_dir_all(&dest)
                .with_context(|| format!("remove previous snapshot {}", dest.display()))?;
        }
        fs::create_dir_all(&dest).with_context(|| format!("create {}", dest.display()))?;

        let mut manifest = Vec::new();
        let walker = WalkDir::new(working_copy)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| !(entry.depth() == 1 && entry.file_name() == ".git"));
        for entry in walker {
            let entry = entry.context("walk working copy")?;
            let relative = entry
                .path()
                .strip_prefix(working_copy)
                .context("snapshot entry outside working copy")?;
            let target = dest.join(relative);
            let file_type = entry.file_type();
            if file_type.is_dir() {
                fs::create_dir_all(&target)
                    .with_context(|| format!("create {}", target.display()))?;
            } else if file_type.is_file() {
                fs::copy(entry.path(), &target)
                    .with_context(|| format!("copy {}", entry.path().display()))?;
                manifest.push((
                    relative.to_string_lossy().into_owned(),
                    file_sha256(entry.path())?,
                ));
            } else {
                debug!(path = %relative.display(), "skipping non-regular file in snapshot");
            }
        }
        manifest.sort();
        let body: String = manifest
            .iter()
            .map(|(path, digest)| format!("{digest}  {path}\n"))
            .collect();
        fs::write(dest.join(MANIFEST_FILE), body).context("write snapshot manifest")?;
        debug!(files = manifest.len(), dest = %dest.display(), "snapshot written");
        Ok(dest)
    }

    /// Store the diff of a rejected candidate (1-based ordinal).
    pub fn record_rejection(&self, repo: &RepoId, ordinal: u32, diff: &str) -> Result<PathBuf> {
        let path = self.rejection_path(repo, ordinal);
        write_atomic(&path, diff.as_bytes())?;
        debug!(path = %path.display(), bytes = diff.len(), "rejected diff archived");
        Ok(path)
    }

    /// Write `decision.json` for the repository.
    pub fn record_outcome(&self, repo: &RepoId, outcome: &DecisionOutcome) -> Result<PathBuf> {
        let path = self.decision_path(repo);
        write_json(&path, outcome)?;
        Ok(path)
    }
}

/// Serialize `value` to pretty-printed JSON with trailing newline, atomically.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut payload = serde_json::to_string_pretty(value).context("serialize json")?;
    payload.push('\n');
    write_atomic(path, payload.as_bytes())
}

fn file_sha256(path: &Path) -> Result<String> {
    let contents = fs::read(path).with_context(|| format!("read {}", path.display()))?;
    let mut hasher = Sha256::new();
    hasher.update(contents);
    let digest = hasher.finalize();
    Ok(hex::encode(digest))
}
