//! Working-copy lifecycle: acquire (fresh shallow clone), release (delete).
//!
//! Each repository gets its own directory under the work dir, keyed by its
//! slug, so two repositories never share a working copy.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::core::allowlist::RepoId;
use crate::io::config::IdentityConfig;
use crate::io::forge::Forge;
use crate::io::git::Git;

/// An exclusively owned checkout of one repository.
#[derive(Debug)]
pub struct WorkingCopy {
    repo: RepoId,
    git: Git,
    default_branch: String,
}

impl WorkingCopy {
    pub fn repo(&self) -> &RepoId {
        &self.repo
    }

    pub fn root(&self) -> &Path {
        self.git.workdir()
    }

    pub fn git(&self) -> &Git {
        &self.git
    }

    /// Branch the clone was taken from; the base for pull requests.
    pub fn default_branch(&self) -> &str {
        &self.default_branch
    }
}

/// Creates and destroys working copies under one base directory.
#[derive(Debug, Clone)]
pub struct Workspaces {
    base: PathBuf,
    identity: IdentityConfig,
    clone_timeout: Duration,
}

impl Workspaces {
    pub fn new(base: impl Into<PathBuf>, identity: IdentityConfig, clone_timeout: Duration) -> Self {
        Self {
            base: base.into(),
            identity,
            clone_timeout,
        }
    }

    pub fn path_for(&self, repo: &RepoId) -> PathBuf {
        self.base.join(repo.slug())
    }

    /// Clone a fresh working copy, replacing any stale directory for `repo`.
    #[instrument(skip_all, fields(repo = %repo))]
    pub fn acquire(&self, repo: &RepoId, forge: &dyn Forge) -> Result<WorkingCopy> {
        let dest = self.path_for(repo);
        remove_dir_if_exists(&dest)?;
        fs::create_dir_all(&self.base)
            .with_context(|| format!("create work dir {}", self.base.display()))?;

        let git = Git::clone_shallow(&forge.clone_url(repo), &dest, self.clone_timeout)?;
        let default_branch = git.current_branch().context("read default branch")?;
        git.configure_identity(&self.identity.name, &self.identity.email)
            .context("configure commit identity")?;
        info!(branch = %default_branch, path = %dest.display(), "working copy acquired");
        Ok(WorkingCopy {
            repo: repo.clone(),
            git,
            default_branch,
        })
    }

    /// Delete the working copy. Failures are logged; the next acquire retries the removal.
    pub fn release(&self, copy: WorkingCopy) {
        match remove_dir_if_exists(copy.root()) {
            Ok(()) => debug!(path = %copy.root().display(), "working copy released"),
            Err(err) => warn!(path = %copy.root().display(), err = %format!("{err:#}"), "failed to remove working copy"),
        }
    }

    /// Discard `copy` and clone the same repository again.
    pub fn reacquire(&self, copy: WorkingCopy, forge: &dyn Forge) -> Result<WorkingCopy> {
        let repo = copy.repo.clone();
        self.release(copy);
        self.acquire(&repo, forge)
    }
}

fn remove_dir_if_exists(path: &Path) -> Result<()> {
    if path.exists() {
        fs::remove_dir_all(path).with_context(|| format!("remove {}", path.display()))?;
    }
    Ok(())
}
