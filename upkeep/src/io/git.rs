//! Git adapter for working copies.
//!
//! Local queries go through `std::process::Command::output`. Clone and push
//! touch the network, so they run under a timeout via [`run_command_with_timeout`].
//! Every error leaving this module has URL credentials redacted.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use regex::Regex;
use tracing::{debug, instrument};

use crate::io::process::run_command_with_timeout;

const NETWORK_OUTPUT_LIMIT: usize = 64 * 1024;

static URL_CREDENTIALS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?P<scheme>[A-Za-z][A-Za-z0-9+.-]*://)[^/@\s]+@").expect("valid regex")
});

/// Replace `user:secret@` in any URL inside `text` with `***@`.
pub fn redact_credentials(text: &str) -> String {
    URL_CREDENTIALS_RE
        .replace_all(text, "${scheme}***@")
        .into_owned()
}

/// Git commands scoped to one working copy.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Clone the default branch of `url` into `dest` with depth 1.
    #[instrument(skip_all, fields(dest = %dest.display()))]
    pub fn clone_shallow(url: &str, dest: &Path, timeout: Duration) -> Result<Self> {
        let mut cmd = Command::new("git");
        cmd.args(["clone", "--quiet", "--depth", "1", "--no-tags"])
            .arg(url)
            .arg(dest);
        network(cmd, timeout, &format!("git clone {}", redact_credentials(url)))?;
        debug!("clone complete");
        Ok(Self::new(dest))
    }

    /// Commit identity for this repository only; global config is never touched.
    pub fn configure_identity(&self, name: &str, email: &str) -> Result<()> {
        self.stdout(&["config", "user.name", name])?;
        self.stdout(&["config", "user.email", email])?;
        Ok(())
    }

    /// Checked-out branch; a detached HEAD is an error.
    pub fn current_branch(&self) -> Result<String> {
        let name = self.stdout(&["rev-parse", "--abbrev-ref", "HEAD"])?;
        let name = name.trim();
        if name == "HEAD" {
            bail!("working copy has a detached HEAD");
        }
        Ok(name.to_string())
    }

    pub fn head_short_sha(&self, len: usize) -> Result<String> {
        let short = format!("--short={len}");
        Ok(self.stdout(&["rev-parse", &short, "HEAD"])?.trim().to_string())
    }

    pub fn checkout_new_branch(&self, branch: &str) -> Result<()> {
        debug!(branch, "checking out new branch");
        self.stdout(&["checkout", "--quiet", "-b", branch])?;
        Ok(())
    }

    /// Stage every change, untracked files included (respects .gitignore).
    pub fn add_all(&self) -> Result<()> {
        self.stdout(&["add", "-A"])?;
        Ok(())
    }

    pub fn has_staged_changes(&self) -> Result<bool> {
        Ok(!self
            .stdout(&["diff", "--cached", "--name-only"])?
            .trim()
            .is_empty())
    }

    /// Commit what is staged. `Ok(false)` when nothing is.
    pub fn commit_staged(&self, message: &str) -> Result<bool> {
        if !self.has_staged_changes()? {
            debug!("nothing staged");
            return Ok(false);
        }
        self.stdout(&["commit", "--quiet", "--no-verify", "-m", message])?;
        Ok(true)
    }

    /// Diff of the whole working copy against `HEAD`, new files included.
    ///
    /// Stages everything first so untracked files show up.
    pub fn diff_from_head(&self) -> Result<String> {
        self.add_all()?;
        self.stdout(&["diff", "--cached", "--no-color", "HEAD"])
    }

    /// Push `refspec` to `origin`.
    #[instrument(skip_all, fields(refspec))]
    pub fn push(&self, refspec: &str, timeout: Duration) -> Result<()> {
        let mut cmd = Command::new("git");
        cmd.args(["push", "--quiet", "origin", refspec])
            .current_dir(&self.workdir);
        network(cmd, timeout, &format!("git push origin {refspec}"))?;
        debug!("push complete");
        Ok(())
    }

    /// Run a local git command and return its stdout, failing on non-zero exit.
    fn stdout(&self, args: &[&str]) -> Result<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))?;
        if !output.status.success() {
            bail!(
                "git {} failed: {}",
                args.join(" "),
                redact_credentials(String::from_utf8_lossy(&output.stderr).trim())
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Run a network git command with prompts disabled; `what` names it in errors.
fn network(mut cmd: Command, timeout: Duration, what: &str) -> Result<()> {
    cmd.env("GIT_TERMINAL_PROMPT", "0");
    let out = run_command_with_timeout(cmd, None, timeout, NETWORK_OUTPUT_LIMIT)
        .map_err(|err| anyhow!(redact_credentials(&format!("{err:#}"))))
        .with_context(|| what.to_string())?;
    if out.success() {
        return Ok(());
    }
    let reason = if out.timed_out {
        format!("timed out after {}s", timeout.as_secs())
    } else {
        out.stderr_text().trim().to_string()
    };
    bail!("{what} failed: {}", redact_credentials(&reason))
}
