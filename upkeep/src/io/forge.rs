//! Remote forge: where repositories are cloned from and where pull requests go.

use std::path::Path;
use std::process::Command;
use std::time::Duration;

use anyhow::{Result, anyhow};
use tracing::{debug, instrument};

use crate::core::allowlist::RepoId;
use crate::io::config::ForgeConfig;
use crate::io::git::redact_credentials;
use crate::io::process::run_command_with_timeout;

/// A request to merge `head` into `base`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequest {
    pub title: String,
    pub body: String,
    pub head: String,
    pub base: String,
}

/// Hosting service operations the decision gate needs beyond plain git.
pub trait Forge {
    /// URL `git clone` should use for `repo`, credentials included.
    fn clone_url(&self, repo: &RepoId) -> String;

    /// Open a pull request and return its identifier (URL).
    ///
    /// `workdir` is the working copy whose branch was just pushed.
    fn open_pull_request(
        &self,
        repo: &RepoId,
        workdir: &Path,
        request: &PullRequest,
    ) -> Result<String>;
}

/// GitHub (or GitHub Enterprise) through token-authenticated HTTPS and the `gh` CLI.
#[derive(Clone)]
pub struct GithubForge {
    host: String,
    token: String,
    timeout: Duration,
}

impl std::fmt::Debug for GithubForge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GithubForge")
            .field("host", &self.host)
            .field("token", &"***")
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl GithubForge {
    pub fn new(config: &ForgeConfig, token: String) -> Self {
        Self {
            host: config.host.clone(),
            token,
            timeout: Duration::from_secs(config.command_timeout_secs),
        }
    }
}

impl Forge for GithubForge {
    fn clone_url(&self, repo: &RepoId) -> String {
        format!(
            "https://x-access-token:{}@{}/{}/{}.git",
            self.token,
            self.host,
            repo.owner(),
            repo.name()
        )
    }

    #[instrument(skip_all, fields(repo = %repo, head = %request.head, base = %request.base))]
    fn open_pull_request(
        &self,
        repo: &RepoId,
        workdir: &Path,
        request: &PullRequest,
    ) -> Result<String> {
        let mut cmd = Command::new("gh");
        cmd.args(["pr", "create", "--repo"])
            .arg(repo.to_string())
            .args(["--title", &request.title])
            .args(["--body", &request.body])
            .args(["--head", &request.head])
            .args(["--base", &request.base])
            .current_dir(workdir)
            .env("GH_TOKEN", &self.token)
            .env("GH_PROMPT_DISABLED", "1");
        if self.host != "github.com" {
            cmd.env("GH_HOST", &self.host);
        }
        let out = run_command_with_timeout(cmd, None, self.timeout, 64 * 1024)?;
        if !out.success() {
            return Err(anyhow!(
                "gh pr create failed: {}",
                redact_credentials(out.stderr_text().trim())
            ));
        }
        let url = pull_request_url(&out.stdout_text())
            .ok_or_else(|| anyhow!("gh pr create printed no pull request URL"))?;
        debug!(%url, "pull request opened");
        Ok(url)
    }
}

/// Last `http(s)://` line of `gh pr create` output.
fn pull_request_url(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .map(str::trim)
        .rfind(|line| line.starts_with("https://") || line.starts_with("http://"))
        .map(ToString::to_string)
}
