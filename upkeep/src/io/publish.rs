//! Publish an accepted candidate: commit, then push directly or open a pull request.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use rand::{Rng, distributions::Alphanumeric};
use tracing::{info, instrument};

use crate::io::forge::{Forge, PullRequest};
use crate::io::workspace::WorkingCopy;

/// Where an accepted change ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    /// Pull-request URL, or the pushed commit's short SHA.
    pub reference: String,
    /// True only when the commit went straight to the default branch.
    pub pushed: bool,
}

/// How to publish.
#[derive(Debug, Clone)]
pub struct PublishSettings<'a> {
    pub direct_push: bool,
    pub branch_prefix: &'a str,
    pub pull_request_title: &'a str,
    pub timeout: Duration,
}

/// Commit everything in the working copy and make it durable on the remote.
#[instrument(skip_all, fields(repo = %copy.repo(), direct_push = settings.direct_push))]
pub fn publish(
    copy: &WorkingCopy,
    forge: &dyn Forge,
    reason: &str,
    settings: &PublishSettings<'_>,
) -> Result<Published> {
    let git = copy.git();
    let branch = if settings.direct_push {
        None
    } else {
        let name = branch_name(settings.branch_prefix);
        git.checkout_new_branch(&name)?;
        Some(name)
    };

    git.add_all()?;
    if !git.commit_staged(&commit_message(reason))? {
        bail!("nothing to commit: the accepted candidate left the working copy unchanged");
    }

    match branch {
        None => {
            let refspec = format!("HEAD:refs/heads/{}", copy.default_branch());
            git.push(&refspec, settings.timeout)?;
            let sha = git.head_short_sha(12)?;
            info!(%sha, branch = copy.default_branch(), "pushed to default branch");
            Ok(Published {
                reference: sha,
                pushed: true,
            })
        }
        Some(branch) => {
            git.push(&format!("HEAD:refs/heads/{branch}"), settings.timeout)?;
            let request = PullRequest {
                title: settings.pull_request_title.to_string(),
                body: reason.to_string(),
                head: branch,
                base: copy.default_branch().to_string(),
            };
            let url = forge
                .open_pull_request(copy.repo(), copy.root(), &request)
                .context("open pull request")?;
            info!(%url, "pull request opened");
            Ok(Published {
                reference: url,
                pushed: false,
            })
        }
    }
}

/// `upkeep: <first line of reason>`.
pub fn commit_message(reason: &str) -> String {
    let summary = reason.lines().map(str::trim).find(|line| !line.is_empty());
    format!("upkeep: {}", summary.unwrap_or("automated improvement"))
}

/// `<prefix><UTC timestamp>-<6 lowercase alphanumerics>`.
pub fn branch_name(prefix: &str) -> String {
    let timestamp = Utc::now().format("%Y%m%d%H%M%S");
    format!("{prefix}{timestamp}-{}", short_id())
}

fn short_id() -> String {
    let mut rng = rand::thread_rng();
    std::iter::repeat_with(|| rng.sample(Alphanumeric))
        .map(char::from)
        .take(6)
        .collect::<String>()
        .to_lowercase()
}
