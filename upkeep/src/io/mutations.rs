//! Deterministic safe mutations. Each one is idempotent.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument};

use crate::core::types::SafeMutation;
use crate::io::process::{command_from_argv, run_command_with_timeout};

pub const EDITORCONFIG_FILE: &str = ".editorconfig";
pub const EDITORCONFIG_CONTENT: &str = "root = true\n\n[*]\nend_of_line = lf\ninsert_final_newline = true\ncharset = utf-8\ntrim_trailing_whitespace = true\n";

pub const README_FILE: &str = "README.md";
/// Marker identifying the badge, so it is never added twice.
pub const BADGE_MARKER: &str = "<!-- upkeep-badge -->";
pub const BADGE: &str = "<!-- upkeep-badge -->\n[![maintained by upkeep](https://img.shields.io/badge/maintained%20by-upkeep-blue)](#)";

/// Inputs a mutation may need besides the working copy.
#[derive(Debug, Clone)]
pub struct MutationEnv<'a> {
    /// Title for a README created from scratch.
    pub repo_name: &'a str,
    pub format_command: &'a [String],
    pub timeout: Duration,
}

/// Apply `mutation` to the working copy at `root`.
#[instrument(skip_all, fields(mutation = mutation.as_str()))]
pub fn apply_mutation(root: &Path, mutation: SafeMutation, env: &MutationEnv<'_>) -> Result<()> {
    match mutation {
        SafeMutation::Editorconfig => ensure_editorconfig(root),
        SafeMutation::Badge => ensure_badge(root, env.repo_name),
        SafeMutation::Format => run_formatter(root, env.format_command, env.timeout),
    }
}

fn ensure_editorconfig(root: &Path) -> Result<()> {
    let path = root.join(EDITORCONFIG_FILE);
    if path.exists() {
        debug!(".editorconfig already present");
        return Ok(());
    }
    fs::write(&path, EDITORCONFIG_CONTENT).with_context(|| format!("write {}", path.display()))
}

fn ensure_badge(root: &Path, repo_name: &str) -> Result<()> {
    let path = root.join(README_FILE);
    let updated = match fs::read_to_string(&path) {
        Ok(existing) if existing.contains(BADGE_MARKER) => {
            debug!("badge already present");
            return Ok(());
        }
        Ok(existing) => format!("{BADGE}\n\n{existing}"),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            format!("# {repo_name}\n\n{BADGE}\n")
        }
        Err(err) => return Err(err).with_context(|| format!("read {}", path.display())),
    };
    fs::write(&path, updated).with_context(|| format!("write {}", path.display()))
}

fn run_formatter(root: &Path, command: &[String], timeout: Duration) -> Result<()> {
    let cmd = command_from_argv(command, root)?;
    let out = run_command_with_timeout(cmd, None, timeout, 64 * 1024)?;
    if out.timed_out {
        return Err(anyhow!("formatter timed out after {}s", timeout.as_secs()));
    }
    if !out.status.success() {
        return Err(anyhow!(
            "formatter exited with {:?}: {}",
            out.status.code(),
            out.stderr_text().trim()
        ));
    }
    Ok(())
}
