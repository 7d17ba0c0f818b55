//! Allowlist parsing: one `owner/name` repository per line.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use anyhow::{Result, anyhow};
use regex::Regex;

static REPO_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Za-z0-9.-]+)/([A-Za-z0-9_.-]+)$").expect("valid regex"));

/// Identity of a remote repository (`owner/name`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RepoId {
    owner: String,
    name: String,
}

impl RepoId {
    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Filesystem-safe key, distinct per repository: `owner__name`.
    ///
    /// Owners never contain `_`, so the first `_` always starts the separator.
    pub fn slug(&self) -> String {
        format!("{}__{}", self.owner, self.name)
    }
}

impl FromStr for RepoId {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        let caps = REPO_ID_RE
            .captures(raw)
            .ok_or_else(|| anyhow!("expected owner/name, got '{raw}'"))?;
        let owner = &caps[1];
        let name = &caps[2];
        if [owner, name].iter().any(|part| *part == "." || *part == "..") {
            return Err(anyhow!("expected owner/name, got '{raw}'"));
        }
        Ok(Self {
            owner: owner.to_string(),
            name: name.to_string(),
        })
    }
}

impl fmt::Display for RepoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// Parsed allowlist plus the lines that were skipped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Allowlist {
    /// Repositories in file order, first occurrence wins.
    pub repos: Vec<RepoId>,
    /// Human-readable notes about skipped lines.
    pub warnings: Vec<String>,
}

/// Parse allowlist text. Blank lines and `#` comments are ignored.
pub fn parse_allowlist(text: &str) -> Allowlist {
    let mut allowlist = Allowlist::default();
    for (index, line) in text.lines().enumerate() {
        let entry = line.trim();
        if entry.is_empty() || entry.starts_with('#') {
            continue;
        }
        let line_no = index + 1;
        match entry.parse::<RepoId>() {
            Ok(repo) if allowlist.repos.contains(&repo) => {
                allowlist
                    .warnings
                    .push(format!("line {line_no}: duplicate entry '{repo}' skipped"));
            }
            Ok(repo) => allowlist.repos.push(repo),
            Err(err) => allowlist
                .warnings
                .push(format!("line {line_no}: {err} (skipped)")),
        }
    }
    allowlist
}
