//! Test doubles and fixtures for the decision loop.
//!
//! Available to unit tests and, through the `test-support` feature, to the
//! integration tests under `tests/`.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result, anyhow, bail};
use tempfile::TempDir;
use walkdir::WalkDir;

use crate::core::allowlist::RepoId;
use crate::core::types::Proposal;
use crate::io::completion::{Completion, CompletionResponse};
use crate::io::config::AgentConfig;
use crate::io::context::RepositoryContext;
use crate::io::forge::{Forge, PullRequest};
use crate::io::quality::{QualityProbe, ToolFailure, ToolRun};
use crate::propose::CandidateSource;

/// File read by [`MarkerProbe`] to decide the measured quality.
pub const QUALITY_FILE: &str = ".quality";

/// Config rooted at `base` with every path inside it and the graph disabled.
///
/// The test-suite marker is [`QUALITY_FILE`], so repositories seeded with it
/// have their `tests=` line honoured.
pub fn test_config(base: &Path) -> AgentConfig {
    let mut config = AgentConfig {
        kill_switch_file: base.join("KILL_UPKEEP"),
        allowlist: base.join("repos.txt"),
        work_dir: base.join("work"),
        artifacts_dir: base.join("artifacts"),
        logs_dir: base.join("logs"),
        ..AgentConfig::default()
    };
    config.memory.path = base.join("memory.jsonl");
    config.graph.enabled = false;
    config.graph.path = base.join("knowledge_graph.json");
    config.graph.bench_command = vec!["sh".to_string()];
    config.quality.test_markers = vec![QUALITY_FILE.to_string()];
    config.forge.command_timeout_secs = 60;
    config
}

/// A bare git repository with one seeded commit on `main`.
pub struct TestRemote {
    _temp: TempDir,
    bare: PathBuf,
}

impl TestRemote {
    /// Create the remote with `files` committed on `main`.
    pub fn new(files: &[(&str, &str)]) -> Result<Self> {
        let temp = tempfile::tempdir().context("tempdir")?;
        let seed = temp.path().join("seed");
        let bare = temp.path().join("remote.git");
        fs::create_dir_all(&seed).context("create seed dir")?;
        for (path, contents) in files {
            let target = seed.join(path);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).context("create seed parent")?;
            }
            fs::write(&target, contents).with_context(|| format!("write {path}"))?;
        }
        git(temp.path(), &["init", "--quiet", "--bare", "--initial-branch=main", "remote.git"])?;
        git(&seed, &["init", "--quiet", "--initial-branch=main"])?;
        git(&seed, &["add", "-A"])?;
        git(&seed, &["commit", "--quiet", "--allow-empty", "-m", "seed"])?;
        let bare_path = bare.to_string_lossy().into_owned();
        git(&seed, &["push", "--quiet", &bare_path, "main"])?;
        Ok(Self { _temp: temp, bare })
    }

    pub fn path(&self) -> &Path {
        &self.bare
    }

    pub fn url(&self) -> String {
        format!("file://{}", self.bare.display())
    }

    /// Branch names on the remote, sorted.
    pub fn branches(&self) -> Result<Vec<String>> {
        let out = git(
            &self.bare,
            &["for-each-ref", "--format=%(refname:short)", "refs/heads"],
        )?;
        let mut branches: Vec<String> = out.lines().map(ToString::to_string).collect();
        branches.sort();
        Ok(branches)
    }

    /// Content of `path` at the tip of `branch`, `None` when absent.
    pub fn read_file(&self, branch: &str, path: &str) -> Result<Option<String>> {
        let object = format!("{branch}:{path}");
        let output = Command::new("git")
            .args(["show", &object])
            .current_dir(&self.bare)
            .output()
            .context("spawn git show")?;
        if !output.status.success() {
            return Ok(None);
        }
        Ok(Some(String::from_utf8_lossy(&output.stdout).into_owned()))
    }

    pub fn head_sha(&self, branch: &str) -> Result<String> {
        Ok(git(&self.bare, &["rev-parse", branch])?.trim().to_string())
    }

    pub fn commit_subject(&self, branch: &str) -> Result<String> {
        Ok(git(&self.bare, &["log", "-1", "--format=%s", branch])?
            .trim()
            .to_string())
    }
}

fn git(cwd: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .args([
            "-c",
            "user.name=Fixture",
            "-c",
            "user.email=fixture@example.test",
        ])
        .args(args)
        .current_dir(cwd)
        .output()
        .with_context(|| format!("spawn git {}", args.join(" ")))?;
    if !output.status.success() {
        bail!(
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Forge backed by local bare repositories; pull requests are only recorded.
#[derive(Default)]
pub struct LocalForge {
    remotes: HashMap<RepoId, String>,
    pull_requests: RefCell<Vec<(RepoId, PullRequest)>>,
    fail_pull_requests: bool,
    clone_limit: Option<usize>,
    clones: Cell<usize>,
}

impl LocalForge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_remote(mut self, repo: &str, remote: &TestRemote) -> Self {
        if let Ok(id) = repo.parse::<RepoId>() {
            self.remotes.insert(id, remote.url());
        }
        self
    }

    /// Make every pull-request request fail.
    pub fn failing_pull_requests(mut self) -> Self {
        self.fail_pull_requests = true;
        self
    }

    /// Hand out unreachable clone URLs once `limit` clones were served.
    pub fn clone_limit(mut self, limit: usize) -> Self {
        self.clone_limit = Some(limit);
        self
    }

    /// Clone URLs handed out so far.
    pub fn clones(&self) -> usize {
        self.clones.get()
    }

    pub fn pull_requests(&self) -> Vec<(RepoId, PullRequest)> {
        self.pull_requests.borrow().clone()
    }
}

impl Forge for LocalForge {
    fn clone_url(&self, repo: &RepoId) -> String {
        let served = self.clones.get();
        self.clones.set(served + 1);
        let unreachable = format!("file:///nonexistent/upkeep-test/{}.git", repo.slug());
        if self.clone_limit.is_some_and(|limit| served >= limit) {
            return unreachable;
        }
        self.remotes.get(repo).cloned().unwrap_or(unreachable)
    }

    fn open_pull_request(
        &self,
        repo: &RepoId,
        _workdir: &Path,
        request: &PullRequest,
    ) -> Result<String> {
        if self.fail_pull_requests {
            return Err(anyhow!("pull requests are disabled for this forge"));
        }
        let mut recorded = self.pull_requests.borrow_mut();
        recorded.push((repo.clone(), request.clone()));
        Ok(format!("https://forge.test/{repo}/pull/{}", recorded.len()))
    }
}

/// Quality probe driven by the working copy's [`QUALITY_FILE`].
///
/// Lines: `tests=pass|fail`, `lint=<n>|crash`, and any number of
/// `penalty=<path>:<n>` (adds `n` lint issues while `path` is absent).
/// A missing file means passing tests and no lint issues.
///
/// Every lint run records the working copy's files (minus `.git`) so tests can
/// check which state each candidate was scored against.
#[derive(Default)]
pub struct MarkerProbe {
    observed: RefCell<Vec<BTreeMap<String, String>>>,
    lint_runs: Cell<usize>,
    kill_after: Option<(PathBuf, usize)>,
}

impl MarkerProbe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create `path` right after the `runs`-th lint run.
    pub fn engage_kill_switch_after(mut self, path: impl Into<PathBuf>, runs: usize) -> Self {
        self.kill_after = Some((path.into(), runs));
        self
    }

    /// Working-copy contents seen at each lint run, in order.
    pub fn observed(&self) -> Vec<BTreeMap<String, String>> {
        self.observed.borrow().clone()
    }

    pub fn lint_runs(&self) -> usize {
        self.lint_runs.get()
    }
}

impl QualityProbe for MarkerProbe {
    fn run_tests(&self, root: &Path) -> ToolRun<bool> {
        let markers = read_quality(root);
        ToolRun {
            result: Ok(markers.tests_passed),
            raw_output: format!("tests_passed={}\n", markers.tests_passed),
        }
    }

    fn run_lint(&self, root: &Path) -> ToolRun<u32> {
        self.observed.borrow_mut().push(snapshot_files(root));
        let runs = self.lint_runs.get() + 1;
        self.lint_runs.set(runs);
        if let Some((path, after)) = &self.kill_after
            && runs == *after
        {
            let _ = fs::write(path, "");
        }

        let markers = read_quality(root);
        let result = match markers.lint {
            Some(lint) => {
                let penalty: u32 = markers
                    .penalties
                    .iter()
                    .filter(|(path, _)| !root.join(path).exists())
                    .map(|(_, n)| *n)
                    .sum();
                Ok(lint + penalty)
            }
            None => Err(ToolFailure::UnexpectedExit {
                tool: "lint",
                code: Some(2),
            }),
        };
        ToolRun {
            raw_output: format!("{result:?}\n"),
            result,
        }
    }
}

struct QualityMarkers {
    tests_passed: bool,
    /// `None` means the linter crashes.
    lint: Option<u32>,
    penalties: Vec<(String, u32)>,
}

fn read_quality(root: &Path) -> QualityMarkers {
    let mut markers = QualityMarkers {
        tests_passed: true,
        lint: Some(0),
        penalties: Vec::new(),
    };
    let Ok(text) = fs::read_to_string(root.join(QUALITY_FILE)) else {
        return markers;
    };
    for line in text.lines() {
        match line.trim().split_once('=') {
            Some(("tests", value)) => markers.tests_passed = value.trim() == "pass",
            Some(("lint", value)) => markers.lint = value.trim().parse().ok(),
            Some(("penalty", value)) => {
                if let Some((path, n)) = value.trim().rsplit_once(':')
                    && let Ok(n) = n.parse()
                {
                    markers.penalties.push((path.to_string(), n));
                }
            }
            _ => {}
        }
    }
    markers
}

/// Relative path → content for every file under `root` except `.git`.
pub fn snapshot_files(root: &Path) -> BTreeMap<String, String> {
    WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .filter_entry(|entry| entry.file_name() != ".git")
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| {
            let relative = entry.path().strip_prefix(root).ok()?.to_string_lossy().into_owned();
            let content = fs::read_to_string(entry.path()).ok()?;
            Some((relative, content))
        })
        .collect()
}

/// Completion backend with a canned response; remembers every prompt.
pub struct ScriptedCompletion {
    response: CompletionResponse,
    prompts: RefCell<Vec<String>>,
}

impl ScriptedCompletion {
    pub fn text(response: &str) -> Self {
        Self {
            response: CompletionResponse::Text(response.to_string()),
            prompts: RefCell::new(Vec::new()),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            response: CompletionResponse::Unavailable,
            prompts: RefCell::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.borrow().clone()
    }
}

impl Completion for ScriptedCompletion {
    fn complete(&self, prompt: &str, _max_tokens: u32, _temperature: f64) -> CompletionResponse {
        self.prompts.borrow_mut().push(prompt.to_string());
        self.response.clone()
    }
}

/// Candidate source returning the same proposals every time.
pub struct FixedSource {
    proposals: Vec<Proposal>,
    contexts: RefCell<Vec<RepositoryContext>>,
}

impl FixedSource {
    pub fn new(proposals: Vec<Proposal>) -> Self {
        Self {
            proposals,
            contexts: RefCell::new(Vec::new()),
        }
    }

    /// Contexts passed to `propose`, in call order.
    pub fn contexts(&self) -> Vec<RepositoryContext> {
        self.contexts.borrow().clone()
    }
}

impl CandidateSource for FixedSource {
    fn propose(&self, context: &RepositoryContext, max_candidates: usize) -> Vec<Proposal> {
        self.contexts.borrow_mut().push(context.clone());
        self.proposals.iter().take(max_candidates).cloned().collect()
    }
}

/// A full-file edit proposal.
pub fn edit(file: &str, new_content: &str, reason: &str) -> Proposal {
    Proposal::Edit(crate::core::types::Candidate {
        file: file.to_string(),
        new_content: new_content.to_string(),
        reason: reason.to_string(),
    })
}
