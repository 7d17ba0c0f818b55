//! Agent configuration stored in `upkeep.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::types::SafeMutation;

/// Default configuration file name, relative to the current directory.
pub const DEFAULT_CONFIG_FILE: &str = "upkeep.toml";

/// Agent configuration (TOML).
///
/// Built once at the start of a run and passed by reference to every
/// component. Missing fields fall back to the defaults below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentConfig {
    /// Minimum delta, in percent, a candidate must reach to be accepted.
    #[serde(alias = "IMPROVEMENT_MARGIN")]
    pub improvement_margin: f64,

    /// Maximum candidates considered per repository.
    #[serde(alias = "MAX_ITERATIONS")]
    pub max_iterations: u32,

    /// Sentinel file whose existence stops the run at the next checkpoint.
    #[serde(alias = "KILL_SWITCH_FILE")]
    pub kill_switch_file: PathBuf,

    /// Line-oriented `owner/name` list of repositories to process.
    pub allowlist: PathBuf,
    pub work_dir: PathBuf,
    pub artifacts_dir: PathBuf,
    pub logs_dir: PathBuf,

    /// Push accepted changes straight to the default branch instead of opening a pull request.
    pub direct_push: bool,
    pub strategy: Strategy,
    pub missing_tests: MissingTestsPolicy,

    pub identity: IdentityConfig,
    pub forge: ForgeConfig,
    pub quality: QualityConfig,
    pub mutations: MutationsConfig,
    pub generative: GenerativeConfig,
    pub memory: MemoryConfig,
    pub graph: GraphConfig,
}

/// Which candidate source proposes edits.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    #[default]
    Deterministic,
    Generative,
}

/// How a working copy without a test suite is scored.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MissingTestsPolicy {
    /// No test suite counts as passing.
    #[default]
    Pass,
    /// No test suite counts as failing.
    Fail,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct IdentityConfig {
    pub name: String,
    pub email: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            name: "upkeep-bot".to_string(),
            email: "upkeep-bot@users.noreply.github.com".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ForgeConfig {
    pub host: String,
    /// Environment variables searched, in order, for the access token.
    pub token_env: Vec<String>,
    pub branch_prefix: String,
    pub pull_request_title: String,
    /// Timeout for clone, push and pull-request commands.
    pub command_timeout_secs: u64,
}

impl Default for ForgeConfig {
    fn default() -> Self {
        Self {
            host: "github.com".to_string(),
            token_env: vec!["UPKEEP_TOKEN".to_string(), "GITHUB_TOKEN".to_string()],
            branch_prefix: "upkeep/auto-".to_string(),
            pull_request_title: "upkeep: automated improvement".to_string(),
            command_timeout_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct QualityConfig {
    /// Root-level entries whose presence means the repository has a test suite.
    pub test_markers: Vec<String>,
    pub test_command: Vec<String>,
    pub lint_command: Vec<String>,
    /// Linter exit codes that mean "ran" (with or without findings).
    pub lint_ok_exit_codes: Vec<i32>,
    pub timeout_secs: u64,
    pub output_limit_bytes: usize,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            test_markers: vec!["tests".to_string(), "pytest.ini".to_string()],
            test_command: vec![
                "python".to_string(),
                "-m".to_string(),
                "pytest".to_string(),
                "-q".to_string(),
            ],
            lint_command: vec!["flake8".to_string(), ".".to_string()],
            lint_ok_exit_codes: vec![0, 1],
            timeout_secs: 15 * 60,
            output_limit_bytes: 1_000_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MutationsConfig {
    /// Mutation table, applied in this order.
    pub enabled: Vec<SafeMutation>,
    pub format_command: Vec<String>,
}

impl Default for MutationsConfig {
    fn default() -> Self {
        Self {
            enabled: vec![
                SafeMutation::Editorconfig,
                SafeMutation::Badge,
                SafeMutation::Format,
            ],
            format_command: vec!["python".to_string(), "-m".to_string(), "black".to_string(), ".".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GenerativeConfig {
    /// Completion backend; the prompt is written to its stdin. Empty means unavailable.
    pub command: Vec<String>,
    pub max_tokens: u32,
    pub temperature: f64,
    pub timeout_secs: u64,
    pub output_limit_bytes: usize,
    pub prompt_budget_bytes: usize,
}

impl Default for GenerativeConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            max_tokens: 2048,
            temperature: 0.2,
            timeout_secs: 120,
            output_limit_bytes: 1_000_000,
            prompt_budget_bytes: 32_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MemoryConfig {
    pub path: PathBuf,
    /// Memories included in a generative prompt.
    pub recall: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("memory.jsonl"),
            recall: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GraphConfig {
    pub enabled: bool,
    pub path: PathBuf,
    /// Directory, relative to the working copy, holding benchmark scripts.
    pub bench_dir: String,
    pub bench_command: Vec<String>,
    pub bench_timeout_secs: u64,
    pub source_extensions: Vec<String>,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: PathBuf::from("knowledge_graph.json"),
            bench_dir: "benchmarks".to_string(),
            bench_command: vec!["python".to_string()],
            bench_timeout_secs: 300,
            source_extensions: vec!["py".to_string()],
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            improvement_margin: 5.0,
            max_iterations: 10,
            kill_switch_file: PathBuf::from("KILL_UPKEEP"),
            allowlist: PathBuf::from("repos.txt"),
            work_dir: PathBuf::from("_upkeep_work"),
            artifacts_dir: PathBuf::from("artifacts"),
            logs_dir: PathBuf::from("logs"),
            direct_push: false,
            strategy: Strategy::default(),
            missing_tests: MissingTestsPolicy::default(),
            identity: IdentityConfig::default(),
            forge: ForgeConfig::default(),
            quality: QualityConfig::default(),
            mutations: MutationsConfig::default(),
            generative: GenerativeConfig::default(),
            memory: MemoryConfig::default(),
            graph: GraphConfig::default(),
        }
    }
}

impl AgentConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.improvement_margin.is_finite() {
            return Err(anyhow!("improvement_margin must be a finite number"));
        }
        if self.max_iterations == 0 {
            return Err(anyhow!("max_iterations must be > 0"));
        }
        if self.kill_switch_file.as_os_str().is_empty() {
            return Err(anyhow!("kill_switch_file must not be empty"));
        }
        if self.work_dir.as_os_str().is_empty() || self.artifacts_dir.as_os_str().is_empty() {
            return Err(anyhow!("work_dir and artifacts_dir must not be empty"));
        }
        if self.identity.name.trim().is_empty() || self.identity.email.trim().is_empty() {
            return Err(anyhow!("identity.name and identity.email must be set"));
        }
        if self.forge.host.trim().is_empty() {
            return Err(anyhow!("forge.host must not be empty"));
        }
        if self.forge.token_env.is_empty() {
            return Err(anyhow!("forge.token_env must list at least one variable"));
        }
        if self.forge.command_timeout_secs == 0 {
            return Err(anyhow!("forge.command_timeout_secs must be > 0"));
        }
        require_command("quality.test_command", &self.quality.test_command)?;
        require_command("quality.lint_command", &self.quality.lint_command)?;
        if self.quality.timeout_secs == 0 || self.quality.output_limit_bytes == 0 {
            return Err(anyhow!(
                "quality.timeout_secs and quality.output_limit_bytes must be > 0"
            ));
        }
        if self.mutations.enabled.contains(&SafeMutation::Format) {
            require_command("mutations.format_command", &self.mutations.format_command)?;
        }
        let generative = &self.generative;
        if !generative.temperature.is_finite() || generative.temperature < 0.0 {
            return Err(anyhow!("generative.temperature must be >= 0"));
        }
        if generative.timeout_secs == 0
            || generative.output_limit_bytes == 0
            || generative.prompt_budget_bytes == 0
        {
            return Err(anyhow!(
                "generative timeout, output limit and prompt budget must be > 0"
            ));
        }
        if self.graph.enabled {
            require_command("graph.bench_command", &self.graph.bench_command)?;
            if self.graph.bench_timeout_secs == 0 {
                return Err(anyhow!("graph.bench_timeout_secs must be > 0"));
            }
        }
        Ok(())
    }

    /// First non-empty token found in the configured environment variables.
    pub fn token_from_env(&self) -> Option<String> {
        self.forge
            .token_env
            .iter()
            .filter_map(|name| std::env::var(name).ok())
            .map(|value| value.trim().to_string())
            .find(|value| !value.is_empty())
    }
}

fn require_command(key: &str, command: &[String]) -> Result<()> {
    if command.first().is_none_or(|program| program.trim().is_empty()) {
        return Err(anyhow!("{key} must be a non-empty array"));
    }
    Ok(())
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `AgentConfig::default()`.
pub fn load_config(path: &Path) -> Result<AgentConfig> {
    if !path.exists() {
        let cfg = AgentConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: AgentConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &AgentConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, buf.as_bytes())
}

/// Write `contents` next to `path` and rename it into place.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}
