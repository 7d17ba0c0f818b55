//! Knowledge graph of repositories, their source files and benchmark timings.
//!
//! Stored as one JSON document. Node keys are `<owner>/<name>` for
//! repositories, `<owner>/<name>:<path>` for files and
//! `<owner>/<name>:bench:<path>` for benchmarks.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument, warn};
use walkdir::WalkDir;

use crate::core::allowlist::RepoId;
use crate::io::archive::write_json;
use crate::io::config::GraphConfig;
use crate::io::process::{command_from_argv, run_command_with_timeout};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Repo,
    File,
    Bench,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relation {
    Contains,
    Benchmarked,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub kind: NodeKind,
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GraphEdge {
    pub from: String,
    pub to: String,
    pub relation: Relation,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeGraph {
    pub nodes: BTreeMap<String, GraphNode>,
    pub edges: Vec<GraphEdge>,
}

/// Wall-clock time of one benchmark script; `None` when it failed.
#[derive(Debug, Clone, PartialEq)]
pub struct BenchTiming {
    pub path: String,
    pub seconds: Option<f64>,
}

impl KnowledgeGraph {
    /// Load the graph; a missing file is an empty graph.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parse {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        write_json(path, self)
    }

    /// Insert a node or merge `attributes` into the existing one.
    pub fn upsert_node(&mut self, key: &str, kind: NodeKind, attributes: BTreeMap<String, Value>) {
        let node = self
            .nodes
            .entry(key.to_string())
            .or_insert_with(|| GraphNode {
                kind,
                attributes: BTreeMap::new(),
            });
        node.kind = kind;
        node.attributes.extend(attributes);
    }

    /// Add an edge unless it already exists.
    pub fn add_edge(&mut self, from: &str, to: &str, relation: Relation) {
        let edge = GraphEdge {
            from: from.to_string(),
            to: to.to_string(),
            relation,
        };
        if let Err(index) = self.edges.binary_search(&edge) {
            self.edges.insert(index, edge);
        }
    }

    /// Merge one repository's files and benchmark timings.
    pub fn merge_repository(&mut self, repo: &RepoId, files: &[String], benches: &[BenchTiming]) {
        let repo_key = repo.to_string();
        self.upsert_node(&repo_key, NodeKind::Repo, BTreeMap::new());
        for file in files {
            let key = format!("{repo_key}:{file}");
            self.upsert_node(
                &key,
                NodeKind::File,
                BTreeMap::from([("path".to_string(), Value::from(file.as_str()))]),
            );
            self.add_edge(&repo_key, &key, Relation::Contains);
        }
        for bench in benches {
            let key = format!("{repo_key}:bench:{}", bench.path);
            let seconds = bench.seconds.map_or(Value::Null, Value::from);
            self.upsert_node(
                &key,
                NodeKind::Bench,
                BTreeMap::from([
                    ("path".to_string(), Value::from(bench.path.as_str())),
                    ("seconds".to_string(), seconds),
                ]),
            );
            self.add_edge(&repo_key, &key, Relation::Benchmarked);
        }
    }
}

/// Relative paths (sorted, `/`-separated) of files with one of `extensions`, `.git` excluded.
pub fn source_files(root: &Path, extensions: &[String]) -> Result<Vec<String>> {
    let mut files = Vec::new();
    let walker = WalkDir::new(root)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.file_name() != ".git");
    for entry in walker {
        let entry = entry.context("walk working copy")?;
        if !entry.file_type().is_file() {
            continue;
        }
        let matches = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| extensions.iter().any(|wanted| wanted == ext));
        if !matches {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(root)
            .context("entry outside working copy")?;
        files.push(relative.to_string_lossy().replace('\\', "/"));
    }
    Ok(files)
}

/// Run every file under `config.bench_dir` with `config.bench_command`, timing each.
#[instrument(skip_all, fields(bench_dir = %config.bench_dir))]
pub fn run_benchmarks(root: &Path, config: &GraphConfig) -> Result<Vec<BenchTiming>> {
    let bench_root = root.join(&config.bench_dir);
    if !bench_root.is_dir() {
        return Ok(Vec::new());
    }
    let timeout = Duration::from_secs(config.bench_timeout_secs);
    let mut timings = Vec::new();
    for entry in WalkDir::new(&bench_root).min_depth(1).sort_by_file_name() {
        let entry = entry.context("walk benchmarks")?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(root)
            .context("benchmark outside working copy")?
            .to_string_lossy()
            .replace('\\', "/");
        let mut argv = config.bench_command.clone();
        argv.push(relative.clone());
        let started = Instant::now();
        let finished = command_from_argv(&argv, root)
            .and_then(|cmd| run_command_with_timeout(cmd, None, timeout, 64 * 1024));
        let seconds = match finished {
            Ok(out) if out.success() => Some(round_millis(started.elapsed())),
            Ok(out) => {
                warn!(bench = %relative, exit_code = ?out.status.code(), timed_out = out.timed_out, "benchmark failed");
                None
            }
            Err(err) => {
                warn!(bench = %relative, err = %format!("{err:#}"), "benchmark could not start");
                None
            }
        };
        debug!(bench = %relative, ?seconds, "benchmark finished");
        timings.push(BenchTiming {
            path: relative,
            seconds,
        });
    }
    Ok(timings)
}

fn round_millis(elapsed: Duration) -> f64 {
    (elapsed.as_secs_f64() * 1000.0).round() / 1000.0
}
