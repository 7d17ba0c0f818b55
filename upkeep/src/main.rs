//! `upkeep`: unattended repository maintenance with a score-delta decision gate.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;

use upkeep::batch::{RunStatus, run_from_config};
use upkeep::core::score::score;
use upkeep::exit_codes;
use upkeep::io::config::{AgentConfig, DEFAULT_CONFIG_FILE, load_config, write_config};
use upkeep::io::memory::MemoryStore;
use upkeep::io::quality::{Assessor, CommandProbe};
use upkeep::logging;

const EXAMPLE_ALLOWLIST: &str = "# One owner/name per line. Lines starting with # are ignored.\n";

#[derive(Parser)]
#[command(
    name = "upkeep",
    version,
    about = "Autonomous repository maintenance with a score-delta decision gate"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Process every allowlisted repository.
    Run {
        #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,
    },
    /// Score a local directory with the configured test and lint tools.
    Assess {
        path: PathBuf,
        #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,
    },
    /// Write a default `upkeep.toml` and `repos.txt` if missing.
    Init {
        /// Overwrite existing files.
        #[arg(short, long)]
        force: bool,
    },
    /// Show remembered events most similar to QUERY.
    Recall {
        query: String,
        #[arg(long, default_value_t = 5)]
        top: usize,
        #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,
    },
}

#[derive(Serialize)]
struct AssessReport {
    tests_passed: bool,
    lint_issue_count: u32,
    score: f64,
}

fn main() {
    let code = match dispatch(Cli::parse()) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

fn dispatch(cli: Cli) -> Result<i32> {
    match cli.command {
        Command::Run { config } => cmd_run(&config),
        Command::Assess { path, config } => cmd_assess(&path, &config),
        Command::Init { force } => cmd_init(force),
        Command::Recall { query, top, config } => cmd_recall(&query, top, &config),
    }
}

fn cmd_run(config_path: &Path) -> Result<i32> {
    let config = load_config(config_path)?;
    logging::init(Some(&config.logs_dir))?;
    let status = run_from_config(&config, config.token_from_env())?;
    let code = match status {
        RunStatus::Completed(outcome) => {
            info!(
                accepted = outcome.accepted_count(),
                failed = outcome.failed_count(),
                "run complete"
            );
            exit_codes::OK
        }
        RunStatus::Aborted(_) => exit_codes::ABORTED,
        RunStatus::MissingCredential | RunStatus::EmptyAllowlist => exit_codes::OK,
    };
    Ok(code)
}

fn cmd_assess(path: &Path, config_path: &Path) -> Result<i32> {
    let config = load_config(config_path)?;
    logging::init(None)?;
    let probe = CommandProbe::new(config.quality.clone());
    let assessor = Assessor::new(&probe, config.quality.test_markers.clone(), config.missing_tests);
    let measurement = assessor.assess(path, None);
    let report = AssessReport {
        tests_passed: measurement.tests_passed,
        lint_issue_count: measurement.lint_issue_count,
        score: score(&measurement),
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("serialize report")?
    );
    Ok(exit_codes::OK)
}

fn cmd_init(force: bool) -> Result<i32> {
    let config_path = Path::new(DEFAULT_CONFIG_FILE);
    if force || !config_path.exists() {
        write_config(config_path, &AgentConfig::default())?;
    }
    let config = load_config(config_path)?;
    write_if_missing_or_force(&config.allowlist, EXAMPLE_ALLOWLIST, force)?;
    Ok(exit_codes::OK)
}

fn cmd_recall(query: &str, top: usize, config_path: &Path) -> Result<i32> {
    let config = load_config(config_path)?;
    logging::init(None)?;
    for hit in MemoryStore::new(&config.memory.path).query(query, top)? {
        println!(
            "{:.3}\t{}\t{}",
            hit.score, hit.record.timestamp, hit.record.text
        );
    }
    Ok(exit_codes::OK)
}

fn write_if_missing_or_force(path: &Path, contents: &str, force: bool) -> Result<()> {
    if !force && path.exists() {
        return Ok(());
    }
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}
