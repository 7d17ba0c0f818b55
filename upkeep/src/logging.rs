//! Tracing setup.
//!
//! - **stderr**: compact, filtered by `RUST_LOG` (default `upkeep=info,warn`).
//! - **decision log**: when a logs directory is given, the same events are
//!   appended without ANSI colours to `<logs_dir>/decision.log`, the stream
//!   an operator reads after an unattended run.
//!
//! Raw tool output is not logged here; it lives in the audit archive.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result, anyhow};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

pub const DECISION_LOG_FILE: &str = "decision.log";
const DEFAULT_FILTER: &str = "upkeep=info,warn";

/// Initialize the global subscriber. Returns the decision log path when one was opened.
///
/// # Example
/// ```bash
/// RUST_LOG=upkeep=debug upkeep run
/// ```
pub fn init(logs_dir: Option<&Path>) -> Result<Option<PathBuf>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let (file_layer, log_path) = match logs_dir {
        Some(dir) => {
            let (file, path) = open_decision_log(dir)?;
            let layer = fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_writer(Mutex::new(file));
            (Some(layer), Some(path))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .with(file_layer)
        .try_init()
        .map_err(|err| anyhow!("initialize tracing: {err}"))?;
    Ok(log_path)
}

fn open_decision_log(dir: &Path) -> Result<(File, PathBuf)> {
    fs::create_dir_all(dir).with_context(|| format!("create logs dir {}", dir.display()))?;
    let path = dir.join(DECISION_LOG_FILE);
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("open {}", path.display()))?;
    Ok((file, path))
}
