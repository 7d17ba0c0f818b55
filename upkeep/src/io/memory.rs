//! Append-only memory log (JSON Lines), queried by text similarity.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::similarity::similarity;

/// One remembered event. Never rewritten once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub text: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    /// RFC 3339, UTC.
    pub timestamp: String,
}

/// A record with its similarity to the query.
#[derive(Debug, Clone, PartialEq)]
pub struct RecalledMemory {
    pub score: f64,
    pub record: MemoryRecord,
}

#[derive(Debug, Clone)]
pub struct MemoryStore {
    path: PathBuf,
}

impl MemoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a record stamped with the current time.
    pub fn add(&self, text: &str, metadata: BTreeMap<String, String>) -> Result<MemoryRecord> {
        let record = MemoryRecord {
            text: text.to_string(),
            metadata,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        };
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
        let mut line = serde_json::to_string(&record).context("serialize memory record")?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("open {}", self.path.display()))?;
        file.write_all(line.as_bytes())
            .with_context(|| format!("append {}", self.path.display()))?;
        debug!(path = %self.path.display(), "memory appended");
        Ok(record)
    }

    /// All readable records in insertion order. A missing file is an empty store.
    pub fn records(&self) -> Result<Vec<MemoryRecord>> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err).with_context(|| format!("read {}", self.path.display()));
            }
        };
        let mut records = Vec::new();
        for (index, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<MemoryRecord>(line) {
                Ok(record) => records.push(record),
                Err(err) => warn!(
                    path = %self.path.display(),
                    line = index + 1,
                    err = %err,
                    "skipping malformed memory line"
                ),
            }
        }
        Ok(records)
    }

    /// Up to `top` records, most similar to `text` first; ties keep insertion order.
    pub fn query(&self, text: &str, top: usize) -> Result<Vec<RecalledMemory>> {
        let mut scored: Vec<RecalledMemory> = self
            .records()?
            .into_iter()
            .map(|record| RecalledMemory {
                score: similarity(text, &record.text),
                record,
            })
            .collect();
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(top);
        Ok(scored)
    }
}
