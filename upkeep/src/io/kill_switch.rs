//! Cooperative kill switch: a sentinel file whose existence stops the run.

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::warn;

/// The kill switch was found at a checkpoint. Recover with `downcast_ref`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KillSwitchEngaged {
    pub path: PathBuf,
}

impl fmt::Display for KillSwitchEngaged {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "kill switch engaged ({})", self.path.display())
    }
}

impl std::error::Error for KillSwitchEngaged {}

#[derive(Debug, Clone)]
pub struct KillSwitch {
    path: PathBuf,
}

impl KillSwitch {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True when the sentinel exists. Its content is never read.
    pub fn engaged(&self) -> bool {
        self.path.exists()
    }

    /// Checkpoint: `Err(KillSwitchEngaged)` when the sentinel exists.
    pub fn check(&self) -> Result<()> {
        if self.engaged() {
            warn!(path = %self.path.display(), "kill switch engaged");
            return Err(KillSwitchEngaged {
                path: self.path.clone(),
            }
            .into());
        }
        Ok(())
    }
}
