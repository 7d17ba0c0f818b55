//! Decision-gate states and the legal transitions between them.

use std::fmt;

use anyhow::{Result, bail};

/// Where one repository's processing currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Idle,
    /// A fresh working copy exists.
    Cloned,
    BaselineScored,
    CandidateApplied,
    Rescored,
    Accepted,
    /// The working copy was discarded; a fresh clone follows before the next candidate.
    Rejected,
    /// The kill switch stopped the run between candidates.
    Aborted,
    Done,
}

impl GateState {
    pub fn as_str(self) -> &'static str {
        match self {
            GateState::Idle => "idle",
            GateState::Cloned => "cloned",
            GateState::BaselineScored => "baseline_scored",
            GateState::CandidateApplied => "candidate_applied",
            GateState::Rescored => "rescored",
            GateState::Accepted => "accepted",
            GateState::Rejected => "rejected",
            GateState::Aborted => "aborted",
            GateState::Done => "done",
        }
    }
}

impl fmt::Display for GateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// True when the gate may move from `from` to `to`.
///
/// A candidate can only be applied to a freshly scored baseline or after a
/// rejection (which re-clones). Nothing follows `Accepted` except `Done`, so
/// at most one candidate per repository is accepted.
pub fn can_advance(from: GateState, to: GateState) -> bool {
    use GateState::{
        Aborted, Accepted, BaselineScored, CandidateApplied, Cloned, Done, Idle, Rejected,
        Rescored,
    };
    matches!(
        (from, to),
        (Idle, Cloned)
            | (Cloned, BaselineScored)
            | (BaselineScored, CandidateApplied)
            | (BaselineScored, Done)
            | (BaselineScored, Aborted)
            | (CandidateApplied, Rescored)
            | (CandidateApplied, Rejected)
            | (Rescored, Accepted)
            | (Rescored, Rejected)
            | (Rejected, CandidateApplied)
            | (Rejected, Done)
            | (Rejected, Aborted)
            | (Accepted, Done)
    )
}

/// Tracks the current state and refuses illegal transitions.
#[derive(Debug, Clone)]
pub struct GateTracker {
    state: GateState,
    history: Vec<GateState>,
}

impl Default for GateTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl GateTracker {
    pub fn new() -> Self {
        Self {
            state: GateState::Idle,
            history: vec![GateState::Idle],
        }
    }

    pub fn state(&self) -> GateState {
        self.state
    }

    /// Every state visited so far, starting with `Idle`.
    pub fn history(&self) -> &[GateState] {
        &self.history
    }

    pub fn advance(&mut self, to: GateState) -> Result<()> {
        if !can_advance(self.state, to) {
            bail!("illegal gate transition {} -> {}", self.state, to);
        }
        self.state = to;
        self.history.push(to);
        Ok(())
    }
}
