//! Autonomous repository-maintenance agent.
//!
//! For each allowlisted repository the agent clones a fresh working copy,
//! scores it (tests pass/fail minus lint findings), applies proposed
//! candidates one at a time, and accepts the first candidate whose score
//! delta meets the configured margin. Accepted changes are published as a
//! pull request (or pushed directly); rejected ones are archived as diffs and
//! discarded by re-cloning.
//!
//! - **[`core`]**: pure, deterministic logic (score, delta, parsing, gate
//!   transitions). No I/O.
//! - **[`io`]**: side-effecting collaborators (git, forge, quality tools,
//!   archive, memory, graph, completion backend).
//!
//! Orchestration: [`propose`] (candidate sources), [`decide`] (decision gate
//! for one repository), [`batch`] (allowlist loop).

pub mod batch;
pub mod core;
pub mod decide;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod propose;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
