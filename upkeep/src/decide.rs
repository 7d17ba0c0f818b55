//! Decision gate for one repository.
//!
//! Protocol: fresh clone → baseline score → for each candidate: kill-switch
//! checkpoint → apply → rescore → accept (publish, remember, stop) or reject
//! (archive diff, re-clone) → "after" snapshot → release the working copy.
//!
//! Every candidate is evaluated against the same untouched baseline: a
//! rejected candidate's working copy is discarded and replaced by a new clone
//! before the next candidate is applied. After the last candidate no clone is
//! made, so the "after" snapshot then shows the last rejected attempt.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use chrono::{SecondsFormat, Utc};
use tracing::{debug, error, info, info_span, warn};

use crate::core::allowlist::RepoId;
use crate::core::gate::{GateState, GateTracker};
use crate::core::score::{delta, meets_margin, score};
use crate::core::types::{DecisionOutcome, Proposal};
use crate::io::apply::apply_candidate;
use crate::io::archive::Archive;
use crate::io::config::AgentConfig;
use crate::io::context::{RepositoryContext, gather_context};
use crate::io::forge::Forge;
use crate::io::graph::{KnowledgeGraph, run_benchmarks, source_files};
use crate::io::kill_switch::KillSwitch;
use crate::io::memory::MemoryStore;
use crate::io::mutations::{MutationEnv, apply_mutation};
use crate::io::publish::{PublishSettings, publish};
use crate::io::quality::{Assessor, QualityProbe};
use crate::io::workspace::{WorkingCopy, Workspaces};
use crate::propose::CandidateSource;

/// External collaborators the gate drives.
#[derive(Clone, Copy)]
pub struct Collaborators<'a> {
    pub forge: &'a dyn Forge,
    pub probe: &'a dyn QualityProbe,
    pub source: &'a dyn CandidateSource,
}

/// Runs the accept/reject protocol, one repository at a time.
pub struct DecisionGate<'a> {
    config: &'a AgentConfig,
    collaborators: Collaborators<'a>,
    workspaces: Workspaces,
    archive: Archive,
    memory: MemoryStore,
    kill_switch: KillSwitch,
}

/// Running counts for the decision record.
#[derive(Debug, Default)]
struct Tally {
    considered: u32,
    rejected: u32,
    best_delta: Option<f64>,
}

/// The accepted candidate and what publishing it produced.
#[derive(Debug)]
struct Acceptance {
    delta: f64,
    reference: Option<String>,
    pushed: bool,
    publish_error: Option<String>,
}

impl<'a> DecisionGate<'a> {
    pub fn new(config: &'a AgentConfig, collaborators: Collaborators<'a>) -> Self {
        Self {
            config,
            collaborators,
            workspaces: Workspaces::new(
                &config.work_dir,
                config.identity.clone(),
                Duration::from_secs(config.forge.command_timeout_secs),
            ),
            archive: Archive::new(&config.artifacts_dir),
            memory: MemoryStore::new(&config.memory.path),
            kill_switch: KillSwitch::new(&config.kill_switch_file),
        }
    }

    pub fn kill_switch(&self) -> &KillSwitch {
        &self.kill_switch
    }

    /// Process one repository and write its decision record.
    ///
    /// Errors are fatal to this repository only, except [`KillSwitchEngaged`],
    /// which the caller must treat as a whole-run abort.
    ///
    /// [`KillSwitchEngaged`]: crate::io::kill_switch::KillSwitchEngaged
    pub fn process_repository(&self, repo: &RepoId) -> Result<DecisionOutcome> {
        let span = info_span!("repository", repo = %repo);
        let _entered = span.enter();

        let mut gate = GateTracker::new();
        let copy = self
            .workspaces
            .acquire(repo, self.collaborators.forge)
            .context("acquire working copy")?;
        gate.advance(GateState::Cloned)?;

        let mut slot = Some(copy);
        let attempt = self.evaluate(repo, &mut slot, &mut gate);
        if let Some(copy) = slot.take() {
            self.workspaces.release(copy);
        }
        let outcome = attempt?;
        debug!(states = ?gate.history(), "gate finished");

        if let Err(err) = self.archive.record_outcome(repo, &outcome) {
            error!(err = %format!("{err:#}"), "failed to write decision record");
        }
        Ok(outcome)
    }

    fn evaluate(
        &self,
        repo: &RepoId,
        slot: &mut Option<WorkingCopy>,
        gate: &mut GateTracker,
    ) -> Result<DecisionOutcome> {
        let config = self.config;
        let assessor = Assessor::new(
            self.collaborators.probe,
            config.quality.test_markers.clone(),
            config.missing_tests,
        );

        let copy = current(slot)?;
        let baseline = assessor.assess(
            copy.root(),
            Some(&self.archive.tool_log_dir(repo, "baseline")),
        );
        let baseline_score = score(&baseline);
        gate.advance(GateState::BaselineScored)?;
        info!(baseline_score, "baseline scored");
        self.snapshot(repo, copy.root(), "before");
        if config.graph.enabled {
            self.update_graph(repo, copy.root());
        }

        let context = self.context_for(copy);
        let max_candidates = usize::try_from(config.max_iterations).unwrap_or(usize::MAX);
        let proposals: Vec<Proposal> = self
            .collaborators
            .source
            .propose(&context, max_candidates)
            .into_iter()
            .take(max_candidates)
            .collect();
        if proposals.is_empty() {
            info!("no candidates proposed");
        }

        let mut tally = Tally::default();
        let mut acceptance = None;
        for (index, proposal) in proposals.iter().enumerate() {
            let ordinal = u32::try_from(index + 1).unwrap_or(u32::MAX);
            if let Err(err) = self.kill_switch.check() {
                gate.advance(GateState::Aborted)?;
                return Err(err);
            }

            let copy = current(slot)?;
            tally.considered += 1;
            gate.advance(GateState::CandidateApplied)?;
            info!(candidate = ordinal, proposal = %proposal.label(), "applying candidate");

            let verdict = match self.apply(copy, proposal) {
                Ok(()) => {
                    let after = assessor.assess(
                        copy.root(),
                        Some(&self.archive.tool_log_dir(repo, &format!("candidate-{ordinal}"))),
                    );
                    gate.advance(GateState::Rescored)?;
                    let candidate_delta = delta(baseline_score, score(&after));
                    tally.best_delta = Some(
                        tally
                            .best_delta
                            .map_or(candidate_delta, |best| best.max(candidate_delta)),
                    );
                    Some(candidate_delta)
                }
                Err(err) => {
                    warn!(candidate = ordinal, err = %format!("{err:#}"), "candidate could not be applied");
                    None
                }
            };

            if let Some(candidate_delta) = verdict
                && meets_margin(candidate_delta, config.improvement_margin)
            {
                gate.advance(GateState::Accepted)?;
                info!(
                    candidate = ordinal,
                    delta = candidate_delta,
                    margin = config.improvement_margin,
                    "candidate accepted"
                );
                acceptance = Some(self.accept(repo, copy, proposal, candidate_delta));
                break;
            }

            info!(
                candidate = ordinal,
                delta = ?verdict,
                margin = config.improvement_margin,
                "candidate rejected"
            );
            self.archive_rejection(repo, copy, ordinal);
            gate.advance(GateState::Rejected)?;
            tally.rejected += 1;

            if index + 1 == proposals.len() {
                break;
            }
            let rejected = slot
                .take()
                .ok_or_else(|| anyhow!("working copy missing after rejection"))?;
            *slot = Some(
                self.workspaces
                    .reacquire(rejected, self.collaborators.forge)
                    .context("re-acquire working copy after rejection")?,
            );
        }

        self.snapshot(repo, current(slot)?.root(), "after");
        gate.advance(GateState::Done)?;

        let outcome = match acceptance {
            Some(accepted) => DecisionOutcome {
                repository: repo.to_string(),
                accepted: true,
                delta: accepted.delta,
                baseline_score,
                published_reference: accepted.reference,
                pushed: accepted.pushed,
                candidates_considered: tally.considered,
                candidates_rejected: tally.rejected,
                publish_error: accepted.publish_error,
                recorded_at: now_rfc3339(),
            },
            None => {
                info!(
                    considered = tally.considered,
                    rejected = tally.rejected,
                    "no candidate accepted"
                );
                DecisionOutcome {
                    repository: repo.to_string(),
                    accepted: false,
                    delta: tally.best_delta.unwrap_or(0.0),
                    baseline_score,
                    published_reference: None,
                    pushed: false,
                    candidates_considered: tally.considered,
                    candidates_rejected: tally.rejected,
                    publish_error: None,
                    recorded_at: now_rfc3339(),
                }
            }
        };
        Ok(outcome)
    }

    fn apply(&self, copy: &WorkingCopy, proposal: &Proposal) -> Result<()> {
        match proposal {
            Proposal::Edit(candidate) => apply_candidate(copy.root(), candidate).map(|_| ()),
            Proposal::Mutation(mutation) => apply_mutation(
                copy.root(),
                *mutation,
                &MutationEnv {
                    repo_name: copy.repo().name(),
                    format_command: &self.config.mutations.format_command,
                    timeout: Duration::from_secs(self.config.quality.timeout_secs),
                },
            ),
        }
    }

    /// Publish the accepted candidate and remember it. Publish failures are recorded, not raised.
    fn accept(
        &self,
        repo: &RepoId,
        copy: &WorkingCopy,
        proposal: &Proposal,
        candidate_delta: f64,
    ) -> Acceptance {
        let settings = PublishSettings {
            direct_push: self.config.direct_push,
            branch_prefix: &self.config.forge.branch_prefix,
            pull_request_title: &self.config.forge.pull_request_title,
            timeout: Duration::from_secs(self.config.forge.command_timeout_secs),
        };
        match publish(copy, self.collaborators.forge, proposal.reason(), &settings) {
            Ok(published) => {
                let text = format!("Accepted change on {repo}: {}", proposal.reason());
                let metadata = BTreeMap::from([
                    ("repo".to_string(), repo.to_string()),
                    ("delta".to_string(), format!("{candidate_delta:.2}")),
                    ("reference".to_string(), published.reference.clone()),
                ]);
                if let Err(err) = self.memory.add(&text, metadata) {
                    warn!(err = %format!("{err:#}"), "failed to record acceptance in memory");
                }
                Acceptance {
                    delta: candidate_delta,
                    reference: Some(published.reference),
                    pushed: published.pushed,
                    publish_error: None,
                }
            }
            Err(err) => {
                let message = format!("{err:#}");
                error!(err = %message, "failed to publish accepted candidate");
                Acceptance {
                    delta: candidate_delta,
                    reference: None,
                    pushed: false,
                    publish_error: Some(message),
                }
            }
        }
    }

    fn archive_rejection(&self, repo: &RepoId, copy: &WorkingCopy, ordinal: u32) {
        let recorded = copy
            .git()
            .diff_from_head()
            .and_then(|diff| self.archive.record_rejection(repo, ordinal, &diff));
        if let Err(err) = recorded {
            warn!(candidate = ordinal, err = %format!("{err:#}"), "failed to archive rejected diff");
        }
    }

    fn snapshot(&self, repo: &RepoId, root: &Path, tag: &str) {
        if let Err(err) = self.archive.snapshot(repo, root, tag) {
            warn!(tag, err = %format!("{err:#}"), "snapshot failed");
        }
    }

    fn context_for(&self, copy: &WorkingCopy) -> RepositoryContext {
        let repository = copy.repo().to_string();
        let memories = match self.memory.query(&repository, self.config.memory.recall) {
            Ok(hits) => hits.into_iter().map(|hit| hit.record.text).collect(),
            Err(err) => {
                warn!(err = %format!("{err:#}"), "memory recall failed");
                Vec::new()
            }
        };
        gather_context(copy.root(), &repository, copy.default_branch(), memories).unwrap_or_else(
            |err| {
                warn!(err = %format!("{err:#}"), "failed to describe working copy");
                RepositoryContext {
                    repository: repository.clone(),
                    default_branch: copy.default_branch().to_string(),
                    language: "unknown".to_string(),
                    ..RepositoryContext::default()
                }
            },
        )
    }

    fn update_graph(&self, repo: &RepoId, root: &Path) {
        let graph_config = &self.config.graph;
        let updated = (|| -> Result<()> {
            let files = source_files(root, &graph_config.source_extensions)?;
            let benches = run_benchmarks(root, graph_config)?;
            let mut graph = KnowledgeGraph::load(&graph_config.path)?;
            graph.merge_repository(repo, &files, &benches);
            graph.save(&graph_config.path)
        })();
        if let Err(err) = updated {
            warn!(err = %format!("{err:#}"), "failed to update knowledge graph");
        }
    }
}

fn current(slot: &Option<WorkingCopy>) -> Result<&WorkingCopy> {
    slot.as_ref().ok_or_else(|| anyhow!("working copy missing"))
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}
