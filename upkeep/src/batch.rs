//! Allowlist loop for `upkeep run`.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{error, info, warn};

use crate::core::allowlist::{RepoId, parse_allowlist};
use crate::core::types::DecisionOutcome;
use crate::decide::{Collaborators, DecisionGate};
use crate::io::completion::CommandCompletion;
use crate::io::config::{AgentConfig, Strategy};
use crate::io::forge::GithubForge;
use crate::io::kill_switch::KillSwitchEngaged;
use crate::io::prompt::PromptBuilder;
use crate::io::quality::CommandProbe;
use crate::propose::{CandidateSource, DeterministicSource, GenerativeSource};

/// What happened to one allowlisted repository.
#[derive(Debug, Clone, PartialEq)]
pub enum RepositoryReport {
    Decided(DecisionOutcome),
    /// The repository could not be processed; the batch moved on.
    Failed { repository: String, error: String },
}

/// Summary of a batch.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BatchOutcome {
    pub reports: Vec<RepositoryReport>,
    /// The kill switch stopped the batch early.
    pub aborted: bool,
}

impl BatchOutcome {
    pub fn accepted_count(&self) -> usize {
        self.reports
            .iter()
            .filter(|report| matches!(report, RepositoryReport::Decided(outcome) if outcome.accepted))
            .count()
    }

    pub fn failed_count(&self) -> usize {
        self.reports
            .iter()
            .filter(|report| matches!(report, RepositoryReport::Failed { .. }))
            .count()
    }
}

/// How `upkeep run` ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RunStatus {
    Completed(BatchOutcome),
    Aborted(BatchOutcome),
    /// No access token; nothing was processed.
    MissingCredential,
    /// The allowlist was missing or had no usable entries.
    EmptyAllowlist,
}

/// Process `repos` strictly one at a time, in order.
///
/// A repository failure is recorded and the batch continues. The kill switch,
/// checked before each repository and before each candidate, stops the batch.
pub fn run_batch(gate: &DecisionGate<'_>, repos: &[RepoId]) -> BatchOutcome {
    let mut outcome = BatchOutcome::default();
    for repo in repos {
        if gate.kill_switch().engaged() {
            warn!(path = %gate.kill_switch().path().display(), "kill switch engaged; stopping before {repo}");
            outcome.aborted = true;
            break;
        }
        match gate.process_repository(repo) {
            Ok(decision) => outcome.reports.push(RepositoryReport::Decided(decision)),
            Err(err) => {
                if let Some(engaged) = err.downcast_ref::<KillSwitchEngaged>() {
                    warn!(path = %engaged.path.display(), repo = %repo, "kill switch engaged; aborting run");
                    outcome.aborted = true;
                    break;
                }
                let message = format!("{err:#}");
                error!(repo = %repo, err = %message, "repository failed; continuing");
                outcome.reports.push(RepositoryReport::Failed {
                    repository: repo.to_string(),
                    error: message,
                });
            }
        }
    }
    info!(
        processed = outcome.reports.len(),
        accepted = outcome.accepted_count(),
        failed = outcome.failed_count(),
        aborted = outcome.aborted,
        "batch finished"
    );
    outcome
}

/// Load the allowlist; a missing file is an empty list.
pub fn load_allowlist(path: &Path) -> Result<Vec<RepoId>> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            warn!(path = %path.display(), "allowlist not found");
            return Ok(Vec::new());
        }
        Err(err) => return Err(err).with_context(|| format!("read {}", path.display())),
    };
    let allowlist = parse_allowlist(&text);
    for warning in &allowlist.warnings {
        warn!(path = %path.display(), "{warning}");
    }
    Ok(allowlist.repos)
}

/// Run the whole agent with production collaborators.
///
/// `token` is the forge access token, usually from [`AgentConfig::token_from_env`].
pub fn run_from_config(config: &AgentConfig, token: Option<String>) -> Result<RunStatus> {
    let Some(token) = token else {
        error!(
            vars = ?config.forge.token_env,
            "no access token found; nothing to do"
        );
        return Ok(RunStatus::MissingCredential);
    };
    let repos = load_allowlist(&config.allowlist)?;
    if repos.is_empty() {
        info!(path = %config.allowlist.display(), "allowlist is empty; nothing to do");
        return Ok(RunStatus::EmptyAllowlist);
    }

    let forge = GithubForge::new(&config.forge, token);
    let probe = CommandProbe::new(config.quality.clone());
    let completion = CommandCompletion::new(&config.generative, ".");
    let source: Box<dyn CandidateSource + '_> = match config.strategy {
        Strategy::Deterministic => Box::new(DeterministicSource::new(
            config.mutations.enabled.clone(),
        )),
        Strategy::Generative => Box::new(GenerativeSource::new(
            &completion,
            PromptBuilder::new(config.generative.prompt_budget_bytes),
            config.generative.max_tokens,
            config.generative.temperature,
        )),
    };
    let gate = DecisionGate::new(
        config,
        Collaborators {
            forge: &forge,
            probe: &probe,
            source: source.as_ref(),
        },
    );

    info!(repositories = repos.len(), strategy = ?config.strategy, "starting run");
    let outcome = run_batch(&gate, &repos);
    if outcome.aborted {
        Ok(RunStatus::Aborted(outcome))
    } else {
        Ok(RunStatus::Completed(outcome))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_config;

    #[test]
    fn missing_credential_is_an_early_return() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = test_config(temp.path());
        fs::write(&config.allowlist, "acme/widgets\n").expect("allowlist");
        assert_eq!(
            run_from_config(&config, None).expect("run"),
            RunStatus::MissingCredential
        );
        assert!(!config.work_dir.exists());
    }

    #[test]
    fn empty_or_missing_allowlist_is_an_early_return() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = test_config(temp.path());
        assert_eq!(
            run_from_config(&config, Some("token".to_string())).expect("run"),
            RunStatus::EmptyAllowlist
        );
        fs::write(&config.allowlist, "# nothing yet\n\nnot-a-repo\n").expect("allowlist");
        assert_eq!(
            run_from_config(&config, Some("token".to_string())).expect("run"),
            RunStatus::EmptyAllowlist
        );
    }

    #[test]
    fn allowlist_dedupes_in_file_order() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("repos.txt");
        fs::write(&path, "b/two\na/one\nb/two\n").expect("write");
        let repos: Vec<String> = load_allowlist(&path)
            .expect("load")
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(repos, vec!["b/two", "a/one"]);
    }
}
