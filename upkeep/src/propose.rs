//! Candidate sources: the deterministic mutation table and the generative strategy.

use tracing::{debug, info, warn};

use crate::core::candidate::parse_candidates;
use crate::core::types::{Proposal, SafeMutation};
use crate::io::completion::{Completion, CompletionResponse};
use crate::io::context::RepositoryContext;
use crate::io::prompt::PromptBuilder;

/// Produces an ordered, finite batch of proposals for one repository.
///
/// A call may consult external state, so two calls need not agree. Failures
/// degrade to an empty batch; a source never aborts the run.
pub trait CandidateSource {
    fn propose(&self, context: &RepositoryContext, max_candidates: usize) -> Vec<Proposal>;
}

/// Fixed, ordered table of idempotent mutations.
#[derive(Debug, Clone)]
pub struct DeterministicSource {
    table: Vec<SafeMutation>,
}

impl DeterministicSource {
    pub fn new(table: Vec<SafeMutation>) -> Self {
        Self { table }
    }
}

impl CandidateSource for DeterministicSource {
    fn propose(&self, _context: &RepositoryContext, max_candidates: usize) -> Vec<Proposal> {
        self.table
            .iter()
            .take(max_candidates)
            .map(|mutation| Proposal::Mutation(*mutation))
            .collect()
    }
}

/// Asks a completion backend for file-scoped edits and parses the reply strictly.
pub struct GenerativeSource<'a> {
    completion: &'a dyn Completion,
    prompt: PromptBuilder,
    max_tokens: u32,
    temperature: f64,
}

impl<'a> GenerativeSource<'a> {
    pub fn new(
        completion: &'a dyn Completion,
        prompt: PromptBuilder,
        max_tokens: u32,
        temperature: f64,
    ) -> Self {
        Self {
            completion,
            prompt,
            max_tokens,
            temperature,
        }
    }
}

impl CandidateSource for GenerativeSource<'_> {
    fn propose(&self, context: &RepositoryContext, max_candidates: usize) -> Vec<Proposal> {
        let prompt = match self.prompt.build(context, max_candidates) {
            Ok(prompt) => prompt,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "failed to render proposal prompt");
                return Vec::new();
            }
        };
        let text = match self
            .completion
            .complete(&prompt, self.max_tokens, self.temperature)
        {
            CompletionResponse::Text(text) => text,
            CompletionResponse::Unavailable => {
                info!("completion backend unavailable; proposing nothing");
                return Vec::new();
            }
        };
        match parse_candidates(&text, max_candidates) {
            Ok(candidates) => {
                debug!(count = candidates.len(), "parsed generated candidates");
                candidates.into_iter().map(Proposal::Edit).collect()
            }
            Err(err) => {
                warn!(err = %format!("{err:#}"), "discarding unparseable completion");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedCompletion;

    fn context() -> RepositoryContext {
        RepositoryContext {
            repository: "acme/widgets".to_string(),
            default_branch: "main".to_string(),
            language: "Python".to_string(),
            ..RepositoryContext::default()
        }
    }

    fn generative(completion: &ScriptedCompletion) -> GenerativeSource<'_> {
        GenerativeSource::new(completion, PromptBuilder::new(32_000), 256, 0.0)
    }

    #[test]
    fn deterministic_keeps_table_order_and_limit() {
        let source = DeterministicSource::new(vec![
            SafeMutation::Format,
            SafeMutation::Editorconfig,
            SafeMutation::Badge,
        ]);
        assert_eq!(
            source.propose(&context(), 2),
            vec![
                Proposal::Mutation(SafeMutation::Format),
                Proposal::Mutation(SafeMutation::Editorconfig)
            ]
        );
    }

    #[test]
    fn generative_parses_valid_reply() {
        let completion = ScriptedCompletion::text(
            r#"[{"file":"setup.cfg","new_content":"[flake8]\nmax-line-length = 100\n","reason":"relax line length"}]"#,
        );
        let proposals = generative(&completion).propose(&context(), 5);
        assert_eq!(proposals.len(), 1);
        assert_eq!(proposals[0].label(), "edit:setup.cfg");
        let prompts = completion.prompts();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("acme/widgets"));
    }

    #[test]
    fn generative_unparseable_reply_is_empty() {
        let completion = ScriptedCompletion::text("I think you should refactor everything.");
        assert!(generative(&completion).propose(&context(), 5).is_empty());
    }

    #[test]
    fn generative_unavailable_is_empty() {
        let completion = ScriptedCompletion::unavailable();
        assert!(generative(&completion).propose(&context(), 5).is_empty());
    }

    #[test]
    fn generative_truncates_to_limit() {
        let completion = ScriptedCompletion::text(
            r#"[{"file":"a","new_content":"","reason":"1"},{"file":"b","new_content":"","reason":"2"}]"#,
        );
        assert_eq!(generative(&completion).propose(&context(), 1).len(), 1);
    }
}
