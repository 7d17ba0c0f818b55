//! Prompt rendering for the generative candidate source.

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use tracing::debug;

use crate::io::context::RepositoryContext;

const PROPOSE_TEMPLATE: &str = include_str!("prompts/propose.md");

/// Renders the proposal prompt within a byte budget.
///
/// When the full context does not fit, recalled memories go first, then the
/// README excerpt, then the file listing is halved until it fits. A prompt
/// that still exceeds the budget is cut and marked `[truncated]`.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    budget_bytes: usize,
}

impl PromptBuilder {
    pub fn new(budget_bytes: usize) -> Self {
        Self { budget_bytes }
    }

    pub fn build(&self, repo: &RepositoryContext, max_candidates: usize) -> Result<String> {
        let mut env = Environment::new();
        env.add_template("propose", PROPOSE_TEMPLATE)
            .context("load propose template")?;
        let template = env.get_template("propose")?;

        let mut memories: &[String] = &repo.memories;
        let mut readme = repo.readme_excerpt.as_deref().map(str::trim);
        let mut listed = repo.files.len();
        loop {
            let rendered = template
                .render(context! {
                    repository => &repo.repository,
                    default_branch => &repo.default_branch,
                    language => &repo.language,
                    file_count => repo.file_count,
                    files => &repo.files[..listed],
                    readme => readme.filter(|text| !text.is_empty()),
                    memories => memories,
                    max_candidates => max_candidates,
                })
                .context("render propose template")?;
            if rendered.len() <= self.budget_bytes {
                return Ok(rendered);
            }
            if !memories.is_empty() {
                debug!(dropped = memories.len(), "dropping memories for prompt budget");
                memories = &[];
            } else if readme.is_some() {
                debug!("dropping readme excerpt for prompt budget");
                readme = None;
            } else if listed > 0 {
                listed /= 2;
                debug!(listed, "shrinking file listing for prompt budget");
            } else {
                return Ok(truncate_to(rendered, self.budget_bytes));
            }
        }
    }
}

fn truncate_to(mut text: String, budget: usize) -> String {
    const MARKER: &str = "\n[truncated]";
    let keep = budget.saturating_sub(MARKER.len());
    let mut cut = keep.min(text.len());
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
    if budget >= MARKER.len() {
        text.push_str(MARKER);
    }
    text
}
