//! Shared deterministic types for the decision loop.
//!
//! These types define stable contracts between components. They carry no
//! references to external state and serialize to stable JSON.

use serde::{Deserialize, Serialize};

/// Result of running the test suite and linter against one working copy.
///
/// Produced fresh on every assessment and never mutated afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityMeasurement {
    pub tests_passed: bool,
    pub lint_issue_count: u32,
}

impl QualityMeasurement {
    pub fn new(tests_passed: bool, lint_issue_count: u32) -> Self {
        Self {
            tests_passed,
            lint_issue_count,
        }
    }
}

/// A proposed full-file replacement inside a working copy.
///
/// `file` is relative to the working-copy root and must pass
/// [`crate::core::path::validate_relative`] before it is written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Candidate {
    pub file: String,
    pub new_content: String,
    pub reason: String,
}

/// Named, idempotent edits from the deterministic mutation table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafeMutation {
    /// Create `.editorconfig` when the repository has none.
    Editorconfig,
    /// Ensure the attribution badge heads `README.md`.
    Badge,
    /// Run the configured auto-formatter over the working copy.
    Format,
}

impl SafeMutation {
    pub fn as_str(self) -> &'static str {
        match self {
            SafeMutation::Editorconfig => "editorconfig",
            SafeMutation::Badge => "badge",
            SafeMutation::Format => "format",
        }
    }

    pub fn reason(self) -> &'static str {
        match self {
            SafeMutation::Editorconfig => {
                "Add an .editorconfig so editors agree on line endings, charset and whitespace."
            }
            SafeMutation::Badge => "Mark the repository as automatically maintained in the README.",
            SafeMutation::Format => "Apply the project auto-formatter to all source files.",
        }
    }
}

/// One unit of work handed from a candidate source to the decision gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Proposal {
    /// File-scoped replacement (generative strategy).
    Edit(Candidate),
    /// Entry from the deterministic mutation table.
    Mutation(SafeMutation),
}

impl Proposal {
    /// Short label for logs and artifact names.
    pub fn label(&self) -> String {
        match self {
            Proposal::Edit(candidate) => format!("edit:{}", candidate.file),
            Proposal::Mutation(mutation) => format!("mutation:{}", mutation.as_str()),
        }
    }

    /// Free-text justification, used as the pull-request body.
    pub fn reason(&self) -> &str {
        match self {
            Proposal::Edit(candidate) => &candidate.reason,
            Proposal::Mutation(mutation) => mutation.reason(),
        }
    }
}

/// Per-repository record written to the audit archive after every run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionOutcome {
    /// `owner/name` of the processed repository.
    pub repository: String,
    pub accepted: bool,
    /// Accepted delta, else the best delta observed, else 0.
    pub delta: f64,
    pub baseline_score: f64,
    /// Pull-request URL (review mode) or pushed commit SHA (direct mode).
    pub published_reference: Option<String>,
    /// True only when the change was pushed straight to the default branch.
    pub pushed: bool,
    pub candidates_considered: u32,
    pub candidates_rejected: u32,
    pub publish_error: Option<String>,
    pub recorded_at: String,
}
