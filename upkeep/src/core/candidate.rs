//! Strict parsing of generated candidate batches.
//!
//! Completion output is untrusted. A batch is accepted only when the whole
//! response is a JSON array matching the candidate schema and every file path
//! stays inside the working copy; any violation rejects the entire batch.

use anyhow::{Context, Result, bail};
use jsonschema::Draft;
use serde_json::Value;

use crate::core::path::validate_relative;
use crate::core::types::Candidate;

/// JSON Schema for a candidate batch (Draft 2020-12).
pub const CANDIDATES_SCHEMA: &str = include_str!("../../schemas/candidates.schema.json");

/// Parse a completion response into at most `max` candidates.
///
/// Leading and trailing whitespace is ignored; nothing else is forgiven.
pub fn parse_candidates(response: &str, max: usize) -> Result<Vec<Candidate>> {
    let instance: Value =
        serde_json::from_str(response.trim()).context("response is not valid JSON")?;
    let schema: Value = serde_json::from_str(CANDIDATES_SCHEMA).context("parse candidate schema")?;
    validate_schema(&instance, &schema)?;

    let candidates: Vec<Candidate> =
        serde_json::from_value(instance).context("decode candidate batch")?;
    for (index, candidate) in candidates.iter().enumerate() {
        validate_relative(&candidate.file)
            .with_context(|| format!("candidate[{index}] has an unsafe file path"))?;
    }
    Ok(candidates.into_iter().take(max).collect())
}

fn validate_schema(instance: &Value, schema: &Value) -> Result<()> {
    let compiled = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(schema)
        .context("compile candidate schema")?;
    let messages: Vec<String> = compiled
        .iter_errors(instance)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        bail!(
            "candidate batch violates schema:\n- {}",
            messages.join("\n- ")
        );
    }
    Ok(())
}
