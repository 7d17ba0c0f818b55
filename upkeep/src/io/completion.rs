//! Generative text-completion backend.

use std::path::PathBuf;
use std::time::Duration;

use tracing::{debug, instrument, warn};

use crate::io::config::GenerativeConfig;
use crate::io::process::{command_from_argv, run_command_with_timeout};

/// What the backend produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionResponse {
    Text(String),
    /// The backend could not be reached or produced nothing usable.
    Unavailable,
}

/// Text completion. Implementations never fail; trouble maps to `Unavailable`.
pub trait Completion {
    fn complete(&self, prompt: &str, max_tokens: u32, temperature: f64) -> CompletionResponse;
}

/// Backend implemented by an external command reading the prompt on stdin.
///
/// The command sees `UPKEEP_MAX_TOKENS` and `UPKEEP_TEMPERATURE` in its
/// environment and must print the completion on stdout.
#[derive(Debug, Clone)]
pub struct CommandCompletion {
    command: Vec<String>,
    timeout: Duration,
    output_limit_bytes: usize,
    cwd: PathBuf,
}

impl CommandCompletion {
    pub fn new(config: &GenerativeConfig, cwd: impl Into<PathBuf>) -> Self {
        Self {
            command: config.command.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            output_limit_bytes: config.output_limit_bytes,
            cwd: cwd.into(),
        }
    }
}

impl Completion for CommandCompletion {
    #[instrument(skip_all, fields(max_tokens, prompt_bytes = prompt.len()))]
    fn complete(&self, prompt: &str, max_tokens: u32, temperature: f64) -> CompletionResponse {
        if self.command.is_empty() {
            debug!("no completion command configured");
            return CompletionResponse::Unavailable;
        }
        let mut cmd = match command_from_argv(&self.command, &self.cwd) {
            Ok(cmd) => cmd,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "completion backend unavailable");
                return CompletionResponse::Unavailable;
            }
        };
        cmd.env("UPKEEP_MAX_TOKENS", max_tokens.to_string())
            .env("UPKEEP_TEMPERATURE", temperature.to_string());
        let out = match run_command_with_timeout(
            cmd,
            Some(prompt.as_bytes()),
            self.timeout,
            self.output_limit_bytes,
        ) {
            Ok(out) => out,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "completion backend unavailable");
                return CompletionResponse::Unavailable;
            }
        };
        if out.timed_out {
            warn!(timeout_secs = self.timeout.as_secs(), "completion backend timed out");
            return CompletionResponse::Unavailable;
        }
        if !out.status.success() {
            warn!(exit_code = ?out.status.code(), stderr = %out.stderr_text().trim(), "completion backend failed");
            return CompletionResponse::Unavailable;
        }
        let text = out.stdout_text();
        if text.trim().is_empty() {
            warn!("completion backend returned no output");
            return CompletionResponse::Unavailable;
        }
        CompletionResponse::Text(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(script: &str) -> CommandCompletion {
        let config = GenerativeConfig {
            command: vec!["sh".to_string(), "-c".to_string(), script.to_string()],
            timeout_secs: 10,
            ..GenerativeConfig::default()
        };
        CommandCompletion::new(&config, std::env::temp_dir())
    }

    #[test]
    fn passes_prompt_and_parameters() {
        let response = backend("printf '%s|%s|' \"$UPKEEP_MAX_TOKENS\" \"$UPKEEP_TEMPERATURE\"; cat")
            .complete("the prompt", 512, 0.5);
        assert_eq!(
            response,
            CompletionResponse::Text("512|0.5|the prompt".to_string())
        );
    }

    #[test]
    fn failures_are_unavailable() {
        assert_eq!(
            backend("exit 1").complete("p", 1, 0.0),
            CompletionResponse::Unavailable
        );
        assert_eq!(
            backend("printf '  \\n'").complete("p", 1, 0.0),
            CompletionResponse::Unavailable
        );
        let unconfigured = CommandCompletion::new(&GenerativeConfig::default(), ".");
        assert_eq!(
            unconfigured.complete("p", 1, 0.0),
            CompletionResponse::Unavailable
        );
        let missing = CommandCompletion::new(
            &GenerativeConfig {
                command: vec!["upkeep-no-such-backend".to_string()],
                ..GenerativeConfig::default()
            },
            ".",
        );
        assert_eq!(missing.complete("p", 1, 0.0), CompletionResponse::Unavailable);
    }
}
