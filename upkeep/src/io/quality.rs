//! Quality Assessor: test suite and linter against a working copy.
//!
//! Tool invocation failures are kept as typed [`ToolFailure`] values inside
//! [`Assessor::measure`] and collapsed to the worst-case measurement only by
//! [`Assessor::assess`], so the failure is logged instead of swallowed.

use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::core::score::LINT_FAILURE_SENTINEL;
use crate::core::types::QualityMeasurement;
use crate::io::config::{MissingTestsPolicy, QualityConfig};
use crate::io::process::{Captured, command_from_argv, run_command_with_timeout};

/// Why a quality tool produced no usable verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolFailure {
    Spawn { tool: &'static str, message: String },
    TimedOut { tool: &'static str, secs: u64 },
    UnexpectedExit { tool: &'static str, code: Option<i32> },
}

impl fmt::Display for ToolFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolFailure::Spawn { tool, message } => write!(f, "{tool} could not start: {message}"),
            ToolFailure::TimedOut { tool, secs } => write!(f, "{tool} timed out after {secs}s"),
            ToolFailure::UnexpectedExit { tool, code } => match code {
                Some(code) => write!(f, "{tool} failed to run (exit code {code})"),
                None => write!(f, "{tool} was terminated by a signal"),
            },
        }
    }
}

impl std::error::Error for ToolFailure {}

/// Verdict of one tool run plus its raw output for the audit log.
#[derive(Debug, Clone)]
pub struct ToolRun<T> {
    pub result: Result<T, ToolFailure>,
    pub raw_output: String,
}

/// Runs the quality tools. Implementations must not mutate the working copy.
pub trait QualityProbe {
    /// Run the test suite; `Ok(true)` when it passed.
    fn run_tests(&self, root: &Path) -> ToolRun<bool>;

    /// Run the linter; `Ok(n)` with the number of reported issue lines.
    fn run_lint(&self, root: &Path) -> ToolRun<u32>;
}

/// Probe that shells out to the configured test and lint commands.
#[derive(Debug, Clone)]
pub struct CommandProbe {
    config: QualityConfig,
}

impl CommandProbe {
    pub fn new(config: QualityConfig) -> Self {
        Self { config }
    }

    fn run(
        &self,
        tool: &'static str,
        argv: &[String],
        root: &Path,
    ) -> (Result<(i32, Captured), ToolFailure>, String) {
        let timeout = Duration::from_secs(self.config.timeout_secs);
        let spawned = command_from_argv(argv, root).and_then(|cmd| {
            run_command_with_timeout(cmd, None, timeout, self.config.output_limit_bytes)
        });
        let out = match spawned {
            Ok(out) => out,
            Err(err) => {
                let message = format!("{err:#}");
                let log = format!("$ {}\n{message}\n", argv.join(" "));
                return (Err(ToolFailure::Spawn { tool, message }), log);
            }
        };
        let log = format!("$ {}\n{}", argv.join(" "), out.render_log(tool));
        if out.timed_out {
            return (
                Err(ToolFailure::TimedOut {
                    tool,
                    secs: timeout.as_secs(),
                }),
                log,
            );
        }
        match out.status.code() {
            Some(code) => (Ok((code, out.stdout)), log),
            None => (Err(ToolFailure::UnexpectedExit { tool, code: None }), log),
        }
    }
}

impl QualityProbe for CommandProbe {
    #[instrument(skip_all)]
    fn run_tests(&self, root: &Path) -> ToolRun<bool> {
        let (result, raw_output) = self.run("tests", &self.config.test_command, root);
        ToolRun {
            result: result.map(|(code, _)| code == 0),
            raw_output,
        }
    }

    #[instrument(skip_all)]
    fn run_lint(&self, root: &Path) -> ToolRun<u32> {
        let (result, raw_output) = self.run("lint", &self.config.lint_command, root);
        let result = result.and_then(|(code, stdout)| {
            if self.config.lint_ok_exit_codes.contains(&code) {
                if stdout.dropped > 0 {
                    debug!(dropped = stdout.dropped, "lint output truncated; count covers every line");
                }
                Ok(u32::try_from(stdout.non_blank_lines).unwrap_or(u32::MAX))
            } else {
                Err(ToolFailure::UnexpectedExit {
                    tool: "lint",
                    code: Some(code),
                })
            }
        });
        ToolRun { result, raw_output }
    }
}

/// Internal measurement before tool failures are collapsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeasuredQuality {
    /// `None` when the working copy has no test suite.
    pub tests: Option<Result<bool, ToolFailure>>,
    pub lint: Result<u32, ToolFailure>,
}

/// Wraps a probe with the test-suite detection and failure policy.
pub struct Assessor<'a> {
    probe: &'a dyn QualityProbe,
    test_markers: Vec<String>,
    missing_tests: MissingTestsPolicy,
}

impl<'a> Assessor<'a> {
    pub fn new(
        probe: &'a dyn QualityProbe,
        test_markers: Vec<String>,
        missing_tests: MissingTestsPolicy,
    ) -> Self {
        Self {
            probe,
            test_markers,
            missing_tests,
        }
    }

    /// True when any marker exists at the working-copy root.
    pub fn has_test_suite(&self, root: &Path) -> bool {
        self.test_markers
            .iter()
            .any(|marker| root.join(marker).exists())
    }

    /// Run the tools, keeping failures typed. Raw output lands in `log_dir` when given.
    pub fn measure(&self, root: &Path, log_dir: Option<&Path>) -> MeasuredQuality {
        let tests = if self.has_test_suite(root) {
            let run = self.probe.run_tests(root);
            persist_log(log_dir, "tests.log", &run.raw_output);
            Some(run.result)
        } else {
            debug!("no test suite markers found");
            None
        };
        let lint = self.probe.run_lint(root);
        persist_log(log_dir, "lint.log", &lint.raw_output);
        MeasuredQuality {
            tests,
            lint: lint.result,
        }
    }

    /// Measure and collapse tool failures into the worst-case measurement. Never fails.
    #[instrument(skip_all, fields(root = %root.display()))]
    pub fn assess(&self, root: &Path, log_dir: Option<&Path>) -> QualityMeasurement {
        let measured = self.measure(root, log_dir);
        let tests_passed = match measured.tests {
            None => self.missing_tests == MissingTestsPolicy::Pass,
            Some(Ok(passed)) => passed,
            Some(Err(failure)) => {
                warn!(%failure, "test runner failed; counting tests as failed");
                false
            }
        };
        let lint_issue_count = match measured.lint {
            Ok(count) => count,
            Err(failure) => {
                warn!(%failure, sentinel = LINT_FAILURE_SENTINEL, "linter failed; using sentinel issue count");
                LINT_FAILURE_SENTINEL
            }
        };
        let measurement = QualityMeasurement::new(tests_passed, lint_issue_count);
        info!(tests_passed, lint_issue_count, "quality assessed");
        measurement
    }
}

fn persist_log(log_dir: Option<&Path>, name: &str, contents: &str) {
    let Some(dir) = log_dir else {
        return;
    };
    let written: Result<()> = (|| {
        fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
        let path = dir.join(name);
        fs::write(&path, contents).with_context(|| format!("write {}", path.display()))?;
        Ok(())
    })();
    if let Err(err) = written {
        warn!(err = %format!("{err:#}"), "failed to persist tool output");
    }
}
