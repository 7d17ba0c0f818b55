//! Child processes with timeouts and bounded output.
//!
//! Every external tool the agent drives (git network calls, gh, the test
//! runner, the linter, the formatter, the completion backend, benchmarks)
//! goes through [`run_command_with_timeout`] so a hung tool can never stall
//! the batch.

use std::fmt::Write as _;
use std::io::{Read, Write};
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};
use wait_timeout::ChildExt;

const READ_CHUNK: usize = 8 * 1024;

/// Bytes kept from one output stream, plus how many were dropped past the limit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Captured {
    pub bytes: Vec<u8>,
    pub dropped: usize,
    /// Lines holding anything but ASCII whitespace, counted over the whole
    /// stream, dropped bytes included.
    pub non_blank_lines: usize,
}

impl Captured {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }

    /// Drain `reader` to EOF, keeping at most `limit` bytes.
    fn drain(mut reader: impl Read, limit: usize) -> Result<Self> {
        let mut captured = Self::default();
        let mut chunk = [0u8; READ_CHUNK];
        let mut line_has_text = false;
        loop {
            let n = reader.read(&mut chunk).context("read child output")?;
            if n == 0 {
                if line_has_text {
                    captured.non_blank_lines += 1;
                }
                return Ok(captured);
            }
            for &byte in &chunk[..n] {
                if byte == b'\n' {
                    if line_has_text {
                        captured.non_blank_lines += 1;
                    }
                    line_has_text = false;
                } else if !byte.is_ascii_whitespace() {
                    line_has_text = true;
                }
            }
            let room = limit.saturating_sub(captured.bytes.len()).min(n);
            captured.bytes.extend_from_slice(&chunk[..room]);
            captured.dropped += n - room;
        }
    }
}

/// Exit status and captured streams of a finished (or killed) child.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Captured,
    pub stderr: Captured,
    /// The child outlived its timeout and was killed.
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.status.success()
    }

    pub fn stdout_text(&self) -> String {
        self.stdout.text()
    }

    pub fn stderr_text(&self) -> String {
        self.stderr.text()
    }

    /// Plain-text log of both streams, for the audit archive.
    pub fn render_log(&self, label: &str) -> String {
        let exit_code = self
            .status
            .code()
            .map_or_else(|| "none".to_string(), |code| code.to_string());
        let mut log = format!("exit_code: {exit_code}\ntimed_out: {}\n", self.timed_out);
        for (name, stream) in [("stdout", &self.stdout), ("stderr", &self.stderr)] {
            let _ = writeln!(log, "=== {name} ===");
            log.push_str(&stream.text());
            if stream.dropped > 0 {
                let _ = writeln!(log, "\n[{label} {name} truncated {} bytes]", stream.dropped);
            }
            log.push('\n');
        }
        log
    }
}

/// Build a [`Command`] from an argv array, running in `cwd`.
pub fn command_from_argv(argv: &[String], cwd: &Path) -> Result<Command> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| anyhow!("command must not be empty"))?;
    let mut cmd = Command::new(program);
    cmd.args(args).current_dir(cwd);
    Ok(cmd)
}

/// Run `cmd` to completion or until `timeout`, whichever comes first.
///
/// Both output streams are drained on their own threads while the child runs,
/// keeping at most `output_limit_bytes` of each. `stdin`, when given, is also
/// written from a thread, so a child that never reads it cannot block past the
/// timeout. A child still running at the deadline is killed and reported with
/// `timed_out = true`; only a spawn or wait failure is an `Err`.
#[instrument(skip_all, fields(program = ?cmd.get_program(), timeout_secs = timeout.as_secs()))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    cmd.stdin(if stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    })
    .stdout(Stdio::piped())
    .stderr(Stdio::piped());

    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawn {}", cmd.get_program().to_string_lossy()))?;

    let stdout = child.stdout.take().map(|pipe| {
        thread::spawn(move || Captured::drain(pipe, output_limit_bytes))
    });
    let stderr = child.stderr.take().map(|pipe| {
        thread::spawn(move || Captured::drain(pipe, output_limit_bytes))
    });
    let feeder = match (stdin, child.stdin.take()) {
        (Some(input), Some(mut pipe)) => {
            let input = input.to_vec();
            Some(thread::spawn(move || {
                if let Err(err) = pipe.write_all(&input) {
                    debug!(%err, "child closed stdin early");
                }
            }))
        }
        _ => None,
    };

    let (status, timed_out) = match child.wait_timeout(timeout).context("wait for child")? {
        Some(status) => (status, false),
        None => {
            warn!("child exceeded its timeout; killing");
            child.kill().context("kill child")?;
            (child.wait().context("reap killed child")?, true)
        }
    };

    if let Some(feeder) = feeder
        && feeder.join().is_err()
    {
        warn!("stdin feeder panicked");
    }
    let stdout = collect(stdout).context("collect stdout")?;
    let stderr = collect(stderr).context("collect stderr")?;
    if stdout.dropped > 0 || stderr.dropped > 0 {
        warn!(
            stdout_dropped = stdout.dropped,
            stderr_dropped = stderr.dropped,
            "child output exceeded the capture limit"
        );
    }

    debug!(exit_code = ?status.code(), timed_out, "child finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        timed_out,
    })
}

fn collect(reader: Option<JoinHandle<Result<Captured>>>) -> Result<Captured> {
    match reader {
        Some(handle) => handle
            .join()
            .map_err(|_| anyhow!("output reader panicked"))?,
        None => Ok(Captured::default()),
    }
}
