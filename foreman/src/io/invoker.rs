//! Invoker abstraction for agent rounds.
//!
//! The [`Invoker`] trait decouples the lifecycle machine from the actual agent
//! backend (currently the `agent` CLI in stream-json mode). Tests use scripted
//! invokers that return predetermined results without spawning processes.

use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, trace, warn};

use crate::core::outcome::{InvocationFailure, StreamAccumulator, classify_outcome};
use crate::core::stats::RoundStats;
use crate::core::text::excerpt;
use crate::io::process::{spawn_piped, stream_child_lines};

/// Characters of the command line shown in failure reports.
const COMMAND_EXCERPT_CHARS: usize = 200;
/// Characters of raw output shown in failure reports.
const OUTPUT_EXCERPT_CHARS: usize = 500;

/// Parameters for one agent round.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvokeRequest {
    /// Prompt text, passed as the final argument.
    pub prompt: String,
    /// Directory the agent operates in (`--workspace`).
    pub workdir: Option<PathBuf>,
    pub model: Option<String>,
    /// Kill the agent after this long. `None` waits indefinitely.
    pub timeout: Option<Duration>,
    /// Session to resume; `None` starts a fresh session.
    pub resume: Option<String>,
    /// When set, every raw output line is appended here as it arrives.
    pub stream_path: Option<PathBuf>,
}

/// Structured result of one round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationResult {
    pub failure: Option<InvocationFailure>,
    pub exit_code: Option<i32>,
    pub elapsed: Duration,
    pub stats: RoundStats,
    /// Human-readable transcript (event summaries and plain text).
    pub transcript: String,
    pub raw_output: String,
    pub command_line: String,
}

impl InvocationResult {
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    /// One-paragraph failure report with a truncated command line and output.
    pub fn failure_summary(&self) -> Option<String> {
        let failure = self.failure.as_ref()?;
        let mut summary = format!(
            "{failure}\ncommand: {}",
            excerpt(&self.command_line, COMMAND_EXCERPT_CHARS)
        );
        let output = excerpt(&self.raw_output, OUTPUT_EXCERPT_CHARS);
        if !output.is_empty() {
            summary.push_str("\noutput: ");
            summary.push_str(&output);
        }
        Some(summary)
    }
}

/// Abstraction over agent backends.
///
/// Classified failures (timeout, non-zero exit, ...) are returned inside the
/// result; `Err` is reserved for the engine's own I/O problems.
pub trait Invoker {
    fn invoke(&self, request: &InvokeRequest) -> Result<InvocationResult>;
}

/// Invoker that spawns the agent CLI.
#[derive(Debug, Clone)]
pub struct AgentInvoker {
    pub binary: String,
    /// Raw output retained in memory per round.
    pub output_limit_bytes: usize,
}

impl AgentInvoker {
    pub fn new(binary: impl Into<String>, output_limit_bytes: usize) -> Self {
        Self {
            binary: binary.into(),
            output_limit_bytes,
        }
    }
}

/// The fixed argument protocol.
pub fn agent_args(request: &InvokeRequest) -> Vec<OsString> {
    let mut args: Vec<OsString> = ["--print", "--force", "--trust", "--output-format", "stream-json"]
        .into_iter()
        .map(OsString::from)
        .collect();
    if let Some(session) = request.resume.as_deref().filter(|s| !s.is_empty()) {
        args.push("--resume".into());
        args.push(session.into());
    }
    if let Some(workdir) = &request.workdir {
        args.push("--workspace".into());
        args.push(workdir.into());
    }
    if let Some(model) = request.model.as_deref().filter(|m| !m.is_empty()) {
        args.push("--model".into());
        args.push(model.into());
    }
    args.push(request.prompt.clone().into());
    args
}

fn render_command_line(binary: &str, args: &[OsString]) -> String {
    let mut line = binary.to_string();
    for arg in args {
        line.push(' ');
        line.push_str(&arg.to_string_lossy());
    }
    line
}

impl Invoker for AgentInvoker {
    #[instrument(skip_all, fields(resume = request.resume.is_some(), timeout_secs = request.timeout.map(|t| t.as_secs())))]
    fn invoke(&self, request: &InvokeRequest) -> Result<InvocationResult> {
        let args = agent_args(request);
        let command_line = render_command_line(&self.binary, &args);
        debug!(command = %excerpt(&command_line, COMMAND_EXCERPT_CHARS), "starting agent");

        let mut cmd = Command::new(&self.binary);
        cmd.args(&args);
        if let Some(workdir) = &request.workdir {
            cmd.current_dir(workdir);
        }

        let child = match spawn_piped(&mut cmd) {
            Ok(child) => child,
            Err(err) => {
                let failure = InvocationFailure::SpawnFailed {
                    program: self.binary.clone(),
                    message: err.to_string(),
                };
                warn!(%failure, "agent invocation failed");
                return Ok(InvocationResult {
                    failure: Some(failure),
                    exit_code: None,
                    elapsed: Duration::ZERO,
                    stats: RoundStats::default(),
                    transcript: String::new(),
                    raw_output: String::new(),
                    command_line,
                });
            }
        };

        let mut stream = open_stream(request)?;
        let mut acc = StreamAccumulator::new(self.output_limit_bytes);
        let exit = stream_child_lines(child, request.timeout, |line| {
            trace!(target: "foreman::agent::raw", "{line}");
            if let Some(writer) = stream.as_mut()
                && let Err(err) = writeln!(writer, "{line}").and_then(|()| writer.flush())
            {
                warn!(%err, "failed to write stream file");
            }
            if let Some(readable) = acc.push(line) {
                info!(target: "foreman::agent", "{readable}");
            }
        })
        .context("run agent")?;

        let failure = classify_outcome(exit.timed_out, exit.elapsed, exit.exit_code(), &acc);
        let mut stats = acc.stats.clone();
        if stats.duration_ms == 0 {
            stats.duration_ms = u64::try_from(exit.elapsed.as_millis()).unwrap_or(u64::MAX);
        }

        let result = InvocationResult {
            failure,
            exit_code: exit.exit_code(),
            elapsed: exit.elapsed,
            stats,
            transcript: acc.readable_transcript(),
            raw_output: acc.raw_transcript(),
            command_line,
        };
        match result.failure_summary() {
            Some(summary) => warn!("agent invocation failed: {summary}"),
            None => debug!(
                tool_calls = result.stats.tool_calls,
                session = %result.stats.session_id,
                "agent round completed"
            ),
        }
        Ok(result)
    }
}

fn open_stream(request: &InvokeRequest) -> Result<Option<BufWriter<File>>> {
    let Some(path) = &request.stream_path else {
        return Ok(None);
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create stream dir {}", parent.display()))?;
    }
    let file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open stream file {}", path.display()))?;
    Ok(Some(BufWriter::new(file)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(prompt: &str) -> InvokeRequest {
        InvokeRequest {
            prompt: prompt.to_string(),
            ..InvokeRequest::default()
        }
    }

    #[test]
    fn fresh_session_args() {
        let args = agent_args(&InvokeRequest {
            model: Some("Auto".to_string()),
            workdir: Some(PathBuf::from("/work")),
            ..request("do it")
        });
        let args: Vec<String> = args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            vec![
                "--print",
                "--force",
                "--trust",
                "--output-format",
                "stream-json",
                "--workspace",
                "/work",
                "--model",
                "Auto",
                "do it",
            ]
        );
    }

    #[test]
    fn resume_args_precede_workspace() {
        let args = agent_args(&InvokeRequest {
            resume: Some("sess-9".to_string()),
            workdir: Some(PathBuf::from("/work")),
            ..request("continue")
        });
        let args: Vec<String> = args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(&args[5..9], &["--resume", "sess-9", "--workspace", "/work"]);
        assert_eq!(args.last().map(String::as_str), Some("continue"));
    }

    #[test]
    fn empty_resume_token_starts_fresh() {
        let args = agent_args(&InvokeRequest {
            resume: Some(String::new()),
            ..request("go")
        });
        assert!(!args.iter().any(|a| a == "--resume"));
    }

    #[test]
    fn failure_summary_truncates_command_and_output() {
        let result = InvocationResult {
            failure: Some(InvocationFailure::Vacuous { warnings: 1 }),
            exit_code: Some(0),
            elapsed: Duration::from_secs(1),
            stats: RoundStats::default(),
            transcript: String::new(),
            raw_output: "w".repeat(1_000),
            command_line: format!("agent {}", "p".repeat(1_000)),
        };
        let summary = result.failure_summary().expect("summary");
        assert!(summary.starts_with("exited successfully but produced no output"));
        assert!(summary.len() < 1_000);
    }
}
