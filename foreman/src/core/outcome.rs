//! Reduction of one agent invocation to a success or a classified failure.

use std::fmt;
use std::time::Duration;

use crate::core::events::{LineKind, classify_line};
use crate::core::stats::RoundStats;
use crate::core::text::excerpt;

/// Raw output kept in a non-zero-exit failure.
const NONZERO_EXCERPT_CHARS: usize = 800;

/// Why an invocation did not count as a successful round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvocationFailure {
    TimedOut { elapsed: Duration },
    SpawnFailed { program: String, message: String },
    /// `Error:` lines from the agent. These win over the exit code.
    Errors { lines: Vec<String> },
    NonZeroExit { code: Option<i32>, output: String },
    /// Exit 0 without any recognizable event or text output.
    Vacuous { warnings: usize },
}

impl fmt::Display for InvocationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TimedOut { elapsed } => {
                write!(f, "timed out after {}s", elapsed.as_secs())
            }
            Self::SpawnFailed { program, message } => write!(
                f,
                "failed to start `{program}`: {message} (install the agent CLI or point \
                 agent.binary / FOREMAN_AGENT_BIN at it)"
            ),
            Self::Errors { lines } => write!(f, "agent reported errors: {}", lines.join("; ")),
            Self::NonZeroExit { code, output } => {
                match code {
                    Some(code) => write!(f, "exited with code {code}")?,
                    None => write!(f, "terminated by signal")?,
                }
                if !output.is_empty() {
                    write!(f, ": {output}")?;
                }
                Ok(())
            }
            Self::Vacuous { warnings } => write!(
                f,
                "exited successfully but produced no output ({warnings} warning lines)"
            ),
        }
    }
}

/// Accumulates one invocation's output stream.
#[derive(Debug, Clone)]
pub struct StreamAccumulator {
    pub stats: RoundStats,
    pub errors: Vec<String>,
    pub warnings: usize,
    /// Human-readable lines: event summaries and plain diagnostic text.
    pub readable: Vec<String>,
    pub raw: String,
    pub raw_truncated_bytes: usize,
    recognized_event: bool,
    raw_limit_bytes: usize,
}

impl StreamAccumulator {
    pub fn new(raw_limit_bytes: usize) -> Self {
        Self {
            stats: RoundStats::default(),
            errors: Vec::new(),
            warnings: 0,
            readable: Vec::new(),
            raw: String::new(),
            raw_truncated_bytes: 0,
            recognized_event: false,
            raw_limit_bytes,
        }
    }

    /// Consume one line; returns the readable rendering to echo, if any.
    pub fn push(&mut self, line: &str) -> Option<String> {
        self.push_raw(line);
        match classify_line(line, &mut self.stats) {
            LineKind::Event {
                recognized,
                summary,
            } => {
                self.recognized_event |= recognized;
                if let Some(summary) = &summary {
                    self.readable.push(summary.clone());
                }
                summary
            }
            LineKind::Error(text) => {
                self.errors.push(text.clone());
                Some(text)
            }
            LineKind::Warning(_) => {
                self.warnings += 1;
                None
            }
            LineKind::Text(text) => {
                self.readable.push(text.clone());
                Some(text)
            }
            LineKind::Blank => None,
        }
    }

    fn push_raw(&mut self, line: &str) {
        let needed = line.len() + 1;
        if self.raw.len() + needed <= self.raw_limit_bytes {
            self.raw.push_str(line);
            self.raw.push('\n');
        } else {
            self.raw_truncated_bytes += needed;
        }
    }

    /// Whether anything proves the agent actually did something.
    pub fn has_valid_output(&self) -> bool {
        self.stats.tool_calls > 0
            || !self.stats.last_reply.is_empty()
            || !self.stats.session_id.is_empty()
            || self.recognized_event
    }

    pub fn readable_transcript(&self) -> String {
        self.readable.join("\n")
    }

    /// Raw transcript with a notice when output beyond the limit was dropped.
    pub fn raw_transcript(&self) -> String {
        if self.raw_truncated_bytes == 0 {
            return self.raw.clone();
        }
        format!(
            "{}[output truncated {} bytes]\n",
            self.raw, self.raw_truncated_bytes
        )
    }
}

/// Classify a finished (or killed) invocation.
///
/// Priority: timeout, then `Error:` lines, then a non-zero exit, then vacuous
/// success. Spawn failures never reach this point.
pub fn classify_outcome(
    timed_out: bool,
    elapsed: Duration,
    exit_code: Option<i32>,
    acc: &StreamAccumulator,
) -> Option<InvocationFailure> {
    if timed_out {
        return Some(InvocationFailure::TimedOut { elapsed });
    }
    if !acc.errors.is_empty() {
        return Some(InvocationFailure::Errors {
            lines: acc.errors.clone(),
        });
    }
    if exit_code != Some(0) {
        return Some(InvocationFailure::NonZeroExit {
            code: exit_code,
            output: excerpt(&acc.raw, NONZERO_EXCERPT_CHARS),
        });
    }
    if !acc.has_valid_output() && acc.readable_transcript().trim().is_empty() {
        return Some(InvocationFailure::Vacuous {
            warnings: acc.warnings,
        });
    }
    None
}
