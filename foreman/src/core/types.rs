//! Shared domain types for the task lifecycle.

use std::fmt;
use std::path::PathBuf;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// The `execution_scope` tag carried by a task file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionScope {
    #[default]
    Task,
    Hire,
    Recycle,
    Monitor,
    Other(String),
}

impl ExecutionScope {
    /// Parse a scope tag. Matching is case-insensitive; unknown tags are kept verbatim.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "task" => Self::Task,
            "hire" => Self::Hire,
            "recycle" => Self::Recycle,
            "monitor" => Self::Monitor,
            other => Self::Other(other.to_string()),
        }
    }

    /// Only `task`, `hire` and `recycle` items are picked up by executors.
    pub fn is_executable(&self) -> bool {
        matches!(self, Self::Task | Self::Hire | Self::Recycle)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Task => "task",
            Self::Hire => "hire",
            Self::Recycle => "recycle",
            Self::Monitor => "monitor",
            Self::Other(raw) => raw,
        }
    }
}

impl fmt::Display for ExecutionScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of work: one markdown file in a watched directory.
#[derive(Debug, Clone)]
pub struct TaskItem {
    pub path: PathBuf,
    pub content: String,
    pub scope: ExecutionScope,
    /// Minimum wall-clock seconds the task must run; 0 means unbounded.
    pub min_time_secs: u64,
    pub modified: SystemTime,
}

impl TaskItem {
    /// File stem used to name every derived artifact.
    pub fn name(&self) -> String {
        task_name(&self.path)
    }
}

/// Stem of a task path, falling back to the full file name.
pub fn task_name(path: &std::path::Path) -> String {
    path.file_stem()
        .or_else(|| path.file_name())
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// States of the per-task lifecycle machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Pending,
    FirstRound,
    Continue,
    Refining,
    Done,
    Failed,
}

impl LifecycleState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

/// Which prompt a round was driven with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundKind {
    First,
    Continue,
    Refine,
    Single,
}

impl RoundKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::First => "first",
            Self::Continue => "continue",
            Self::Refine => "refine",
            Self::Single => "single",
        }
    }
}

/// Outcome of judging one report artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Accepted,
    Rejected,
}

impl Verdict {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
        }
    }
}
