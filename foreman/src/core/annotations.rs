//! HTML-comment annotations embedded in task files.

use std::sync::LazyLock;

use regex::Regex;

use crate::core::types::ExecutionScope;

static SCOPE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<!--\s*execution_scope:\s*(\w+)\s*-->").expect("scope annotation regex is valid")
});

static MIN_TIME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<!--\s*min_time:\s*(\d+)\s*-->").expect("min_time annotation regex is valid")
});

/// Annotations parsed from a task body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskAnnotations {
    pub scope: ExecutionScope,
    pub min_time_secs: u64,
}

/// Read `execution_scope` and `min_time` from task content.
///
/// The first occurrence of each annotation wins. A missing scope means `task`;
/// a missing or unparsable `min_time` means 0 (no minimum).
pub fn parse_annotations(content: &str) -> TaskAnnotations {
    let scope = SCOPE_RE
        .captures(content)
        .and_then(|caps| caps.get(1))
        .map(|m| ExecutionScope::parse(m.as_str()))
        .unwrap_or_default();
    let min_time_secs = MIN_TIME_RE
        .captures(content)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0);
    TaskAnnotations {
        scope,
        min_time_secs,
    }
}
