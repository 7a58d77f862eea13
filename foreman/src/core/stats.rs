//! Per-round statistics and the cumulative per-task record.
//!
//! [`RoundStats`] is fresh for every invocation. [`TaskRunRecord`] accumulates
//! rounds for the whole life of one task: counters are summed, file and command
//! lists are unioned (never shrunk), and the first non-empty session id sticks.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::types::RoundKind;

/// Metrics collected from one agent invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoundStats {
    pub duration_ms: u64,
    pub api_duration_ms: u64,
    pub session_id: String,
    pub model: String,
    pub files_edited: Vec<String>,
    pub files_created: Vec<String>,
    pub shell_commands: Vec<String>,
    pub tool_calls: u32,
    pub last_reply: String,
}

impl RoundStats {
    pub fn record_edit(&mut self, path: &str) {
        push_unique(&mut self.files_edited, path);
    }

    pub fn record_create(&mut self, path: &str) {
        push_unique(&mut self.files_created, path);
    }

    pub fn record_command(&mut self, command: &str) {
        push_unique(&mut self.shell_commands, command);
    }

    /// Edited and created files, deduplicated, in first-seen order.
    pub fn files_changed(&self) -> Vec<String> {
        let mut out = Vec::new();
        for path in self.files_edited.iter().chain(&self.files_created) {
            push_unique(&mut out, path);
        }
        out
    }
}

/// One row of the per-round breakdown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundDetail {
    pub round: u32,
    pub kind: RoundKind,
    pub started_at: DateTime<Utc>,
    pub success: bool,
    pub duration_ms: u64,
    pub api_duration_ms: u64,
    pub tool_calls: u32,
    pub files_changed: Vec<String>,
    pub shell_commands: Vec<String>,
    pub last_reply: String,
    /// Failure summary when the invocation did not succeed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

/// Raw transcript of one round, kept verbatim for post-mortems.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub round: u32,
    pub timestamp: DateTime<Utc>,
    pub raw_output: String,
}

/// Inputs for merging one finished round into a [`TaskRunRecord`].
#[derive(Debug, Clone, Copy)]
pub struct RoundUpdate<'a> {
    pub round: u32,
    pub kind: RoundKind,
    pub started_at: DateTime<Utc>,
    pub stats: &'a RoundStats,
    pub failure: Option<&'a str>,
    pub raw_output: &'a str,
}

/// Cumulative statistics for one task, persisted as `<task>-stats.{md,json}`.
///
/// Field order is the on-disk order; the transcript log stays last.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRunRecord {
    pub task_name: String,
    pub success: bool,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub wall_clock_ms: u64,
    pub total_rounds: u32,
    pub total_duration_ms: u64,
    pub total_api_duration_ms: u64,
    pub total_tool_calls: u32,
    pub files_changed: Vec<String>,
    pub shell_commands: Vec<String>,
    pub session_id: String,
    pub model: String,
    pub runner_pid: u32,
    pub min_time_secs: u64,
    pub last_reply: String,
    /// Untruncated stream of every round; `transcript` is capped per round.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_log: Option<PathBuf>,
    pub rounds: Vec<RoundDetail>,
    pub transcript: Vec<TranscriptEntry>,
}

impl TaskRunRecord {
    pub fn new(
        task_name: impl Into<String>,
        started_at: DateTime<Utc>,
        min_time_secs: u64,
    ) -> Self {
        Self {
            task_name: task_name.into(),
            success: false,
            started_at,
            ended_at: None,
            wall_clock_ms: 0,
            total_rounds: 0,
            total_duration_ms: 0,
            total_api_duration_ms: 0,
            total_tool_calls: 0,
            files_changed: Vec::new(),
            shell_commands: Vec::new(),
            session_id: String::new(),
            model: String::new(),
            runner_pid: std::process::id(),
            min_time_secs,
            last_reply: String::new(),
            stream_log: None,
            rounds: Vec::new(),
            transcript: Vec::new(),
        }
    }

    /// Fold one round into the aggregate.
    pub fn merge_round(&mut self, update: RoundUpdate<'_>) {
        let stats = update.stats;
        self.total_rounds += 1;
        self.total_duration_ms += stats.duration_ms;
        self.total_api_duration_ms += stats.api_duration_ms;
        self.total_tool_calls += stats.tool_calls;
        for path in stats.files_changed() {
            push_unique(&mut self.files_changed, &path);
        }
        for command in &stats.shell_commands {
            push_unique(&mut self.shell_commands, command);
        }
        if self.session_id.is_empty() && !stats.session_id.is_empty() {
            self.session_id.clone_from(&stats.session_id);
        }
        if !stats.model.is_empty() {
            self.model.clone_from(&stats.model);
        }
        if !stats.last_reply.is_empty() {
            self.last_reply.clone_from(&stats.last_reply);
        }
        self.rounds.push(RoundDetail {
            round: update.round,
            kind: update.kind,
            started_at: update.started_at,
            success: update.failure.is_none(),
            duration_ms: stats.duration_ms,
            api_duration_ms: stats.api_duration_ms,
            tool_calls: stats.tool_calls,
            files_changed: stats.files_changed(),
            shell_commands: stats.shell_commands.clone(),
            last_reply: stats.last_reply.clone(),
            failure: update.failure.map(str::to_string),
        });
        self.transcript.push(TranscriptEntry {
            round: update.round,
            timestamp: update.started_at,
            raw_output: update.raw_output.to_string(),
        });
    }

    /// Stamp the terminal state.
    pub fn finish(&mut self, ended_at: DateTime<Utc>, success: bool) {
        self.success = success;
        self.ended_at = Some(ended_at);
        self.wall_clock_ms = u64::try_from((ended_at - self.started_at).num_milliseconds())
            .unwrap_or(0);
    }
}

fn push_unique(list: &mut Vec<String>, value: &str) {
    if !value.is_empty() && !list.iter().any(|existing| existing == value) {
        list.push(value.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0)
            .single()
            .expect("timestamp")
    }

    fn round(stats: &RoundStats, round: u32) -> RoundUpdate<'_> {
        RoundUpdate {
            round,
            kind: RoundKind::Continue,
            started_at: at(i64::from(round)),
            stats,
            failure: None,
            raw_output: "raw",
        }
    }

    #[test]
    fn files_changed_dedups_across_edit_and_create() {
        let mut stats = RoundStats::default();
        stats.record_edit("src/lib.rs");
        stats.record_edit("src/lib.rs");
        stats.record_create("src/new.rs");
        stats.record_create("src/lib.rs");
        assert_eq!(stats.files_changed(), vec!["src/lib.rs", "src/new.rs"]);
    }

    /// Merging never decreases the tool-call count nor shrinks the file list,
    /// even when a later round reports nothing.
    #[test]
    fn merge_is_monotonic() {
        let mut record = TaskRunRecord::new("t", at(0), 0);

        let mut first = RoundStats {
            tool_calls: 3,
            duration_ms: 1_000,
            api_duration_ms: 800,
            session_id: "sess-1".to_string(),
            ..RoundStats::default()
        };
        first.record_edit("a.rs");
        first.record_command("cargo test");
        record.merge_round(round(&first, 1));

        let empty = RoundStats::default();
        record.merge_round(round(&empty, 2));

        let mut third = RoundStats {
            tool_calls: 1,
            session_id: "sess-2".to_string(),
            ..RoundStats::default()
        };
        third.record_create("b.rs");
        third.record_edit("a.rs");
        record.merge_round(round(&third, 3));

        assert_eq!(record.total_rounds, 3);
        assert_eq!(record.total_tool_calls, 4);
        assert_eq!(record.total_duration_ms, 1_000);
        assert_eq!(record.files_changed, vec!["a.rs", "b.rs"]);
        assert_eq!(record.shell_commands, vec!["cargo test"]);
        assert_eq!(record.session_id, "sess-1");
        assert_eq!(record.rounds.len(), 3);
        assert_eq!(record.transcript.len(), 3);
    }

    #[test]
    fn last_reply_keeps_latest_non_empty() {
        let mut record = TaskRunRecord::new("t", at(0), 0);
        let first = RoundStats {
            last_reply: "working on it".to_string(),
            ..RoundStats::default()
        };
        record.merge_round(round(&first, 1));
        record.merge_round(round(&RoundStats::default(), 2));
        assert_eq!(record.last_reply, "working on it");
    }

    #[test]
    fn failed_round_is_recorded_with_summary() {
        let mut record = TaskRunRecord::new("t", at(0), 0);
        let stats = RoundStats::default();
        record.merge_round(RoundUpdate {
            failure: Some("timed out after 5s"),
            ..round(&stats, 1)
        });
        assert!(!record.rounds[0].success);
        assert_eq!(record.rounds[0].failure.as_deref(), Some("timed out after 5s"));
    }

    #[test]
    fn finish_computes_wall_clock() {
        let mut record = TaskRunRecord::new("t", at(0), 60);
        record.finish(at(75), true);
        assert!(record.success);
        assert_eq!(record.wall_clock_ms, 75_000);
        assert_eq!(record.ended_at, Some(at(75)));
    }
}
