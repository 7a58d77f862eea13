//! Persistence of task statistics as `<task>-stats.md` and `<task>-stats.json`.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::core::stats::TaskRunRecord;
use crate::core::text::truncate_chars;

const LAST_REPLY_CHARS: usize = 2_000;
const ROUND_PREVIEW_CHARS: usize = 500;

/// Where a task's statistics live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordPaths {
    pub markdown: PathBuf,
    pub json: PathBuf,
}

impl RecordPaths {
    pub fn new(stats_dir: &Path, task_name: &str) -> Self {
        Self {
            markdown: stats_dir.join(format!("{task_name}-stats.md")),
            json: stats_dir.join(format!("{task_name}-stats.json")),
        }
    }

    pub fn all(&self) -> [&Path; 2] {
        [&self.markdown, &self.json]
    }
}

/// Write both statistics files, replacing earlier versions.
pub fn write_record(stats_dir: &Path, record: &TaskRunRecord) -> Result<RecordPaths> {
    let paths = RecordPaths::new(stats_dir, &record.task_name);
    fs::create_dir_all(stats_dir)
        .with_context(|| format!("create stats dir {}", stats_dir.display()))?;

    write_json(&paths.json, record)?;
    write_text(&paths.markdown, &render_markdown(record))?;
    Ok(paths)
}

pub fn load_record(path: &Path) -> Result<TaskRunRecord> {
    read_json(path)
}

/// Human-readable report. Long replies are truncated; the raw transcript comes last.
pub fn render_markdown(record: &TaskRunRecord) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Task statistics: {}\n", record.task_name);
    out.push_str("| Field | Value |\n|---|---|\n");
    let rows = [
        ("Success", (if record.success { "yes" } else { "no" }).to_string()),
        ("Rounds", record.total_rounds.to_string()),
        ("Wall clock", format_ms(record.wall_clock_ms)),
        ("Process time", format_ms(record.total_duration_ms)),
        ("API time", format_ms(record.total_api_duration_ms)),
        ("Tool calls", record.total_tool_calls.to_string()),
        ("Session", or_dash(&record.session_id)),
        ("Model", or_dash(&record.model)),
        ("Runner PID", record.runner_pid.to_string()),
        ("Started", record.started_at.to_rfc3339()),
        (
            "Ended",
            record
                .ended_at
                .map_or_else(|| "-".to_string(), |t| t.to_rfc3339()),
        ),
        (
            "Min time",
            if record.min_time_secs == 0 {
                "-".to_string()
            } else {
                format_ms(record.min_time_secs * 1_000)
            },
        ),
    ];
    for (field, value) in rows {
        let _ = writeln!(out, "| {field} | {value} |");
    }

    out.push_str("\n## Files changed\n\n");
    push_list(&mut out, &record.files_changed, |f| f.to_string());
    out.push_str("\n## Shell commands\n\n");
    push_list(&mut out, &record.shell_commands, |c| format!("`{c}`"));

    out.push_str("\n## Last reply\n\n");
    out.push_str(&or_dash(&truncate_chars(
        record.last_reply.trim(),
        LAST_REPLY_CHARS,
        "\n\n...(truncated)",
    )));
    out.push('\n');

    out.push_str("\n## Rounds\n");
    for round in &record.rounds {
        let status = match &round.failure {
            None => "ok".to_string(),
            Some(failure) => format!("failed: {}", first_line(failure)),
        };
        let _ = writeln!(
            out,
            "\n### Round {} ({}) - {status}\n",
            round.round,
            round.kind.as_str()
        );
        let _ = writeln!(
            out,
            "- started: {}\n- duration: {}\n- api: {}\n- tool calls: {}\n- files: {}",
            round.started_at.to_rfc3339(),
            format_ms(round.duration_ms),
            format_ms(round.api_duration_ms),
            round.tool_calls,
            round.files_changed.len()
        );
        let preview = truncate_chars(round.last_reply.trim(), ROUND_PREVIEW_CHARS, "...");
        if !preview.is_empty() {
            out.push('\n');
            for line in preview.lines() {
                let _ = writeln!(out, "> {line}");
            }
        }
    }

    out.push_str("\n## Transcript\n");
    if let Some(path) = &record.stream_log {
        let _ = writeln!(out, "\nFull stream log: `{}`", path.display());
    }
    for entry in &record.transcript {
        let _ = writeln!(
            out,
            "\n### Round {} @ {}\n\n```text\n{}\n```",
            entry.round,
            entry.timestamp.to_rfc3339(),
            entry.raw_output.trim_end()
        );
    }
    out
}

fn push_list(out: &mut String, items: &[String], render: impl Fn(&str) -> String) {
    if items.is_empty() {
        out.push_str("-\n");
        return;
    }
    for item in items {
        let _ = writeln!(out, "- {}", render(item));
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or("")
}

fn or_dash(value: &str) -> String {
    if value.is_empty() {
        "-".to_string()
    } else {
        value.to_string()
    }
}

/// `1h 2m 3s` style rendering; sub-second values stay in milliseconds.
pub fn format_ms(ms: u64) -> String {
    if ms < 1_000 {
        return format!("{ms}ms");
    }
    let secs = ms / 1_000;
    let (h, m, s) = (secs / 3_600, (secs % 3_600) / 60, secs % 60);
    match (h, m) {
        (0, 0) => format!("{s}s"),
        (0, _) => format!("{m}m {s}s"),
        _ => format!("{h}h {m}m {s}s"),
    }
}

fn write_text(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)?;
    buf.push('\n');
    write_text(path, &buf)
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))
}
