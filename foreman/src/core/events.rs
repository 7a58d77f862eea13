//! Classification of the agent's line-delimited output stream.
//!
//! Each line is either a JSON event (`{"type": ..., "subtype": ...}`) or plain
//! text. Recognized events update [`RoundStats`] in place; plain text is split
//! into `Error:` lines, `Warning:` lines and ordinary diagnostic output.

use serde_json::Value;

use crate::core::stats::RoundStats;

/// Event types that prove the agent produced real output.
const RECOGNIZED_TYPES: &[&str] = &["system", "assistant", "tool_call", "result"];

/// What a single output line turned out to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineKind {
    /// A JSON event. `summary` is a human-readable rendering, if any.
    Event {
        recognized: bool,
        summary: Option<String>,
    },
    /// `Error: ...` emitted by the agent binary itself.
    Error(String),
    /// `Warning: ...`; counted but never treated as output.
    Warning(String),
    /// Any other non-empty text.
    Text(String),
    Blank,
}

/// Classify `line` and fold any event it carries into `stats`.
pub fn classify_line(line: &str, stats: &mut RoundStats) -> LineKind {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return LineKind::Blank;
    }
    if let Ok(event) = serde_json::from_str::<Value>(trimmed)
        && event.is_object()
    {
        let event_type = str_at(&event, &["type"]);
        let recognized = RECOGNIZED_TYPES.contains(&event_type);
        let summary = apply_event(&event, stats);
        return LineKind::Event {
            recognized,
            summary,
        };
    }
    if trimmed.starts_with("Error:") {
        return LineKind::Error(trimmed.to_string());
    }
    if trimmed.starts_with("Warning:") {
        return LineKind::Warning(trimmed.to_string());
    }
    LineKind::Text(trimmed.to_string())
}

fn apply_event(event: &Value, stats: &mut RoundStats) -> Option<String> {
    let subtype = str_at(event, &["subtype"]);
    match str_at(event, &["type"]) {
        "system" if subtype == "init" => {
            let session_id = str_at(event, &["session_id"]);
            if stats.session_id.is_empty() && !session_id.is_empty() {
                stats.session_id = session_id.to_string();
            }
            let model = str_at(event, &["model"]);
            if stats.model.is_empty() && !model.is_empty() {
                stats.model = model.to_string();
            }
            Some(format!("session {} ({})", stats.session_id, stats.model))
        }
        "tool_call" if subtype == "completed" => {
            stats.tool_calls += 1;
            event
                .get("tool_call")
                .and_then(|call| summarize_tool_call(call, stats))
        }
        "assistant" => {
            let text = assistant_text(event);
            let text = text.trim();
            if text.is_empty() {
                return None;
            }
            stats.last_reply = text.to_string();
            Some(text.to_string())
        }
        "result" => {
            stats.duration_ms = u64_at(event, "duration_ms");
            stats.api_duration_ms = u64_at(event, "duration_api_ms");
            None
        }
        _ => None,
    }
}

fn summarize_tool_call(call: &Value, stats: &mut RoundStats) -> Option<String> {
    if let Some(shell) = call.get("shellToolCall") {
        let command = str_at(shell, &["args", "command"]);
        stats.record_command(command);
        return Some(format!("Shell: {command}"));
    }
    if let Some(edit) = call.get("editToolCall") {
        let path = str_at(edit, &["args", "filePath"]);
        stats.record_edit(path);
        return Some(format!("Edit: {path}"));
    }
    for (key, label) in [("writeToolCall", "Write"), ("createFileToolCall", "Create")] {
        if let Some(write) = call.get(key) {
            let path = str_at(write, &["args", "filePath"]);
            stats.record_create(path);
            return Some(format!("{label}: {path}"));
        }
    }
    None
}

fn assistant_text(event: &Value) -> String {
    let Some(items) = event
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(Value::as_array)
    else {
        return String::new();
    };
    items
        .iter()
        .filter(|item| str_at(item, &["type"]) == "text")
        .map(|item| str_at(item, &["text"]))
        .collect()
}

fn str_at<'a>(value: &'a Value, path: &[&str]) -> &'a str {
    let mut current = value;
    for key in path {
        match current.get(key) {
            Some(next) => current = next,
            None => return "",
        }
    }
    current.as_str().unwrap_or("")
}

fn u64_at(value: &Value, key: &str) -> u64 {
    value.get(key).and_then(Value::as_u64).unwrap_or(0)
}
