//! Role status ledger (`.foreman/agents/roles.json`).
//!
//! Each role process updates its own entry with a read-modify-write followed
//! by an atomic replace. Concurrent updates from different roles are last
//! writer wins; the ledger is informational only.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleState {
    Busy,
    Idle,
}

impl RoleState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Busy => "busy",
            Self::Idle => "idle",
        }
    }
}

/// Persisted status of one role instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleStatus {
    pub kind: String,
    pub state: RoleState,
    pub pid: Option<u32>,
    pub completed_tasks: u64,
    pub last_task: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusLedger {
    pub roles: BTreeMap<String, RoleStatus>,
}

/// Load the ledger; a missing file is an empty ledger.
pub fn load_ledger(path: &Path) -> Result<StatusLedger> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(StatusLedger::default()),
        Err(err) => return Err(err).with_context(|| format!("read ledger {}", path.display())),
    };
    serde_json::from_str(&contents).with_context(|| format!("parse ledger {}", path.display()))
}

/// Atomically write the ledger (temp file + rename).
pub fn write_ledger(path: &Path, ledger: &StatusLedger) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(ledger)?;
    buf.push('\n');
    write_atomic(path, &buf)
}

/// Mark `role` busy under the current process id.
pub fn mark_busy(path: &Path, role: &str, kind: &str, now: DateTime<Utc>) -> Result<()> {
    update(path, role, kind, now, |status| {
        status.state = RoleState::Busy;
        status.pid = Some(std::process::id());
    })
}

/// Mark `role` idle and clear its pid.
pub fn mark_idle(path: &Path, role: &str, kind: &str, now: DateTime<Utc>) -> Result<()> {
    update(path, role, kind, now, |status| {
        status.state = RoleState::Idle;
        status.pid = None;
    })
}

/// Count one finished task for `role`.
pub fn record_completion(
    path: &Path,
    role: &str,
    kind: &str,
    task: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    update(path, role, kind, now, |status| {
        status.completed_tasks += 1;
        status.last_task = Some(task.to_string());
    })
}

fn update<F: FnOnce(&mut RoleStatus)>(
    path: &Path,
    role: &str,
    kind: &str,
    now: DateTime<Utc>,
    apply: F,
) -> Result<()> {
    let mut ledger = load_ledger(path)?;
    let status = ledger
        .roles
        .entry(role.to_string())
        .or_insert_with(|| RoleStatus {
            kind: kind.to_string(),
            state: RoleState::Idle,
            pid: None,
            completed_tasks: 0,
            last_task: None,
            updated_at: now,
        });
    status.kind = kind.to_string();
    status.updated_at = now;
    apply(status);
    debug!(role, state = ?status.state, completed = status.completed_tasks, "updating role ledger");
    write_ledger(path, &ledger)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("ledger path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension(format!("json.{}.tmp", std::process::id()));
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp ledger {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace ledger {}", path.display()))?;
    Ok(())
}
