//! Engine settings stored under `.foreman/config.toml`.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::verdict::VerdictMarkers;

/// Engine settings (TOML).
///
/// Intended to be edited by humans. Missing fields fall back to defaults, and
/// a missing file means "all defaults".
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    pub agent: AgentSettings,
    pub lifecycle: LifecycleSettings,
    pub audit: AuditSettings,
    /// Declared role instances keyed by name. Undeclared names run as executors.
    pub roles: BTreeMap<String, RoleEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentSettings {
    /// Agent CLI to spawn.
    pub binary: String,
    /// Passed as `--model`; empty omits the flag.
    pub model: String,
    /// Raw output retained in memory per round.
    pub output_limit_bytes: usize,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            binary: "agent".to_string(),
            model: "Auto".to_string(),
            output_limit_bytes: 1_000_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LifecycleSettings {
    /// Sleep between polling cycles.
    pub scan_interval_secs: u64,
    /// Sleep between rounds of one task.
    pub retry_interval_secs: u64,
    /// Added to the remaining `min_time` to form a round timeout.
    pub min_time_buffer_secs: u64,
    /// Rounds before a task is failed; 0 disables the ceiling.
    pub max_rounds: u32,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            scan_interval_secs: 5,
            retry_interval_secs: 3,
            min_time_buffer_secs: 120,
            max_rounds: 200,
        }
    }
}

impl LifecycleSettings {
    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }

    pub fn min_time_buffer(&self) -> Duration {
        Duration::from_secs(self.min_time_buffer_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AuditSettings {
    pub interval_secs: u64,
    /// Role whose archive directories receive judged reports.
    pub auditor: String,
    /// Role whose input directory receives resubmissions.
    pub assigner: String,
    /// Characters of the original report embedded in a resubmission.
    pub report_excerpt_chars: usize,
    pub markers: VerdictMarkers,
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            interval_secs: 120,
            auditor: "auditor".to_string(),
            assigner: "assigner".to_string(),
            report_excerpt_chars: 2_000,
            markers: VerdictMarkers::default(),
        }
    }
}

impl AuditSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// One declared role instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RoleEntry {
    /// Registered role type (`executor`, `assigner`, `monitor`, `auditor`, or a custom one).
    pub kind: String,
    /// Executor watched by a monitor.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        if self.agent.binary.trim().is_empty() {
            return Err(anyhow!("agent.binary must be non-empty"));
        }
        if self.agent.output_limit_bytes == 0 {
            return Err(anyhow!("agent.output_limit_bytes must be > 0"));
        }
        if self.lifecycle.scan_interval_secs == 0 {
            return Err(anyhow!("lifecycle.scan_interval_secs must be > 0"));
        }
        if self.audit.interval_secs == 0 {
            return Err(anyhow!("audit.interval_secs must be > 0"));
        }
        if self.audit.auditor.trim().is_empty() || self.audit.assigner.trim().is_empty() {
            return Err(anyhow!("audit.auditor and audit.assigner must be non-empty"));
        }
        if self.audit.markers.rejected.is_empty() || self.audit.markers.accepted.is_empty() {
            return Err(anyhow!("audit.markers needs at least one marker of each kind"));
        }
        for (name, entry) in &self.roles {
            if entry.kind.trim().is_empty() {
                return Err(anyhow!("roles.{name}.kind must be non-empty"));
            }
        }
        Ok(())
    }

    /// Apply `FOREMAN_*` overrides. `lookup` is `std::env::var` in production.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(binary) = lookup("FOREMAN_AGENT_BIN") {
            self.agent.binary = binary;
        }
        if let Some(model) = lookup("FOREMAN_MODEL") {
            self.agent.model = model;
        }
        if let Some(raw) = lookup("FOREMAN_SCAN_INTERVAL") {
            self.lifecycle.scan_interval_secs = parse_secs("FOREMAN_SCAN_INTERVAL", &raw)?;
        }
        if let Some(raw) = lookup("FOREMAN_RETRY_INTERVAL") {
            self.lifecycle.retry_interval_secs = parse_secs("FOREMAN_RETRY_INTERVAL", &raw)?;
        }
        if let Some(raw) = lookup("FOREMAN_AUDIT_INTERVAL") {
            self.audit.interval_secs = parse_secs("FOREMAN_AUDIT_INTERVAL", &raw)?;
        }
        self.validate()
    }

    /// Declared kind for `role`, defaulting to `executor`.
    pub fn role_entry(&self, role: &str) -> RoleEntry {
        if let Some(entry) = self.roles.get(role) {
            return entry.clone();
        }
        let kind = if role == self.audit.auditor {
            "auditor"
        } else if role == self.audit.assigner {
            "assigner"
        } else {
            "executor"
        };
        RoleEntry {
            kind: kind.to_string(),
            target: None,
        }
    }
}

fn parse_secs(var: &str, raw: &str) -> Result<u64> {
    raw.trim()
        .parse()
        .with_context(|| format!("{var} must be a whole number of seconds, got {raw:?}"))
}

/// Load settings from a TOML file.
///
/// If the file is missing, returns `Settings::default()`.
pub fn load_settings(path: &Path) -> Result<Settings> {
    if !path.exists() {
        let settings = Settings::default();
        settings.validate()?;
        return Ok(settings);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let settings: Settings =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    settings.validate()?;
    Ok(settings)
}

/// Atomically write settings to disk (temp file + rename).
pub fn write_settings(path: &Path, settings: &Settings) -> Result<()> {
    settings.validate()?;
    let mut buf = toml::to_string_pretty(settings).context("serialize settings toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
