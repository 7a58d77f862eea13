//! Role declarations and the loop that runs a role.
//!
//! Built-in roles are a closed set ([`RoleKind`]) sharing one implementation,
//! [`BuiltinRole`]. Anything else implements [`Role`] and is added to a
//! [`Registry`] under its own kind name.

mod assigner;
mod executor;
mod monitor;
mod registry;

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Result, anyhow, bail};
use tracing::{debug, warn};

use crate::audit;
use crate::engine::Engine;
use crate::io::config::Settings;
use crate::io::layout::{RolePaths, Workspace};
use crate::io::prompt::{
    ASSIGNER, AUDITOR, EXECUTOR_CONTINUE, EXECUTOR_FIRST, EXECUTOR_REFINE, MONITOR,
};
use crate::io::queue::{all_empty, list_markdown};
use crate::io::status::{mark_busy, mark_idle};
use crate::looping::{LoopConfig, LoopHandler, LoopMode, LoopOutcome, run_loop};

pub use registry::{Registry, RoleFactory, RoleSpec};

/// Built-in role types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleKind {
    Assigner,
    Executor,
    Monitor,
    Auditor,
}

impl RoleKind {
    pub const ALL: [RoleKind; 4] = [
        RoleKind::Assigner,
        RoleKind::Executor,
        RoleKind::Monitor,
        RoleKind::Auditor,
    ];

    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|kind| kind.as_str() == raw)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Assigner => "assigner",
            Self::Executor => "executor",
            Self::Monitor => "monitor",
            Self::Auditor => "auditor",
        }
    }
}

impl fmt::Display for RoleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// When a role has work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerCondition {
    /// Every markdown file in the watched directories is an item.
    HasFiles,
    /// One virtual item when every watched directory is empty.
    IsEmpty,
}

/// How a role treats an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationCondition {
    /// Fresh session, one round, input consumed.
    SingleRun,
    /// Multi-round lifecycle until the task file is deleted.
    UntilFileDeleted,
}

/// Named prompt templates a role renders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptSet {
    pub primary: &'static str,
    pub continue_round: Option<&'static str>,
    pub refine: Option<&'static str>,
}

/// One unit handed from a trigger to `process`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerItem {
    File(PathBuf),
    /// Produced by an `IsEmpty` trigger.
    QueueDrained,
}

/// Immutable declaration of one role instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleConfig {
    pub name: String,
    /// Kind name as registered; matches `RoleKind::as_str` for built-ins.
    pub kind: String,
    pub paths: RolePaths,
    pub watch_dirs: Vec<PathBuf>,
    pub trigger: TriggerCondition,
    pub termination: TerminationCondition,
    pub prompts: PromptSet,
    /// Executor watched by a monitor.
    pub target: Option<String>,
}

impl RoleConfig {
    /// Declaration for a built-in role.
    pub fn builtin(
        kind: RoleKind,
        workspace: &Workspace,
        name: &str,
        target: Option<&str>,
    ) -> Result<Self> {
        let paths = workspace.role(name);
        let (watch_dirs, trigger, termination, prompts) = match kind {
            RoleKind::Executor => (
                vec![paths.tasks_dir.clone()],
                TriggerCondition::HasFiles,
                TerminationCondition::UntilFileDeleted,
                PromptSet {
                    primary: EXECUTOR_FIRST,
                    continue_round: Some(EXECUTOR_CONTINUE),
                    refine: Some(EXECUTOR_REFINE),
                },
            ),
            RoleKind::Assigner => (
                vec![paths.tasks_dir.clone()],
                TriggerCondition::HasFiles,
                TerminationCondition::SingleRun,
                single(ASSIGNER),
            ),
            RoleKind::Monitor => {
                let target = target
                    .ok_or_else(|| anyhow!("monitor role {name} needs a target executor"))?;
                if target == name {
                    bail!("monitor role {name} cannot watch itself");
                }
                let watched = workspace.role(target);
                (
                    vec![watched.tasks_dir, watched.ongoing_dir],
                    TriggerCondition::IsEmpty,
                    TerminationCondition::SingleRun,
                    single(MONITOR),
                )
            }
            // Artifacts are discovered across every role at trigger time.
            RoleKind::Auditor => (
                Vec::new(),
                TriggerCondition::HasFiles,
                TerminationCondition::SingleRun,
                single(AUDITOR),
            ),
        };
        Ok(Self {
            name: name.to_string(),
            kind: kind.as_str().to_string(),
            paths,
            watch_dirs,
            trigger,
            termination,
            prompts,
            target: target.map(str::to_string),
        })
    }
}

fn single(primary: &'static str) -> PromptSet {
    PromptSet {
        primary,
        continue_round: None,
        refine: None,
    }
}

/// Pending items according to `config.trigger` over `config.watch_dirs`.
pub fn default_trigger(config: &RoleConfig) -> Result<Vec<TriggerItem>> {
    match config.trigger {
        TriggerCondition::HasFiles => {
            let mut items = Vec::new();
            for dir in &config.watch_dirs {
                items.extend(list_markdown(dir)?.into_iter().map(TriggerItem::File));
            }
            Ok(items)
        }
        TriggerCondition::IsEmpty => Ok(if all_empty(&config.watch_dirs)? {
            vec![TriggerItem::QueueDrained]
        } else {
            Vec::new()
        }),
    }
}

/// Capability interface every runnable role implements.
pub trait Role {
    fn config(&self) -> &RoleConfig;

    fn trigger(&self, _engine: &Engine<'_>) -> Result<Vec<TriggerItem>> {
        default_trigger(self.config())
    }

    fn process(&self, engine: &Engine<'_>, item: &TriggerItem) -> Result<()>;

    /// Sleep between polling cycles.
    fn interval(&self, settings: &Settings) -> Duration {
        settings.lifecycle.scan_interval()
    }
}

/// The four built-in roles.
#[derive(Debug, Clone)]
pub struct BuiltinRole {
    kind: RoleKind,
    config: RoleConfig,
}

impl BuiltinRole {
    pub fn new(kind: RoleKind, config: RoleConfig) -> Self {
        Self { kind, config }
    }

    pub fn kind(&self) -> RoleKind {
        self.kind
    }
}

impl Role for BuiltinRole {
    fn config(&self) -> &RoleConfig {
        &self.config
    }

    fn trigger(&self, engine: &Engine<'_>) -> Result<Vec<TriggerItem>> {
        match self.kind {
            RoleKind::Executor => executor::trigger(&self.config),
            RoleKind::Auditor => Ok(audit::find_artifacts(engine.workspace)?
                .into_iter()
                .map(|artifact| TriggerItem::File(artifact.path))
                .collect()),
            RoleKind::Assigner | RoleKind::Monitor => default_trigger(&self.config),
        }
    }

    fn process(&self, engine: &Engine<'_>, item: &TriggerItem) -> Result<()> {
        match (self.kind, item) {
            (RoleKind::Executor, TriggerItem::File(path)) => {
                executor::process(engine, &self.config, path)
            }
            (RoleKind::Assigner, TriggerItem::File(path)) => {
                assigner::process(engine, &self.config, path)
            }
            (RoleKind::Monitor, TriggerItem::QueueDrained) => monitor::process(engine, &self.config),
            (RoleKind::Auditor, TriggerItem::File(path)) => {
                audit::audit_path(engine, &self.config, path).map(|_| ())
            }
            (kind, item) => {
                debug!(%kind, ?item, "ignoring item this role does not handle");
                Ok(())
            }
        }
    }

    fn interval(&self, settings: &Settings) -> Duration {
        match self.kind {
            RoleKind::Auditor => settings.audit.interval(),
            _ => settings.lifecycle.scan_interval(),
        }
    }
}

struct RoleLoop<'a, 'e> {
    engine: &'a Engine<'e>,
    role: &'a dyn Role,
}

impl LoopHandler for RoleLoop<'_, '_> {
    type Item = TriggerItem;

    fn trigger(&mut self) -> Result<Vec<TriggerItem>> {
        self.role.trigger(self.engine)
    }

    fn process(&mut self, item: &TriggerItem) -> Result<()> {
        self.role.process(self.engine, item)
    }

    fn on_exit(&mut self) {
        let config = self.role.config();
        if let Err(err) = mark_idle(
            &self.engine.workspace.status_path(),
            &config.name,
            &config.kind,
            self.engine.clock.now(),
        ) {
            warn!(role = %config.name, "failed to update role ledger: {err:#}");
        }
    }
}

/// Run `role` under the polling loop until interrupted (or for one cycle).
pub fn run_role(engine: &Engine<'_>, role: &dyn Role, mode: LoopMode) -> Result<LoopOutcome> {
    let config = role.config();
    config.paths.ensure()?;
    if let Err(err) = mark_busy(
        &engine.workspace.status_path(),
        &config.name,
        &config.kind,
        engine.clock.now(),
    ) {
        warn!(role = %config.name, "failed to update role ledger: {err:#}");
    }
    let loop_config = LoopConfig {
        label: config.name.clone(),
        interval: role.interval(engine.settings),
        mode,
    };
    let mut handler = RoleLoop { engine, role };
    Ok(run_loop(&mut handler, &loop_config, engine.clock, engine.shutdown))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn role_kind_parse_round_trips() {
        for kind in RoleKind::ALL {
            assert_eq!(RoleKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(RoleKind::parse(" Executor "), Some(RoleKind::Executor));
        assert_eq!(RoleKind::parse("reviewer"), None);
    }

    #[test]
    fn executor_config_watches_its_tasks() {
        let ws = Workspace::new("/w");
        let config = RoleConfig::builtin(RoleKind::Executor, &ws, "alice", None).expect("config");
        assert_eq!(config.watch_dirs, vec![ws.role("alice").tasks_dir]);
        assert_eq!(config.trigger, TriggerCondition::HasFiles);
        assert_eq!(config.termination, TerminationCondition::UntilFileDeleted);
        assert_eq!(config.prompts.refine, Some(EXECUTOR_REFINE));
    }

    #[test]
    fn monitor_requires_a_target() {
        let ws = Workspace::new("/w");
        assert!(RoleConfig::builtin(RoleKind::Monitor, &ws, "boss", None).is_err());
        assert!(RoleConfig::builtin(RoleKind::Monitor, &ws, "boss", Some("boss")).is_err());

        let config =
            RoleConfig::builtin(RoleKind::Monitor, &ws, "boss", Some("alice")).expect("config");
        let alice = ws.role("alice");
        assert_eq!(config.watch_dirs, vec![alice.tasks_dir, alice.ongoing_dir]);
        assert_eq!(config.trigger, TriggerCondition::IsEmpty);
    }

    #[test]
    fn is_empty_trigger_fires_only_when_drained() {
        let temp = tempfile::tempdir().expect("tempdir");
        let ws = Workspace::new(temp.path());
        let config =
            RoleConfig::builtin(RoleKind::Monitor, &ws, "boss", Some("alice")).expect("config");

        assert_eq!(default_trigger(&config).expect("trigger"), vec![TriggerItem::QueueDrained]);

        let alice = ws.role("alice");
        alice.ensure().expect("ensure");
        fs::write(alice.ongoing_dir.join("busy.md"), "work").expect("write");
        assert!(default_trigger(&config).expect("trigger").is_empty());
    }

    #[test]
    fn has_files_trigger_lists_markdown() {
        let temp = tempfile::tempdir().expect("tempdir");
        let ws = Workspace::new(temp.path());
        let config =
            RoleConfig::builtin(RoleKind::Assigner, &ws, "assigner", None).expect("config");
        config.paths.ensure().expect("ensure");
        fs::write(config.paths.tasks_dir.join("req.md"), "build it").expect("write");
        fs::write(config.paths.tasks_dir.join("req.txt"), "ignored").expect("write");

        assert_eq!(
            default_trigger(&config).expect("trigger"),
            vec![TriggerItem::File(config.paths.tasks_dir.join("req.md"))]
        );
    }
}
