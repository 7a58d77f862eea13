//! Test-only doubles: a manual clock, a scripted agent and a temp workspace.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, TimeZone, Utc};
use tempfile::TempDir;

use crate::core::outcome::InvocationFailure;
use crate::core::stats::RoundStats;
use crate::engine::Engine;
use crate::io::clock::Clock;
use crate::io::config::Settings;
use crate::io::invoker::{InvocationResult, InvokeRequest, Invoker};
use crate::io::layout::Workspace;
use crate::io::prompt::PromptLibrary;
use crate::roles::{RoleConfig, RoleKind};
use crate::shutdown::ShutdownFlag;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Clock whose time only moves through `sleep` and `advance`.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        let start = Utc
            .with_ymd_and_hms(2026, 1, 1, 9, 0, 0)
            .single()
            .unwrap_or_default();
        Self::at(start)
    }
}

impl ManualClock {
    pub fn at(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn advance(&self, duration: Duration) {
        let mut now = lock(&self.now);
        *now += chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *lock(&self.now)
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

/// Side effect a scripted round has on the workspace, as the agent would.
#[derive(Debug, Clone)]
pub enum Effect {
    Delete(PathBuf),
    Write(PathBuf, String),
    MoveInto { path: PathBuf, dir: PathBuf },
    /// Request shutdown after the round, like a Ctrl-C during the agent run.
    Interrupt(ShutdownFlag),
}

impl Effect {
    fn apply(&self) -> Result<()> {
        match self {
            Self::Delete(path) => {
                fs::remove_file(path).with_context(|| format!("delete {}", path.display()))
            }
            Self::Write(path, contents) => {
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::write(path, contents).with_context(|| format!("write {}", path.display()))
            }
            Self::MoveInto { path, dir } => {
                fs::create_dir_all(dir)?;
                let name = path
                    .file_name()
                    .ok_or_else(|| anyhow!("no file name in {}", path.display()))?;
                fs::rename(path, dir.join(name))
                    .with_context(|| format!("move {}", path.display()))
            }
            Self::Interrupt(flag) => {
                flag.request();
                Ok(())
            }
        }
    }
}

/// One predetermined agent round.
#[derive(Debug, Clone)]
pub struct ScriptedRound {
    pub result: InvocationResult,
    pub effects: Vec<Effect>,
    /// Time the round takes on the manual clock.
    pub elapsed: Duration,
}

impl ScriptedRound {
    /// Successful round whose final reply is `reply`.
    pub fn ok(reply: &str, session_id: &str) -> Self {
        Self {
            result: ok_result(reply, session_id),
            effects: Vec::new(),
            elapsed: Duration::from_secs(1),
        }
    }

    pub fn failed(failure: InvocationFailure) -> Self {
        Self {
            result: failed_result(failure),
            effects: Vec::new(),
            elapsed: Duration::from_secs(1),
        }
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }

    pub fn taking(mut self, elapsed: Duration) -> Self {
        self.elapsed = elapsed;
        self.result.elapsed = elapsed;
        let ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        self.result.stats.duration_ms = ms;
        self
    }
}

/// A successful [`InvocationResult`] with one tool call.
pub fn ok_result(reply: &str, session_id: &str) -> InvocationResult {
    let stats = RoundStats {
        duration_ms: 1_000,
        api_duration_ms: 800,
        session_id: session_id.to_string(),
        model: "test-model".to_string(),
        tool_calls: 1,
        last_reply: reply.to_string(),
        ..RoundStats::default()
    };
    InvocationResult {
        failure: None,
        exit_code: Some(0),
        elapsed: Duration::from_secs(1),
        stats,
        transcript: reply.to_string(),
        raw_output: format!("{{\"type\":\"result\",\"session_id\":\"{session_id}\"}}"),
        command_line: "agent --print --output-format stream-json".to_string(),
    }
}

pub fn failed_result(failure: InvocationFailure) -> InvocationResult {
    InvocationResult {
        exit_code: match &failure {
            InvocationFailure::NonZeroExit { code, .. } => *code,
            InvocationFailure::SpawnFailed { .. } | InvocationFailure::TimedOut { .. } => None,
            _ => Some(0),
        },
        failure: Some(failure),
        elapsed: Duration::from_secs(1),
        stats: RoundStats::default(),
        transcript: String::new(),
        raw_output: String::new(),
        command_line: "agent --print --output-format stream-json".to_string(),
    }
}

/// Invoker that replays [`ScriptedRound`]s in order and records every request.
///
/// Each round advances the shared [`ManualClock`] by its `elapsed` and then
/// applies its effects. Running out of rounds is an error.
#[derive(Debug)]
pub struct ScriptedInvoker {
    rounds: Mutex<VecDeque<ScriptedRound>>,
    requests: Mutex<Vec<InvokeRequest>>,
    clock: ManualClock,
}

impl ScriptedInvoker {
    pub fn new(clock: &ManualClock, rounds: Vec<ScriptedRound>) -> Self {
        Self {
            rounds: Mutex::new(rounds.into()),
            requests: Mutex::new(Vec::new()),
            clock: clock.clone(),
        }
    }

    pub fn requests(&self) -> Vec<InvokeRequest> {
        lock(&self.requests).clone()
    }

    pub fn remaining(&self) -> usize {
        lock(&self.rounds).len()
    }
}

impl Invoker for ScriptedInvoker {
    fn invoke(&self, request: &InvokeRequest) -> Result<InvocationResult> {
        lock(&self.requests).push(request.clone());
        let round = lock(&self.rounds)
            .pop_front()
            .ok_or_else(|| anyhow!("scripted invoker ran out of rounds"))?;
        self.clock.advance(round.elapsed);
        for effect in &round.effects {
            effect.apply()?;
        }
        Ok(round.result)
    }
}

/// Temporary workspace with settings tuned for fast tests.
pub struct TestWorkspace {
    _temp: TempDir,
    pub workspace: Workspace,
    pub settings: Settings,
    pub prompts: PromptLibrary,
}

impl TestWorkspace {
    pub fn new() -> Result<Self> {
        let temp = tempfile::tempdir().context("create temp workspace")?;
        let workspace = Workspace::new(temp.path());
        let mut settings = Settings::default();
        settings.lifecycle.retry_interval_secs = 1;
        settings.lifecycle.max_rounds = 20;
        Ok(Self {
            _temp: temp,
            workspace,
            settings,
            prompts: PromptLibrary::builtin(),
        })
    }

    pub fn root(&self) -> &Path {
        self.workspace.root()
    }

    pub fn engine<'a>(
        &'a self,
        invoker: &'a dyn Invoker,
        clock: &'a dyn Clock,
        shutdown: &'a ShutdownFlag,
    ) -> Engine<'a> {
        Engine {
            settings: &self.settings,
            workspace: &self.workspace,
            invoker,
            clock,
            prompts: &self.prompts,
            shutdown,
        }
    }

    /// Built-in role declaration with its directories created.
    pub fn role(&self, kind: RoleKind, name: &str, target: Option<&str>) -> Result<RoleConfig> {
        let config = RoleConfig::builtin(kind, &self.workspace, name, target)?;
        config.paths.ensure()?;
        Ok(config)
    }

    /// Write `<dir>/<file_name>` and return its path.
    pub fn write(&self, dir: &Path, file_name: &str, contents: &str) -> Result<PathBuf> {
        fs::create_dir_all(dir)?;
        let path = dir.join(file_name);
        fs::write(&path, contents).with_context(|| format!("write {}", path.display()))?;
        Ok(path)
    }
}
