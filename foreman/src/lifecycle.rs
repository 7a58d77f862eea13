//! Multi-round lifecycle of one claimed task.
//!
//! ```text
//! Pending → FirstRound → (Continue)* → [Refining]* → Done
//!                    \_________ any error ________/→ Failed
//! ```
//!
//! A task is complete once its [`CompletionProbe`] says so after a round; for
//! file-based queues that means the agent deleted the task file. Until then
//! every round resumes the same agent session with a short continue prompt. If
//! the task carries a `min_time`, completion before that time is followed by
//! refining rounds until the minimum has elapsed.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::core::budget::{remaining_min_time, round_timeout};
use crate::core::outcome::InvocationFailure;
use crate::core::stats::{RoundUpdate, TaskRunRecord};
use crate::core::types::{LifecycleState, RoundKind, TaskItem};
use crate::engine::Engine;
use crate::io::invoker::{InvocationResult, InvokeRequest};
use crate::io::queue::{load_task, move_into};
use crate::io::record_store::{RecordPaths, format_ms, write_record};
use crate::looping::sleep_unless_interrupted;
use crate::roles::RoleConfig;

/// Decides whether a task is finished after a round.
pub trait CompletionProbe {
    fn is_complete(&self, task_path: &Path) -> bool;
}

/// The file-queue contract: a task is complete when its file is gone.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileAbsenceProbe;

impl CompletionProbe for FileAbsenceProbe {
    fn is_complete(&self, task_path: &Path) -> bool {
        !task_path.exists()
    }
}

/// The task reached `lifecycle.max_rounds` without completing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundCeilingError {
    pub task_name: String,
    pub max_rounds: u32,
    /// Where the task file was moved, if it still existed.
    pub moved_to: Option<PathBuf>,
}

impl fmt::Display for RoundCeilingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "task {} did not complete within {} rounds",
            self.task_name, self.max_rounds
        )
    }
}

impl std::error::Error for RoundCeilingError {}

/// Shutdown was requested between rounds; the task stays in processing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterruptedError {
    pub task_name: String,
    pub rounds: u32,
}

impl fmt::Display for InterruptedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "task {} interrupted after {} rounds",
            self.task_name, self.rounds
        )
    }
}

impl std::error::Error for InterruptedError {}

/// In-memory state of one task's lifecycle.
#[derive(Debug, Clone)]
pub struct TaskRun {
    pub task: TaskItem,
    pub state: LifecycleState,
    pub started_at: DateTime<Utc>,
    pub record: TaskRunRecord,
    completed: bool,
    rounds: u32,
}

impl TaskRun {
    pub fn new(task: TaskItem, started_at: DateTime<Utc>) -> Self {
        let record = TaskRunRecord::new(task.name(), started_at, task.min_time_secs);
        Self {
            task,
            state: LifecycleState::Pending,
            started_at,
            record,
            completed: false,
            rounds: 0,
        }
    }

    /// Record the completion signal. Irreversible.
    pub fn mark_completed(&mut self) {
        self.completed = true;
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    pub fn rounds(&self) -> u32 {
        self.rounds
    }

    pub fn min_time(&self) -> Duration {
        Duration::from_secs(self.task.min_time_secs)
    }

    /// Prompt kind for the next round.
    pub fn next_round_kind(&self) -> RoundKind {
        if self.completed {
            RoundKind::Refine
        } else if self.rounds == 0 {
            RoundKind::First
        } else {
            RoundKind::Continue
        }
    }
}

/// Result of a lifecycle that reached `Done`.
#[derive(Debug, Clone)]
pub struct LifecycleOutcome {
    pub task_name: String,
    pub state: LifecycleState,
    pub record: TaskRunRecord,
    pub record_paths: RecordPaths,
    /// The completion report, if the agent wrote one.
    pub report_path: Option<PathBuf>,
}

#[derive(Serialize)]
struct RoundPrompt<'a> {
    role: &'a str,
    workspace: String,
    task_name: &'a str,
    task_path: String,
    report_path: String,
    content: &'a str,
    min_time_secs: u64,
    round: u32,
    remaining: String,
}

/// Run the task at `task_path` (already in the role's ongoing dir) to completion.
///
/// Returns `Ok(None)` if the file vanished before it could be read.
pub fn run_task(
    engine: &Engine<'_>,
    role: &RoleConfig,
    task_path: &Path,
) -> Result<Option<LifecycleOutcome>> {
    run_task_with_probe(engine, role, task_path, &FileAbsenceProbe)
}

/// [`run_task`] with an explicit completion probe.
///
/// Statistics are persisted on every exit path: on success, and before any
/// error is propagated.
#[instrument(skip_all, fields(role = %role.name, task = %task_path.display()))]
pub fn run_task_with_probe(
    engine: &Engine<'_>,
    role: &RoleConfig,
    task_path: &Path,
    probe: &dyn CompletionProbe,
) -> Result<Option<LifecycleOutcome>> {
    let paths = &role.paths;
    let Some(task) = load_task(task_path)? else {
        debug!("task vanished before start");
        return Ok(None);
    };
    let task_name = task.name();
    info!(task = %task_name, min_time_secs = task.min_time_secs, "task started");

    let mut run = TaskRun::new(task, engine.clock.now());
    run.record.stream_log = Some(paths.stream_log_path(&task_name));
    let driven = drive(engine, role, &mut run, probe);
    let ended_at = engine.clock.now();

    match driven {
        Ok(()) => {
            run.state = LifecycleState::Done;
            run.record.finish(ended_at, true);
            let record_paths = write_record(&paths.stats_dir, &run.record)?;
            let report_path = Some(paths.report_path(&task_name)).filter(|p| p.exists());
            info!(
                task = %task_name,
                rounds = run.record.total_rounds,
                wall_clock = %format_ms(run.record.wall_clock_ms),
                tool_calls = run.record.total_tool_calls,
                report = report_path.is_some(),
                "task completed"
            );
            Ok(Some(LifecycleOutcome {
                task_name,
                state: run.state,
                record: run.record,
                record_paths,
                report_path,
            }))
        }
        Err(mut err) => {
            run.state = LifecycleState::Failed;
            run.record.finish(ended_at, false);
            if let Err(write_err) = write_record(&paths.stats_dir, &run.record) {
                warn!(task = %task_name, "failed to persist partial statistics: {write_err:#}");
            }
            if let Some(ceiling) = err.downcast_mut::<RoundCeilingError>() {
                ceiling.moved_to = move_into(&run.task.path, &paths.failed_dir)?;
            }
            Err(err)
        }
    }
}

fn drive(
    engine: &Engine<'_>,
    role: &RoleConfig,
    run: &mut TaskRun,
    probe: &dyn CompletionProbe,
) -> Result<()> {
    let lifecycle = &engine.settings.lifecycle;
    let min_time = run.min_time();
    let task_name = run.task.name();

    loop {
        if run.is_completed()
            && remaining_min_time(min_time, engine.clock.elapsed_since(run.started_at)).is_none()
        {
            return Ok(());
        }
        if engine.shutdown.is_requested() {
            return Err(InterruptedError {
                task_name,
                rounds: run.rounds,
            }
            .into());
        }
        // Refining rounds are bounded by the minimum time, not the ceiling.
        if !run.is_completed() && lifecycle.max_rounds > 0 && run.rounds >= lifecycle.max_rounds {
            return Err(RoundCeilingError {
                task_name,
                max_rounds: lifecycle.max_rounds,
                moved_to: None,
            }
            .into());
        }

        let kind = run.next_round_kind();
        run.state = match kind {
            RoundKind::First => LifecycleState::FirstRound,
            RoundKind::Refine => LifecycleState::Refining,
            RoundKind::Continue | RoundKind::Single => LifecycleState::Continue,
        };
        run.rounds += 1;
        let round = run.rounds;

        let elapsed = engine.clock.elapsed_since(run.started_at);
        let timeout = round_timeout(min_time, elapsed, lifecycle.min_time_buffer());
        let prompt = render_round_prompt(engine, role, run, kind, elapsed)?;
        let resume = match kind {
            RoundKind::First => None,
            _ => Some(run.record.session_id.clone()).filter(|s| !s.is_empty()),
        };
        info!(
            task = %task_name,
            round,
            kind = kind.as_str(),
            timeout_secs = timeout.map(|t| t.as_secs()),
            "starting round"
        );

        let started_at = engine.clock.now();
        let result = engine.invoker.invoke(&InvokeRequest {
            prompt,
            workdir: Some(engine.workspace.root().to_path_buf()),
            model: engine.model(),
            timeout,
            resume,
            stream_path: Some(role.paths.stream_log_path(&task_name)),
        })?;
        let failure = result.failure_summary();
        run.record.merge_round(RoundUpdate {
            round,
            kind,
            started_at,
            stats: &result.stats,
            failure: failure.as_deref(),
            raw_output: &result.raw_output,
        });
        if let Some(InvocationFailure::SpawnFailed { .. }) = &result.failure {
            return Err(anyhow!(
                "cannot start agent: {}",
                failure.unwrap_or_default()
            ));
        }

        if !run.is_completed() && probe.is_complete(&run.task.path) {
            run.mark_completed();
            info!(task = %task_name, round, "completion signal received");
        }
        if run.is_completed() {
            match remaining_min_time(min_time, engine.clock.elapsed_since(run.started_at)) {
                None => return Ok(()),
                Some(remaining) => info!(
                    task = %task_name,
                    remaining = %format_ms(duration_ms(remaining)),
                    "minimum time not reached, refining"
                ),
            }
        } else if result.is_success() {
            debug!(task = %task_name, round, "task file still present, continuing");
        }

        sleep_unless_interrupted(engine.clock, lifecycle.retry_interval(), engine.shutdown);
    }
}

fn render_round_prompt(
    engine: &Engine<'_>,
    role: &RoleConfig,
    run: &TaskRun,
    kind: RoundKind,
    elapsed: Duration,
) -> Result<String> {
    let task_name = run.task.name();
    let remaining = remaining_min_time(run.min_time(), elapsed).unwrap_or_default();
    let ctx = RoundPrompt {
        role: &role.name,
        workspace: engine.workspace.root().display().to_string(),
        task_name: &task_name,
        task_path: run.task.path.display().to_string(),
        report_path: role.paths.report_path(&task_name).display().to_string(),
        content: &run.task.content,
        min_time_secs: run.task.min_time_secs,
        round: run.rounds,
        remaining: format_ms(duration_ms(remaining)),
    };
    let prompts = &role.prompts;
    let template = match kind {
        RoundKind::First | RoundKind::Single => prompts.primary,
        RoundKind::Continue => prompts.continue_round.unwrap_or(prompts.primary),
        RoundKind::Refine => prompts.refine.unwrap_or(prompts.primary),
    };
    engine.prompts.render(template, ctx)
}

/// Result of a one-shot agent invocation.
#[derive(Debug, Clone)]
pub struct SingleRound {
    pub record: TaskRunRecord,
    pub record_paths: RecordPaths,
    pub result: InvocationResult,
}

/// Invoke the agent once in a fresh session and persist a one-round record
/// named `record_name` in the role's stats dir.
///
/// A failed invocation is reported through `result`; only spawn and I/O
/// problems are errors.
#[instrument(skip_all, fields(role = %role.name, record = record_name))]
pub fn run_single_round(
    engine: &Engine<'_>,
    role: &RoleConfig,
    record_name: &str,
    prompt: String,
) -> Result<SingleRound> {
    let started_at = engine.clock.now();
    let stream_path = role.paths.stream_log_path(record_name);
    let mut record = TaskRunRecord::new(record_name.to_string(), started_at, 0);
    record.stream_log = Some(stream_path.clone());
    let result = engine.invoker.invoke(&InvokeRequest {
        prompt,
        workdir: Some(engine.workspace.root().to_path_buf()),
        model: engine.model(),
        timeout: None,
        resume: None,
        stream_path: Some(stream_path),
    })?;
    let failure = result.failure_summary();
    record.merge_round(RoundUpdate {
        round: 1,
        kind: RoundKind::Single,
        started_at,
        stats: &result.stats,
        failure: failure.as_deref(),
        raw_output: &result.raw_output,
    });
    record.finish(engine.clock.now(), result.is_success());
    let record_paths = write_record(&role.paths.stats_dir, &record)?;
    match &failure {
        Some(summary) => warn!("agent round failed: {summary}"),
        None => info!(
            duration = %format_ms(record.total_duration_ms),
            tool_calls = record.total_tool_calls,
            "agent round finished"
        ),
    }
    Ok(SingleRound {
        record,
        record_paths,
        result,
    })
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
