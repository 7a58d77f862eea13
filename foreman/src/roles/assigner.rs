//! Assigner: turn each incoming request into executor tasks in one agent round.

use std::collections::BTreeSet;
use std::path::Path;

use anyhow::Result;
use serde::Serialize;
use tracing::{debug, info};

use crate::engine::Engine;
use crate::io::queue::{load_task, move_into};
use crate::lifecycle::run_single_round;

use super::{RoleConfig, RoleKind};

/// Fallback executor named in the prompt when none is declared.
const DEFAULT_EXECUTOR: &str = "worker";

#[derive(Serialize)]
struct ExecutorRef {
    name: String,
    tasks_dir: String,
}

#[derive(Serialize)]
struct AssignerPrompt<'a> {
    role: &'a str,
    workspace: String,
    request_name: &'a str,
    request: &'a str,
    executors: Vec<ExecutorRef>,
    default_tasks_dir: String,
}

pub(super) fn process(engine: &Engine<'_>, config: &RoleConfig, path: &Path) -> Result<()> {
    let Some(request) = load_task(path)? else {
        return Ok(());
    };
    // Consume the request before the agent runs so a crash never replays it.
    let Some(archived) = move_into(path, &config.paths.reports_dir)? else {
        debug!(path = %path.display(), "request vanished before it was consumed");
        return Ok(());
    };
    let request_name = request.name();
    info!(role = %config.name, request = %request_name, "assigning request");

    let prompt = engine.prompts.render(
        config.prompts.primary,
        AssignerPrompt {
            role: &config.name,
            workspace: engine.workspace.root().display().to_string(),
            request_name: &request_name,
            request: &request.content,
            executors: executors(engine)?,
            default_tasks_dir: engine
                .workspace
                .role(DEFAULT_EXECUTOR)
                .tasks_dir
                .display()
                .to_string(),
        },
    )?;
    let round = run_single_round(engine, config, &request_name, prompt)?;
    info!(
        role = %config.name,
        request = %request_name,
        archived = %archived.display(),
        success = round.result.is_success(),
        "request handled"
    );
    Ok(())
}

/// Executors declared in settings or present on disk.
fn executors(engine: &Engine<'_>) -> Result<Vec<ExecutorRef>> {
    let mut names: BTreeSet<String> = engine.settings.roles.keys().cloned().collect();
    names.extend(engine.workspace.role_names()?);
    Ok(names
        .into_iter()
        .filter(|name| {
            RoleKind::parse(&engine.settings.role_entry(name).kind) == Some(RoleKind::Executor)
        })
        .map(|name| ExecutorRef {
            tasks_dir: engine.workspace.role(&name).tasks_dir.display().to_string(),
            name,
        })
        .collect())
}
