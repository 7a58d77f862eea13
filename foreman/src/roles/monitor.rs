//! Monitor: when its target executor runs dry, ask the agent for follow-up work.

use std::fs;
use std::io::ErrorKind;

use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use tracing::info;

use crate::core::text::excerpt;
use crate::core::types::task_name;
use crate::engine::Engine;
use crate::io::queue::list_markdown;
use crate::lifecycle::run_single_round;

use super::RoleConfig;

/// Most recent target reports embedded in the prompt.
const RECENT_REPORTS: usize = 5;
const REPORT_EXCERPT_CHARS: usize = 600;

#[derive(Serialize)]
struct ReportExcerpt {
    name: String,
    excerpt: String,
}

#[derive(Serialize)]
struct MonitorPrompt<'a> {
    role: &'a str,
    target: &'a str,
    goal: String,
    recent_reports: Vec<ReportExcerpt>,
    target_tasks_dir: String,
}

pub(super) fn process(engine: &Engine<'_>, config: &RoleConfig) -> Result<()> {
    let target = config
        .target
        .as_deref()
        .ok_or_else(|| anyhow!("monitor role {} has no target", config.name))?;
    let target_paths = engine.workspace.role(target);

    let goal_path = config.paths.dir.join("goal.md");
    let goal = match fs::read_to_string(&goal_path) {
        Ok(goal) => goal.trim().to_string(),
        Err(err) if err.kind() == ErrorKind::NotFound => String::new(),
        Err(err) => return Err(err).with_context(|| format!("read {}", goal_path.display())),
    };

    let reports = list_markdown(&target_paths.reports_dir)?;
    let mut recent_reports = Vec::new();
    for path in reports.iter().rev().take(RECENT_REPORTS) {
        match fs::read_to_string(path) {
            Ok(text) => recent_reports.push(ReportExcerpt {
                name: task_name(path),
                excerpt: excerpt(&text, REPORT_EXCERPT_CHARS),
            }),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(err).with_context(|| format!("read {}", path.display())),
        }
    }

    info!(role = %config.name, target, reports = recent_reports.len(), "target queue drained");
    let prompt = engine.prompts.render(
        config.prompts.primary,
        MonitorPrompt {
            role: &config.name,
            target,
            goal,
            recent_reports,
            target_tasks_dir: target_paths.tasks_dir.display().to_string(),
        },
    )?;
    let record_name = format!(
        "{}-{}",
        config.name,
        engine.clock.now().format("%Y%m%d-%H%M%S")
    );
    run_single_round(engine, config, &record_name, prompt)?;
    Ok(())
}
