//! Executor: claim tasks one at a time and drive each to completion.

use std::path::Path;

use anyhow::Result;
use tracing::{info, warn};

use crate::engine::Engine;
use crate::io::queue::{claim, executable_tasks};
use crate::io::status::record_completion;
use crate::lifecycle::{InterruptedError, RoundCeilingError, run_task};

use super::{RoleConfig, TriggerItem};

/// Tasks left in `ongoing/` by an earlier run come first, then pending tasks.
pub(super) fn trigger(config: &RoleConfig) -> Result<Vec<TriggerItem>> {
    let mut items: Vec<TriggerItem> = executable_tasks(&config.paths.ongoing_dir)?
        .into_iter()
        .map(|task| TriggerItem::File(task.path))
        .collect();
    for dir in &config.watch_dirs {
        items.extend(
            executable_tasks(dir)?
                .into_iter()
                .map(|task| TriggerItem::File(task.path)),
        );
    }
    Ok(items)
}

pub(super) fn process(engine: &Engine<'_>, config: &RoleConfig, path: &Path) -> Result<()> {
    let task_path = if path.starts_with(&config.paths.ongoing_dir) {
        info!(role = %config.name, path = %path.display(), "resuming task");
        path.to_path_buf()
    } else {
        match claim(path, &config.paths.ongoing_dir, engine.clock)? {
            Some(claimed) => claimed,
            None => return Ok(()),
        }
    };

    let err = match run_task(engine, config, &task_path) {
        Ok(Some(outcome)) => {
            if let Err(err) = record_completion(
                &engine.workspace.status_path(),
                &config.name,
                &config.kind,
                &outcome.task_name,
                engine.clock.now(),
            ) {
                warn!(role = %config.name, "failed to update role ledger: {err:#}");
            }
            return Ok(());
        }
        Ok(None) => return Ok(()),
        Err(err) => err,
    };

    if let Some(interrupted) = err.downcast_ref::<InterruptedError>() {
        info!(role = %config.name, "{interrupted}; task left in ongoing");
        return Ok(());
    }
    if let Some(ceiling) = err.downcast_ref::<RoundCeilingError>() {
        warn!(
            role = %config.name,
            moved_to = ?ceiling.moved_to,
            "{ceiling}"
        );
        return Ok(());
    }
    Err(err)
}
