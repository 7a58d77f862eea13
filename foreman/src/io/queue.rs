//! Filesystem task queue: scanning, loading and claim-by-rename.
//!
//! A task file lives in exactly one directory at a time. Every transition is a
//! rename; a rename whose source has vanished means another process won the
//! race, which is not an error.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result};
use tracing::debug;

use crate::core::annotations::parse_annotations;
use crate::core::types::TaskItem;
use crate::io::clock::Clock;

/// Markdown files directly inside `dir`, oldest modification first.
///
/// A missing directory is an empty queue.
pub fn list_markdown(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err).with_context(|| format!("read {}", dir.display())),
    };
    let mut files: Vec<(SystemTime, PathBuf)> = Vec::new();
    for entry in entries {
        let entry = entry.with_context(|| format!("read entry in {}", dir.display()))?;
        let path = entry.path();
        if path.extension().is_none_or(|ext| ext != "md") {
            continue;
        }
        // Files can disappear between listing and stat.
        let Ok(meta) = entry.metadata() else {
            continue;
        };
        if !meta.is_file() {
            continue;
        }
        files.push((meta.modified().unwrap_or(SystemTime::UNIX_EPOCH), path));
    }
    files.sort();
    Ok(files.into_iter().map(|(_, path)| path).collect())
}

/// Read a task file and its annotations. `Ok(None)` if it vanished.
pub fn load_task(path: &Path) -> Result<Option<TaskItem>> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err).with_context(|| format!("read task {}", path.display())),
    };
    let modified = fs::metadata(path)
        .and_then(|meta| meta.modified())
        .unwrap_or(SystemTime::UNIX_EPOCH);
    let annotations = parse_annotations(&content);
    Ok(Some(TaskItem {
        path: path.to_path_buf(),
        content,
        scope: annotations.scope,
        min_time_secs: annotations.min_time_secs,
        modified,
    }))
}

/// Executable tasks in `dir`, oldest first.
pub fn executable_tasks(dir: &Path) -> Result<Vec<TaskItem>> {
    let mut tasks = Vec::new();
    for path in list_markdown(dir)? {
        match load_task(&path)? {
            Some(task) if task.scope.is_executable() => tasks.push(task),
            Some(task) => debug!(path = %path.display(), scope = %task.scope, "skipping non-executable task"),
            None => {}
        }
    }
    Ok(tasks)
}

/// True when none of `dirs` holds a markdown file.
pub fn all_empty(dirs: &[PathBuf]) -> Result<bool> {
    for dir in dirs {
        if !list_markdown(dir)?.is_empty() {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Move `task` into `processing_dir`. Returns the new path, or `None` when the
/// source vanished (lost race). A name clash gets a `-HHMMSS` suffix.
pub fn claim(task: &Path, processing_dir: &Path, clock: &dyn Clock) -> Result<Option<PathBuf>> {
    fs::create_dir_all(processing_dir)
        .with_context(|| format!("create directory {}", processing_dir.display()))?;
    let file_name = task
        .file_name()
        .with_context(|| format!("task path has no file name {}", task.display()))?;
    let mut dest = processing_dir.join(file_name);
    if dest.exists() {
        let stem = task
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let suffix = clock.now().format("%H%M%S");
        dest = processing_dir.join(format!("{stem}-{suffix}.md"));
    }
    if !rename_if_present(task, &dest)? {
        debug!(path = %task.display(), "task vanished before claim");
        return Ok(None);
    }
    debug!(from = %task.display(), to = %dest.display(), "claimed task");
    Ok(Some(dest))
}

/// Move `path` into `dir`, replacing a same-named file. `None` if the source vanished.
pub fn move_into(path: &Path, dir: &Path) -> Result<Option<PathBuf>> {
    let file_name = path
        .file_name()
        .with_context(|| format!("path has no file name {}", path.display()))?;
    move_to(path, &dir.join(file_name))
}

/// Rename `path` to `dest`, creating the parent. `None` if the source vanished.
pub fn move_to(path: &Path, dest: &Path) -> Result<Option<PathBuf>> {
    if let Some(dir) = dest.parent() {
        fs::create_dir_all(dir).with_context(|| format!("create directory {}", dir.display()))?;
    }
    Ok(rename_if_present(path, dest)?.then(|| dest.to_path_buf()))
}

/// Drop a new markdown request into `dir` as `<stem>-<YYYYmmdd-HHMMSS>.md`.
///
/// The file is written under a non-markdown name first and renamed into place,
/// so a scanning role never sees a partial request.
pub fn submit(dir: &Path, stem: &str, content: &str, clock: &dyn Clock) -> Result<PathBuf> {
    fs::create_dir_all(dir).with_context(|| format!("create directory {}", dir.display()))?;
    let file_name = format!("{stem}-{}.md", clock.now().format("%Y%m%d-%H%M%S"));
    let dest = dir.join(&file_name);
    let staging = dir.join(format!(".{file_name}.tmp"));
    let mut body = content.trim_end().to_string();
    body.push('\n');
    fs::write(&staging, body).with_context(|| format!("write {}", staging.display()))?;
    fs::rename(&staging, &dest).with_context(|| format!("rename into {}", dest.display()))?;
    debug!(path = %dest.display(), "submitted request");
    Ok(dest)
}

fn rename_if_present(from: &Path, to: &Path) -> Result<bool> {
    match fs::rename(from, to) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == ErrorKind::NotFound && !from.exists() => Ok(false),
        Err(err) => Err(err)
            .with_context(|| format!("move {} to {}", from.display(), to.display())),
    }
}
