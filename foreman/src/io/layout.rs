//! Canonical paths within `.foreman/` and workspace scaffolding.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::info;

use crate::io::config::{Settings, write_settings};

/// Workspace-level paths. The workspace root is where agents do their work;
/// everything the engine owns lives under `<root>/.foreman/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    root: PathBuf,
    base_dir: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let base_dir = root.join(".foreman");
        Self { root, base_dir }
    }

    /// Point this workspace at a different root. Role paths derived earlier are
    /// not updated; callers rebuild them.
    pub fn reload(&mut self, root: impl Into<PathBuf>) {
        *self = Self::new(root);
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn agents_dir(&self) -> PathBuf {
        self.base_dir.join("agents")
    }

    pub fn config_path(&self) -> PathBuf {
        self.base_dir.join("config.toml")
    }

    pub fn prompts_dir(&self) -> PathBuf {
        self.base_dir.join("prompts")
    }

    pub fn status_path(&self) -> PathBuf {
        self.agents_dir().join("roles.json")
    }

    pub fn role(&self, name: &str) -> RolePaths {
        RolePaths::new(&self.agents_dir(), name)
    }

    /// Names of every role directory present on disk, sorted.
    pub fn role_names(&self) -> Result<Vec<String>> {
        let dir = self.agents_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in fs::read_dir(&dir).with_context(|| format!("read {}", dir.display()))? {
            let entry = entry.with_context(|| format!("read entry in {}", dir.display()))?;
            if entry.path().is_dir() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }
}

/// The four-stage directory shape of one role, plus bookkeeping directories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RolePaths {
    pub name: String,
    pub dir: PathBuf,
    /// Input queue.
    pub tasks_dir: PathBuf,
    /// Claimed, in-flight tasks.
    pub ongoing_dir: PathBuf,
    /// Completion artifacts (`<task>-report.md`).
    pub reports_dir: PathBuf,
    pub stats_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub failed_dir: PathBuf,
    pub accepted_dir: PathBuf,
    pub rejected_dir: PathBuf,
}

impl RolePaths {
    pub fn new(agents_dir: &Path, name: &str) -> Self {
        let dir = agents_dir.join(name);
        Self {
            name: name.to_string(),
            tasks_dir: dir.join("tasks"),
            ongoing_dir: dir.join("ongoing"),
            reports_dir: dir.join("reports"),
            stats_dir: dir.join("stats"),
            logs_dir: dir.join("logs"),
            failed_dir: dir.join("failed"),
            accepted_dir: dir.join("accepted"),
            rejected_dir: dir.join("rejected"),
            dir,
        }
    }

    /// Create the queue directories. Archive directories are created on first use.
    pub fn ensure(&self) -> Result<()> {
        for dir in [
            &self.tasks_dir,
            &self.ongoing_dir,
            &self.reports_dir,
            &self.stats_dir,
            &self.logs_dir,
        ] {
            create_dir(dir)?;
        }
        Ok(())
    }

    pub fn report_path(&self, task_name: &str) -> PathBuf {
        self.reports_dir.join(format!("{task_name}-report.md"))
    }

    pub fn stream_log_path(&self, task_name: &str) -> PathBuf {
        self.logs_dir.join(format!("{task_name}.stream.jsonl"))
    }
}

/// Options for `init_workspace`.
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// If true, overwrite the existing config file.
    pub force: bool,
}

/// Create `.foreman/` scaffolding with the default roles.
///
/// Fails if the config file already exists unless `options.force` is set.
pub fn init_workspace(workspace: &Workspace, options: &InitOptions) -> Result<Settings> {
    let config_path = workspace.config_path();
    if config_path.exists() && !options.force {
        return Err(anyhow!(
            "foreman init: {} already exists (use --force to overwrite)",
            config_path.display()
        ));
    }
    if workspace.base_dir().exists() && !workspace.base_dir().is_dir() {
        return Err(anyhow!("foreman init: .foreman exists but is not a directory"));
    }

    let settings = Settings::default();
    create_dir(&workspace.prompts_dir())?;
    for role in [
        settings.audit.assigner.as_str(),
        "worker",
        settings.audit.auditor.as_str(),
    ] {
        workspace.role(role).ensure()?;
    }
    write_settings(&config_path, &settings)?;
    info!(root = %workspace.root().display(), "initialized workspace");
    Ok(settings)
}

fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).with_context(|| format!("create directory {}", path.display()))
}
