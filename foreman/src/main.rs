//! File-queue orchestrator for long-running coding-agent roles.
//!
//! Each role (`executor`, `assigner`, `monitor`, `auditor`) runs as its own
//! process against `<workspace>/.foreman/`, polling its queue and driving the
//! agent CLI until the work is done.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use foreman::engine::Engine;
use foreman::exit_codes;
use foreman::io::clock::{Clock, SystemClock};
use foreman::io::config::{Settings, load_settings};
use foreman::io::invoker::AgentInvoker;
use foreman::io::layout::{InitOptions, Workspace, init_workspace};
use foreman::io::prompt::PromptLibrary;
use foreman::io::queue::submit;
use foreman::io::status::load_ledger;
use foreman::logging;
use foreman::looping::{LoopMode, LoopOutcome, LoopStop};
use foreman::roles::{Registry, RoleSpec, run_role};
use foreman::shutdown::ShutdownFlag;

#[derive(Parser)]
#[command(
    name = "foreman",
    version,
    about = "Drive coding-agent roles through file-based task queues"
)]
struct Cli {
    /// Workspace root (defaults to $FOREMAN_WORKSPACE, then the current directory).
    #[arg(short, long, global = true)]
    workspace: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `.foreman/` with default config and role directories.
    Init {
        /// Overwrite an existing config.
        #[arg(short, long)]
        force: bool,
    },
    /// Queue a markdown request for a role.
    Submit {
        role: String,
        /// File name stem for the request.
        #[arg(long, default_value = "request")]
        name: String,
        /// Request text.
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },
    /// Run one role's polling loop until interrupted.
    Run {
        role: String,
        /// Run a single cycle and exit.
        #[arg(long)]
        once: bool,
    },
    /// Run the configured auditor role.
    Audit {
        /// Run a single cycle and exit.
        #[arg(long)]
        once: bool,
    },
    /// Show declared roles and their last known status.
    Roles,
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let workspace = Workspace::new(resolve_root(cli.workspace)?);
    match cli.command {
        Command::Init { force } => cmd_init(&workspace, force),
        Command::Submit { role, name, text } => cmd_submit(&workspace, &role, &name, &text),
        Command::Run { role, once } => cmd_run(&workspace, &role, once),
        Command::Audit { once } => {
            let auditor = load(&workspace)?.audit.auditor;
            cmd_run(&workspace, &auditor, once)
        }
        Command::Roles => cmd_roles(&workspace),
    }
}

fn resolve_root(flag: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(root) = flag.or_else(|| std::env::var_os("FOREMAN_WORKSPACE").map(PathBuf::from))
    {
        return Ok(root);
    }
    std::env::current_dir().context("resolve current directory")
}

fn load(workspace: &Workspace) -> Result<Settings> {
    let mut settings = load_settings(&workspace.config_path())?;
    settings.apply_env_overrides(|key| std::env::var(key).ok())?;
    Ok(settings)
}

fn cmd_init(workspace: &Workspace, force: bool) -> Result<i32> {
    init_workspace(workspace, &InitOptions { force })?;
    println!("{}", workspace.base_dir().display());
    Ok(exit_codes::OK)
}

fn cmd_submit(workspace: &Workspace, role: &str, name: &str, text: &[String]) -> Result<i32> {
    let path = submit(
        &workspace.role(role).tasks_dir,
        name,
        &text.join(" "),
        &SystemClock,
    )?;
    println!("{}", path.display());
    Ok(exit_codes::OK)
}

fn cmd_run(workspace: &Workspace, role_name: &str, once: bool) -> Result<i32> {
    let settings = load(workspace)?;
    let entry = settings.role_entry(role_name);
    let role = Registry::with_builtins().build(&RoleSpec {
        name: role_name,
        entry: &entry,
        workspace,
    })?;

    let prompts = PromptLibrary::with_overrides(&workspace.prompts_dir())?;
    let invoker = AgentInvoker::new(
        settings.agent.binary.clone(),
        settings.agent.output_limit_bytes,
    );
    let shutdown = ShutdownFlag::from_signals()?;
    let engine = Engine {
        settings: &settings,
        workspace,
        invoker: &invoker,
        clock: &SystemClock,
        prompts: &prompts,
        shutdown: &shutdown,
    };
    let mode = if once {
        LoopMode::SingleCycle
    } else {
        LoopMode::Continuous
    };
    let outcome = run_role(&engine, role.as_ref(), mode)?;
    Ok(exit_code(&outcome))
}

fn exit_code(outcome: &LoopOutcome) -> i32 {
    let failed = outcome.item_failures + outcome.trigger_failures > 0;
    if outcome.stop == LoopStop::SingleCycle && failed {
        exit_codes::CYCLE_FAILURES
    } else {
        exit_codes::OK
    }
}

fn cmd_roles(workspace: &Workspace) -> Result<i32> {
    let settings = load(workspace)?;
    let ledger = load_ledger(&workspace.status_path())?;
    let mut names: Vec<String> = settings.roles.keys().cloned().collect();
    for name in workspace.role_names()?.into_iter().chain(ledger.roles.keys().cloned()) {
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names.sort();

    let now = SystemClock.now();
    for name in names {
        let entry = settings.role_entry(&name);
        match ledger.roles.get(&name) {
            Some(status) => println!(
                "{name}\t{}\t{}\tcompleted={}\tlast={}\tupdated={}s ago",
                entry.kind,
                status.state.as_str(),
                status.completed_tasks,
                status.last_task.as_deref().unwrap_or("-"),
                (now - status.updated_at).num_seconds().max(0),
            ),
            None => println!("{name}\t{}\tnever run", entry.kind),
        }
    }
    Ok(exit_codes::OK)
}
