//! Role loops driven for a single cycle against a scripted agent.

use std::cell::RefCell;
use std::fs;

use anyhow::Result;
use foreman::engine::Engine;
use foreman::io::config::RoleEntry;
use foreman::io::status::{RoleState, load_ledger};
use foreman::looping::{LoopMode, LoopStop};
use foreman::roles::{
    BuiltinRole, Registry, Role, RoleConfig, RoleKind, RoleSpec, TriggerItem, run_role,
};
use foreman::shutdown::ShutdownFlag;
use foreman::test_support::{Effect, ManualClock, ScriptedInvoker, ScriptedRound, TestWorkspace};

fn builtin(tw: &TestWorkspace, kind: RoleKind, name: &str, target: Option<&str>) -> BuiltinRole {
    BuiltinRole::new(kind, tw.role(kind, name, target).expect("role"))
}

/// A task left in `ongoing/` by a crashed run is finished before new work is claimed.
#[test]
fn executor_resumes_ongoing_before_claiming() {
    let tw = TestWorkspace::new().expect("workspace");
    let role = builtin(&tw, RoleKind::Executor, "worker", None);
    let paths = role.config().paths.clone();
    tw.write(&paths.ongoing_dir, "old.md", "Finish the old work")
        .expect("old");
    tw.write(&paths.tasks_dir, "new.md", "Start the new work")
        .expect("new");
    tw.write(&paths.tasks_dir, "notes.md", "<!-- execution_scope: monitor -->\nnot for me")
        .expect("notes");

    let clock = ManualClock::default();
    let shutdown = ShutdownFlag::new();
    let invoker = ScriptedInvoker::new(
        &clock,
        vec![
            ScriptedRound::ok("old done", "s-old")
                .with_effect(Effect::Delete(paths.ongoing_dir.join("old.md"))),
            ScriptedRound::ok("new done", "s-new")
                .with_effect(Effect::Delete(paths.ongoing_dir.join("new.md"))),
        ],
    );
    let engine = tw.engine(&invoker, &clock, &shutdown);

    let outcome = run_role(&engine, &role, LoopMode::SingleCycle).expect("run");

    assert_eq!(outcome.stop, LoopStop::SingleCycle);
    assert_eq!(outcome.items_processed, 2);
    assert_eq!(outcome.item_failures, 0);
    let requests = invoker.requests();
    assert!(requests[0].prompt.contains("Finish the old work"));
    assert!(requests[1].prompt.contains("Start the new work"));
    assert!(paths.tasks_dir.join("notes.md").exists(), "non-executable task untouched");

    let ledger = load_ledger(&tw.workspace.status_path()).expect("ledger");
    let status = &ledger.roles["worker"];
    assert_eq!(status.kind, "executor");
    assert_eq!(status.state, RoleState::Idle);
    assert_eq!(status.completed_tasks, 2);
    assert_eq!(status.last_task.as_deref(), Some("new"));
}

/// Hitting the round ceiling is logged, not counted as a loop failure.
#[test]
fn executor_survives_round_ceiling() {
    let mut tw = TestWorkspace::new().expect("workspace");
    tw.settings.lifecycle.max_rounds = 1;
    let role = builtin(&tw, RoleKind::Executor, "worker", None);
    let paths = role.config().paths.clone();
    tw.write(&paths.tasks_dir, "stuck.md", "Never ends").expect("task");

    let clock = ManualClock::default();
    let shutdown = ShutdownFlag::new();
    let invoker = ScriptedInvoker::new(&clock, vec![ScriptedRound::ok("working", "s-1")]);
    let engine = tw.engine(&invoker, &clock, &shutdown);

    let outcome = run_role(&engine, &role, LoopMode::SingleCycle).expect("run");

    assert_eq!(outcome.item_failures, 0);
    assert!(paths.failed_dir.join("stuck.md").exists());
}

#[test]
fn assigner_consumes_request_and_names_executors() {
    let mut tw = TestWorkspace::new().expect("workspace");
    tw.settings.roles.insert(
        "alice".to_string(),
        RoleEntry {
            kind: "executor".to_string(),
            target: None,
        },
    );
    let role = builtin(&tw, RoleKind::Assigner, "assigner", None);
    tw.role(RoleKind::Auditor, "auditor", None).expect("auditor");
    let request = tw
        .write(&role.config().paths.tasks_dir, "feature.md", "Add dark mode")
        .expect("request");
    let alice_tasks = tw.workspace.role("alice").tasks_dir;

    let clock = ManualClock::default();
    let shutdown = ShutdownFlag::new();
    let invoker = ScriptedInvoker::new(
        &clock,
        vec![ScriptedRound::ok("assigned", "s-1").with_effect(Effect::Write(
            alice_tasks.join("dark-mode.md"),
            "Implement dark mode".to_string(),
        ))],
    );
    let engine = tw.engine(&invoker, &clock, &shutdown);

    let outcome = run_role(&engine, &role, LoopMode::SingleCycle).expect("run");

    assert_eq!(outcome.items_processed, 1);
    assert!(!request.exists());
    assert!(role.config().paths.reports_dir.join("feature.md").exists());
    assert!(alice_tasks.join("dark-mode.md").exists());

    let prompt = &invoker.requests()[0].prompt;
    assert!(prompt.contains("Add dark mode"));
    assert!(prompt.contains(&alice_tasks.display().to_string()));
    assert!(!prompt.contains("auditor/tasks"), "{prompt}");
    assert!(role.config().paths.stats_dir.join("feature-stats.json").exists());
}

#[test]
fn monitor_fires_only_when_target_is_drained() {
    let tw = TestWorkspace::new().expect("workspace");
    let worker = tw.role(RoleKind::Executor, "worker", None).expect("worker");
    let monitor = builtin(&tw, RoleKind::Monitor, "lead", Some("worker"));
    tw.write(&monitor.config().paths.dir, "goal.md", "Ship the 1.0 release")
        .expect("goal");
    tw.write(&worker.paths.reports_dir, "parser-report.md", "Parser rewritten.")
        .expect("report");
    let busy = tw
        .write(&worker.paths.tasks_dir, "busy.md", "still queued")
        .expect("busy");

    let clock = ManualClock::default();
    let shutdown = ShutdownFlag::new();
    let invoker = ScriptedInvoker::new(&clock, vec![ScriptedRound::ok("queued more", "s-1")]);
    let engine = tw.engine(&invoker, &clock, &shutdown);

    run_role(&engine, &monitor, LoopMode::SingleCycle).expect("first run");
    assert!(invoker.requests().is_empty(), "queue not drained yet");

    fs::remove_file(&busy).expect("drain");
    run_role(&engine, &monitor, LoopMode::SingleCycle).expect("second run");

    let requests = invoker.requests();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].prompt.contains("Ship the 1.0 release"));
    assert!(requests[0].prompt.contains("Parser rewritten."));
    assert!(requests[0].prompt.contains(&worker.paths.tasks_dir.display().to_string()));
}

#[test]
fn auditor_loop_reviews_every_report() {
    let tw = TestWorkspace::new().expect("workspace");
    let alice = tw.role(RoleKind::Executor, "alice", None).expect("alice");
    let bob = tw.role(RoleKind::Executor, "bob", None).expect("bob");
    let auditor = builtin(&tw, RoleKind::Auditor, "auditor", None);
    tw.write(&alice.paths.reports_dir, "a-report.md", "A done").expect("a");
    tw.write(&bob.paths.reports_dir, "b-report.md", "B done").expect("b");

    let clock = ManualClock::default();
    let shutdown = ShutdownFlag::new();
    let invoker = ScriptedInvoker::new(
        &clock,
        vec![
            ScriptedRound::ok("VERDICT: accepted", "j-1"),
            ScriptedRound::ok("VERDICT: accepted", "j-2"),
        ],
    );
    let engine = tw.engine(&invoker, &clock, &shutdown);

    let outcome = run_role(&engine, &auditor, LoopMode::SingleCycle).expect("run");

    assert_eq!(outcome.items_processed, 2);
    let accepted = &auditor.config().paths.accepted_dir;
    assert!(accepted.join("a-report.md").exists());
    assert!(accepted.join("b-report.md").exists());
    let ledger = load_ledger(&tw.workspace.status_path()).expect("ledger");
    assert_eq!(ledger.roles["auditor"].completed_tasks, 2);
}

/// Role kinds beyond the built-ins plug in through the registry.
#[test]
fn custom_role_runs_through_registry() {
    struct Counter {
        config: RoleConfig,
        seen: RefCell<Vec<TriggerItem>>,
    }

    impl Role for Counter {
        fn config(&self) -> &RoleConfig {
            &self.config
        }

        fn process(&self, _engine: &Engine<'_>, item: &TriggerItem) -> Result<()> {
            self.seen.borrow_mut().push(item.clone());
            Ok(())
        }
    }

    let tw = TestWorkspace::new().expect("workspace");
    let mut registry = Registry::with_builtins();
    registry.register("counter", |spec: &RoleSpec<'_>| {
        let mut config = RoleConfig::builtin(RoleKind::Assigner, spec.workspace, spec.name, None)?;
        config.kind = "counter".to_string();
        Ok(Box::new(Counter {
            config,
            seen: RefCell::new(Vec::new()),
        }) as Box<dyn Role>)
    });
    let entry = RoleEntry {
        kind: "counter".to_string(),
        target: None,
    };
    let role = registry
        .build(&RoleSpec {
            name: "tally",
            entry: &entry,
            workspace: &tw.workspace,
        })
        .expect("build");
    tw.write(&role.config().paths.tasks_dir, "one.md", "1").expect("one");

    let clock = ManualClock::default();
    let shutdown = ShutdownFlag::new();
    let invoker = ScriptedInvoker::new(&clock, Vec::new());
    let engine = tw.engine(&invoker, &clock, &shutdown);

    let outcome = run_role(&engine, role.as_ref(), LoopMode::SingleCycle).expect("run");

    assert_eq!(outcome.items_processed, 1);
    let ledger = load_ledger(&tw.workspace.status_path()).expect("ledger");
    assert_eq!(ledger.roles["tally"].kind, "counter");
}
