//! `AgentInvoker` against fake agent scripts.
#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use foreman::core::outcome::InvocationFailure;
use foreman::io::invoker::{AgentInvoker, InvokeRequest, Invoker};
use tempfile::TempDir;

/// Write an executable `sh` script named `agent` into `dir`.
fn fake_agent(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("agent");
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write script");
    let mut perms = fs::metadata(&path).expect("metadata").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).expect("chmod");
    path
}

fn invoke(temp: &TempDir, script: &Path, request: InvokeRequest) -> foreman::io::invoker::InvocationResult {
    let invoker = AgentInvoker::new(script.display().to_string(), 1_000_000);
    invoker
        .invoke(&InvokeRequest {
            workdir: Some(temp.path().to_path_buf()),
            ..request
        })
        .expect("invoke")
}

fn prompt(text: &str) -> InvokeRequest {
    InvokeRequest {
        prompt: text.to_string(),
        ..InvokeRequest::default()
    }
}

#[test]
fn successful_round_collects_stats() {
    let temp = tempfile::tempdir().expect("tempdir");
    let script = fake_agent(
        temp.path(),
        r#"echo "$@" > args.txt
cat <<'EOF'
{"type":"system","subtype":"init","session_id":"sess-42","model":"gpt-test"}
{"type":"tool_call","subtype":"completed","tool_call":{"shellToolCall":{"args":{"command":"cargo test"}}}}
{"type":"tool_call","subtype":"completed","tool_call":{"editToolCall":{"args":{"filePath":"src/lib.rs"}}}}
{"type":"assistant","message":{"content":[{"type":"text","text":"All tests pass."}]}}
{"type":"result","subtype":"success","duration_ms":4200,"duration_api_ms":3100}
EOF"#,
    );
    let stream_path = temp.path().join("logs").join("job.stream.jsonl");

    let result = invoke(
        &temp,
        &script,
        InvokeRequest {
            resume: Some("sess-1".to_string()),
            model: Some("Auto".to_string()),
            stream_path: Some(stream_path.clone()),
            ..prompt("fix it")
        },
    );

    assert!(result.is_success(), "{:?}", result.failure);
    assert_eq!(result.exit_code, Some(0));
    assert_eq!(result.stats.session_id, "sess-42");
    assert_eq!(result.stats.model, "gpt-test");
    assert_eq!(result.stats.tool_calls, 2);
    assert_eq!(result.stats.shell_commands, vec!["cargo test"]);
    assert_eq!(result.stats.files_edited, vec!["src/lib.rs"]);
    assert_eq!(result.stats.last_reply, "All tests pass.");
    assert_eq!(result.stats.duration_ms, 4200);
    assert_eq!(result.stats.api_duration_ms, 3100);
    assert!(result.transcript.contains("Shell: cargo test"));

    let args = fs::read_to_string(temp.path().join("args.txt")).expect("args");
    assert!(args.contains("--print --force --trust --output-format stream-json"));
    assert!(args.contains("--resume sess-1"));
    assert!(args.contains("--model Auto"));
    assert!(args.trim_end().ends_with("fix it"));

    let stream = fs::read_to_string(&stream_path).expect("stream log");
    assert_eq!(stream.lines().count(), 5);
}

/// Only warnings and exit 0: the round produced nothing and is a failure.
#[test]
fn warnings_only_is_vacuous() {
    let temp = tempfile::tempdir().expect("tempdir");
    let script = fake_agent(
        temp.path(),
        "echo 'Warning: config file not found'\necho 'Warning: using defaults'\nexit 0",
    );

    let result = invoke(&temp, &script, prompt("hi"));

    assert_eq!(result.failure, Some(InvocationFailure::Vacuous { warnings: 2 }));
}

#[test]
fn error_lines_fail_even_with_exit_zero() {
    let temp = tempfile::tempdir().expect("tempdir");
    let script = fake_agent(
        temp.path(),
        r#"echo '{"type":"system","subtype":"init","session_id":"s"}'
echo 'Error: rate limited'
exit 0"#,
    );

    let result = invoke(&temp, &script, prompt("hi"));

    match result.failure {
        Some(InvocationFailure::Errors { lines }) => {
            assert_eq!(lines, vec!["Error: rate limited"]);
        }
        other => panic!("expected error lines, got {other:?}"),
    }
}

#[test]
fn non_zero_exit_is_a_failure() {
    let temp = tempfile::tempdir().expect("tempdir");
    let script = fake_agent(temp.path(), "echo 'something broke' >&2\nexit 3");

    let result = invoke(&temp, &script, prompt("hi"));

    assert_eq!(result.exit_code, Some(3));
    assert!(matches!(
        result.failure,
        Some(InvocationFailure::NonZeroExit { code: Some(3), .. })
    ));
    let summary = result.failure_summary().expect("summary");
    assert!(summary.contains("exited with code 3"), "{summary}");
}

#[test]
fn timeout_kills_the_agent() {
    let temp = tempfile::tempdir().expect("tempdir");
    let script = fake_agent(temp.path(), "echo 'starting'\nexec sleep 30");

    let result = invoke(
        &temp,
        &script,
        InvokeRequest {
            timeout: Some(Duration::from_millis(300)),
            ..prompt("hi")
        },
    );

    assert!(matches!(result.failure, Some(InvocationFailure::TimedOut { .. })));
    assert!(result.elapsed < Duration::from_secs(20));
}

/// Work the agent started in the background must not outlive the round.
#[test]
fn timeout_also_kills_background_jobs() {
    let temp = tempfile::tempdir().expect("tempdir");
    let script = fake_agent(temp.path(), "(sleep 1; touch late-write) &\nsleep 30");

    let result = invoke(
        &temp,
        &script,
        InvokeRequest {
            timeout: Some(Duration::from_millis(300)),
            ..prompt("hi")
        },
    );

    assert!(matches!(result.failure, Some(InvocationFailure::TimedOut { .. })));
    std::thread::sleep(Duration::from_secs(2));
    assert!(!temp.path().join("late-write").exists());
}

#[test]
fn missing_binary_is_a_spawn_failure() {
    let temp = tempfile::tempdir().expect("tempdir");
    let missing = temp.path().join("no-such-agent");

    let result = invoke(&temp, &missing, prompt("hi"));

    match &result.failure {
        Some(InvocationFailure::SpawnFailed { program, .. }) => {
            assert_eq!(program, &missing.display().to_string());
        }
        other => panic!("expected spawn failure, got {other:?}"),
    }
    assert!(result.failure_summary().expect("summary").contains("FOREMAN_AGENT_BIN"));
}
