//! Helpers for running child processes with timeouts and line streaming.

use std::io::{BufRead, BufReader, Read};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};
use wait_timeout::ChildExt;

/// How a streamed child process ended.
#[derive(Debug)]
pub struct StreamedExit {
    /// `None` only when the child was killed and its status is unavailable.
    pub status: Option<ExitStatus>,
    pub timed_out: bool,
    pub elapsed: Duration,
}

impl StreamedExit {
    pub fn exit_code(&self) -> Option<i32> {
        self.status.and_then(|status| status.code())
    }
}

/// Spawn `cmd` with stdin closed and both output pipes captured.
///
/// The child is put in its own process group so a terminal interrupt aimed at
/// the engine does not also kill the in-flight agent.
pub fn spawn_piped(cmd: &mut Command) -> std::io::Result<Child> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }
    debug!("spawning child process");
    cmd.spawn()
}

/// Drain stdout and stderr line by line, handing each line to `on_line` as it arrives.
///
/// Lines from both pipes are interleaved in arrival order. When `timeout`
/// elapses the child is killed; reader threads are then detached instead of
/// joined, since grandchildren may still hold the pipes open.
#[instrument(skip_all, fields(timeout_secs = timeout.map(|t| t.as_secs())))]
pub fn stream_child_lines<F: FnMut(&str)>(
    mut child: Child,
    timeout: Option<Duration>,
    mut on_line: F,
) -> Result<StreamedExit> {
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let started = Instant::now();
    let deadline = timeout.map(|t| started + t);

    let (tx, rx) = mpsc::channel::<String>();
    let stderr_tx = tx.clone();
    let stdout_handle = thread::spawn(move || forward_lines(stdout, &tx));
    let stderr_handle = thread::spawn(move || forward_lines(stderr, &stderr_tx));

    let mut timed_out = false;
    loop {
        let received = match deadline {
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    timed_out = true;
                    break;
                }
                rx.recv_timeout(remaining)
            }
            None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };
        match received {
            Ok(line) => on_line(&line),
            Err(RecvTimeoutError::Timeout) => {
                timed_out = true;
                break;
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    let status = if timed_out {
        kill_child(&mut child, timeout)?
    } else {
        // Both pipes are closed; the child is exiting or already gone.
        let remaining = deadline.map(|d| d.saturating_duration_since(Instant::now()));
        match remaining {
            Some(remaining) => match child
                .wait_timeout(remaining)
                .context("wait for command")?
            {
                Some(status) => Some(status),
                None => {
                    timed_out = true;
                    kill_child(&mut child, timeout)?
                }
            },
            None => Some(child.wait().context("wait for command")?),
        }
    };

    if !timed_out {
        join_reader(stdout_handle).context("join stdout")?;
        join_reader(stderr_handle).context("join stderr")?;
    }

    let elapsed = started.elapsed();
    debug!(exit_code = ?status.and_then(|s| s.code()), timed_out, elapsed_ms = elapsed.as_millis() as u64, "command finished");
    Ok(StreamedExit {
        status,
        timed_out,
        elapsed,
    })
}

fn kill_child(child: &mut Child, timeout: Option<Duration>) -> Result<Option<ExitStatus>> {
    warn!(
        timeout_secs = timeout.map(|t| t.as_secs()),
        "command timed out, killing"
    );
    kill_tree(child)?;
    let status = child
        .wait_timeout(Duration::from_secs(5))
        .context("wait command after kill")?;
    Ok(status)
}

/// Kill the child and everything it spawned. The child leads its own process
/// group, so on unix the whole group goes.
#[cfg(unix)]
fn kill_tree(child: &mut Child) -> Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    match killpg(Pid::from_raw(child.id() as i32), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(err) => Err(err).context("kill process group"),
    }
}

#[cfg(not(unix))]
fn kill_tree(child: &mut Child) -> Result<()> {
    child.kill().context("kill command")
}

fn join_reader(handle: thread::JoinHandle<Result<()>>) -> Result<()> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

/// Send each line (without its terminator) until EOF or the receiver goes away.
fn forward_lines<R: Read>(reader: R, tx: &Sender<String>) -> Result<()> {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let n = reader.read_until(b'\n', &mut buf).context("read line")?;
        if n == 0 {
            return Ok(());
        }
        let line = String::from_utf8_lossy(&buf);
        let line = line.trim_end_matches(['\n', '\r']);
        if tx.send(line.to_string()).is_err() {
            return Ok(());
        }
    }
}
