//! Child process handles: spawn, diagnostic drain, graceful-then-forced stop.

use std::collections::VecDeque;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;

use crate::config::{LaunchSpec, StopPolicy};
use crate::types::{McpError, McpResult};

/// Lines of child stderr kept for failure reports.
pub const DIAGNOSTIC_TAIL_LINES: usize = 64;

/// Log target for forwarded child stderr.
pub const CHILD_LOG_TARGET: &str = "toolbridge::child";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Running,
    Stopping,
    Exited,
}

/// How a child process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitReport {
    pub code: Option<i32>,
    /// Terminating signal (Unix only).
    pub signal: Option<i32>,
    /// True when the child had to be force-killed after the grace period.
    pub forced: bool,
}

impl ExitReport {
    fn from_status(status: ExitStatus, forced: bool) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
            forced,
        }
    }
}

/// Bounded tail of diagnostic lines, shared with the drain task.
#[derive(Debug, Clone, Default)]
pub struct DiagnosticTail {
    lines: Arc<Mutex<VecDeque<String>>>,
}

impl DiagnosticTail {
    fn push(&self, line: String) {
        if let Ok(mut lines) = self.lines.lock() {
            if lines.len() == DIAGNOSTIC_TAIL_LINES {
                lines.pop_front();
            }
            lines.push_back(line);
        }
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.lines
            .lock()
            .map(|lines| lines.iter().cloned().collect())
            .unwrap_or_default()
    }
}

/// A running (or finished) child and its pipes.
///
/// stdin/stdout are handed out once via `take_*`; stderr is always drained
/// by a background task so a chatty child never blocks on a full pipe.
pub struct ProcessHandle {
    command: String,
    pid: Option<u32>,
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
    diagnostics: DiagnosticTail,
    drain: Option<JoinHandle<()>>,
    state: ProcessState,
}

impl ProcessHandle {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    pub fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.stdin.take()
    }

    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.stdout.take()
    }

    /// Most recent stderr lines, oldest first.
    pub fn diagnostics(&self) -> Vec<String> {
        self.diagnostics.snapshot()
    }

    /// Poll for exit without blocking.
    pub fn try_exited(&mut self) -> McpResult<Option<ExitReport>> {
        let status = self.child.try_wait().map_err(McpError::Io)?;
        if status.is_some() {
            self.state = ProcessState::Exited;
        }
        Ok(status.map(|s| ExitReport::from_status(s, false)))
    }
}

/// Spawn a child with piped stdin/stdout/stderr.
///
/// The child is killed if the handle is dropped without [`stop`].
pub fn start(spec: &LaunchSpec) -> McpResult<ProcessHandle> {
    let mut child = Command::new(&spec.command)
        .args(&spec.args)
        .envs(&spec.env)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| McpError::Spawn {
            command: spec.command.clone(),
            reason: e.to_string(),
        })?;

    let pid = child.id();
    let diagnostics = DiagnosticTail::default();
    let drain = child
        .stderr
        .take()
        .map(|stderr| spawn_drain(stderr, pid, diagnostics.clone()));

    tracing::info!(command = %spec.command, pid = ?pid, "spawned server process");

    Ok(ProcessHandle {
        command: spec.command.clone(),
        pid,
        stdin: child.stdin.take(),
        stdout: child.stdout.take(),
        child,
        diagnostics,
        drain,
        state: ProcessState::Running,
    })
}

fn spawn_drain(stderr: ChildStderr, pid: Option<u32>, tail: DiagnosticTail) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    tracing::debug!(target: CHILD_LOG_TARGET, pid = ?pid, "{line}");
                    tail.push(line);
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!(pid = ?pid, error = %e, "stderr drain stopped");
                    break;
                }
            }
        }
    })
}

/// Stop a child: graceful termination, then force-kill after `policy.grace`.
///
/// Always reaps the child. Calling it on an already-exited child just
/// collects the status.
pub async fn stop(handle: &mut ProcessHandle, policy: &StopPolicy) -> McpResult<ExitReport> {
    // Closing stdin first lets well-behaved servers exit on EOF.
    handle.stdin.take();

    if let Some(report) = handle.try_exited()? {
        finish_drain(handle).await;
        tracing::info!(pid = ?handle.pid, code = ?report.code, "server process already exited");
        return Ok(report);
    }

    handle.state = ProcessState::Stopping;
    request_termination(handle);

    let report = match tokio::time::timeout(policy.grace, handle.child.wait()).await {
        Ok(Ok(status)) => {
            let report = ExitReport::from_status(status, false);
            tracing::info!(pid = ?handle.pid, code = ?report.code, "server process stopped");
            report
        }
        Ok(Err(e)) => return Err(McpError::Io(e)),
        Err(_) => {
            tracing::warn!(
                pid = ?handle.pid,
                grace_ms = policy.grace.as_millis() as u64,
                "server ignored termination, killing"
            );
            handle.child.start_kill().map_err(McpError::Io)?;
            let status = handle.child.wait().await.map_err(McpError::Io)?;
            ExitReport::from_status(status, true)
        }
    };

    handle.state = ProcessState::Exited;
    finish_drain(handle).await;
    Ok(report)
}

#[cfg(unix)]
fn request_termination(handle: &mut ProcessHandle) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(pid) = handle.pid else {
        return;
    };
    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    if let Err(e) = kill(Pid::from_raw(raw), Signal::SIGTERM) {
        tracing::warn!(pid, error = ?e, "SIGTERM failed");
    }
}

#[cfg(not(unix))]
fn request_termination(handle: &mut ProcessHandle) {
    // No graceful signal here; the grace period only covers exit-on-EOF.
    tracing::debug!(pid = ?handle.pid, "graceful termination unavailable on this platform");
}

async fn finish_drain(handle: &mut ProcessHandle) {
    if let Some(drain) = handle.drain.take() {
        // Grandchildren may hold stderr open; don't wait on them.
        if tokio::time::timeout(std::time::Duration::from_millis(200), drain)
            .await
            .is_err()
        {
            tracing::debug!(pid = ?handle.pid, "abandoning stderr drain");
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn sh(script: &str) -> LaunchSpec {
        LaunchSpec::new("sh").arg("-c").arg(script)
    }

    #[tokio::test]
    async fn test_stop_graceful() {
        let mut handle = start(&sh("sleep 30")).unwrap();
        assert_eq!(handle.state(), ProcessState::Running);

        let report = stop(&mut handle, &StopPolicy::default()).await.unwrap();
        assert!(!report.forced);
        assert_eq!(report.signal, Some(15));
        assert_eq!(handle.state(), ProcessState::Exited);
    }

    #[tokio::test]
    async fn test_stop_forces_stubborn_child() {
        let mut handle = start(&sh("trap '' TERM; while true; do sleep 0.05; done")).unwrap();
        // Give the shell a moment to install the trap.
        tokio::time::sleep(Duration::from_millis(200)).await;

        let policy = StopPolicy {
            grace: Duration::from_millis(300),
        };
        let started = Instant::now();
        let report = stop(&mut handle, &policy).await.unwrap();
        assert!(report.forced);
        assert_eq!(report.signal, Some(9));
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_diagnostics_are_drained() {
        let mut handle = start(&sh("echo warming up >&2; echo ready >&2; sleep 30")).unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(handle.diagnostics(), vec!["warming up", "ready"]);
        stop(&mut handle, &StopPolicy::default()).await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_after_exit_reports_code() {
        let mut handle = start(&sh("exit 3")).unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        let report = stop(&mut handle, &StopPolicy::default()).await.unwrap();
        assert_eq!(report.code, Some(3));
        assert!(!report.forced);
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let err = start(&LaunchSpec::new("/nonexistent/toolbridge-server")).err().unwrap();
        assert!(matches!(err, McpError::Spawn { .. }));
    }
}
