//! WorkerDriver: launches the external code-worker process per subtask and streams
//! its events. Defined as an `async_trait` so tests can substitute a scripted
//! driver without spawning a real subprocess, the same seam the workspace's own
//! `Tool` trait provides for builtin tools.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::cancel::CancelSignal;
use crate::error::WorkerError;

const MAX_CAPTURED_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WorkerEvent {
    Started,
    ToolCall { id: String, name: String, args: serde_json::Value },
    ToolResult { source_id: String, content: String },
    Message { text: String },
    FinalMetrics { tokens: u64, cost: f64, turns: u32 },
    Exit { code: i32, reason: String },
}

/// One subtask invocation: working directory, an instruction, and a timeout.
#[derive(Debug, Clone)]
pub struct SubtaskInvocation {
    pub instruction: String,
    pub workdir: std::path::PathBuf,
    pub timeout: Duration,
    /// Delay between SIGTERM and SIGKILL when the subprocess must be cancelled.
    pub kill_grace: Duration,
}

#[async_trait]
pub trait WorkerDriver: Send + Sync {
    /// Runs one subtask to completion, returning every event it emitted in order.
    /// A non-zero exit or a missing completion marker is surfaced as the final
    /// `Exit` event's `reason`; the driver itself never retries. `cancel` firing
    /// mid-run terminates the subprocess (SIGTERM, then SIGKILL after
    /// `invocation.kill_grace`) and appends a terminal `Exit{reason: "cancelled"}`
    /// rather than erroring, the same way a timeout is reported.
    async fn run_subtask(&self, invocation: &SubtaskInvocation, cancel: &CancelSignal) -> Result<Vec<WorkerEvent>, WorkerError>;
}

/// Production driver: spawns a configured external binary, feeds it a single-line
/// JSON instruction on stdin, and parses line-delimited JSON events off stdout.
pub struct ProcessWorkerDriver {
    binary: String,
    extra_args: Vec<String>,
}

impl ProcessWorkerDriver {
    pub fn new(binary: impl Into<String>, extra_args: Vec<String>) -> Self {
        Self {
            binary: binary.into(),
            extra_args,
        }
    }
}

/// Sends SIGTERM, waits up to `grace` for the child to exit on its own, then
/// SIGKILLs it if it's still alive.
async fn terminate_gracefully(child: &mut Child, grace: Duration) {
    if let Some(pid) = child.id() {
        let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
    } else {
        return;
    }

    let waited = tokio::time::timeout(grace, child.wait()).await;
    if waited.is_err() {
        warn!("ProcessWorkerDriver: worker did not exit within grace period, sending SIGKILL");
        let _ = child.start_kill();
        let _ = child.wait().await;
    }
}

#[async_trait]
impl WorkerDriver for ProcessWorkerDriver {
    async fn run_subtask(&self, invocation: &SubtaskInvocation, cancel: &CancelSignal) -> Result<Vec<WorkerEvent>, WorkerError> {
        debug!(binary = %self.binary, workdir = ?invocation.workdir, "ProcessWorkerDriver::run_subtask: called");

        let mut child = Command::new(&self.binary)
            .args(&self.extra_args)
            .current_dir(&invocation.workdir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(WorkerError::SpawnFailed)?;

        let instruction_line = format!("{}\n", serde_json::json!({ "instruction": invocation.instruction }));
        if let Some(mut stdin) = child.stdin.take() {
            let _ = stdin.write_all(instruction_line.as_bytes()).await;
        }

        let stdout = child.stdout.take().expect("stdout was piped");
        let mut lines = BufReader::new(stdout).lines();

        let mut events: Vec<WorkerEvent> = Vec::new();
        let mut captured = 0usize;
        let mut cancel = cancel.clone();
        let deadline = tokio::time::Instant::now() + invocation.timeout;

        let terminal: Option<WorkerEvent> = loop {
            tokio::select! {
                line = lines.next_line() => {
                    match line {
                        Ok(Some(line)) => {
                            captured += line.len();
                            if captured > MAX_CAPTURED_BYTES {
                                warn!("ProcessWorkerDriver: output exceeded capture limit, truncating");
                                break None;
                            }
                            match serde_json::from_str::<WorkerEvent>(&line) {
                                Ok(event) => events.push(event),
                                Err(e) => return Err(WorkerError::ProtocolViolation(format!("{e}: {line}"))),
                            }
                        }
                        Ok(None) => break None,
                        Err(e) => return Err(WorkerError::SpawnFailed(e)),
                    }
                }
                _ = tokio::time::sleep_until(deadline) => {
                    terminate_gracefully(&mut child, invocation.kill_grace).await;
                    break Some(WorkerEvent::Exit { code: -1, reason: "timeout".to_string() });
                }
                _ = cancel.cancelled() => {
                    terminate_gracefully(&mut child, invocation.kill_grace).await;
                    break Some(WorkerEvent::Exit { code: -1, reason: "cancelled".to_string() });
                }
            }
        };

        if let Some(event) = terminal {
            events.push(event);
            return Ok(events);
        }

        let status = child.wait().await.map_err(WorkerError::SpawnFailed)?;
        if !matches!(events.last(), Some(WorkerEvent::Exit { .. })) {
            let code = status.code().unwrap_or(-1);
            events.push(WorkerEvent::Exit {
                code,
                reason: if status.success() { "completed".to_string() } else { "non_zero_exit".to_string() },
            });
        }

        if !status.success() {
            return Err(WorkerError::NonZeroExit(status.code().unwrap_or(-1)));
        }

        Ok(events)
    }
}

/// Scripted driver used by Orchestrator/SpellEngine tests.
pub struct ScriptedWorkerDriver {
    events: Vec<WorkerEvent>,
}

impl ScriptedWorkerDriver {
    pub fn new(events: Vec<WorkerEvent>) -> Self {
        Self { events }
    }

    pub fn succeeding(message: &str) -> Self {
        Self::new(vec![
            WorkerEvent::Started,
            WorkerEvent::Message { text: message.to_string() },
            WorkerEvent::Exit { code: 0, reason: "completed".to_string() },
        ])
    }

    pub fn failing(reason: &str) -> Self {
        Self::new(vec![WorkerEvent::Started, WorkerEvent::Exit { code: 1, reason: reason.to_string() }])
    }
}

#[async_trait]
impl WorkerDriver for ScriptedWorkerDriver {
    async fn run_subtask(&self, _invocation: &SubtaskInvocation, _cancel: &CancelSignal) -> Result<Vec<WorkerEvent>, WorkerError> {
        Ok(self.events.clone())
    }
}

pub fn workdir_exists(path: &Path) -> bool {
    path.exists()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invocation(workdir: std::path::PathBuf, timeout: Duration) -> SubtaskInvocation {
        SubtaskInvocation { instruction: "do the thing".to_string(), workdir, timeout, kill_grace: Duration::from_millis(200) }
    }

    #[tokio::test]
    async fn scripted_driver_replays_its_script() {
        let driver = ScriptedWorkerDriver::succeeding("did the thing");
        let invocation = invocation(std::path::PathBuf::from("."), Duration::from_secs(1));
        let events = driver.run_subtask(&invocation, &crate::cancel::never()).await.unwrap();
        assert!(matches!(events.last(), Some(WorkerEvent::Exit { code: 0, .. })));
    }

    #[tokio::test]
    async fn process_driver_runs_a_real_echo_subprocess() {
        let dir = tempfile::TempDir::new().unwrap();
        let driver = ProcessWorkerDriver::new(
            "sh",
            vec![
                "-c".to_string(),
                r#"echo '{"type":"Started"}'; echo '{"type":"Exit","code":0,"reason":"completed"}'"#.to_string(),
            ],
        );
        let invocation = invocation(dir.path().to_path_buf(), Duration::from_secs(5));
        let events = driver.run_subtask(&invocation, &crate::cancel::never()).await.unwrap();
        assert!(matches!(events[0], WorkerEvent::Started));
        assert!(matches!(events.last(), Some(WorkerEvent::Exit { code: 0, .. })));
    }

    #[tokio::test]
    async fn process_driver_times_out_on_a_hanging_command() {
        let dir = tempfile::TempDir::new().unwrap();
        let driver = ProcessWorkerDriver::new("sleep", vec!["5".to_string()]);
        let invocation = invocation(dir.path().to_path_buf(), Duration::from_millis(100));
        let events = driver.run_subtask(&invocation, &crate::cancel::never()).await.unwrap();
        assert!(matches!(events.last(), Some(WorkerEvent::Exit { reason, .. }) if reason == "timeout"));
    }

    #[tokio::test]
    async fn process_driver_cancellation_sends_sigterm_then_exits_cancelled() {
        let dir = tempfile::TempDir::new().unwrap();
        let driver = ProcessWorkerDriver::new("sleep", vec!["5".to_string()]);
        let invocation = invocation(dir.path().to_path_buf(), Duration::from_secs(5));
        let (handle, cancel) = crate::cancel::channel();

        let run = tokio::spawn(async move { driver.run_subtask(&invocation, &cancel).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.cancel();

        let events = run.await.unwrap().unwrap();
        assert!(matches!(events.last(), Some(WorkerEvent::Exit { reason, .. }) if reason == "cancelled"));
    }
}
