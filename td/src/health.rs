//! HealthRunner: typecheck/test/e2e commands from project config, run in the
//! worktree and captured with a bounded buffer. Same subprocess+timeout idiom as
//! `worker`, minus the line-delimited protocol — a health command just produces
//! text on stdout/stderr.

use std::process::Stdio;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::HealthError;

const MAX_CAPTURED_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthKind {
    Typecheck,
    Test,
    E2e,
}

impl HealthKind {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Typecheck => "typecheck",
            Self::Test => "test",
            Self::E2e => "e2e",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResult {
    pub kind: HealthKind,
    pub command: String,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub truncated: bool,
}

impl HealthResult {
    pub fn passed(&self) -> bool {
        self.exit_code == 0
    }
}

pub struct HealthRunner {
    workdir: std::path::PathBuf,
    timeout: Duration,
}

impl HealthRunner {
    pub fn new(workdir: impl Into<std::path::PathBuf>, timeout: Duration) -> Self {
        Self {
            workdir: workdir.into(),
            timeout,
        }
    }

    /// Runs every configured command for `kind` in order, stopping at the first
    /// failure. An empty command list is treated as a vacuous pass.
    pub async fn run_all(&self, kind: HealthKind, commands: &[String]) -> Result<Vec<HealthResult>, HealthError> {
        let mut results = Vec::new();
        for command in commands {
            let result = self.run_one(kind, command).await?;
            let failed = !result.passed();
            results.push(result);
            if failed {
                break;
            }
        }
        Ok(results)
    }

    async fn run_one(&self, kind: HealthKind, command: &str) -> Result<HealthResult, HealthError> {
        debug!(kind = kind.as_str(), command, "HealthRunner::run_one: called");

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&self.workdir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| HealthError::CommandFailed { command: command.to_string(), source })?;

        let mut stdout_pipe = child.stdout.take().expect("stdout was piped");
        let mut stderr_pipe = child.stderr.take().expect("stderr was piped");

        let capture = async {
            let mut stdout = Vec::new();
            let mut stderr = Vec::new();
            let (_, _) = tokio::join!(stdout_pipe.read_to_end(&mut stdout), stderr_pipe.read_to_end(&mut stderr));
            (stdout, stderr)
        };

        let (stdout_bytes, stderr_bytes) = match tokio::time::timeout(self.timeout, capture).await {
            Ok(pair) => pair,
            Err(_) => {
                let _ = child.start_kill();
                return Err(HealthError::Timeout { command: command.to_string(), timeout: self.timeout });
            }
        };

        let status = child
            .wait()
            .await
            .map_err(|source| HealthError::CommandFailed { command: command.to_string(), source })?;

        let mut truncated = false;
        let stdout = bound_and_decode(stdout_bytes, &mut truncated);
        let stderr = bound_and_decode(stderr_bytes, &mut truncated);
        if truncated {
            warn!(command, "HealthRunner: output exceeded capture limit, truncating");
        }

        Ok(HealthResult {
            kind,
            command: command.to_string(),
            exit_code: status.code().unwrap_or(-1),
            stdout,
            stderr,
            truncated,
        })
    }
}

fn bound_and_decode(mut bytes: Vec<u8>, truncated: &mut bool) -> String {
    if bytes.len() > MAX_CAPTURED_BYTES {
        bytes.truncate(MAX_CAPTURED_BYTES);
        *truncated = true;
    }
    String::from_utf8_lossy(&bytes).into_owned()
}
