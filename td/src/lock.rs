//! Session filesystem lock: `<root>/.openagents/session.lock`, `{pid, sessionId,
//! startedAt}`. Mutually excludes concurrent Orchestrator sessions on the same
//! project root, the same `fs2` advisory-lock idiom `taskstore` uses for its own
//! store lock, plus pid-liveness-based staleness recovery.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::LockError;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LockDocument {
    pid: u32,
    session_id: String,
    started_at: DateTime<Utc>,
}

pub struct SessionLock {
    path: PathBuf,
    _file: File,
}

impl SessionLock {
    /// Acquires the lock at `<root>/.openagents/session.lock`, recovering a stale
    /// holder first: a holder is stale if its pid is no longer alive, or its lock
    /// age exceeds `stale_after`.
    pub fn acquire(root: &Path, session_id: &str, stale_after: Duration) -> Result<Self, LockError> {
        let dir = root.join(".openagents");
        fs::create_dir_all(&dir).map_err(|source| LockError::StaleNotRemovable { path: dir.display().to_string(), source })?;
        let path = dir.join("session.lock");

        if let Some(existing) = read_lock(&path) {
            if is_stale(&existing, stale_after) {
                warn!(pid = existing.pid, session_id = %existing.session_id, "SessionLock::acquire: removing stale lock");
                fs::remove_file(&path).map_err(|source| LockError::StaleNotRemovable { path: path.display().to_string(), source })?;
            } else {
                return Err(LockError::Contested { path: path.display().to_string(), pid: existing.pid });
            }
        }

        let file = OpenOptions::new().create(true).write(true).truncate(true).open(&path).map_err(|source| LockError::StaleNotRemovable {
            path: path.display().to_string(),
            source,
        })?;
        file.try_lock_exclusive().map_err(|_| LockError::Contested { path: path.display().to_string(), pid: std::process::id() })?;

        let doc = LockDocument { pid: std::process::id(), session_id: session_id.to_string(), started_at: Utc::now() };
        let json = serde_json::to_string_pretty(&doc).expect("lock document always serializes");
        fs::write(&path, json).map_err(|source| LockError::StaleNotRemovable { path: path.display().to_string(), source })?;

        info!(session_id, pid = doc.pid, "SessionLock::acquire: lock held");
        Ok(Self { path, _file: file })
    }
}

impl Drop for SessionLock {
    fn drop(&mut self) {
        debug!(path = ?self.path, "SessionLock::drop: releasing lock");
        let _ = fs::remove_file(&self.path);
    }
}

fn read_lock(path: &Path) -> Option<LockDocument> {
    let content = fs::read_to_string(path).ok()?;
    serde_json::from_str(&content).ok()
}

fn is_stale(doc: &LockDocument, stale_after: Duration) -> bool {
    if !pid_alive(doc.pid) {
        return true;
    }
    let age = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64 - doc.started_at.timestamp();
    age >= stale_after.as_secs() as i64
}

fn pid_alive(pid: u32) -> bool {
    kill(Pid::from_raw(pid as i32), None).is_ok()
}
