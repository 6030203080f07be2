//! Top-level error taxonomy, one `thiserror` enum per component composed into
//! `OrchestratorError`. Library code returns these directly; only `main` reaches
//! for `eyre`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrajectoryError {
    #[error("failed to read trajectory at {path}: {source}")]
    Io { path: String, source: std::io::Error },
    #[error("trajectory file at {path} is corrupt: {source}")]
    CorruptJson { path: String, source: serde_json::Error },
    #[error("trajectory schema mismatch: expected {expected}, found {found}")]
    SchemaMismatch { expected: String, found: String },
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("failed to spawn worker: {0}")]
    SpawnFailed(std::io::Error),
    #[error("worker timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("worker exited with non-zero status {0}")]
    NonZeroExit(i32),
    #[error("worker emitted a malformed event: {0}")]
    ProtocolViolation(String),
}

#[derive(Debug, Error)]
pub enum HealthError {
    #[error("health command `{command}` failed: {source}")]
    CommandFailed { command: String, source: std::io::Error },
    #[error("health command `{command}` timed out after {timeout:?}")]
    Timeout { command: String, timeout: std::time::Duration },
}

#[derive(Debug, Error)]
pub enum HealerError {
    #[error("policy denied healing: {0}")]
    PolicyDenied(String),
    #[error("failed to build healer context: {0}")]
    ContextBuildFailed(String),
    #[error("spell `{spell}` failed: {reason}")]
    SpellFailed { spell: String, reason: String },
    #[error("spell `{spell}` was cancelled")]
    SpellCancelled { spell: String },
}

#[derive(Debug, Error)]
pub enum LockError {
    #[error("stale session lock at {path} could not be removed: {source}")]
    StaleNotRemovable { path: String, source: std::io::Error },
    #[error("session lock at {path} is held by pid {pid}")]
    Contested { path: String, pid: u32 },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {source}")]
    Read { path: String, source: std::io::Error },
    #[error("failed to parse config at {path}: {source}")]
    Parse { path: String, source: serde_json::Error },
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    TaskStore(#[from] taskstore::TaskStoreError),
    #[error(transparent)]
    Trajectory(#[from] TrajectoryError),
    #[error(transparent)]
    Worker(#[from] WorkerError),
    #[error(transparent)]
    Health(#[from] HealthError),
    #[error(transparent)]
    Healer(#[from] HealerError),
    #[error(transparent)]
    Lock(#[from] LockError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("session cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
