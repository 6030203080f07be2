//! Errors for the small set of contextstore operations that are not best-effort.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("failed to spawn git: {0}")]
    GitSpawn(std::io::Error),

    #[error("git command failed: {command} (exit {code:?}): {stderr}")]
    GitFailed { command: String, code: Option<i32>, stderr: String },

    #[error("failed to read progress memo at {path}: {source}")]
    ProgressRead { path: String, source: std::io::Error },

    #[error("failed to write progress memo at {path}: {source}")]
    ProgressWrite { path: String, source: std::io::Error },
}

pub type Result<T> = std::result::Result<T, ContextError>;
