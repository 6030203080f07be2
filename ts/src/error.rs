//! Error taxonomy for the task store.

use thiserror::Error;

/// Errors a [`crate::store::TaskStore`] can raise.
///
/// Mirrors the `TaskStoreError{read_error, parse_error, write_error, merge_conflict}`
/// kind taxonomy: callers recover by retrying once, then treat the session as fatal.
#[derive(Debug, Error)]
pub enum TaskStoreError {
    #[error("failed to read task store at {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse task record: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("failed to write task store at {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("merge conflict on task {id}: both sides closed with different reasons")]
    MergeConflict { id: String },

    #[error("task not found: {0}")]
    NotFound(String),

    #[error("invalid child id {child}: prefix task {parent} does not exist")]
    InvalidParent { child: String, parent: String },

    #[error("task index error: {0}")]
    Index(#[from] rusqlite::Error),

    #[error("store lock contested: {0}")]
    LockContested(String),
}

pub type Result<T> = std::result::Result<T, TaskStoreError>;
