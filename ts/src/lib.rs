//! `taskstore`: persistence and query layer for the durable task backlog (component C1).
//!
//! `tasks.jsonl` is the single source of truth; writes go through a process-local lock
//! and an atomic tmpfile-then-rename, with an in-memory SQLite index kept in sync for
//! `ready`/`pickNext`/dependency-closure queries.

pub mod error;
pub mod store;
pub mod task;

pub use error::{Result, TaskStoreError};
pub use store::TaskStore;
pub use task::{Dependency, DependencyRelation, Task, TaskFilter, TaskPatch, TaskStatus};

/// Current time in Unix milliseconds, the timestamp unit used throughout this crate.
pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before Unix epoch")
        .as_millis() as i64
}
