//! `TaskStore`: atomic, lock-guarded persistence for the task backlog.
//!
//! `tasks.jsonl` on disk is the single source of truth (one JSON `Task` per line); an
//! in-memory SQLite connection is rebuilt from it on every load and kept current on
//! every mutation, so `ready`/`pickNext`/dependency-closure queries don't need a linear
//! scan of the whole backlog.

use std::collections::{HashSet, VecDeque};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use fs2::FileExt;
use rusqlite::{Connection, params};
use tracing::{debug, info, warn};

use crate::error::{Result, TaskStoreError};
use crate::task::{DependencyRelation, Task, TaskFilter, TaskPatch, TaskStatus};

/// A process-local, lock-guarded handle onto `<root>/tasks.jsonl`.
pub struct TaskStore {
    tasks_path: PathBuf,
    archive_path: PathBuf,
    /// OS-level advisory lock on the store, held for the lifetime of this handle so a
    /// second process pointed at the same root fails fast instead of racing the file.
    _file_lock: File,
    /// Serializes the read-merge-write cycle within this process.
    write_lock: Mutex<()>,
    index: Mutex<Connection>,
}

impl TaskStore {
    /// Open (creating if absent) the task store rooted at `dir` (the project's
    /// `.openagents` directory).
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).map_err(|source| TaskStoreError::Write {
            path: dir.display().to_string(),
            source,
        })?;

        let tasks_path = dir.join("tasks.jsonl");
        let archive_path = dir.join("tasks.archive.jsonl");
        let lock_path = dir.join("tasks.lock");

        let lock_file = File::create(&lock_path).map_err(|source| TaskStoreError::Write {
            path: lock_path.display().to_string(),
            source,
        })?;
        lock_file
            .try_lock_exclusive()
            .map_err(|e| TaskStoreError::LockContested(format!("{}: {e}", lock_path.display())))?;

        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;

        let store = Self {
            tasks_path,
            archive_path,
            _file_lock: lock_file,
            write_lock: Mutex::new(()),
            index: Mutex::new(conn),
        };

        let tasks = store.read_all()?;
        store.rebuild_index(&tasks)?;
        debug!(count = tasks.len(), "TaskStore::open: loaded tasks into index");
        Ok(store)
    }

    fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute_batch(
            "CREATE TABLE tasks (
                id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                priority INTEGER NOT NULL,
                created_at INTEGER NOT NULL
             );
             CREATE TABLE deps (
                task_id TEXT NOT NULL,
                dep_id TEXT NOT NULL,
                relation TEXT NOT NULL
             );
             CREATE INDEX deps_task_id ON deps(task_id);",
        )
    }

    fn rebuild_index(&self, tasks: &[Task]) -> Result<()> {
        let conn = self.index.lock().expect("index lock poisoned");
        conn.execute_batch("DELETE FROM tasks; DELETE FROM deps;")?;
        for t in tasks {
            conn.execute(
                "INSERT INTO tasks (id, status, priority, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![t.id, status_str(t.status), t.priority, t.created_at],
            )?;
            for d in &t.deps {
                conn.execute(
                    "INSERT INTO deps (task_id, dep_id, relation) VALUES (?1, ?2, ?3)",
                    params![t.id, d.id, relation_str(d.relation)],
                )?;
            }
        }
        Ok(())
    }

    fn read_all(&self) -> Result<Vec<Task>> {
        if !self.tasks_path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(&self.tasks_path).map_err(|source| TaskStoreError::Read {
            path: self.tasks_path.display().to_string(),
            source,
        })?;
        let reader = BufReader::new(file);
        let mut tasks = Vec::new();
        for line in reader.lines() {
            let line = line.map_err(|source| TaskStoreError::Read {
                path: self.tasks_path.display().to_string(),
                source,
            })?;
            if line.trim().is_empty() {
                continue;
            }
            tasks.push(serde_json::from_str(&line)?);
        }
        Ok(tasks)
    }

    /// Atomically rewrite `tasks.jsonl` from `tasks`, then refresh the in-memory index.
    fn write_all(&self, tasks: &[Task]) -> Result<()> {
        let tmp_path = self.tasks_path.with_extension("jsonl.tmp");
        let mut tmp = File::create(&tmp_path).map_err(|source| TaskStoreError::Write {
            path: tmp_path.display().to_string(),
            source,
        })?;
        for t in tasks {
            let line = serde_json::to_string(t)?;
            writeln!(tmp, "{line}").map_err(|source| TaskStoreError::Write {
                path: tmp_path.display().to_string(),
                source,
            })?;
        }
        tmp.sync_all().ok();
        fs::rename(&tmp_path, &self.tasks_path).map_err(|source| TaskStoreError::Write {
            path: self.tasks_path.display().to_string(),
            source,
        })?;
        self.rebuild_index(tasks)?;
        Ok(())
    }

    pub fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>> {
        let _guard = self.write_lock.lock().expect("write lock poisoned");
        Ok(self.read_all()?.into_iter().filter(|t| filter.matches(t)).collect())
    }

    pub fn get(&self, id: &str) -> Result<Task> {
        let _guard = self.write_lock.lock().expect("write lock poisoned");
        self.read_all()?
            .into_iter()
            .find(|t| t.id == id)
            .ok_or_else(|| TaskStoreError::NotFound(id.to_string()))
    }

    /// Open tasks whose `blocks` dependencies are all closed, via the SQL the index
    /// keeps up to date rather than a linear scan plus dependency walk.
    pub fn ready(&self, filter: &TaskFilter) -> Result<Vec<Task>> {
        let _guard = self.write_lock.lock().expect("write lock poisoned");
        let ready_ids = self.ready_ids_from_index()?;
        Ok(self
            .read_all()?
            .into_iter()
            .filter(|t| ready_ids.contains(&t.id) && filter.matches(t))
            .collect())
    }

    fn ready_ids_from_index(&self) -> Result<HashSet<String>> {
        let conn = self.index.lock().expect("index lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT t.id FROM tasks t
             WHERE t.status = 'open'
               AND NOT EXISTS (
                 SELECT 1 FROM deps d
                 JOIN tasks dt ON dt.id = d.dep_id
                 WHERE d.task_id = t.id AND d.relation = 'blocks' AND dt.status != 'closed'
               )",
        )?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut ids = HashSet::new();
        for row in rows {
            ids.insert(row?);
        }
        Ok(ids)
    }

    /// Highest priority (lowest priority number) ready task, tie-broken by oldest
    /// `created_at`.
    pub fn pick_next(&self, filter: &TaskFilter) -> Result<Option<Task>> {
        let mut ready = self.ready(filter)?;
        ready.sort_by(|a, b| a.priority.cmp(&b.priority).then(a.created_at.cmp(&b.created_at)));
        Ok(ready.into_iter().next())
    }

    pub fn create(&self, task: Task) -> Result<String> {
        let _guard = self.write_lock.lock().expect("write lock poisoned");
        let mut tasks = self.read_all()?;
        if let Some(parent) = task.parent_id()
            && !tasks.iter().any(|t| t.id == parent)
        {
            return Err(TaskStoreError::InvalidParent {
                child: task.id.clone(),
                parent,
            });
        }
        let id = task.id.clone();
        tasks.push(task);
        self.write_all(&tasks)?;
        info!(%id, "TaskStore::create: task created");
        Ok(id)
    }

    /// Apply `patch` against the task currently on disk, three-way merging against
    /// `base` (the snapshot the caller read before computing `patch`) when the disk
    /// has advanced since then.
    pub fn update(&self, base: &Task, patch: TaskPatch) -> Result<Task> {
        let _guard = self.write_lock.lock().expect("write lock poisoned");
        let mut tasks = self.read_all()?;
        let idx = tasks
            .iter()
            .position(|t| t.id == base.id)
            .ok_or_else(|| TaskStoreError::NotFound(base.id.clone()))?;

        let merged = if tasks[idx].updated_at == base.updated_at {
            apply_patch(tasks[idx].clone(), patch)
        } else {
            warn!(id = %base.id, "TaskStore::update: disk advanced since base snapshot, three-way merging");
            three_way_merge(base, &tasks[idx], patch)?
        };

        tasks[idx] = merged.clone();
        self.write_all(&tasks)?;
        Ok(merged)
    }

    pub fn close(&self, id: &str, reason: impl Into<String>) -> Result<Task> {
        let _guard = self.write_lock.lock().expect("write lock poisoned");
        let mut tasks = self.read_all()?;
        let task = tasks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| TaskStoreError::NotFound(id.to_string()))?;
        task.close(reason);
        let result = task.clone();
        self.write_all(&tasks)?;
        Ok(result)
    }

    pub fn reopen(&self, id: &str) -> Result<Task> {
        let _guard = self.write_lock.lock().expect("write lock poisoned");
        let mut tasks = self.read_all()?;
        let task = tasks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| TaskStoreError::NotFound(id.to_string()))?;
        task.reopen();
        let result = task.clone();
        self.write_all(&tasks)?;
        Ok(result)
    }

    /// Move closed tasks with `closedAt < before` out of `tasks.jsonl` and into the
    /// archive file. Returns the number archived. Tasks are never deleted outright.
    pub fn archive(&self, before: i64) -> Result<usize> {
        let _guard = self.write_lock.lock().expect("write lock poisoned");
        let tasks = self.read_all()?;
        let (to_archive, to_keep): (Vec<Task>, Vec<Task>) = tasks
            .into_iter()
            .partition(|t| t.status.is_closed() && t.closed_at.map(|c| c < before).unwrap_or(false));

        if to_archive.is_empty() {
            return Ok(0);
        }

        let mut archive_file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.archive_path)
            .map_err(|source| TaskStoreError::Write {
                path: self.archive_path.display().to_string(),
                source,
            })?;
        for t in &to_archive {
            writeln!(archive_file, "{}", serde_json::to_string(t)?).map_err(|source| TaskStoreError::Write {
                path: self.archive_path.display().to_string(),
                source,
            })?;
        }

        let count = to_archive.len();
        self.write_all(&to_keep)?;
        info!(count, "TaskStore::archive: archived tasks");
        Ok(count)
    }

    /// All task ids transitively reachable via `blocks` edges from `id` (the tasks
    /// that must close, directly or indirectly, before `id` can become ready).
    pub fn blocking_closure(&self, id: &str) -> Result<HashSet<String>> {
        let _guard = self.write_lock.lock().expect("write lock poisoned");
        let tasks = self.read_all()?;
        let by_id: std::collections::HashMap<&str, &Task> = tasks.iter().map(|t| (t.id.as_str(), t)).collect();

        let mut seen = HashSet::new();
        let mut queue = VecDeque::new();
        queue.push_back(id.to_string());
        while let Some(current) = queue.pop_front() {
            let Some(task) = by_id.get(current.as_str()) else { continue };
            for dep in &task.deps {
                if dep.relation == DependencyRelation::Blocks && seen.insert(dep.id.clone()) {
                    queue.push_back(dep.id.clone());
                }
            }
        }
        Ok(seen)
    }
}

fn apply_patch(mut task: Task, patch: TaskPatch) -> Task {
    if let Some(title) = patch.title {
        task.title = title;
    }
    if let Some(description) = patch.description {
        task.description = description;
    }
    if let Some(status) = patch.status {
        task.status = status;
    }
    if let Some(priority) = patch.priority {
        task.priority = priority;
    }
    task.labels.extend(patch.add_labels);
    for dep in patch.add_deps {
        if !task.deps.contains(&dep) {
            task.deps.push(dep);
        }
    }
    task.commits.extend(patch.add_commits);
    task.touch();
    task
}

/// Field-level three-way merge: array fields are unioned across `base`, `current` and
/// `patch`; scalar conflicts are resolved in favor of `current` (the higher
/// `updatedAt`) unless `patch` explicitly sets the field, which always wins as the
/// caller's newest intent. Fails only when both sides independently closed the task
/// with different reasons.
fn three_way_merge(base: &Task, current: &Task, patch: TaskPatch) -> Result<Task> {
    if base.status == TaskStatus::Closed
        && current.status == TaskStatus::Closed
        && base.close_reason != current.close_reason
        && patch.status.is_none()
    {
        return Err(TaskStoreError::MergeConflict { id: base.id.clone() });
    }

    let mut merged = current.clone();
    merged.labels.extend(base.labels.iter().cloned());
    for dep in &base.deps {
        if !merged.deps.contains(dep) {
            merged.deps.push(dep.clone());
        }
    }
    for commit in &base.commits {
        if !merged.commits.contains(commit) {
            merged.commits.push(commit.clone());
        }
    }
    Ok(apply_patch(merged, patch))
}

fn status_str(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Open => "open",
        TaskStatus::InProgress => "in_progress",
        TaskStatus::Blocked => "blocked",
        TaskStatus::Closed => "closed",
    }
}

fn relation_str(relation: DependencyRelation) -> &'static str {
    match relation {
        DependencyRelation::Blocks => "blocks",
        DependencyRelation::Related => "related",
        DependencyRelation::ParentChild => "parent-child",
        DependencyRelation::DiscoveredFrom => "discovered-from",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_store() -> (TempDir, TaskStore) {
        let dir = TempDir::new().unwrap();
        let store = TaskStore::open(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn create_and_list_roundtrip() {
        let (_dir, store) = open_store();
        store.create(Task::new("oa-1", "first", "desc")).unwrap();
        let tasks = store.list(&TaskFilter::default()).unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].id, "oa-1");
    }

    #[test]
    fn ready_excludes_tasks_with_open_blockers() {
        let (_dir, store) = open_store();
        store.create(Task::new("oa-1", "blocker", "d")).unwrap();
        store
            .create(Task::new("oa-2", "blocked", "d").with_dep("oa-1", DependencyRelation::Blocks))
            .unwrap();

        let ready = store.ready(&TaskFilter::default()).unwrap();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].id, "oa-1");

        store.close("oa-1", "done").unwrap();
        let ready = store.ready(&TaskFilter::default()).unwrap();
        assert_eq!(ready.iter().map(|t| t.id.as_str()).collect::<Vec<_>>(), vec!["oa-2"]);
    }

    #[test]
    fn pick_next_orders_by_priority_then_age() {
        let (_dir, store) = open_store();
        store.create(Task::new("oa-1", "low pri", "d").with_priority(50)).unwrap();
        store.create(Task::new("oa-2", "high pri", "d").with_priority(10)).unwrap();

        let next = store.pick_next(&TaskFilter::default()).unwrap().unwrap();
        assert_eq!(next.id, "oa-2");
    }

    #[test]
    fn update_without_conflict_applies_patch_directly() {
        let (_dir, store) = open_store();
        store.create(Task::new("oa-1", "t", "d")).unwrap();
        let base = store.get("oa-1").unwrap();

        let patch = TaskPatch {
            priority: Some(5),
            ..Default::default()
        };
        let updated = store.update(&base, patch).unwrap();
        assert_eq!(updated.priority, 5);
        assert!(updated.updated_at >= base.updated_at);
    }

    #[test]
    fn update_merges_when_disk_advanced() {
        let (_dir, store) = open_store();
        store
            .create(Task::new("oa-1", "t", "d").with_labels(["a".to_string()]))
            .unwrap();
        let base = store.get("oa-1").unwrap();

        // Someone else advances the disk copy first.
        store
            .update(
                &base,
                TaskPatch {
                    add_labels: ["b".to_string()].into_iter().collect(),
                    ..Default::default()
                },
            )
            .unwrap();

        // Our patch, computed against the stale `base`, should still merge cleanly.
        let merged = store
            .update(
                &base,
                TaskPatch {
                    add_labels: ["c".to_string()].into_iter().collect(),
                    ..Default::default()
                },
            )
            .unwrap();

        assert!(merged.labels.contains("a"));
        assert!(merged.labels.contains("b"));
        assert!(merged.labels.contains("c"));
    }

    #[test]
    fn update_conflict_when_both_sides_close_differently() {
        let (_dir, store) = open_store();
        store.create(Task::new("oa-1", "t", "d")).unwrap();
        let base = store.get("oa-1").unwrap();

        store.close("oa-1", "resolved-upstream").unwrap();

        let mut stale_base = base.clone();
        stale_base.close("stale-reason");

        let result = store.update(&stale_base, TaskPatch::default());
        assert!(matches!(result, Err(TaskStoreError::MergeConflict { .. })));
    }

    #[test]
    fn blocking_closure_is_transitive_over_blocks_only() {
        let (_dir, store) = open_store();
        store.create(Task::new("oa-1", "root", "d")).unwrap();
        store
            .create(Task::new("oa-2", "mid", "d").with_dep("oa-1", DependencyRelation::Blocks))
            .unwrap();
        store
            .create(Task::new("oa-3", "leaf", "d").with_dep("oa-2", DependencyRelation::Blocks))
            .unwrap();
        store
            .create(Task::new("oa-4", "informational", "d").with_dep("oa-1", DependencyRelation::Related))
            .unwrap();

        let closure = store.blocking_closure("oa-3").unwrap();
        assert!(closure.contains("oa-1"));
        assert!(closure.contains("oa-2"));
    }

    #[test]
    fn archive_moves_old_closed_tasks_out_of_the_live_file() {
        let (_dir, store) = open_store();
        store.create(Task::new("oa-1", "t", "d")).unwrap();
        store.close("oa-1", "done").unwrap();

        let archived = store.archive(crate::now_ms() + 1_000).unwrap();
        assert_eq!(archived, 1);
        assert!(store.list(&TaskFilter::default()).unwrap().is_empty());
    }

    #[test]
    fn second_open_on_same_root_is_contested() {
        let dir = TempDir::new().unwrap();
        let _first = TaskStore::open(dir.path()).unwrap();
        let second = TaskStore::open(dir.path());
        assert!(matches!(second, Err(TaskStoreError::LockContested(_))));
    }
}
