//! The `Task` domain model: a durable backlog unit.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::now_ms;

/// Status of a task. Only `closed` is terminal; tasks are never deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Open,
    InProgress,
    Blocked,
    Closed,
}

impl TaskStatus {
    pub fn is_closed(&self) -> bool {
        matches!(self, TaskStatus::Closed)
    }
}

/// The relation a dependency edge carries. Only `Blocks` participates in readiness
/// and transitive-closure queries; the others are informational.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DependencyRelation {
    Blocks,
    Related,
    ParentChild,
    DiscoveredFrom,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub id: String,
    pub relation: DependencyRelation,
}

/// A durable backlog unit. Identity is a hierarchical string id
/// (`prefix-xxxxxx[.n[.n[.n]]]`, root plus up to three child levels).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub priority: i32,
    #[serde(rename = "type")]
    pub task_type: String,
    pub labels: HashSet<String>,
    pub deps: Vec<Dependency>,
    pub commits: Vec<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub closed_at: Option<i64>,
    pub close_reason: Option<String>,
}

impl Task {
    /// Create a new open task with the given id, title and description.
    pub fn new(id: impl Into<String>, title: impl Into<String>, description: impl Into<String>) -> Self {
        let now = now_ms();
        Self {
            id: id.into(),
            title: title.into(),
            description: description.into(),
            status: TaskStatus::Open,
            priority: 100,
            task_type: "task".to_string(),
            labels: HashSet::new(),
            deps: Vec::new(),
            commits: Vec::new(),
            created_at: now,
            updated_at: now,
            closed_at: None,
            close_reason: None,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_type(mut self, task_type: impl Into<String>) -> Self {
        self.task_type = task_type.into();
        self
    }

    pub fn with_labels(mut self, labels: impl IntoIterator<Item = String>) -> Self {
        self.labels.extend(labels);
        self
    }

    pub fn with_dep(mut self, id: impl Into<String>, relation: DependencyRelation) -> Self {
        self.deps.push(Dependency { id: id.into(), relation });
        self
    }

    /// Returns true iff this task is ready to be picked: open, and every `blocks`
    /// dependency is in the provided closed-id set.
    pub fn is_ready(&self, closed_ids: &HashSet<String>) -> bool {
        if self.status != TaskStatus::Open {
            return false;
        }
        self.deps
            .iter()
            .filter(|d| d.relation == DependencyRelation::Blocks)
            .all(|d| closed_ids.contains(&d.id))
    }

    /// The parent task id, derived from the hierarchical id, if this is a child task.
    pub fn parent_id(&self) -> Option<String> {
        self.id.rfind('.').map(|idx| self.id[..idx].to_string())
    }

    pub fn close(&mut self, reason: impl Into<String>) {
        let now = now_ms();
        self.status = TaskStatus::Closed;
        self.closed_at = Some(now);
        self.close_reason = Some(reason.into());
        self.updated_at = now;
    }

    pub fn reopen(&mut self) {
        self.status = TaskStatus::Open;
        self.closed_at = None;
        self.close_reason = None;
        self.updated_at = now_ms();
    }

    pub fn touch(&mut self) {
        self.updated_at = now_ms();
    }
}

/// A partial update to a task, as submitted by a caller that may be racing against
/// a concurrent writer. Only present fields are merged (see `TaskStore::update`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<i32>,
    pub add_labels: HashSet<String>,
    pub add_deps: Vec<Dependency>,
    pub add_commits: Vec<String>,
}

/// Filter applied to `list`/`ready`/`pickNext`.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub task_type: Option<String>,
    pub label: Option<String>,
}

impl TaskFilter {
    pub fn matches(&self, task: &Task) -> bool {
        if let Some(status) = self.status
            && task.status != status
        {
            return false;
        }
        if let Some(ref t) = self.task_type
            && &task.task_type != t
        {
            return false;
        }
        if let Some(ref label) = self.label
            && !task.labels.contains(label)
        {
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_requires_open_and_closed_blockers() {
        let mut closed = HashSet::new();
        let t = Task::new("oa-1", "t", "d").with_dep("oa-0", DependencyRelation::Blocks);
        assert!(!t.is_ready(&closed));
        closed.insert("oa-0".to_string());
        assert!(t.is_ready(&closed));
    }

    #[test]
    fn related_deps_do_not_block_readiness() {
        let closed = HashSet::new();
        let t = Task::new("oa-1", "t", "d").with_dep("oa-0", DependencyRelation::Related);
        assert!(t.is_ready(&closed));
    }

    #[test]
    fn closing_sets_closed_at_and_reason() {
        let mut t = Task::new("oa-1", "t", "d");
        t.close("blocked");
        assert_eq!(t.status, TaskStatus::Closed);
        assert_eq!(t.close_reason.as_deref(), Some("blocked"));
        assert!(t.closed_at.is_some());
    }

    #[test]
    fn parent_id_derives_from_hierarchical_id() {
        let t = Task::new("oa-abc123.2.1", "t", "d");
        assert_eq!(t.parent_id(), Some("oa-abc123.2".to_string()));
        let root = Task::new("oa-abc123", "t", "d");
        assert_eq!(root.parent_id(), None);
    }
}
