//! StuckDetector: a periodic scan over tasks and active subtasks, emitting
//! synthetic `TriggerEvent::SubtaskStuck` events the Orchestrator processes as if
//! they'd arrived naturally.

use chrono::{DateTime, Utc};
use taskstore::{Task, TaskStatus};
use tracing::debug;

use crate::domain::{Subtask, SubtaskStatus, TriggerEvent};

#[derive(Debug, Clone)]
pub struct StuckThresholds {
    pub task_hours: i64,
    pub subtask_hours: i64,
    pub min_consecutive_failures: u32,
}

impl Default for StuckThresholds {
    fn default() -> Self {
        Self { task_hours: 1, subtask_hours: 1, min_consecutive_failures: 3 }
    }
}

#[derive(Debug, Clone)]
pub struct StuckReport {
    pub stuck_tasks: Vec<String>,
    pub stuck_subtasks: Vec<String>,
    pub events: Vec<TriggerEvent>,
}

impl StuckReport {
    pub fn is_empty(&self) -> bool {
        self.stuck_tasks.is_empty() && self.stuck_subtasks.is_empty()
    }
}

/// Scans `tasks` (from TaskStore) and `subtasks` (the live Orchestrator session's
/// decomposition, if any) for staleness, relative to `now`.
pub fn scan(tasks: &[Task], subtasks: &[Subtask], now: DateTime<Utc>, thresholds: &StuckThresholds) -> StuckReport {
    debug!(tasks = tasks.len(), subtasks = subtasks.len(), "stuck::scan: called");
    let task_threshold_ms = thresholds.task_hours * 3_600_000;
    let mut stuck_tasks = Vec::new();
    for task in tasks {
        if matches!(task.status, TaskStatus::InProgress | TaskStatus::Blocked) {
            let age_ms = now.timestamp_millis() - task.updated_at;
            if age_ms >= task_threshold_ms {
                stuck_tasks.push(task.id.clone());
            }
        }
    }

    let subtask_threshold = chrono::Duration::hours(thresholds.subtask_hours);
    let mut stuck_subtasks = Vec::new();
    let mut events = Vec::new();
    for subtask in subtasks {
        if subtask.status != SubtaskStatus::InProgress && subtask.status != SubtaskStatus::Failed {
            continue;
        }
        let age = subtask.started_at.map(|t| now - t).unwrap_or_default();
        let progress_age = subtask.last_progress_at.map(|t| now - t).unwrap_or_default();

        let stuck_by_duration = subtask.status == SubtaskStatus::InProgress && age >= subtask_threshold;
        let stuck_by_failures = subtask.failure_count >= thresholds.min_consecutive_failures && progress_age >= subtask_threshold;

        if stuck_by_duration || stuck_by_failures {
            stuck_subtasks.push(subtask.id.clone());
            let reason = if stuck_by_failures {
                format!("{} consecutive failures with no recent progress", subtask.failure_count)
            } else {
                format!("in progress for {}h without completing", age.num_hours())
            };
            events.push(TriggerEvent::SubtaskStuck { subtask_id: subtask.id.clone(), reason });
        }
    }

    StuckReport { stuck_tasks, stuck_subtasks, events }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskstore::Task;

    fn aged_task(id: &str, status: TaskStatus, age_ms: i64) -> Task {
        let mut t = Task::new(id, "t", "d");
        t.status = status;
        t.updated_at = Utc::now().timestamp_millis() - age_ms;
        t
    }

    #[test]
    fn flags_a_task_stale_past_threshold() {
        let tasks = vec![aged_task("oa-1", TaskStatus::InProgress, 2 * 3_600_000)];
        let thresholds = StuckThresholds { task_hours: 1, ..Default::default() };
        let report = scan(&tasks, &[], Utc::now(), &thresholds);
        assert_eq!(report.stuck_tasks, vec!["oa-1".to_string()]);
    }

    #[test]
    fn open_tasks_are_never_flagged() {
        let tasks = vec![aged_task("oa-1", TaskStatus::Open, 10 * 3_600_000)];
        let report = scan(&tasks, &[], Utc::now(), &StuckThresholds::default());
        assert!(report.stuck_tasks.is_empty());
    }

    #[test]
    fn flags_a_long_running_subtask() {
        let mut subtask = Subtask::new("s1", "do it");
        subtask.start();
        subtask.started_at = Some(Utc::now() - chrono::Duration::hours(2));
        let report = scan(&[], &[subtask], Utc::now(), &StuckThresholds { subtask_hours: 1, ..Default::default() });
        assert_eq!(report.stuck_subtasks, vec!["s1".to_string()]);
    }

    #[test]
    fn flags_a_subtask_with_repeated_failures_and_no_progress() {
        let mut subtask = Subtask::new("s1", "do it");
        subtask.start();
        subtask.fail();
        subtask.fail();
        subtask.fail();
        subtask.last_progress_at = Some(Utc::now() - chrono::Duration::hours(2));
        let report = scan(&[], &[subtask], Utc::now(), &StuckThresholds { subtask_hours: 1, min_consecutive_failures: 3, ..Default::default() });
        assert_eq!(report.stuck_subtasks, vec!["s1".to_string()]);
    }

    #[test]
    fn recent_progress_suppresses_the_failure_based_flag() {
        let mut subtask = Subtask::new("s1", "do it");
        subtask.start();
        subtask.fail();
        subtask.fail();
        subtask.fail();
        subtask.record_progress();
        let report = scan(&[], &[subtask], Utc::now(), &StuckThresholds { subtask_hours: 1, min_consecutive_failures: 3, ..Default::default() });
        assert!(report.stuck_subtasks.is_empty());
    }
}
