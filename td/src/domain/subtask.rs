use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubtaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// Ephemeral decomposition of a task inside one Orchestrator session. Subtasks are
/// ids scoped to the session, mutated by the Orchestrator, and discarded or
/// summarized when the session ends — they never reach TaskStore directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subtask {
    pub id: String,
    pub description: String,
    pub status: SubtaskStatus,
    pub failure_count: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Timestamp of the last progress-bearing step (start, successful retry,
    /// completion). StuckDetector compares this against its threshold rather than
    /// `started_at` alone, so a subtask that's been retried recently isn't flagged.
    pub last_progress_at: Option<DateTime<Utc>>,
}

impl Subtask {
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            status: SubtaskStatus::Pending,
            failure_count: 0,
            started_at: None,
            completed_at: None,
            last_progress_at: None,
        }
    }

    pub fn start(&mut self) {
        self.status = SubtaskStatus::InProgress;
        self.started_at = Some(Utc::now());
        self.last_progress_at = Some(Utc::now());
    }

    pub fn complete(&mut self) {
        self.status = SubtaskStatus::Completed;
        self.completed_at = Some(Utc::now());
        self.failure_count = 0;
        self.last_progress_at = Some(Utc::now());
    }

    /// Records a failed attempt. `minConsecutiveFailures` for StuckDetector counts
    /// since the last progress reset, so this increments rather than accumulating
    /// lifetime.
    pub fn fail(&mut self) {
        self.status = SubtaskStatus::Failed;
        self.failure_count += 1;
    }

    /// Resets the consecutive-failure counter on any progress-bearing step, per the
    /// resolved reading of `minConsecutiveFailures`.
    pub fn record_progress(&mut self) {
        self.failure_count = 0;
        self.last_progress_at = Some(Utc::now());
    }
}
