//! Event types for session activity streaming
//!
//! These events represent all observable activity in a session:
//! - Session lifecycle (start, state transitions, end)
//! - Task/subtask progress
//! - Verification (health command) runs
//! - Healer admission decisions and spell attempts

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{AttemptOutcome, OrchestratorState, Scenario, Spell};

/// Core event enum - the vocabulary of a session's observable activity
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TdEvent {
    /// A session has started
    SessionStarted { session_id: String, root: String },
    /// A session has ended
    SessionEnded { session_id: String, tasks_completed: u32, tasks_blocked: u32 },
    /// A session was stopped by an external cancel signal
    SessionCancelled { session_id: String, reason: String },
    /// The orchestrator's state machine transitioned
    StateChanged { session_id: String, from: OrchestratorState, to: OrchestratorState },

    /// A task was picked off the queue
    TaskSelected { session_id: String, task_id: String },
    /// A task committed successfully
    TaskCompleted { session_id: String, task_id: String },
    /// A task was closed as blocked
    TaskBlocked { session_id: String, task_id: String, reason: String },

    /// A subtask began execution
    SubtaskStarted { session_id: String, subtask_id: String, description: String },
    /// A subtask completed
    SubtaskCompleted { session_id: String, subtask_id: String },
    /// A subtask's worker invocation failed
    SubtaskFailed { session_id: String, subtask_id: String, output: String },

    /// A line of worker output (streaming)
    WorkerOutput { session_id: String, subtask_id: String, line: String, is_stderr: bool },

    /// A verification (health command) pass started
    VerificationStarted { session_id: String, task_id: String },
    /// A verification pass completed
    VerificationCompleted { session_id: String, task_id: String, passed: bool },

    /// The healer was consulted and admitted a scenario for healing
    HealerAdmitted { session_id: String, scenario: Scenario, reason: String },
    /// The healer was consulted and denied healing
    HealerDenied { session_id: String, reason: String },
    /// A single spell was attempted
    SpellAttempted { session_id: String, spell: Spell, scenario: Scenario },
    /// A healing attempt (a full spell sequence for one trigger) concluded
    HealingCompleted { session_id: String, outcome: AttemptOutcome, spells_tried: Vec<Spell>, spells_succeeded: Vec<Spell> },

    /// An error occurred
    Error { session_id: String, context: String, message: String },
    /// A warning occurred
    Warning { session_id: String, context: String, message: String },
}

impl TdEvent {
    /// Get the session ID this event belongs to
    pub fn session_id(&self) -> &str {
        match self {
            TdEvent::SessionStarted { session_id, .. }
            | TdEvent::SessionEnded { session_id, .. }
            | TdEvent::SessionCancelled { session_id, .. }
            | TdEvent::StateChanged { session_id, .. }
            | TdEvent::TaskSelected { session_id, .. }
            | TdEvent::TaskCompleted { session_id, .. }
            | TdEvent::TaskBlocked { session_id, .. }
            | TdEvent::SubtaskStarted { session_id, .. }
            | TdEvent::SubtaskCompleted { session_id, .. }
            | TdEvent::SubtaskFailed { session_id, .. }
            | TdEvent::WorkerOutput { session_id, .. }
            | TdEvent::VerificationStarted { session_id, .. }
            | TdEvent::VerificationCompleted { session_id, .. }
            | TdEvent::HealerAdmitted { session_id, .. }
            | TdEvent::HealerDenied { session_id, .. }
            | TdEvent::SpellAttempted { session_id, .. }
            | TdEvent::HealingCompleted { session_id, .. }
            | TdEvent::Error { session_id, .. }
            | TdEvent::Warning { session_id, .. } => session_id,
        }
    }

    /// Get the event type name
    pub fn event_type(&self) -> &'static str {
        match self {
            TdEvent::SessionStarted { .. } => "SessionStarted",
            TdEvent::SessionEnded { .. } => "SessionEnded",
            TdEvent::SessionCancelled { .. } => "SessionCancelled",
            TdEvent::StateChanged { .. } => "StateChanged",
            TdEvent::TaskSelected { .. } => "TaskSelected",
            TdEvent::TaskCompleted { .. } => "TaskCompleted",
            TdEvent::TaskBlocked { .. } => "TaskBlocked",
            TdEvent::SubtaskStarted { .. } => "SubtaskStarted",
            TdEvent::SubtaskCompleted { .. } => "SubtaskCompleted",
            TdEvent::SubtaskFailed { .. } => "SubtaskFailed",
            TdEvent::WorkerOutput { .. } => "WorkerOutput",
            TdEvent::VerificationStarted { .. } => "VerificationStarted",
            TdEvent::VerificationCompleted { .. } => "VerificationCompleted",
            TdEvent::HealerAdmitted { .. } => "HealerAdmitted",
            TdEvent::HealerDenied { .. } => "HealerDenied",
            TdEvent::SpellAttempted { .. } => "SpellAttempted",
            TdEvent::HealingCompleted { .. } => "HealingCompleted",
            TdEvent::Error { .. } => "Error",
            TdEvent::Warning { .. } => "Warning",
        }
    }
}

/// A timestamped event log entry for file persistence
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventLogEntry {
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,
    pub event: TdEvent,
}

impl EventLogEntry {
    pub fn new(event: TdEvent) -> Self {
        Self { timestamp: Utc::now(), event }
    }
}
