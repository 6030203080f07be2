use serde::{Deserialize, Serialize};

/// The Orchestrator's top-level state machine (§4.8). Concurrency inside one
/// session is single-threaded cooperative — only one of these is ever active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestratorState {
    Idle,
    TaskSelected,
    Decomposed,
    ExecutingSubtask,
    Verifying,
    SubtaskComplete,
    Healing,
    Committing,
    Blocking,
}

impl std::fmt::Display for OrchestratorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}
