use std::collections::HashMap;

use chrono::{DateTime, Utc};
use contextstore::{GitStatus, PatternHeuristics};
use serde::{Deserialize, Serialize};

use super::event::TriggerEvent;
use super::scenario::Scenario;

/// Classification of the failure payload, derived by ContextBuilder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Heuristics {
    pub scenario: Scenario,
    pub failure_count: u32,
    pub is_flaky: bool,
    pub has_missing_imports: bool,
    pub has_type_errors: bool,
    pub has_test_assertions: bool,
    pub error_patterns: Vec<String>,
    pub previous_attempts: u32,
}

impl Heuristics {
    pub fn from_patterns(scenario: Scenario, patterns: PatternHeuristics, error_patterns: Vec<String>, failure_count: u32, previous_attempts: u32) -> Self {
        // A repeat failure with no recognizable deterministic signature (no import,
        // type, or assertion pattern, and no stable error text) looks like flakiness
        // rather than a fixable defect.
        let is_flaky =
            previous_attempts > 0 && !patterns.has_missing_imports && !patterns.has_type_errors && !patterns.has_test_assertions && error_patterns.is_empty();
        Self {
            scenario,
            failure_count,
            is_flaky,
            has_missing_imports: patterns.has_missing_imports,
            has_type_errors: patterns.has_type_errors,
            has_test_assertions: patterns.has_test_assertions,
            error_patterns,
            previous_attempts,
        }
    }
}

/// Immutable snapshot built on policy admission; owned entirely by the single
/// SpellEngine invocation that consumes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealerContext {
    pub project_root: String,
    pub session_id: String,
    pub task_id: String,
    pub subtask_id: Option<String>,
    pub git: GitStatus,
    pub progress_memo: String,
    pub trigger: TriggerEvent,
    pub error_output: String,
    pub heuristics: Heuristics,
    pub counters: CountersSnapshot,
}

/// A by-value copy of the session's counters — never aliased back into the
/// running session, so a spell can't mutate live rate-limit state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CountersSnapshot {
    pub session_invocations: u32,
    pub subtask_invocations: HashMap<String, u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Resolved,
    Contained,
    Unresolved,
    Skipped,
    Cancelled,
}

/// One row in the idempotency ledger, keyed by `(taskId, subtaskId, scenario, errorHash)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealingAttempt {
    pub timestamp: DateTime<Utc>,
    pub outcome: AttemptOutcome,
    pub spells_tried: Vec<String>,
    pub spells_succeeded: Vec<String>,
    pub summary: String,
}

/// Per-session counters. Never persisted across sessions — cross-session rate
/// limiting is explicitly out of scope.
#[derive(Debug, Clone, Default)]
pub struct Counters {
    pub session_invocations: u32,
    pub subtask_invocations: HashMap<String, u32>,
    pub spells_attempted: HashMap<String, u32>,
    pub healing_attempts: HashMap<String, HealingAttempt>,
}

impl Counters {
    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            session_invocations: self.session_invocations,
            subtask_invocations: self.subtask_invocations.clone(),
        }
    }

    pub fn record_admission(&mut self, subtask_id: Option<&str>) {
        self.session_invocations += 1;
        if let Some(id) = subtask_id {
            *self.subtask_invocations.entry(id.to_string()).or_insert(0) += 1;
        }
    }

    pub fn record_spell_attempt(&mut self, spell: &str) {
        *self.spells_attempted.entry(spell.to_string()).or_insert(0) += 1;
    }
}

/// Stable key into the idempotency ledger.
pub fn healing_key(task_id: &str, subtask_id: Option<&str>, scenario: Scenario, error_hash: u64) -> String {
    format!("{}:{}:{}:{:x}", task_id, subtask_id.unwrap_or(""), scenario.as_str(), error_hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_does_not_alias_live_counters() {
        let mut counters = Counters::default();
        counters.record_admission(Some("s1"));
        let snap = counters.snapshot();
        counters.record_admission(Some("s1"));
        assert_eq!(snap.subtask_invocations["s1"], 1);
        assert_eq!(counters.subtask_invocations["s1"], 2);
    }

    #[test]
    fn healing_key_is_stable_for_same_inputs() {
        let a = healing_key("oa-1", Some("s1"), Scenario::SubtaskFailed, 42);
        let b = healing_key("oa-1", Some("s1"), Scenario::SubtaskFailed, 42);
        assert_eq!(a, b);
    }
}
