use serde::{Deserialize, Serialize};

/// The closed set of repair actions SpellEngine knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Spell {
    RewindUncommittedChanges,
    RewindToLastGreenCommit,
    MarkTaskBlockedWithFollowup,
    UpdateProgressWithGuidance,
    RunTasksDoctorLikeChecks,
    FixTypecheckErrors,
    FixTestErrors,
    RetryWithClaudeCodeResume,
    RetryWithMinimalSubagent,
}

impl Spell {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RewindUncommittedChanges => "rewind_uncommitted_changes",
            Self::RewindToLastGreenCommit => "rewind_to_last_green_commit",
            Self::MarkTaskBlockedWithFollowup => "mark_task_blocked_with_followup",
            Self::UpdateProgressWithGuidance => "update_progress_with_guidance",
            Self::RunTasksDoctorLikeChecks => "run_tasks_doctor_like_checks",
            Self::FixTypecheckErrors => "fix_typecheck_errors",
            Self::FixTestErrors => "fix_test_errors",
            Self::RetryWithClaudeCodeResume => "retry_with_claude_code_resume",
            Self::RetryWithMinimalSubagent => "retry_with_minimal_subagent",
        }
    }

    /// Spells that call out to an external worker process, as opposed to purely
    /// local operations (git, task store, progress memo).
    pub fn invokes_worker(&self) -> bool {
        matches!(
            self,
            Self::FixTypecheckErrors | Self::FixTestErrors | Self::RetryWithClaudeCodeResume | Self::RetryWithMinimalSubagent
        )
    }
}

impl std::fmt::Display for Spell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Scenario → ordered spell sequence, fixed at compile time per the normative table.
pub fn plan_for(scenario: Scenario) -> &'static [Spell] {
    use Scenario::*;
    use Spell::*;
    match scenario {
        InitScriptTypecheckFailure => &[FixTypecheckErrors, UpdateProgressWithGuidance, MarkTaskBlockedWithFollowup],
        InitScriptTestFailure => &[FixTestErrors, UpdateProgressWithGuidance, MarkTaskBlockedWithFollowup],
        InitScriptEnvironmentFailure => &[UpdateProgressWithGuidance, MarkTaskBlockedWithFollowup],
        SubtaskFailed => &[RewindUncommittedChanges, UpdateProgressWithGuidance, MarkTaskBlockedWithFollowup],
        VerificationFailed => &[RewindUncommittedChanges, UpdateProgressWithGuidance],
        RuntimeError => &[RewindUncommittedChanges, UpdateProgressWithGuidance, MarkTaskBlockedWithFollowup],
        SubtaskStuck => &[UpdateProgressWithGuidance, MarkTaskBlockedWithFollowup],
    }
}

use super::scenario::Scenario;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_tables_match_normative_order() {
        assert_eq!(
            plan_for(Scenario::SubtaskStuck),
            &[Spell::UpdateProgressWithGuidance, Spell::MarkTaskBlockedWithFollowup]
        );
        assert_eq!(
            plan_for(Scenario::VerificationFailed),
            &[Spell::RewindUncommittedChanges, Spell::UpdateProgressWithGuidance]
        );
    }

    #[test]
    fn worker_invoking_spells_are_flagged() {
        assert!(Spell::FixTypecheckErrors.invokes_worker());
        assert!(!Spell::RewindUncommittedChanges.invokes_worker());
    }
}
