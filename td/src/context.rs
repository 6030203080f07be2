//! ContextBuilder: assembles a `HealerContext` from the live session state plus
//! the best-effort toolkits in `contextstore`. Everything here is read-only; the
//! spells that mutate the world live in `spell`.

use std::path::Path;

use contextstore::{git, patterns};
use tracing::debug;

use crate::domain::{Counters, HealerContext, Heuristics, Scenario, TriggerEvent};

pub struct BuildArgs<'a> {
    pub project_root: &'a Path,
    pub session_id: &'a str,
    pub task_id: &'a str,
    pub subtask_id: Option<&'a str>,
    pub trigger: &'a TriggerEvent,
    pub scenario: Scenario,
    pub failure_count: u32,
    pub previous_attempts: u32,
    pub counters: &'a Counters,
}

/// Builds a `HealerContext` snapshot. Git/progress probes are best-effort by
/// construction (see `contextstore::git`/`progress`); this function itself never fails.
pub async fn build(args: BuildArgs<'_>) -> HealerContext {
    debug!(task_id = args.task_id, subtask_id = ?args.subtask_id, scenario = %args.scenario, "context::build: called");

    let git_status = git::status(args.project_root).await;
    let progress_memo = contextstore::progress::read(args.project_root);
    let error_output = args.trigger.error_payload().to_string();
    let error_patterns = patterns::classify(&error_output);
    let pattern_heuristics = patterns::derive_heuristics(&error_patterns);
    let heuristics = Heuristics::from_patterns(args.scenario, pattern_heuristics, error_patterns, args.failure_count, args.previous_attempts);

    HealerContext {
        project_root: args.project_root.display().to_string(),
        session_id: args.session_id.to_string(),
        task_id: args.task_id.to_string(),
        subtask_id: args.subtask_id.map(str::to_string),
        git: git_status,
        progress_memo,
        trigger: args.trigger.clone(),
        error_output,
        heuristics,
        counters: args.counters.snapshot(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn builds_a_context_from_a_non_git_dir_without_failing() {
        let dir = TempDir::new().unwrap();
        let trigger = TriggerEvent::SubtaskFailed { subtask_id: "s1".to_string(), output: "TypeError: bad".to_string() };
        let counters = Counters::default();
        let ctx = build(BuildArgs {
            project_root: dir.path(),
            session_id: "sess-1",
            task_id: "task-1",
            subtask_id: Some("s1"),
            trigger: &trigger,
            scenario: Scenario::SubtaskFailed,
            failure_count: 1,
            previous_attempts: 0,
            counters: &counters,
        })
        .await;

        assert_eq!(ctx.task_id, "task-1");
        assert!(ctx.git.branch.is_none());
        assert!(ctx.heuristics.has_type_errors);
        assert_eq!(ctx.progress_memo, "");
    }

    #[tokio::test]
    async fn counters_snapshot_is_not_aliased() {
        let dir = TempDir::new().unwrap();
        let trigger = TriggerEvent::Error { subtask_id: None, message: "oops".to_string() };
        let mut counters = Counters::default();
        counters.record_admission(None);
        let ctx = build(BuildArgs {
            project_root: dir.path(),
            session_id: "sess-1",
            task_id: "task-1",
            subtask_id: None,
            trigger: &trigger,
            scenario: Scenario::RuntimeError,
            failure_count: 1,
            previous_attempts: 0,
            counters: &counters,
        })
        .await;
        counters.record_admission(None);
        assert_eq!(ctx.counters.session_invocations, 1);
        assert_eq!(counters.session_invocations, 2);
    }
}
