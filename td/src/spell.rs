//! SpellEngine: plans and executes the fixed, per-scenario spell sequences
//! against a `HealerContext`. Each spell handler is independent; the engine owns
//! only the iterate/stop-on-success/fold-outcome policy in §4.7.

use std::path::Path;
use std::time::Duration;

use contextstore::git;
use taskstore::{Task, TaskStore};
use tracing::info;

use crate::cancel::CancelSignal;
use crate::config::{HealerConfig, ProjectConfig};
use crate::domain::{AttemptOutcome, Counters, HealerContext, Spell, healing_key, plan_for};
use crate::error::HealerError;
use crate::health::{HealthKind, HealthRunner};
use crate::policy::error_hash;
use crate::prompts::{PromptLoader, SpellPromptContext};
use crate::worker::{SubtaskInvocation, WorkerDriver};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpellStatus {
    Success,
    Failure,
    Skipped,
}

#[derive(Debug, Clone)]
pub struct SpellResult {
    pub spell: Spell,
    pub status: SpellStatus,
    pub summary: String,
    /// Whether this success means the underlying problem is actually fixed, as
    /// opposed to merely contained (cleaned up, recorded, deferred).
    pub resolved: bool,
}

/// Everything a spell handler needs that isn't already in `HealerContext`.
pub struct SpellDeps<'a> {
    pub task_store: &'a TaskStore,
    pub worker: &'a dyn WorkerDriver,
    pub prompts: &'a PromptLoader,
    pub project: &'a ProjectConfig,
}

/// Plans the ordered spell list for `ctx.heuristics.scenario`, filtered against
/// config's allow/deny lists. An allow-list, if non-empty, takes precedence over
/// the fixed sequence rather than merely narrowing it.
pub fn plan(ctx: &HealerContext, healer_config: &HealerConfig) -> Vec<Spell> {
    let sequence = plan_for(ctx.heuristics.scenario);
    let forbidden = &healer_config.spells.forbidden;
    let allowed = &healer_config.spells.allowed;

    sequence
        .iter()
        .copied()
        .filter(|s| !forbidden.contains(&s.as_str().to_string()))
        .filter(|s| allowed.is_empty() || allowed.contains(&s.as_str().to_string()))
        .collect()
}

pub struct ExecutionOutcome {
    pub outcome: AttemptOutcome,
    pub spells_tried: Vec<Spell>,
    pub spells_succeeded: Vec<Spell>,
    pub summary: String,
}

/// The idempotency ledger key for `ctx`: `(taskId, subtaskId, scenario, errorHash)`.
pub fn key_for(ctx: &HealerContext) -> String {
    healing_key(&ctx.task_id, ctx.subtask_id.as_deref(), ctx.heuristics.scenario, error_hash(&ctx.error_output))
}

/// Executes `plan` in order against `ctx`: stops on first success, records every
/// attempt in `counters` regardless of outcome. Spells already recorded against
/// this exact `(taskId, subtaskId, scenario, errorHash)` key in a prior attempt
/// this session are skipped rather than re-run, per the at-most-once guarantee.
/// `cancel` firing mid-sequence marks the in-flight spell `failure,
/// reason=cancelled` and stops the rest of the plan from running.
pub async fn execute(ctx: &HealerContext, plan: &[Spell], deps: &SpellDeps<'_>, counters: &mut Counters, cancel: &CancelSignal) -> ExecutionOutcome {
    if plan.is_empty() {
        return ExecutionOutcome {
            outcome: AttemptOutcome::Skipped,
            spells_tried: Vec::new(),
            spells_succeeded: Vec::new(),
            summary: "no spells runnable after allow/deny filtering".to_string(),
        };
    }

    let key = key_for(ctx);
    let already_tried: Vec<String> = counters.healing_attempts.get(&key).map(|a| a.spells_tried.clone()).unwrap_or_default();

    let mut tried = Vec::new();
    let mut succeeded = Vec::new();
    let mut last_summary = String::new();
    let mut resolved_any = false;
    let mut succeeded_any = false;
    let mut cancelled = false;

    for spell in plan {
        if cancel.is_cancelled() {
            info!(spell = %spell, "SpellEngine::execute: session cancelled, stopping spell sequence");
            last_summary = format!("spell {spell} cancelled");
            cancelled = true;
            break;
        }

        if already_tried.contains(&spell.as_str().to_string()) {
            info!(spell = %spell, "SpellEngine::execute: skipping spell already attempted for this signature");
            continue;
        }

        counters.record_spell_attempt(spell.as_str());
        tried.push(*spell);

        let result = run_spell(*spell, ctx, deps, cancel).await;
        last_summary = result.summary.clone();
        info!(spell = %spell, status = ?result.status, "SpellEngine::execute: spell ran");

        if result.status == SpellStatus::Success {
            succeeded.push(*spell);
            succeeded_any = true;
            resolved_any = result.resolved;
            break;
        }

        if cancel.is_cancelled() {
            cancelled = true;
            break;
        }
    }

    let outcome = if cancelled {
        AttemptOutcome::Cancelled
    } else if succeeded_any {
        if resolved_any { AttemptOutcome::Resolved } else { AttemptOutcome::Contained }
    } else if tried.is_empty() {
        AttemptOutcome::Skipped
    } else {
        AttemptOutcome::Unresolved
    };

    ExecutionOutcome {
        outcome,
        spells_tried: tried,
        spells_succeeded: succeeded,
        summary: last_summary,
    }
}

async fn run_spell(spell: Spell, ctx: &HealerContext, deps: &SpellDeps<'_>, cancel: &CancelSignal) -> SpellResult {
    match spell {
        Spell::RewindUncommittedChanges => rewind_uncommitted_changes(ctx).await,
        Spell::RewindToLastGreenCommit => rewind_to_last_green_commit(ctx, deps).await,
        Spell::MarkTaskBlockedWithFollowup => mark_task_blocked_with_followup(ctx, deps),
        Spell::UpdateProgressWithGuidance => update_progress_with_guidance(ctx),
        Spell::RunTasksDoctorLikeChecks => run_tasks_doctor_like_checks(ctx, deps).await,
        Spell::FixTypecheckErrors => fix_with_worker(ctx, deps, HealthKind::Typecheck, "fix_typecheck_errors", cancel).await,
        Spell::FixTestErrors => fix_with_worker(ctx, deps, HealthKind::Test, "fix_test_errors", cancel).await,
        Spell::RetryWithClaudeCodeResume => retry_with_profile(ctx, deps, "resume", cancel).await,
        Spell::RetryWithMinimalSubagent => retry_with_profile(ctx, deps, "minimal-subagent", cancel).await,
    }
}

async fn rewind_uncommitted_changes(ctx: &HealerContext) -> SpellResult {
    let workdir = Path::new(&ctx.project_root);
    match git::rewind_uncommitted(workdir).await {
        Ok(status) if !status.is_dirty => SpellResult {
            spell: Spell::RewindUncommittedChanges,
            status: SpellStatus::Success,
            summary: "working tree cleaned".to_string(),
            resolved: false,
        },
        Ok(_) => SpellResult {
            spell: Spell::RewindUncommittedChanges,
            status: SpellStatus::Failure,
            summary: "working tree still dirty after rewind".to_string(),
            resolved: false,
        },
        Err(e) => SpellResult {
            spell: Spell::RewindUncommittedChanges,
            status: SpellStatus::Failure,
            summary: format!("rewind failed: {e}"),
            resolved: false,
        },
    }
}

async fn rewind_to_last_green_commit(ctx: &HealerContext, deps: &SpellDeps<'_>) -> SpellResult {
    let workdir = Path::new(&ctx.project_root);
    let Some(sha) = &deps.project.last_green_commit else {
        return SpellResult {
            spell: Spell::RewindToLastGreenCommit,
            status: SpellStatus::Skipped,
            summary: "no last-green commit recorded".to_string(),
            resolved: false,
        };
    };
    match git::rewind_to_commit(workdir, sha, deps.project.healer.allow_force_rewind).await {
        Ok(_) => SpellResult {
            spell: Spell::RewindToLastGreenCommit,
            status: SpellStatus::Success,
            summary: format!("rewound to {sha}"),
            resolved: false,
        },
        Err(e) => SpellResult {
            spell: Spell::RewindToLastGreenCommit,
            status: SpellStatus::Failure,
            summary: format!("rewind to green commit failed: {e}"),
            resolved: false,
        },
    }
}

fn mark_task_blocked_with_followup(ctx: &HealerContext, deps: &SpellDeps<'_>) -> SpellResult {
    let followup_id = format!("{}.healer", ctx.task_id);
    let label = format!("healer-followup:{}", ctx.heuristics.scenario);
    let followup = Task::new(followup_id, "Follow-up from healer intervention", ctx.error_output.clone()).with_labels([label]);

    let blocked = deps.task_store.close(&ctx.task_id, format!("blocked: {}", ctx.heuristics.scenario));
    let created = deps.task_store.create(followup);

    match (blocked, created) {
        (Ok(_), Ok(id)) => SpellResult {
            spell: Spell::MarkTaskBlockedWithFollowup,
            status: SpellStatus::Success,
            summary: format!("blocked task and opened follow-up {id}"),
            resolved: false,
        },
        (Err(e), _) | (_, Err(e)) => SpellResult {
            spell: Spell::MarkTaskBlockedWithFollowup,
            status: SpellStatus::Failure,
            summary: format!("task store error: {e}"),
            resolved: false,
        },
    }
}

fn update_progress_with_guidance(ctx: &HealerContext) -> SpellResult {
    let root = Path::new(&ctx.project_root);
    let spells_attempted: Vec<String> = Vec::new();
    match contextstore::progress::append_guidance(root, ctx.heuristics.scenario.as_str(), &ctx.heuristics.error_patterns, &spells_attempted) {
        Ok(()) => SpellResult {
            spell: Spell::UpdateProgressWithGuidance,
            status: SpellStatus::Success,
            summary: "appended guidance to progress memo".to_string(),
            resolved: false,
        },
        Err(e) => SpellResult {
            spell: Spell::UpdateProgressWithGuidance,
            status: SpellStatus::Failure,
            summary: format!("failed to write progress memo: {e}"),
            resolved: false,
        },
    }
}

async fn run_tasks_doctor_like_checks(ctx: &HealerContext, deps: &SpellDeps<'_>) -> SpellResult {
    let root = Path::new(&ctx.project_root);
    let task_count = deps.task_store.list(&taskstore::TaskFilter::default()).map(|t| t.len()).unwrap_or(0);
    let report = format!(
        "task store reachable: {} tasks on file\nconfig project_id: {}\nhealer enabled: {}",
        task_count, deps.project.project_id, deps.project.healer.enabled
    );
    match contextstore::progress::append_report(root, "healer doctor checks", &report) {
        Ok(()) => SpellResult {
            spell: Spell::RunTasksDoctorLikeChecks,
            status: SpellStatus::Success,
            summary: "wrote doctor report to progress memo".to_string(),
            resolved: false,
        },
        Err(e) => SpellResult {
            spell: Spell::RunTasksDoctorLikeChecks,
            status: SpellStatus::Failure,
            summary: format!("failed to write doctor report: {e}"),
            resolved: false,
        },
    }
}

async fn fix_with_worker(ctx: &HealerContext, deps: &SpellDeps<'_>, kind: HealthKind, template: &str, cancel: &CancelSignal) -> SpellResult {
    let spell = if template == "fix_typecheck_errors" { Spell::FixTypecheckErrors } else { Spell::FixTestErrors };

    let prompt_ctx = SpellPromptContext::new(ctx.heuristics.scenario.as_str(), ctx.error_output.clone(), ctx.heuristics.error_patterns.clone());
    let instruction = match deps.prompts.render(template, &prompt_ctx) {
        Ok(text) => text,
        Err(e) => {
            return SpellResult { spell, status: SpellStatus::Failure, summary: format!("prompt render failed: {e}"), resolved: false };
        }
    };

    let workdir = Path::new(&ctx.project_root).to_path_buf();
    let invocation = SubtaskInvocation {
        instruction,
        workdir: workdir.clone(),
        timeout: Duration::from_secs(deps.project.worker_timeout_secs),
        kill_grace: Duration::from_secs(deps.project.worker_kill_grace_secs),
    };

    match deps.worker.run_subtask(&invocation, cancel).await {
        Ok(events) if matches!(events.last(), Some(crate::worker::WorkerEvent::Exit { reason, .. }) if reason == "cancelled") => {
            return SpellResult { spell, status: SpellStatus::Failure, summary: "worker cancelled".to_string(), resolved: false };
        }
        Err(e) => {
            return SpellResult { spell, status: SpellStatus::Failure, summary: format!("worker failed: {e}"), resolved: false };
        }
        Ok(_) => {}
    }

    let commands = match kind {
        HealthKind::Typecheck => &deps.project.typecheck_commands,
        HealthKind::Test => &deps.project.test_commands,
        HealthKind::E2e => &deps.project.e2e_commands,
    };
    let runner = HealthRunner::new(&workdir, Duration::from_secs(deps.project.health_command_timeout_secs));
    match runner.run_all(kind, commands).await {
        Ok(results) if results.iter().all(|r| r.passed()) => {
            SpellResult { spell, status: SpellStatus::Success, summary: "worker fix verified by health run".to_string(), resolved: true }
        }
        Ok(_) => SpellResult { spell, status: SpellStatus::Failure, summary: "health run still failing after worker fix".to_string(), resolved: false },
        Err(e) => SpellResult { spell, status: SpellStatus::Failure, summary: format!("health run error: {e}"), resolved: false },
    }
}

async fn retry_with_profile(ctx: &HealerContext, deps: &SpellDeps<'_>, profile: &str, cancel: &CancelSignal) -> SpellResult {
    let spell = if profile == "resume" { Spell::RetryWithClaudeCodeResume } else { Spell::RetryWithMinimalSubagent };
    let instruction = format!("retry subtask (profile={profile}) after scenario {}", ctx.heuristics.scenario);
    let invocation = SubtaskInvocation {
        instruction,
        workdir: Path::new(&ctx.project_root).to_path_buf(),
        timeout: Duration::from_secs(deps.project.worker_timeout_secs),
        kill_grace: Duration::from_secs(deps.project.worker_kill_grace_secs),
    };

    match deps.worker.run_subtask(&invocation, cancel).await {
        Ok(events) if matches!(events.last(), Some(crate::worker::WorkerEvent::Exit { code: 0, .. })) => {
            SpellResult { spell, status: SpellStatus::Success, summary: format!("{profile} retry exited cleanly"), resolved: true }
        }
        Ok(events) if matches!(events.last(), Some(crate::worker::WorkerEvent::Exit { reason, .. }) if reason == "cancelled") => {
            SpellResult { spell, status: SpellStatus::Failure, summary: format!("{profile} retry cancelled"), resolved: false }
        }
        Ok(_) => SpellResult { spell, status: SpellStatus::Failure, summary: format!("{profile} retry did not exit cleanly"), resolved: false },
        Err(e) => SpellResult { spell, status: SpellStatus::Failure, summary: format!("{profile} retry failed: {e}"), resolved: false },
    }
}

pub fn map_healer_error(outcome: &ExecutionOutcome, spell: &str) -> Option<HealerError> {
    if outcome.spells_tried.is_empty() {
        return Some(HealerError::SpellFailed { spell: spell.to_string(), reason: "no spells ran".to_string() });
    }
    None
}
