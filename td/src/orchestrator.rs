//! Orchestrator: the top-level state machine (C8) wiring TaskStore, WorkerDriver,
//! HealthRunner, PolicyGate, ContextBuilder, and SpellEngine together per session.

use std::path::{Path, PathBuf};
use std::time::Duration;

use taskstore::{Task, TaskFilter, TaskStore};
use tracing::{debug, info, warn};

use crate::cancel::{self, CancelSignal};
use crate::config::ProjectConfig;
use crate::context::{self, BuildArgs};
use crate::domain::{Counters, HealingAttempt, InitFailureType, OrchestratorState, Subtask, TriggerEvent};
use crate::error::{HealerError, OrchestratorError, Result};
use crate::events::{EventBus, EventEmitter};
use crate::health::{HealthKind, HealthRunner};
use crate::lock::SessionLock;
use crate::policy;
use crate::prompts::PromptLoader;
use crate::spell::{self, SpellDeps};
use crate::trajectory::{RecoveryInfo, StepInput, StepSource, ToolCallRecord, TrajectoryLog};
use crate::worker::{SubtaskInvocation, WorkerDriver, WorkerEvent};

#[derive(Debug, Clone, Default)]
pub struct SessionSummary {
    pub tasks_completed: Vec<String>,
    pub tasks_blocked: Vec<String>,
    pub final_state: Option<OrchestratorState>,
}

pub struct Orchestrator<'a> {
    root: PathBuf,
    session_id: String,
    project: ProjectConfig,
    task_store: TaskStore,
    trajectory: TrajectoryLog,
    counters: Counters,
    worker: &'a dyn WorkerDriver,
    prompts: PromptLoader,
    events: Option<EventEmitter>,
    cancel: CancelSignal,
    _lock: SessionLock,
}

impl<'a> Orchestrator<'a> {
    pub fn open(root: &Path, session_id: &str, explicit_config: Option<&Path>, worker: &'a dyn WorkerDriver) -> Result<Self> {
        debug!(?root, session_id, "Orchestrator::open: called");
        let project = ProjectConfig::load(root, explicit_config)?;
        let lock = SessionLock::acquire(root, session_id, Duration::from_secs(project.lock_stale_secs))?;
        let task_store = TaskStore::open(ProjectConfig::openagents_dir(root))?;
        let trajectory = TrajectoryLog::open(root, session_id, "orchestrator")?;
        let prompts = PromptLoader::new(root);

        Ok(Self {
            root: root.to_path_buf(),
            session_id: session_id.to_string(),
            project,
            task_store,
            trajectory,
            counters: Counters::default(),
            worker,
            prompts,
            events: None,
            cancel: cancel::never(),
            _lock: lock,
        })
    }

    /// Attaches an event emitter bound to this session, so every lifecycle
    /// transition is also published on the event bus alongside the trajectory log.
    pub fn with_events(mut self, bus: &EventBus) -> Self {
        self.events = Some(bus.emitter_for(self.session_id.clone()));
        self
    }

    /// Attaches the external-cancel signal: a session with no signal attached
    /// cannot be cancelled, since `cancel::never()` never fires.
    pub fn with_cancel(mut self, signal: CancelSignal) -> Self {
        self.cancel = signal;
        self
    }

    /// Drains ready tasks one at a time until none remain. `dry_run` runs
    /// PolicyGate/SpellEngine planning without invoking the worker or mutating the
    /// task store.
    pub async fn run(&mut self, dry_run: bool) -> Result<SessionSummary> {
        let mut summary = SessionSummary::default();
        if let Some(ev) = &self.events {
            ev.session_started(&self.root.display().to_string());
        }

        loop {
            if self.cancel.is_cancelled() {
                self.trajectory.append_step(
                    StepInput::new(StepSource::System, "session_cancelled").with_status(crate::trajectory::StepStatus::Completed),
                )?;
                if let Some(ev) = &self.events {
                    ev.session_cancelled("external cancel signal received");
                }
                summary.final_state = Some(OrchestratorState::Idle);
                break;
            }

            let Some(task) = self.task_store.pick_next(&TaskFilter::default())? else {
                summary.final_state = Some(OrchestratorState::Idle);
                break;
            };
            self.trajectory.append_step(StepInput::new(StepSource::System, format!("selected task {}", task.id)))?;
            if let Some(ev) = &self.events {
                ev.task_selected(&task.id);
            }

            match self.run_task(&task, dry_run).await {
                Ok(true) => {
                    summary.tasks_completed.push(task.id.clone());
                    if let Some(ev) = &self.events {
                        ev.task_completed(&task.id);
                    }
                }
                Ok(false) => summary.tasks_blocked.push(task.id.clone()),
                Err(OrchestratorError::Cancelled) | Err(OrchestratorError::Healer(HealerError::SpellCancelled { .. })) => {
                    self.trajectory.append_step(
                        StepInput::new(StepSource::System, "session_cancelled").with_status(crate::trajectory::StepStatus::Completed),
                    )?;
                    if let Some(ev) = &self.events {
                        ev.session_cancelled("external cancel signal received");
                    }
                    summary.final_state = Some(OrchestratorState::Idle);
                    break;
                }
                Err(e) => {
                    warn!(task_id = %task.id, error = %e, "Orchestrator::run: fatal error, aborting session");
                    self.trajectory.record_recovery(RecoveryInfo { reason: e.to_string(), at_step: self.trajectory.steps().len() as u64 })?;
                    if let Some(ev) = &self.events {
                        ev.error("orchestrator", &e.to_string());
                    }
                    return Err(e);
                }
            }
        }

        if let Some(ev) = &self.events {
            ev.session_ended(summary.tasks_completed.len() as u32, summary.tasks_blocked.len() as u32);
        }
        Ok(summary)
    }

    /// Runs one task's subtasks to completion or to a blocked state. Returns
    /// `Ok(true)` if the task completed, `Ok(false)` if it ended up blocked.
    async fn run_task(&mut self, task: &Task, dry_run: bool) -> Result<bool> {
        let mut subtasks = decompose(task);
        if subtasks.is_empty() {
            self.block_task(task, "no decomposition possible", None).await?;
            return Ok(false);
        }

        for subtask in &mut subtasks {
            subtask.start();
            if let Some(ev) = &self.events {
                ev.subtask_started(&subtask.id, &subtask.description);
            }
            loop {
                self.trajectory.append_step(StepInput::new(StepSource::Agent, format!("executing subtask {}", subtask.id)))?;

                if dry_run {
                    info!(subtask_id = %subtask.id, "Orchestrator::run_task: dry-run, skipping worker invocation");
                    subtask.complete();
                    break;
                }

                let invocation = SubtaskInvocation {
                    instruction: subtask.description.clone(),
                    workdir: self.root.clone(),
                    timeout: Duration::from_secs(self.project.worker_timeout_secs),
                    kill_grace: Duration::from_secs(self.project.worker_kill_grace_secs),
                };

                let outcome = self.worker.run_subtask(&invocation, &self.cancel).await;
                if let Ok(events) = &outcome {
                    self.append_worker_events(events)?;
                }

                if self.cancel.is_cancelled() {
                    return Err(OrchestratorError::Cancelled);
                }

                let worker_ok = matches!(&outcome, Ok(events) if matches!(events.last(), Some(WorkerEvent::Exit { code: 0, .. })));

                if !worker_ok {
                    let output = describe_worker_failure(&outcome);
                    self.trajectory.append_step(StepInput::new(StepSource::Worker, "subtask failed").with_error(output.clone()))?;
                    if let Some(ev) = &self.events {
                        ev.subtask_failed(&subtask.id, &output);
                    }
                    let trigger = TriggerEvent::SubtaskFailed { subtask_id: subtask.id.clone(), output };
                    let resolved = self.heal(task, Some(&*subtask), &trigger).await?;
                    subtask.fail();
                    if resolved {
                        continue;
                    }
                    self.block_task(task, "subtask failed and healing did not resolve it", Some(&*subtask)).await?;
                    return Ok(false);
                }

                let verified = self.verify(task).await?;
                if !verified.0 {
                    let trigger = TriggerEvent::VerificationComplete { subtask_id: subtask.id.clone(), passed: false, output: verified.1 };
                    let resolved = self.heal(task, Some(&*subtask), &trigger).await?;
                    subtask.fail();
                    if resolved {
                        continue;
                    }
                    self.block_task(task, "verification failed and healing did not resolve it", Some(&*subtask)).await?;
                    return Ok(false);
                }

                subtask.complete();
                if let Some(ev) = &self.events {
                    ev.subtask_completed(&subtask.id);
                }
                break;
            }
        }

        self.task_store.close(&task.id, "completed")?;
        info!(task_id = %task.id, "Orchestrator::run_task: task committed");
        Ok(true)
    }

    /// Forwards each `WorkerEvent` from a subtask run into the trajectory as its own
    /// `Step`, so per-tool-call detail survives alongside the coarse subtask steps.
    fn append_worker_events(&mut self, events: &[WorkerEvent]) -> Result<()> {
        for event in events {
            match event {
                WorkerEvent::ToolCall { id, name, args } => {
                    self.trajectory.append_step(
                        StepInput::new(StepSource::Worker, format!("tool call: {name}"))
                            .with_tool_calls(vec![ToolCallRecord { id: id.clone(), name: name.clone(), args: args.clone() }]),
                    )?;
                }
                WorkerEvent::ToolResult { source_id, content } => {
                    self.trajectory
                        .append_step(StepInput::new(StepSource::Worker, format!("tool result for {source_id}")).with_observation(content.clone()))?;
                }
                WorkerEvent::Message { text } => {
                    self.trajectory.append_step(StepInput::new(StepSource::Worker, text.clone()))?;
                }
                WorkerEvent::Started | WorkerEvent::FinalMetrics { .. } | WorkerEvent::Exit { .. } => {}
            }
        }
        Ok(())
    }

    /// Runs all configured health commands. Returns `(all_passed, combined_output)`.
    async fn verify(&self, task: &Task) -> Result<(bool, String)> {
        if let Some(ev) = &self.events {
            ev.verification_started(&task.id);
        }
        let runner = HealthRunner::new(&self.root, Duration::from_secs(self.project.health_command_timeout_secs));
        let mut combined = String::new();
        let mut all_passed = true;

        for (kind, commands) in [
            (HealthKind::Typecheck, &self.project.typecheck_commands),
            (HealthKind::Test, &self.project.test_commands),
            (HealthKind::E2e, &self.project.e2e_commands),
        ] {
            let results = runner.run_all(kind, commands).await?;
            for result in &results {
                if !result.passed() {
                    all_passed = false;
                }
                combined.push_str(&result.stdout);
                combined.push_str(&result.stderr);
            }
        }

        debug!(task_id = %task.id, all_passed, "Orchestrator::verify: called");
        if let Some(ev) = &self.events {
            ev.verification_completed(&task.id, all_passed);
        }
        Ok((all_passed, combined))
    }

    /// Consults PolicyGate and, if admitted, runs SpellEngine. Returns whether the
    /// failure was resolved (caller should retry the subtask).
    async fn heal(&mut self, task: &Task, subtask: Option<&Subtask>, trigger: &TriggerEvent) -> Result<bool> {
        let decision = policy::decide(trigger, &self.project.healer, &self.counters);
        info!(task_id = %task.id, run = decision.run, reason = %decision.reason, "Orchestrator::heal: policy decision");

        let Some(scenario) = decision.scenario else {
            self.trajectory.append_step(StepInput::new(StepSource::System, format!("healer denied: {}", decision.reason)))?;
            if let Some(ev) = &self.events {
                ev.healer_denied(&decision.reason);
            }
            return Ok(false);
        };

        if let Some(ev) = &self.events {
            ev.healer_admitted(scenario, &decision.reason);
        }
        self.counters.record_admission(subtask.map(|s| s.id.as_str()));

        let failure_count = subtask.map(|s| s.failure_count).unwrap_or(0);
        let ctx = context::build(BuildArgs {
            project_root: &self.root,
            session_id: &self.session_id,
            task_id: &task.id,
            subtask_id: subtask.map(|s| s.id.as_str()),
            trigger,
            scenario,
            failure_count,
            previous_attempts: 0,
            counters: &self.counters,
        })
        .await;

        let plan = spell::plan(&ctx, &self.project.healer);
        let deps = SpellDeps { task_store: &self.task_store, worker: self.worker, prompts: &self.prompts, project: &self.project };
        let cancel = self.cancel.clone();
        let execution = spell::execute(&ctx, &plan, &deps, &mut self.counters, &cancel).await;

        let key = spell::key_for(&ctx);
        let tried_strs: Vec<String> = execution.spells_tried.iter().map(|s| s.as_str().to_string()).collect();
        let succeeded_strs: Vec<String> = execution.spells_succeeded.iter().map(|s| s.as_str().to_string()).collect();
        self.counters
            .healing_attempts
            .entry(key)
            .and_modify(|a| {
                for s in &tried_strs {
                    if !a.spells_tried.contains(s) {
                        a.spells_tried.push(s.clone());
                    }
                }
                for s in &succeeded_strs {
                    if !a.spells_succeeded.contains(s) {
                        a.spells_succeeded.push(s.clone());
                    }
                }
                a.outcome = execution.outcome;
                a.summary = execution.summary.clone();
                a.timestamp = chrono::Utc::now();
            })
            .or_insert_with(|| HealingAttempt {
                timestamp: chrono::Utc::now(),
                outcome: execution.outcome,
                spells_tried: tried_strs,
                spells_succeeded: succeeded_strs,
                summary: execution.summary.clone(),
            });

        if let Some(ev) = &self.events {
            for spell in &execution.spells_tried {
                ev.spell_attempted(*spell, scenario);
            }
            ev.healing_completed(execution.outcome, execution.spells_tried.clone(), execution.spells_succeeded.clone());
        }

        self.trajectory.append_step(
            StepInput::new(
                StepSource::Healer,
                format!("healing attempt: tried={:?} succeeded={:?} outcome={:?}", execution.spells_tried, execution.spells_succeeded, execution.outcome),
            )
            .with_status(crate::trajectory::StepStatus::Completed),
        )?;

        if execution.outcome == crate::domain::AttemptOutcome::Cancelled {
            let spell = execution.spells_tried.last().map(|s| s.as_str().to_string()).unwrap_or_else(|| "none".to_string());
            return Err(OrchestratorError::Healer(HealerError::SpellCancelled { spell }));
        }

        Ok(matches!(execution.outcome, crate::domain::AttemptOutcome::Resolved))
    }

    async fn block_task(&mut self, task: &Task, reason: &str, subtask: Option<&Subtask>) -> Result<()> {
        warn!(task_id = %task.id, subtask_id = ?subtask.map(|s| s.id.as_str()), reason, "Orchestrator::block_task: called");
        self.trajectory.append_step(StepInput::new(StepSource::System, format!("blocking: {reason}")).with_status(crate::trajectory::StepStatus::Failed))?;
        if let Some(ev) = &self.events {
            ev.task_blocked(&task.id, reason);
        }
        let fresh = self.task_store.get(&task.id)?;
        if fresh.status != taskstore::TaskStatus::Closed {
            self.task_store.close(&task.id, format!("blocked: {reason}"))?;
        }
        Ok(())
    }
}

fn describe_worker_failure(outcome: &std::result::Result<Vec<WorkerEvent>, crate::error::WorkerError>) -> String {
    match outcome {
        Ok(events) => match events.last() {
            Some(WorkerEvent::Exit { code, reason }) => format!("worker exited {code}: {reason}"),
            _ => "worker ended without a terminal exit event".to_string(),
        },
        Err(e) => e.to_string(),
    }
}

/// Splits a task's description into bullet-prefixed lines as subtasks, or treats
/// the whole description as a single subtask when there are no bullets.
fn decompose(task: &Task) -> Vec<Subtask> {
    let bullets: Vec<&str> = task
        .description
        .lines()
        .map(str::trim)
        .filter(|l| l.starts_with("- ") || l.starts_with("* "))
        .collect();

    if bullets.is_empty() {
        if task.description.trim().is_empty() {
            return Vec::new();
        }
        return vec![Subtask::new(format!("{}.1", task.id), task.description.clone())];
    }

    bullets
        .into_iter()
        .enumerate()
        .map(|(i, line)| Subtask::new(format!("{}.{}", task.id, i + 1), line.trim_start_matches(['-', '*']).trim()))
        .collect()
}
