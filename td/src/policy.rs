//! PolicyGate: a pure function mapping an orchestrator event to a healing
//! decision. No I/O, no mutation — Orchestrator applies the decision afterward.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::config::{HealerConfig, ScenarioToggles};
use crate::domain::{AttemptOutcome, Counters, Scenario, TriggerEvent, healing_key};

const ERROR_HASH_PREFIX_LEN: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub run: bool,
    pub scenario: Option<Scenario>,
    pub reason: String,
}

impl Decision {
    fn deny(reason: impl Into<String>) -> Self {
        Self { run: false, scenario: None, reason: reason.into() }
    }

    fn admit(scenario: Scenario, reason: impl Into<String>) -> Self {
        Self { run: true, scenario: Some(scenario), reason: reason.into() }
    }
}

/// Maps a trigger event to a scenario by the fixed table in §4.5. Returns `None`
/// for events PolicyGate has nothing to say about.
pub fn classify(event: &TriggerEvent) -> Option<Scenario> {
    match event {
        TriggerEvent::InitScriptComplete { success: false, failure_type, .. } => {
            use crate::domain::InitFailureType::*;
            Some(match failure_type {
                Some(TypecheckFailed) => Scenario::InitScriptTypecheckFailure,
                Some(TestFailed) => Scenario::InitScriptTestFailure,
                _ => Scenario::InitScriptEnvironmentFailure,
            })
        }
        TriggerEvent::InitScriptComplete { success: true, .. } => None,
        TriggerEvent::SubtaskFailed { .. } => Some(Scenario::SubtaskFailed),
        TriggerEvent::VerificationComplete { passed: false, .. } => Some(Scenario::VerificationFailed),
        TriggerEvent::VerificationComplete { passed: true, .. } => None,
        TriggerEvent::Error { .. } => Some(Scenario::RuntimeError),
        TriggerEvent::SubtaskStuck { .. } => Some(Scenario::SubtaskStuck),
    }
}

fn scenario_enabled(toggles: &ScenarioToggles, scenario: Scenario) -> bool {
    match scenario {
        Scenario::InitScriptTypecheckFailure | Scenario::InitScriptTestFailure | Scenario::InitScriptEnvironmentFailure => {
            toggles.on_init_failure
        }
        Scenario::VerificationFailed => toggles.on_verification_failure,
        Scenario::SubtaskFailed => toggles.on_subtask_failure,
        Scenario::RuntimeError => toggles.on_runtime_error,
        Scenario::SubtaskStuck => toggles.on_stuck_subtask,
    }
}

pub fn decide(event: &TriggerEvent, config: &HealerConfig, counters: &Counters) -> Decision {
    if !config.enabled {
        return Decision::deny("healer disabled in project config");
    }

    let Some(scenario) = classify(event) else {
        return Decision::deny("event maps to no scenario");
    };

    if !scenario_enabled(&config.scenarios, scenario) {
        return Decision::deny(format!("scenario {scenario} disabled in project config"));
    }

    if counters.session_invocations >= config.max_invocations_per_session {
        return Decision::deny("session invocation limit reached");
    }

    if scenario.is_subtask_scoped() {
        if let Some(subtask_id) = event.subtask_id() {
            let used = counters.subtask_invocations.get(subtask_id).copied().unwrap_or(0);
            if used >= config.max_invocations_per_subtask {
                return Decision::deny("subtask invocation limit reached");
            }
        }
    }

    Decision::admit(scenario, "admitted")
}

/// Non-cryptographic, stable-enough-for-dedup hash over a whitespace-normalized,
/// length-bounded prefix of the error text.
pub fn error_hash(error_text: &str) -> u64 {
    let normalized: String = error_text.split_whitespace().collect::<Vec<_>>().join(" ");
    let prefix: String = normalized.chars().take(ERROR_HASH_PREFIX_LEN).collect();
    let mut hasher = DefaultHasher::new();
    prefix.hash(&mut hasher);
    hasher.finish()
}

/// Whether a prior attempt at this healing key already reached a terminal,
/// reusable outcome — SpellEngine consults this before re-running spells, though
/// PolicyGate itself still admits (new evidence is always allowed).
pub fn already_attempted(counters: &Counters, task_id: &str, subtask_id: Option<&str>, scenario: Scenario, error_text: &str) -> bool {
    let key = healing_key(task_id, subtask_id, scenario, error_hash(error_text));
    counters
        .healing_attempts
        .get(&key)
        .map(|attempt| matches!(attempt.outcome, AttemptOutcome::Resolved | AttemptOutcome::Contained | AttemptOutcome::Skipped))
        .unwrap_or(false)
}
