//! taskdaemon - the session orchestrator
//!
//! Wires TaskStore selection, worker supervision, health verification, and
//! policy-gated healing into one session loop. Each session picks a task,
//! decomposes it into subtasks, executes each through a `WorkerDriver`,
//! verifies via `HealthRunner`, and on failure consults `PolicyGate` before
//! the `SpellEngine` attempts recovery. Every step is appended to a
//! `TrajectoryLog`; every significant transition is also emitted on the
//! in-process event bus (`events`) for live/replayable observability.
//!
//! # Modules
//!
//! - [`orchestrator`] - the session state machine (C8)
//! - [`trajectory`] - append-only session history (C2)
//! - [`worker`] - subprocess driver for subtask execution (C3)
//! - [`health`] - typecheck/test/e2e command runner (C4)
//! - [`policy`] - healer admission decisions (C5)
//! - [`context`] - world-state snapshot for healing (C6)
//! - [`spell`] - the healer's recovery actions (C7)
//! - [`stuck`] - periodic staleness scan (C9)
//! - [`cancel`] - external-cancel propagation (SIGTERM/SIGKILL chain)
//! - [`lock`] - session filesystem lock
//! - [`config`] - project configuration
//! - [`cli`] - command-line interface

#![allow(dead_code)]

pub mod cancel;
pub mod cli;
pub mod config;
pub mod context;
pub mod domain;
pub mod error;
pub mod events;
pub mod health;
pub mod lock;
pub mod orchestrator;
pub mod policy;
pub mod prompts;
pub mod spell;
pub mod stuck;
pub mod trajectory;
pub mod worker;

pub use error::{ConfigError, HealerError, HealthError, LockError, OrchestratorError, Result, TrajectoryError, WorkerError};
pub use events::{EventBus, EventEmitter, EventLogEntry, EventLogger, TdEvent, create_event_bus, read_session_events, spawn_event_logger};
pub use orchestrator::{Orchestrator, SessionSummary};
