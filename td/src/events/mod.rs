//! Event Bus Architecture for Live Observability
//!
//! This module provides a second, independent observability channel alongside
//! `tracing`: the in-process event bus. Every significant Orchestrator action
//! (session lifecycle, state transitions, healer admission, spell attempts)
//! emits an event. Consumers (a TUI, a `.jsonl` file logger, a future metrics
//! consumer) subscribe to the same bus.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       EVENT BUS                              │
//! │            (tokio::sync::broadcast channel)                  │
//! │                                                              │
//! │  Every Orchestrator action emits an event. Every consumer    │
//! │  subscribes.                                                 │
//! └─────────────────────────────────────────────────────────────┘
//!         ↑               ↑               ↑               ↑
//!    Orchestrator    WorkerDriver     HealthRunner      PolicyGate/
//!    emits:          emits:           emits:            SpellEngine emit:
//!    - SessionStarted - SubtaskStarted - VerificationStarted - HealerAdmitted
//!    - StateChanged  - WorkerOutput    - VerificationCompleted - SpellAttempted
//!    - TaskSelected  - SubtaskFailed                           - HealingCompleted
//!
//!         ↓               ↓               ↓               ↓
//! ┌───────────┐   ┌───────────┐   ┌───────────┐   ┌───────────┐
//! │ TUI Live  │   │ File Log  │   │ Replay    │   │ Metrics   │
//! │ Streaming │   │ .jsonl    │   │ (history) │   │ (future)  │
//! └───────────┘   └───────────┘   └───────────┘   └───────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use td::events::{EventBus, EventEmitter, TdEvent};
//! use std::sync::Arc;
//!
//! let event_bus = Arc::new(EventBus::with_default_capacity());
//! let emitter = event_bus.emitter_for("session-123");
//!
//! emitter.session_started("/path/to/repo");
//! emitter.task_selected("oa-1");
//! emitter.subtask_started("oa-1.1", "implement login");
//!
//! let mut rx = event_bus.subscribe();
//! while let Ok(event) = rx.recv().await {
//!     println!("Event: {:?}", event);
//! }
//! ```

mod bus;
mod logger;
mod types;

pub use bus::{DEFAULT_CHANNEL_CAPACITY, EventBus, EventEmitter, create_event_bus};
pub use logger::{EventLogger, read_session_events, replay_session_events, spawn_event_logger};
pub use types::{EventLogEntry, TdEvent};
