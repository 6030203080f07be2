//! Event Bus - central pub/sub system for session activity
//!
//! The EventBus uses tokio broadcast channels to deliver events to all subscribers
//! with minimal latency. Components emit events, consumers (a TUI, a JSONL logger,
//! a future metrics consumer) subscribe.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::debug;

use crate::domain::{AttemptOutcome, OrchestratorState, Scenario, Spell};

use super::types::TdEvent;

/// Default channel capacity (events)
pub const DEFAULT_CHANNEL_CAPACITY: usize = 10_000;

/// Central event bus for a session's activity stream
///
/// Every significant Orchestrator action emits an event to this bus.
/// All consumers subscribe to receive events.
pub struct EventBus {
    tx: broadcast::Sender<TdEvent>,
    #[allow(dead_code)]
    channel_capacity: usize,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        debug!(capacity, "EventBus::new: creating event bus");
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, channel_capacity: capacity }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Emit an event to all subscribers. Fire-and-forget: if there are no
    /// subscribers, the event is dropped. If the channel is full, oldest
    /// events are dropped.
    pub fn emit(&self, event: TdEvent) {
        debug!(event_type = event.event_type(), session_id = event.session_id(), "EventBus::emit");
        let _ = self.tx.send(event);
    }

    /// Subscribe to receive events emitted after subscription.
    pub fn subscribe(&self) -> broadcast::Receiver<TdEvent> {
        debug!("EventBus::subscribe: new subscriber");
        self.tx.subscribe()
    }

    /// Create an emitter handle bound to a specific session ID.
    pub fn emitter_for(&self, session_id: impl Into<String>) -> EventEmitter {
        let session_id = session_id.into();
        debug!(%session_id, "EventBus::emitter_for: creating emitter");
        EventEmitter { tx: self.tx.clone(), session_id }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

/// Handle for components to emit events without owning the bus
///
/// Cheap to clone; provides convenience methods for emitting events with a
/// pre-set session ID.
#[derive(Clone)]
pub struct EventEmitter {
    tx: broadcast::Sender<TdEvent>,
    session_id: String,
}

impl EventEmitter {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Emit a raw event
    pub fn emit(&self, event: TdEvent) {
        debug!(event_type = event.event_type(), "EventEmitter::emit");
        let _ = self.tx.send(event);
    }

    // === Convenience methods ===

    pub fn session_started(&self, root: &str) {
        self.emit(TdEvent::SessionStarted { session_id: self.session_id.clone(), root: root.to_string() });
    }

    pub fn session_ended(&self, tasks_completed: u32, tasks_blocked: u32) {
        self.emit(TdEvent::SessionEnded { session_id: self.session_id.clone(), tasks_completed, tasks_blocked });
    }

    pub fn session_cancelled(&self, reason: &str) {
        self.emit(TdEvent::SessionCancelled { session_id: self.session_id.clone(), reason: reason.to_string() });
    }

    pub fn state_changed(&self, from: OrchestratorState, to: OrchestratorState) {
        self.emit(TdEvent::StateChanged { session_id: self.session_id.clone(), from, to });
    }

    pub fn task_selected(&self, task_id: &str) {
        self.emit(TdEvent::TaskSelected { session_id: self.session_id.clone(), task_id: task_id.to_string() });
    }

    pub fn task_completed(&self, task_id: &str) {
        self.emit(TdEvent::TaskCompleted { session_id: self.session_id.clone(), task_id: task_id.to_string() });
    }

    pub fn task_blocked(&self, task_id: &str, reason: &str) {
        self.emit(TdEvent::TaskBlocked { session_id: self.session_id.clone(), task_id: task_id.to_string(), reason: reason.to_string() });
    }

    pub fn subtask_started(&self, subtask_id: &str, description: &str) {
        self.emit(TdEvent::SubtaskStarted {
            session_id: self.session_id.clone(),
            subtask_id: subtask_id.to_string(),
            description: description.to_string(),
        });
    }

    pub fn subtask_completed(&self, subtask_id: &str) {
        self.emit(TdEvent::SubtaskCompleted { session_id: self.session_id.clone(), subtask_id: subtask_id.to_string() });
    }

    pub fn subtask_failed(&self, subtask_id: &str, output: &str) {
        self.emit(TdEvent::SubtaskFailed { session_id: self.session_id.clone(), subtask_id: subtask_id.to_string(), output: output.to_string() });
    }

    pub fn worker_output(&self, subtask_id: &str, line: &str, is_stderr: bool) {
        self.emit(TdEvent::WorkerOutput {
            session_id: self.session_id.clone(),
            subtask_id: subtask_id.to_string(),
            line: line.to_string(),
            is_stderr,
        });
    }

    pub fn verification_started(&self, task_id: &str) {
        self.emit(TdEvent::VerificationStarted { session_id: self.session_id.clone(), task_id: task_id.to_string() });
    }

    pub fn verification_completed(&self, task_id: &str, passed: bool) {
        self.emit(TdEvent::VerificationCompleted { session_id: self.session_id.clone(), task_id: task_id.to_string(), passed });
    }

    pub fn healer_admitted(&self, scenario: Scenario, reason: &str) {
        self.emit(TdEvent::HealerAdmitted { session_id: self.session_id.clone(), scenario, reason: reason.to_string() });
    }

    pub fn healer_denied(&self, reason: &str) {
        self.emit(TdEvent::HealerDenied { session_id: self.session_id.clone(), reason: reason.to_string() });
    }

    pub fn spell_attempted(&self, spell: Spell, scenario: Scenario) {
        self.emit(TdEvent::SpellAttempted { session_id: self.session_id.clone(), spell, scenario });
    }

    pub fn healing_completed(&self, outcome: AttemptOutcome, spells_tried: Vec<Spell>, spells_succeeded: Vec<Spell>) {
        self.emit(TdEvent::HealingCompleted { session_id: self.session_id.clone(), outcome, spells_tried, spells_succeeded });
    }

    pub fn error(&self, context: &str, message: &str) {
        self.emit(TdEvent::Error { session_id: self.session_id.clone(), context: context.to_string(), message: message.to_string() });
    }

    pub fn warning(&self, context: &str, message: &str) {
        self.emit(TdEvent::Warning { session_id: self.session_id.clone(), context: context.to_string(), message: message.to_string() });
    }
}

/// Create an event bus wrapped in an Arc for shared ownership
pub fn create_event_bus() -> Arc<EventBus> {
    Arc::new(EventBus::with_default_capacity())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::TryRecvError;

    #[test]
    fn test_event_bus_creation() {
        let bus = EventBus::new(100);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_event_bus_subscribe() {
        let bus = EventBus::new(100);
        let _rx1 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);
        let _rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);
    }

    #[tokio::test]
    async fn test_event_bus_emit_receive() {
        let bus = EventBus::new(100);
        let mut rx = bus.subscribe();

        bus.emit(TdEvent::SessionStarted { session_id: "test-123".to_string(), root: "/tmp".to_string() });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.session_id(), "test-123");
        assert_eq!(event.event_type(), "SessionStarted");
    }

    #[tokio::test]
    async fn test_event_bus_no_subscribers() {
        let bus = EventBus::new(100);
        bus.emit(TdEvent::SessionStarted { session_id: "test-123".to_string(), root: "/tmp".to_string() });
    }

    #[tokio::test]
    async fn test_event_emitter() {
        let bus = EventBus::new(100);
        let mut rx = bus.subscribe();
        let emitter = bus.emitter_for("exec-456");

        emitter.subtask_started("oa-1.1", "write the thing");

        let event = rx.recv().await.unwrap();
        assert_eq!(event.session_id(), "exec-456");
        match event {
            TdEvent::SubtaskStarted { subtask_id, description, .. } => {
                assert_eq!(subtask_id, "oa-1.1");
                assert_eq!(description, "write the thing");
            }
            _ => panic!("Expected SubtaskStarted event"),
        }
    }

    #[tokio::test]
    async fn test_event_emitter_convenience_methods() {
        let bus = EventBus::new(100);
        let mut rx = bus.subscribe();
        let emitter = bus.emitter_for("exec-789");

        emitter.task_selected("oa-1");
        emitter.subtask_started("oa-1.1", "do it");
        emitter.worker_output("oa-1.1", "building...", false);
        emitter.verification_started("oa-1");
        emitter.verification_completed("oa-1", true);
        emitter.subtask_completed("oa-1.1");
        emitter.task_completed("oa-1");

        for _ in 0..7 {
            let event = rx.recv().await.unwrap();
            assert_eq!(event.session_id(), "exec-789");
        }

        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let bus = EventBus::new(100);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.emit(TdEvent::SessionStarted { session_id: "test".to_string(), root: "/tmp".to_string() });

        let event1 = rx1.recv().await.unwrap();
        let event2 = rx2.recv().await.unwrap();

        assert_eq!(event1.session_id(), "test");
        assert_eq!(event2.session_id(), "test");
    }

    #[tokio::test]
    async fn test_full_session_lifecycle_events() {
        let bus = EventBus::new(100);
        let mut rx = bus.subscribe();
        let emitter = bus.emitter_for("lifecycle-test");

        emitter.session_started("/repo");
        emitter.state_changed(OrchestratorState::Idle, OrchestratorState::TaskSelected);
        emitter.task_selected("oa-1");
        emitter.state_changed(OrchestratorState::TaskSelected, OrchestratorState::ExecutingSubtask);
        emitter.subtask_started("oa-1.1", "implement feature");
        emitter.subtask_completed("oa-1.1");
        emitter.verification_started("oa-1");
        emitter.verification_completed("oa-1", true);
        emitter.task_completed("oa-1");
        emitter.session_ended(1, 0);

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event.event_type().to_string());
        }

        assert_eq!(
            events,
            vec![
                "SessionStarted",
                "StateChanged",
                "TaskSelected",
                "StateChanged",
                "SubtaskStarted",
                "SubtaskCompleted",
                "VerificationStarted",
                "VerificationCompleted",
                "TaskCompleted",
                "SessionEnded",
            ]
        );
    }

    #[tokio::test]
    async fn test_healer_and_spell_events() {
        let bus = EventBus::new(100);
        let mut rx = bus.subscribe();
        let emitter = bus.emitter_for("healer-test");

        emitter.healer_admitted(Scenario::SubtaskFailed, "admitted under session limit");
        emitter.spell_attempted(Spell::RewindUncommittedChanges, Scenario::SubtaskFailed);
        emitter.healing_completed(AttemptOutcome::Resolved, vec![Spell::RewindUncommittedChanges], vec![Spell::RewindUncommittedChanges]);

        let admitted = rx.recv().await.unwrap();
        assert!(matches!(admitted, TdEvent::HealerAdmitted { scenario: Scenario::SubtaskFailed, .. }));

        let attempted = rx.recv().await.unwrap();
        assert!(matches!(attempted, TdEvent::SpellAttempted { spell: Spell::RewindUncommittedChanges, .. }));

        let completed = rx.recv().await.unwrap();
        assert!(matches!(completed, TdEvent::HealingCompleted { outcome: AttemptOutcome::Resolved, .. }));
    }

    #[tokio::test]
    async fn test_lagged_subscriber_continues() {
        let bus = EventBus::new(5);
        let mut rx = bus.subscribe();

        for i in 0..10 {
            bus.emit(TdEvent::WorkerOutput {
                session_id: "lag-test".to_string(),
                subtask_id: "oa-1.1".to_string(),
                line: format!("line {i}"),
                is_stderr: false,
            });
        }

        let result = rx.recv().await;
        match result {
            Ok(event) => assert_eq!(event.event_type(), "WorkerOutput"),
            Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                assert!(n > 0, "Should have missed some events");
                let event = rx.recv().await.unwrap();
                assert_eq!(event.event_type(), "WorkerOutput");
            }
            Err(e) => panic!("Unexpected error: {:?}", e),
        }
    }

    #[tokio::test]
    async fn test_error_and_warning_events() {
        let bus = EventBus::new(100);
        let mut rx = bus.subscribe();
        let emitter = bus.emitter_for("error-test");

        emitter.warning("healer", "approaching session invocation limit");
        emitter.error("worker", "process exited with signal");

        let warning = rx.recv().await.unwrap();
        assert_eq!(warning.event_type(), "Warning");
        if let TdEvent::Warning { context, message, .. } = warning {
            assert_eq!(context, "healer");
            assert_eq!(message, "approaching session invocation limit");
        } else {
            panic!("Expected Warning event");
        }

        let error = rx.recv().await.unwrap();
        assert_eq!(error.event_type(), "Error");
        if let TdEvent::Error { context, message, .. } = error {
            assert_eq!(context, "worker");
            assert_eq!(message, "process exited with signal");
        } else {
            panic!("Expected Error event");
        }
    }

    #[tokio::test]
    async fn test_multiple_sessions_interleaved() {
        let bus = EventBus::new(100);
        let mut rx = bus.subscribe();

        let emitter_a = bus.emitter_for("sess-A");
        let emitter_b = bus.emitter_for("sess-B");

        emitter_a.task_selected("oa-1");
        emitter_b.task_selected("oa-2");
        emitter_a.subtask_started("oa-1.1", "a");
        emitter_b.subtask_started("oa-2.1", "b");

        let mut sess_a_events = Vec::new();
        let mut sess_b_events = Vec::new();

        while let Ok(event) = rx.try_recv() {
            match event.session_id() {
                "sess-A" => sess_a_events.push(event.event_type().to_string()),
                "sess-B" => sess_b_events.push(event.event_type().to_string()),
                _ => panic!("Unexpected session_id"),
            }
        }

        assert_eq!(sess_a_events, vec!["TaskSelected", "SubtaskStarted"]);
        assert_eq!(sess_b_events, vec!["TaskSelected", "SubtaskStarted"]);
    }

    #[tokio::test]
    async fn test_emitter_session_id_accessor() {
        let bus = EventBus::new(100);
        let emitter = bus.emitter_for("my-session");
        assert_eq!(emitter.session_id(), "my-session");
    }

    #[test]
    fn test_default_channel_capacity() {
        assert_eq!(DEFAULT_CHANNEL_CAPACITY, 10_000);
    }

    #[test]
    fn test_event_bus_default() {
        let bus = EventBus::default();
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_create_event_bus_helper() {
        let bus = create_event_bus();
        assert_eq!(bus.subscriber_count(), 0);
    }
}
