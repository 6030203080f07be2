//! Event Logger - persists events to JSONL files
//!
//! The EventLogger subscribes to the EventBus and writes all events to
//! per-session JSONL files for history, debugging, and replay.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, error, warn};

use super::bus::EventBus;
use super::types::{EventLogEntry, TdEvent};

/// Event logger that writes events to JSONL files
///
/// Events are written to `~/.taskdaemon/runs/{session-id}/events.jsonl`
pub struct EventLogger {
    runs_dir: PathBuf,
    writers: HashMap<String, BufWriter<File>>,
}

impl EventLogger {
    pub fn new(runs_dir: impl AsRef<Path>) -> Self {
        let runs_dir = runs_dir.as_ref().to_path_buf();
        debug!(?runs_dir, "EventLogger::new: creating logger");
        Self { runs_dir, writers: HashMap::new() }
    }

    /// Create a logger with the default runs directory (~/.taskdaemon/runs)
    pub fn with_default_path() -> eyre::Result<Self> {
        let home = dirs::home_dir().ok_or_else(|| eyre::eyre!("Could not determine home directory"))?;
        let runs_dir = home.join(".taskdaemon").join("runs");
        fs::create_dir_all(&runs_dir)?;
        Ok(Self::new(runs_dir))
    }

    /// Write an event to its session's log file
    pub fn write_event(&mut self, event: &TdEvent) -> eyre::Result<()> {
        let session_id = event.session_id();
        debug!(%session_id, event_type = event.event_type(), "EventLogger::write_event");

        let writer = if let Some(w) = self.writers.get_mut(session_id) {
            w
        } else {
            let session_dir = self.runs_dir.join(session_id);
            fs::create_dir_all(&session_dir)?;

            let log_path = session_dir.join("events.jsonl");
            debug!(?log_path, "EventLogger: creating new log file");

            let file = OpenOptions::new().create(true).append(true).open(&log_path)?;
            let writer = BufWriter::new(file);
            self.writers.insert(session_id.to_string(), writer);
            self.writers.get_mut(session_id).unwrap()
        };

        let entry = EventLogEntry::new(event.clone());
        let json = serde_json::to_string(&entry)?;
        writeln!(writer, "{}", json)?;
        writer.flush()?;

        Ok(())
    }

    /// Close writer for a session (e.g., when the session ends)
    pub fn close_session(&mut self, session_id: &str) {
        debug!(%session_id, "EventLogger::close_session");
        if let Some(mut writer) = self.writers.remove(session_id) {
            let _ = writer.flush();
        }
    }

    /// Run the logger, consuming events from the bus until shutdown
    ///
    /// This is meant to be spawned as a background task.
    pub async fn run(mut self, event_bus: Arc<EventBus>) {
        debug!("EventLogger::run: starting event logger");
        let mut rx = event_bus.subscribe();

        loop {
            match rx.recv().await {
                Ok(event) => {
                    let session_id = event.session_id().to_string();
                    let session_ended = matches!(event, TdEvent::SessionEnded { .. });

                    if let Err(e) = self.write_event(&event) {
                        error!(%session_id, error = %e, "EventLogger: failed to write event");
                    }

                    if session_ended {
                        self.close_session(&session_id);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(missed = n, "EventLogger: lagged behind, missed events");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("EventLogger: channel closed, shutting down");
                    break;
                }
            }
        }

        for (session_id, mut writer) in self.writers.drain() {
            debug!(%session_id, "EventLogger: flushing writer on shutdown");
            let _ = writer.flush();
        }
    }
}

/// Read events from a session's log file
pub fn read_session_events(runs_dir: impl AsRef<Path>, session_id: &str) -> eyre::Result<Vec<EventLogEntry>> {
    let log_path = runs_dir.as_ref().join(session_id).join("events.jsonl");
    debug!(?log_path, "read_session_events: reading log file");

    if !log_path.exists() {
        return Ok(Vec::new());
    }

    let content = fs::read_to_string(&log_path)?;
    let mut entries = Vec::new();

    for line in content.lines() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<EventLogEntry>(line) {
            Ok(entry) => entries.push(entry),
            Err(e) => {
                warn!(line, error = %e, "read_session_events: failed to parse line");
            }
        }
    }

    debug!(count = entries.len(), "read_session_events: loaded entries");
    Ok(entries)
}

/// Spawn the event logger as a background task
pub fn spawn_event_logger(event_bus: Arc<EventBus>) -> eyre::Result<tokio::task::JoinHandle<()>> {
    let logger = EventLogger::with_default_path()?;
    Ok(tokio::spawn(async move {
        logger.run(event_bus).await;
    }))
}

/// Replay events for a session from the default runs directory
///
/// Returns an empty Vec if the session has no logged events.
pub fn replay_session_events(session_id: &str) -> eyre::Result<Vec<TdEvent>> {
    let home = dirs::home_dir().ok_or_else(|| eyre::eyre!("Could not determine home directory"))?;
    let runs_dir = home.join(".taskdaemon").join("runs");
    let entries = read_session_events(&runs_dir, session_id)?;
    Ok(entries.into_iter().map(|e| e.event).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_event_logger_creation() {
        let temp = tempdir().unwrap();
        let logger = EventLogger::new(temp.path());
        assert!(logger.writers.is_empty());
    }

    #[test]
    fn test_write_event() {
        let temp = tempdir().unwrap();
        let mut logger = EventLogger::new(temp.path());

        let event = TdEvent::SessionStarted { session_id: "test-123".to_string(), root: "/repo".to_string() };

        logger.write_event(&event).unwrap();

        let log_path = temp.path().join("test-123").join("events.jsonl");
        assert!(log_path.exists());

        let content = fs::read_to_string(&log_path).unwrap();
        assert!(content.contains("SessionStarted"));
        assert!(content.contains("test-123"));
    }

    #[test]
    fn test_multiple_events_same_session() {
        let temp = tempdir().unwrap();
        let mut logger = EventLogger::new(temp.path());

        let event1 = TdEvent::SessionStarted { session_id: "test-123".to_string(), root: "/repo".to_string() };
        let event2 = TdEvent::TaskSelected { session_id: "test-123".to_string(), task_id: "oa-1".to_string() };
        let event3 = TdEvent::TaskCompleted { session_id: "test-123".to_string(), task_id: "oa-1".to_string() };

        logger.write_event(&event1).unwrap();
        logger.write_event(&event2).unwrap();
        logger.write_event(&event3).unwrap();

        let log_path = temp.path().join("test-123").join("events.jsonl");
        let content = fs::read_to_string(&log_path).unwrap();
        assert_eq!(content.lines().count(), 3);
    }

    #[test]
    fn test_multiple_sessions() {
        let temp = tempdir().unwrap();
        let mut logger = EventLogger::new(temp.path());

        let event1 = TdEvent::SessionStarted { session_id: "sess-1".to_string(), root: "/a".to_string() };
        let event2 = TdEvent::SessionStarted { session_id: "sess-2".to_string(), root: "/b".to_string() };

        logger.write_event(&event1).unwrap();
        logger.write_event(&event2).unwrap();

        assert!(temp.path().join("sess-1").join("events.jsonl").exists());
        assert!(temp.path().join("sess-2").join("events.jsonl").exists());
    }

    #[test]
    fn test_read_session_events() {
        let temp = tempdir().unwrap();
        let mut logger = EventLogger::new(temp.path());

        logger.write_event(&TdEvent::SessionStarted { session_id: "test-read".to_string(), root: "/repo".to_string() }).unwrap();
        logger.write_event(&TdEvent::TaskSelected { session_id: "test-read".to_string(), task_id: "oa-1".to_string() }).unwrap();

        let entries = read_session_events(temp.path(), "test-read").unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].event.event_type(), "SessionStarted");
        assert_eq!(entries[1].event.event_type(), "TaskSelected");
    }

    #[test]
    fn test_read_nonexistent_session() {
        let temp = tempdir().unwrap();
        let entries = read_session_events(temp.path(), "nonexistent").unwrap();
        assert!(entries.is_empty());
    }

    #[test]
    fn test_close_session() {
        let temp = tempdir().unwrap();
        let mut logger = EventLogger::new(temp.path());

        logger.write_event(&TdEvent::SessionStarted { session_id: "test-close".to_string(), root: "/repo".to_string() }).unwrap();

        assert!(logger.writers.contains_key("test-close"));
        logger.close_session("test-close");
        assert!(!logger.writers.contains_key("test-close"));
    }

    #[test]
    fn test_replay_preserves_order() {
        let temp = tempdir().unwrap();
        let mut logger = EventLogger::new(temp.path());

        logger.write_event(&TdEvent::SessionStarted { session_id: "test-replay".to_string(), root: "/repo".to_string() }).unwrap();
        logger.write_event(&TdEvent::TaskSelected { session_id: "test-replay".to_string(), task_id: "oa-1".to_string() }).unwrap();
        logger
            .write_event(&TdEvent::VerificationStarted { session_id: "test-replay".to_string(), task_id: "oa-1".to_string() })
            .unwrap();
        logger
            .write_event(&TdEvent::SessionEnded { session_id: "test-replay".to_string(), tasks_completed: 1, tasks_blocked: 0 })
            .unwrap();

        let entries = read_session_events(temp.path(), "test-replay").unwrap();
        assert_eq!(entries.len(), 4);

        assert_eq!(entries[0].event.event_type(), "SessionStarted");
        assert_eq!(entries[1].event.event_type(), "TaskSelected");
        assert_eq!(entries[2].event.event_type(), "VerificationStarted");
        assert_eq!(entries[3].event.event_type(), "SessionEnded");
    }

    #[test]
    fn test_close_session_idempotent() {
        let temp = tempdir().unwrap();
        let mut logger = EventLogger::new(temp.path());

        logger.write_event(&TdEvent::SessionStarted { session_id: "idem-test".to_string(), root: "/repo".to_string() }).unwrap();

        logger.close_session("idem-test");
        logger.close_session("idem-test");
        logger.close_session("idem-test");

        assert!(!logger.writers.contains_key("idem-test"));
    }

    #[test]
    fn test_close_nonexistent_session() {
        let temp = tempdir().unwrap();
        let mut logger = EventLogger::new(temp.path());
        logger.close_session("never-existed");
    }

    #[test]
    fn test_sessions_are_isolated() {
        let temp = tempdir().unwrap();
        let mut logger = EventLogger::new(temp.path());

        logger.write_event(&TdEvent::SessionStarted { session_id: "iso-1".to_string(), root: "/a".to_string() }).unwrap();
        logger.write_event(&TdEvent::SessionStarted { session_id: "iso-2".to_string(), root: "/b".to_string() }).unwrap();
        logger.write_event(&TdEvent::TaskSelected { session_id: "iso-1".to_string(), task_id: "oa-1".to_string() }).unwrap();

        let entries_1 = read_session_events(temp.path(), "iso-1").unwrap();
        let entries_2 = read_session_events(temp.path(), "iso-2").unwrap();

        assert_eq!(entries_1.len(), 2);
        assert_eq!(entries_2.len(), 1);

        assert!(entries_1.iter().all(|e| e.event.session_id() == "iso-1"));
        assert!(entries_2.iter().all(|e| e.event.session_id() == "iso-2"));
    }

    #[test]
    fn test_events_persisted_immediately() {
        let temp = tempdir().unwrap();
        let mut logger = EventLogger::new(temp.path());

        logger.write_event(&TdEvent::SessionStarted { session_id: "persist-test".to_string(), root: "/repo".to_string() }).unwrap();

        let log_path = temp.path().join("persist-test").join("events.jsonl");
        let content = std::fs::read_to_string(&log_path).unwrap();

        assert!(content.contains("SessionStarted"));
        assert!(content.contains("persist-test"));
    }

    #[test]
    fn test_event_log_file_is_jsonl() {
        let temp = tempdir().unwrap();
        let mut logger = EventLogger::new(temp.path());

        for i in 0..5 {
            logger
                .write_event(&TdEvent::WorkerOutput {
                    session_id: "jsonl-test".to_string(),
                    subtask_id: "oa-1.1".to_string(),
                    line: format!("line {i}"),
                    is_stderr: false,
                })
                .unwrap();
        }

        let log_path = temp.path().join("jsonl-test").join("events.jsonl");
        let content = std::fs::read_to_string(&log_path).unwrap();

        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 5);

        for line in lines {
            let parsed: serde_json::Value = serde_json::from_str(line).expect("Each line should be valid JSON");
            assert!(parsed.get("ts").is_some(), "Should have timestamp");
            assert!(parsed.get("event").is_some(), "Should have event");
        }
    }

    #[test]
    fn test_reopen_after_close() {
        let temp = tempdir().unwrap();
        let mut logger = EventLogger::new(temp.path());

        logger.write_event(&TdEvent::SessionStarted { session_id: "reopen-test".to_string(), root: "/repo".to_string() }).unwrap();

        logger.close_session("reopen-test");

        logger
            .write_event(&TdEvent::SessionEnded { session_id: "reopen-test".to_string(), tasks_completed: 1, tasks_blocked: 0 })
            .unwrap();

        let entries = read_session_events(temp.path(), "reopen-test").unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].event.event_type(), "SessionStarted");
        assert_eq!(entries[1].event.event_type(), "SessionEnded");
    }
}
