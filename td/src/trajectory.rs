//! TrajectoryLog: the append-only record of one Orchestrator session.
//!
//! File format is a single JSON document rewritten on each append — the same
//! tmpfile-then-rename atomic-write idiom `taskstore` uses for `tasks.jsonl`.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::TrajectoryError;

const SCHEMA_VERSION: &str = "ATIF-v1.4";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepSource {
    User,
    Agent,
    System,
    Worker,
    Healer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub id: String,
    pub name: String,
    pub args: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub step_id: u64,
    pub timestamp: DateTime<Utc>,
    pub source: StepSource,
    pub message: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCallRecord>,
    pub observation: Option<String>,
    pub status: StepStatus,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub step_id: u64,
    pub timestamp: DateTime<Utc>,
    pub label: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RecoveryInfo {
    pub reason: String,
    pub at_step: u64,
}

/// Input to `appendStep`: everything the caller wants to control, with the rest
/// defaulted by the log itself.
#[derive(Debug, Clone)]
pub struct StepInput {
    pub source: StepSource,
    pub message: String,
    pub tool_calls: Vec<ToolCallRecord>,
    pub observation: Option<String>,
    pub status: StepStatus,
    pub error: Option<String>,
}

impl StepInput {
    pub fn new(source: StepSource, message: impl Into<String>) -> Self {
        Self {
            source,
            message: message.into(),
            tool_calls: Vec::new(),
            observation: None,
            status: StepStatus::Completed,
            error: None,
        }
    }

    pub fn with_status(mut self, status: StepStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self.status = StepStatus::Failed;
        self
    }

    pub fn with_tool_calls(mut self, tool_calls: Vec<ToolCallRecord>) -> Self {
        self.tool_calls = tool_calls;
        self
    }

    pub fn with_observation(mut self, observation: impl Into<String>) -> Self {
        self.observation = Some(observation.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TrajectoryDocument {
    schema_version: String,
    session_id: String,
    agent: String,
    steps: Vec<Step>,
    checkpoints: Vec<Checkpoint>,
    recovery_info: Option<RecoveryInfo>,
    notes: Option<String>,
    final_metrics: Option<serde_json::Value>,
}

/// What `planRecovery` returns: where to resume and what needs replaying.
#[derive(Debug, Clone)]
pub struct RecoveryPlan {
    pub checkpoint: Option<Checkpoint>,
    pub resume_from_step_id: u64,
    pub completed_steps: Vec<Step>,
    pub steps_to_replay: Vec<Step>,
}

pub struct TrajectoryLog {
    path: PathBuf,
    doc: TrajectoryDocument,
}

impl TrajectoryLog {
    /// Opens (creating if absent) the trajectory file for `session` at
    /// `<root>/.openagents/trajectories/<session>.json`.
    pub fn open(root: &Path, session: &str, agent: &str) -> Result<Self, TrajectoryError> {
        debug!(?root, session, agent, "TrajectoryLog::open: called");
        let dir = root.join(".openagents").join("trajectories");
        std::fs::create_dir_all(&dir).map_err(|source| TrajectoryError::Io {
            path: dir.display().to_string(),
            source,
        })?;
        let path = dir.join(format!("{session}.json"));

        let doc = if path.exists() {
            let content = std::fs::read_to_string(&path).map_err(|source| TrajectoryError::Io {
                path: path.display().to_string(),
                source,
            })?;
            let doc: TrajectoryDocument = serde_json::from_str(&content).map_err(|source| TrajectoryError::CorruptJson {
                path: path.display().to_string(),
                source,
            })?;
            if doc.schema_version != SCHEMA_VERSION {
                return Err(TrajectoryError::SchemaMismatch {
                    expected: SCHEMA_VERSION.to_string(),
                    found: doc.schema_version,
                });
            }
            doc
        } else {
            TrajectoryDocument {
                schema_version: SCHEMA_VERSION.to_string(),
                session_id: session.to_string(),
                agent: agent.to_string(),
                steps: Vec::new(),
                checkpoints: Vec::new(),
                recovery_info: None,
                notes: None,
                final_metrics: None,
            }
        };

        Ok(Self { path, doc })
    }

    pub fn session_id(&self) -> &str {
        &self.doc.session_id
    }

    pub fn steps(&self) -> &[Step] {
        &self.doc.steps
    }

    /// Assigns the next dense stepId and atomically persists the updated document.
    pub fn append_step(&mut self, input: StepInput) -> Result<u64, TrajectoryError> {
        let step_id = self.doc.steps.len() as u64 + 1;
        debug!(step_id, source = ?input.source, "TrajectoryLog::append_step: called");
        self.doc.steps.push(Step {
            step_id,
            timestamp: Utc::now(),
            source: input.source,
            message: input.message,
            tool_calls: input.tool_calls,
            observation: input.observation,
            status: input.status,
            error: input.error,
        });
        self.write()?;
        Ok(step_id)
    }

    pub fn append_checkpoint(&mut self, label: impl Into<String>) -> Result<(), TrajectoryError> {
        let step_id = self.doc.steps.last().map(|s| s.step_id).unwrap_or(0);
        debug!(step_id, "TrajectoryLog::append_checkpoint: called");
        self.doc.checkpoints.push(Checkpoint {
            step_id,
            timestamp: Utc::now(),
            label: label.into(),
        });
        self.write()
    }

    pub fn record_recovery(&mut self, info: RecoveryInfo) -> Result<(), TrajectoryError> {
        debug!(?info, "TrajectoryLog::record_recovery: called");
        self.doc.recovery_info = Some(info);
        self.write()
    }

    /// `{checkpoint, resumeFromStepId, completedSteps[], stepsToReplay[]}` per §4.2.
    pub fn plan_recovery(&self) -> RecoveryPlan {
        let checkpoint = self.doc.checkpoints.last().cloned();
        let resume_from_step_id = checkpoint.as_ref().map(|c| c.step_id + 1).unwrap_or(1);
        let completed_steps: Vec<Step> = self.doc.steps.iter().filter(|s| s.status == StepStatus::Completed).cloned().collect();
        let steps_to_replay: Vec<Step> = self
            .doc
            .steps
            .iter()
            .filter(|s| s.step_id >= resume_from_step_id && s.status != StepStatus::Completed)
            .cloned()
            .collect();

        RecoveryPlan {
            checkpoint,
            resume_from_step_id,
            completed_steps,
            steps_to_replay,
        }
    }

    fn write(&self) -> Result<(), TrajectoryError> {
        let json = serde_json::to_string_pretty(&self.doc).map_err(|source| TrajectoryError::CorruptJson {
            path: self.path.display().to_string(),
            source,
        })?;
        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, json).map_err(|source| TrajectoryError::Io {
            path: tmp_path.display().to_string(),
            source,
        })?;
        std::fs::rename(&tmp_path, &self.path).map_err(|source| TrajectoryError::Io {
            path: self.path.display().to_string(),
            source,
        })
    }
}
