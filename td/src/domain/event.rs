use serde::{Deserialize, Serialize};

/// What an init script reported failing on, when it fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitFailureType {
    TypecheckFailed,
    TestFailed,
    Other,
}

/// An event the Orchestrator reacts to: either one it observed directly (worker
/// exit, health check result) or a synthetic one StuckDetector injects. PolicyGate
/// maps these to a `Scenario` via a fixed table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TriggerEvent {
    InitScriptComplete {
        success: bool,
        failure_type: Option<InitFailureType>,
        output: String,
    },
    SubtaskFailed {
        subtask_id: String,
        output: String,
    },
    VerificationComplete {
        subtask_id: String,
        passed: bool,
        output: String,
    },
    Error {
        subtask_id: Option<String>,
        message: String,
    },
    SubtaskStuck {
        subtask_id: String,
        reason: String,
    },
}

impl TriggerEvent {
    pub fn subtask_id(&self) -> Option<&str> {
        match self {
            Self::InitScriptComplete { .. } => None,
            Self::SubtaskFailed { subtask_id, .. }
            | Self::VerificationComplete { subtask_id, .. }
            | Self::SubtaskStuck { subtask_id, .. } => Some(subtask_id),
            Self::Error { subtask_id, .. } => subtask_id.as_deref(),
        }
    }

    /// The first non-empty of stderr/stdout/error string, per ContextBuilder's
    /// error-payload extraction rule.
    pub fn error_payload(&self) -> &str {
        match self {
            Self::InitScriptComplete { output, .. } => output,
            Self::SubtaskFailed { output, .. } => output,
            Self::VerificationComplete { output, .. } => output,
            Self::Error { message, .. } => message,
            Self::SubtaskStuck { reason, .. } => reason,
        }
    }
}
