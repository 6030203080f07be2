use serde::{Deserialize, Serialize};

/// The closed set of failure modes the policy gate recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scenario {
    InitScriptTypecheckFailure,
    InitScriptTestFailure,
    InitScriptEnvironmentFailure,
    SubtaskFailed,
    VerificationFailed,
    RuntimeError,
    SubtaskStuck,
}

impl Scenario {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InitScriptTypecheckFailure => "InitScriptTypecheckFailure",
            Self::InitScriptTestFailure => "InitScriptTestFailure",
            Self::InitScriptEnvironmentFailure => "InitScriptEnvironmentFailure",
            Self::SubtaskFailed => "SubtaskFailed",
            Self::VerificationFailed => "VerificationFailed",
            Self::RuntimeError => "RuntimeError",
            Self::SubtaskStuck => "SubtaskStuck",
        }
    }

    /// Whether this scenario is scoped to a particular subtask (and therefore subject
    /// to the per-subtask rate limit) as opposed to session-wide.
    pub fn is_subtask_scoped(&self) -> bool {
        matches!(self, Self::SubtaskFailed | Self::VerificationFailed | Self::SubtaskStuck)
    }
}

impl std::fmt::Display for Scenario {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
