//! Project configuration: `<root>/.openagents/project.json`.
//!
//! Loaded the way the rest of the workspace loads configuration: an explicit path
//! first, then the project root's own file, falling back to defaults only for
//! fields the document omits — never for a document that exists but fails to parse.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;

fn default_session_limit() -> u32 {
    2
}
fn default_subtask_limit() -> u32 {
    1
}
fn default_stuck_threshold_hours() -> u32 {
    1
}
fn default_worker_timeout_secs() -> u64 {
    900
}
fn default_health_timeout_secs() -> u64 {
    300
}
fn default_lock_stale_secs() -> u64 {
    3600
}
fn default_worker_kill_grace_secs() -> u64 {
    5
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HealerMode {
    #[default]
    Conservative,
    Aggressive,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ScenarioToggles {
    #[serde(default = "default_true")]
    pub on_init_failure: bool,
    #[serde(default = "default_true")]
    pub on_verification_failure: bool,
    #[serde(default = "default_true")]
    pub on_subtask_failure: bool,
    #[serde(default = "default_true")]
    pub on_runtime_error: bool,
    #[serde(default = "default_true")]
    pub on_stuck_subtask: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SpellFilters {
    #[serde(default)]
    pub allowed: Vec<String>,
    #[serde(default)]
    pub forbidden: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_session_limit")]
    pub max_invocations_per_session: u32,
    #[serde(default = "default_subtask_limit")]
    pub max_invocations_per_subtask: u32,
    #[serde(default)]
    pub mode: HealerMode,
    #[serde(default = "default_stuck_threshold_hours")]
    pub stuck_threshold_hours: u32,
    #[serde(default)]
    pub scenarios: ScenarioToggles,
    #[serde(default)]
    pub spells: SpellFilters,
    /// Whether `rewind_to_last_green_commit` may diverge from the upstream tracking branch.
    #[serde(default)]
    pub allow_force_rewind: bool,
}

impl Default for HealerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_invocations_per_session: default_session_limit(),
            max_invocations_per_subtask: default_subtask_limit(),
            mode: HealerMode::default(),
            stuck_threshold_hours: default_stuck_threshold_hours(),
            scenarios: ScenarioToggles::default(),
            spells: SpellFilters::default(),
            allow_force_rewind: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LoggingConfig {
    pub level: Option<String>,
    #[serde(default)]
    pub json: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    #[serde(default)]
    pub project_id: String,
    #[serde(default = "default_root_dir")]
    pub root_dir: String,
    #[serde(default = "default_branch")]
    pub default_branch: String,
    #[serde(default)]
    pub typecheck_commands: Vec<String>,
    #[serde(default)]
    pub test_commands: Vec<String>,
    #[serde(default)]
    pub e2e_commands: Vec<String>,
    #[serde(default)]
    pub allow_push: bool,
    #[serde(default)]
    pub allow_force_push: bool,
    #[serde(default)]
    pub healer: HealerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default = "default_worker_timeout_secs")]
    pub worker_timeout_secs: u64,
    /// Grace period between SIGTERM and SIGKILL when cancelling an in-flight worker.
    #[serde(default = "default_worker_kill_grace_secs")]
    pub worker_kill_grace_secs: u64,
    #[serde(default = "default_health_timeout_secs")]
    pub health_command_timeout_secs: u64,
    #[serde(default = "default_lock_stale_secs")]
    pub lock_stale_secs: u64,
    /// The sha of the last commit under which every configured health command passed.
    /// Stamped by HealthRunner after a fully-passing run; read by
    /// `rewind_to_last_green_commit`.
    #[serde(default)]
    pub last_green_commit: Option<String>,
    /// Binary invoked by ProcessWorkerDriver for each subtask.
    #[serde(default = "default_worker_binary")]
    pub worker_binary: String,
}

fn default_root_dir() -> String {
    ".".to_string()
}
fn default_branch() -> String {
    "main".to_string()
}
fn default_worker_binary() -> String {
    "claude".to_string()
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            project_id: String::new(),
            root_dir: default_root_dir(),
            default_branch: default_branch(),
            typecheck_commands: Vec::new(),
            test_commands: Vec::new(),
            e2e_commands: Vec::new(),
            allow_push: false,
            allow_force_push: false,
            healer: HealerConfig::default(),
            logging: LoggingConfig::default(),
            worker_timeout_secs: default_worker_timeout_secs(),
            worker_kill_grace_secs: default_worker_kill_grace_secs(),
            health_command_timeout_secs: default_health_timeout_secs(),
            lock_stale_secs: default_lock_stale_secs(),
            last_green_commit: None,
            worker_binary: default_worker_binary(),
        }
    }
}

impl ProjectConfig {
    /// Loads a project config, trying in order: `explicit_path`, then
    /// `<root>/.openagents/project.json`, then `ProjectConfig::default()`.
    ///
    /// A document that exists but fails to parse is a hard error: defaults only
    /// cover a document's *missing fields*, never a document that's outright broken.
    pub fn load(root: &Path, explicit_path: Option<&Path>) -> Result<Self, ConfigError> {
        debug!(?root, ?explicit_path, "ProjectConfig::load: called");
        if let Some(path) = explicit_path {
            return Self::read(path);
        }
        let default_path = root.join(".openagents").join("project.json");
        if default_path.exists() {
            return Self::read(&default_path);
        }
        debug!("ProjectConfig::load: no config document found, using defaults");
        Ok(Self::default())
    }

    fn read(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn openagents_dir(root: &Path) -> PathBuf {
        root.join(".openagents")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_config_falls_back_to_defaults() {
        let dir = TempDir::new().unwrap();
        let config = ProjectConfig::load(dir.path(), None).unwrap();
        assert_eq!(config.healer.max_invocations_per_session, 2);
        assert_eq!(config.healer.max_invocations_per_subtask, 1);
    }

    #[test]
    fn partial_document_fills_in_defaults() {
        let dir = TempDir::new().unwrap();
        let oa = dir.path().join(".openagents");
        std::fs::create_dir_all(&oa).unwrap();
        std::fs::write(oa.join("project.json"), r#"{"projectId": "demo"}"#).unwrap();

        let config = ProjectConfig::load(dir.path(), None).unwrap();
        assert_eq!(config.project_id, "demo");
        assert_eq!(config.healer.max_invocations_per_session, 2);
        assert!(config.healer.enabled);
    }

    #[test]
    fn broken_document_is_a_hard_error() {
        let dir = TempDir::new().unwrap();
        let oa = dir.path().join(".openagents");
        std::fs::create_dir_all(&oa).unwrap();
        std::fs::write(oa.join("project.json"), "{not valid json").unwrap();

        assert!(ProjectConfig::load(dir.path(), None).is_err());
    }

    #[test]
    fn explicit_path_overrides_default_location() {
        let dir = TempDir::new().unwrap();
        let explicit = dir.path().join("custom.json");
        std::fs::write(&explicit, r#"{"projectId": "explicit"}"#).unwrap();

        let config = ProjectConfig::load(dir.path(), Some(&explicit)).unwrap();
        assert_eq!(config.project_id, "explicit");
    }
}
