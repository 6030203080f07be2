//! CLI command definitions: the orchestrator's `session`/`healer` surface.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// taskdaemon - autonomous coding-agent session orchestrator
#[derive(Parser)]
#[command(name = "td", about = "Session orchestrator: task selection, worker supervision, and healing", version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Path to the project root (defaults to the current directory)
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,

    /// Explicit config file path, overriding `<root>/.openagents/project.json`
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Raise the tracing filter to DEBUG (pass twice for TRACE)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run one orchestrator session to completion or idle
    Session {
        #[command(subcommand)]
        command: SessionCommand,
    },
    /// Inspect or drive the healer independently of a live session
    Healer {
        #[command(subcommand)]
        command: HealerCommand,
    },
}

#[derive(Debug, Subcommand)]
pub enum SessionCommand {
    /// Run the orchestrator loop: select a task, decompose it, execute and
    /// verify each subtask, healing on failure, until the queue is idle.
    Run {
        /// Plan PolicyGate/SpellEngine decisions without invoking the worker
        /// or mutating the task store.
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Debug, Subcommand)]
pub enum HealerCommand {
    /// Scan tasks and subtasks for time- or failure-based staleness; print a
    /// summary and exit 1 if anything is stuck.
    Scan {
        #[arg(long, default_value = "1")]
        task_hours: i64,
        #[arg(long, default_value = "1")]
        subtask_hours: i64,
        #[arg(long, default_value = "3")]
        min_failures: u32,
        #[arg(long)]
        json: bool,
    },
    /// Reserved: invoking the healer standalone, outside a live session, is
    /// not yet implemented.
    Invoke,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_session_run() {
        let cli = Cli::parse_from(["td", "session", "run"]);
        assert!(matches!(cli.command, Command::Session { command: SessionCommand::Run { dry_run: false } }));
    }

    #[test]
    fn parses_session_run_dry_run() {
        let cli = Cli::parse_from(["td", "session", "run", "--dry-run"]);
        assert!(matches!(cli.command, Command::Session { command: SessionCommand::Run { dry_run: true } }));
    }

    #[test]
    fn parses_healer_scan_defaults() {
        let cli = Cli::parse_from(["td", "healer", "scan"]);
        match cli.command {
            Command::Healer { command: HealerCommand::Scan { task_hours, subtask_hours, min_failures, json } } => {
                assert_eq!(task_hours, 1);
                assert_eq!(subtask_hours, 1);
                assert_eq!(min_failures, 3);
                assert!(!json);
            }
            _ => panic!("expected healer scan"),
        }
    }

    #[test]
    fn parses_healer_scan_overrides() {
        let cli = Cli::parse_from(["td", "healer", "scan", "--task-hours", "4", "--min-failures", "5", "--json"]);
        match cli.command {
            Command::Healer { command: HealerCommand::Scan { task_hours, min_failures, json, .. } } => {
                assert_eq!(task_hours, 4);
                assert_eq!(min_failures, 5);
                assert!(json);
            }
            _ => panic!("expected healer scan"),
        }
    }

    #[test]
    fn parses_healer_invoke() {
        let cli = Cli::parse_from(["td", "healer", "invoke"]);
        assert!(matches!(cli.command, Command::Healer { command: HealerCommand::Invoke }));
    }

    #[test]
    fn global_flags_apply_before_subcommand() {
        let cli = Cli::parse_from(["td", "--root", "/repo", "-v", "session", "run"]);
        assert_eq!(cli.root, Some(PathBuf::from("/repo")));
        assert_eq!(cli.verbose, 1);
    }
}
