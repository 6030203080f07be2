//! taskdaemon - CLI entry point for the session orchestrator.

use std::path::PathBuf;

use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result};
use taskstore::{TaskFilter, TaskStore};
use tracing::{error, info};
use uuid::Uuid;

use taskdaemon::cancel;
use taskdaemon::cli::{Cli, Command, HealerCommand, SessionCommand};
use taskdaemon::config::ProjectConfig;
use taskdaemon::events::{create_event_bus, spawn_event_logger};
use taskdaemon::orchestrator::Orchestrator;
use taskdaemon::stuck::{self, StuckThresholds};
use taskdaemon::worker::ProcessWorkerDriver;

/// Watches for SIGINT/SIGTERM and cancels `handle` on the first one received.
fn spawn_cancel_on_signal(handle: cancel::CancelHandle) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(s) => s,
                Err(e) => {
                    error!(error = %e, "spawn_cancel_on_signal: failed to install SIGTERM handler");
                    let _ = ctrl_c.await;
                    handle.cancel();
                    return;
                }
            };
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
        }
        info!("spawn_cancel_on_signal: received cancel signal");
        handle.cancel();
    });
}

fn setup_logging(verbose: u8) {
    let level = match verbose {
        0 => tracing::Level::INFO,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let root = cli.root.clone().unwrap_or_else(|| PathBuf::from("."));

    let exit_code = match cli.command {
        Command::Session { command: SessionCommand::Run { dry_run } } => cmd_session_run(&root, cli.config.as_deref(), dry_run).await,
        Command::Healer { command: HealerCommand::Scan { task_hours, subtask_hours, min_failures, json } } => {
            cmd_healer_scan(&root, task_hours, subtask_hours, min_failures, json)
        }
        Command::Healer { command: HealerCommand::Invoke } => {
            eprintln!("healer invoke is reserved and not yet implemented");
            Ok(1)
        }
    }?;

    std::process::exit(exit_code);
}

async fn cmd_session_run(root: &PathBuf, config: Option<&std::path::Path>, dry_run: bool) -> Result<i32> {
    let session_id = Uuid::now_v7().to_string();
    info!(session_id = %session_id, ?root, dry_run, "cmd_session_run: starting session");

    let worker = ProjectConfig::load(root, config).context("loading project config")?.worker_binary;
    let driver = ProcessWorkerDriver::new(worker, Vec::new());

    let event_bus = create_event_bus();
    // write_event() flushes after every write, so the JSONL log is durable even
    // though this task outlives the session (process::exit tears it down).
    let _logger_handle = spawn_event_logger(event_bus.clone()).context("starting event logger")?;

    let (cancel_handle, cancel_signal) = cancel::channel();
    spawn_cancel_on_signal(cancel_handle);

    let mut orchestrator = Orchestrator::open(root, &session_id, config, &driver)
        .context("opening orchestrator session")?
        .with_events(&event_bus)
        .with_cancel(cancel_signal);

    match orchestrator.run(dry_run).await {
        Ok(summary) => {
            info!(
                completed = summary.tasks_completed.len(),
                blocked = summary.tasks_blocked.len(),
                "cmd_session_run: session complete"
            );
            Ok(0)
        }
        Err(e) => {
            error!(error = %e, "cmd_session_run: session failed");
            Ok(1)
        }
    }
}

fn cmd_healer_scan(root: &PathBuf, task_hours: i64, subtask_hours: i64, min_failures: u32, json: bool) -> Result<i32> {
    let store = TaskStore::open(ProjectConfig::openagents_dir(root)).context("opening task store")?;
    let tasks = store.list(&TaskFilter::default()).context("listing tasks")?;
    let thresholds = StuckThresholds { task_hours, subtask_hours, min_consecutive_failures: min_failures };
    let report = stuck::scan(&tasks, &[], chrono::Utc::now(), &thresholds);

    if json {
        println!("{}", serde_json::to_string_pretty(&serde_json::json!({
            "stuck_tasks": report.stuck_tasks,
            "stuck_subtasks": report.stuck_subtasks,
        }))?);
    } else if report.is_empty() {
        println!("{}", "no stuck tasks or subtasks".green());
    } else {
        for task_id in &report.stuck_tasks {
            println!("{} {}", "stuck task:".yellow().bold(), task_id);
        }
        for subtask_id in &report.stuck_subtasks {
            println!("{} {}", "stuck subtask:".yellow().bold(), subtask_id);
        }
    }

    Ok(if report.is_empty() { 0 } else { 1 })
}
