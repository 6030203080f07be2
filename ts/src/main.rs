//! Small operator CLI for inspecting a task store directly, independent of `td`.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use colored::Colorize;
use eyre::{Result, WrapErr};
use taskstore::{TaskFilter, TaskStore};

#[derive(Parser, Debug)]
#[command(name = "taskstore")]
#[command(author, version, about = "Inspect an .openagents task backlog", long_about = None)]
struct Cli {
    /// Path to the `.openagents` directory
    #[arg(short, long, default_value = ".openagents")]
    root: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List all tasks
    List,
    /// List ready tasks only
    Ready,
    /// Print the task `pickNext` would return
    Pick,
    /// Show a single task by id
    Show { id: String },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();
    let store = TaskStore::open(&cli.root).wrap_err("failed to open task store")?;

    match cli.command {
        Command::List => {
            for task in store.list(&TaskFilter::default())? {
                println!("{:<16} {:>4} {:?} {}", task.id.bold(), task.priority, task.status, task.title);
            }
        }
        Command::Ready => {
            for task in store.ready(&TaskFilter::default())? {
                println!("{:<16} {:>4} {}", task.id.green(), task.priority, task.title);
            }
        }
        Command::Pick => match store.pick_next(&TaskFilter::default())? {
            Some(task) => println!("{} {}", task.id.green().bold(), task.title),
            None => println!("{}", "no ready task".yellow()),
        },
        Command::Show { id } => {
            let task = store.get(&id).wrap_err("task not found")?;
            println!("{}", serde_json::to_string_pretty(&task)?);
        }
    }
    Ok(())
}
