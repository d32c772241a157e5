//! `wallfacer-core`: a CLI entrypoint wiring configuration, the Store, and
//! the Controller together for local operation and scripting. Mirrors the
//! way a thin transport layer would call the same façade.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use wallfacer_core::config::{CommitGenerationConfig, RuntimeConfig, WorkspaceConfig};
use wallfacer_core::controller::Controller;
use wallfacer_core::fingerprint;
use wallfacer_core::store::Store;
use wallfacer_core::task::Status;
use wallfacer_core::worktree_manager::Workspace;

#[derive(Parser)]
#[command(name = "wallfacer-core", version, about = "Task execution core for a Kanban-style coding-agent runner")]
struct Cli {
    /// Path to a project-level config.toml; overrides the user config.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a new task in backlog.
    Create {
        prompt: String,
        #[arg(long)]
        timeout: Option<u32>,
    },
    /// List all tasks.
    List,
    /// Show one task's full state.
    Show { id: String },
    /// Show a task's event trace.
    Events { id: String },
    /// Start a backlog task (backlog -> in_progress).
    Start { id: String },
    /// Submit feedback to a waiting task (waiting -> in_progress).
    Feedback { id: String, message: String },
    /// Mark a waiting task done (waiting -> committing -> done).
    Done { id: String },
    /// Cancel a task from any cancellable state.
    Cancel { id: String },
    /// Resume a failed task (failed -> in_progress).
    Resume {
        id: String,
        #[arg(long)]
        timeout: Option<u32>,
    },
    /// Retry a finished task by returning it to backlog.
    Retry {
        id: String,
        #[arg(long)]
        fresh_start: bool,
    },
    /// Delete a task and its data directory.
    Delete { id: String },
    /// Archive or unarchive a done/cancelled task.
    Archive {
        id: String,
        #[arg(long)]
        unarchive: bool,
    },
    /// Scan for and remove orphaned worktree directories.
    PruneOrphans,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let runtime_config = RuntimeConfig::load(cli.config.as_deref())?;
    let commit_config = CommitGenerationConfig::load(cli.config.as_deref())?;

    wallfacer_core::command_log::init(&runtime_config.data_dir, "cli");
    log::info!(
        "data dir: {}",
        wallfacer_core::path::format_path_for_display(&runtime_config.data_dir)
    );

    let workspaces: Vec<Workspace> = runtime_config
        .workspaces
        .iter()
        .map(|w: &WorkspaceConfig| Workspace {
            name: w.name.clone(),
            path: w.path.clone(),
        })
        .collect();

    let workspace_paths: Vec<PathBuf> = workspaces.iter().map(|w| w.path.clone()).collect();
    let fp = fingerprint::fingerprint(&workspace_paths);

    let store = Arc::new(Store::open(&runtime_config.data_dir, &fp)?);
    let controller = Controller::new(store, runtime_config, commit_config, workspaces);
    controller.prune_orphans()?;

    match cli.command {
        Command::Create { prompt, timeout } => {
            let task = controller.create_task(prompt, timeout)?;
            println!("created task {} ({})", task.id, task.branch_name);
        }
        Command::List => {
            for task in controller.store().list() {
                println!("{}\t{}\t{}", task.id, task.status, task.prompt);
            }
        }
        Command::Show { id } => {
            let task = controller.store().get(&id)?;
            println!("{}", serde_json::to_string_pretty(&task)?);
        }
        Command::Events { id } => {
            for event in controller.store().events(&id)? {
                println!("{:04} {:?} {}", event.seq, event.event_type, event.created_at);
            }
        }
        Command::Start { id } => {
            let task = controller.update_task(&id, None, None, Some(Status::InProgress), None)?;
            println!("task {} is now {}", task.id, task.status);
        }
        Command::Feedback { id, message } => {
            let task = controller.submit_feedback(&id, message)?;
            println!("task {} is now {}", task.id, task.status);
        }
        Command::Done { id } => {
            let task = controller.complete_task(&id)?;
            println!("task {} is now {}", task.id, task.status);
        }
        Command::Cancel { id } => {
            let task = controller.cancel_task(&id)?;
            println!("task {} is now {}", task.id, task.status);
        }
        Command::Resume { id, timeout } => {
            let task = controller.resume_task(&id, timeout)?;
            println!("task {} is now {}", task.id, task.status);
        }
        Command::Retry { id, fresh_start } => {
            let task = controller.update_task(&id, None, None, Some(Status::Backlog), Some(fresh_start))?;
            println!("task {} is now {}", task.id, task.status);
        }
        Command::Delete { id } => {
            controller.delete_task(&id)?;
            println!("deleted task {id}");
        }
        Command::Archive { id, unarchive } => {
            let task = controller.set_archived(&id, !unarchive)?;
            println!("task {} archived={}", task.id, task.archived);
        }
        Command::PruneOrphans => {
            controller.prune_orphans()?;
            println!("pruned orphaned worktrees");
        }
    }

    Ok(())
}
