//! keelsond — the keelson daemon.
//!
//! Opens the coordination store, builds the root context from the
//! configuration file and runs the task supervisor until Ctrl-C. The
//! `tasks` subcommands inspect and manage the pending-task queue directly.
//!
//! # Usage
//!
//! ```text
//! keelsond --config /etc/keelson/keelson.toml run --workers 8
//! keelsond --data-dir /var/lib/keelson tasks list
//! keelsond tasks enqueue delete /nodes/i-0123
//! keelsond tasks revoke /apps/web
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::info;

use keelson_core::{Core, DryRunProvider, KeelsonConfig, resolve};
use keelson_store::CoordinationStore;
use keelson_tasks::{Action, Supervisor, Tasks};

#[derive(Parser)]
#[command(name = "keelsond", about = "Keelson control-plane daemon")]
struct Cli {
    /// Configuration file (TOML). Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory for the coordination store; overrides `[store] path`.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the task supervisor until interrupted.
    Run {
        /// Number of workers; overrides `[supervisor] workers`.
        #[arg(long)]
        workers: Option<usize>,

        /// Poll interval in milliseconds; overrides `[supervisor] poll_interval_ms`.
        #[arg(long)]
        poll_interval_ms: Option<u64>,
    },

    /// Inspect and manage pending tasks.
    Tasks {
        #[command(subcommand)]
        command: TasksCommand,
    },
}

#[derive(Subcommand)]
enum TasksCommand {
    /// Print every pending task as one JSON object per line.
    List,

    /// Queue an operation on the resource at an address.
    Enqueue {
        /// Operation name, e.g. `delete`.
        operation: String,
        /// Resource address, e.g. `/nodes/i-0123`.
        address: String,
    },

    /// Revoke pending tasks on a resource and everything below it.
    ///
    /// Only the records are removed. A daemon already running one of them
    /// keeps its worker busy until the operation returns.
    Revoke {
        address: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,keelson=debug")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_ref(), cli.data_dir.as_ref())?;

    match cli.command {
        Command::Run {
            workers,
            poll_interval_ms,
        } => {
            if let Some(workers) = workers {
                config.supervisor.workers = workers;
            }
            if let Some(ms) = poll_interval_ms {
                config.supervisor.poll_interval_ms = ms;
            }
            run_supervisor(config).await
        }
        Command::Tasks { command } => run_tasks_command(config, command),
    }
}

fn load_config(
    path: Option<&PathBuf>,
    data_dir: Option<&PathBuf>,
) -> anyhow::Result<KeelsonConfig> {
    let mut config = match path {
        Some(path) => KeelsonConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => KeelsonConfig::default(),
    };
    if let Some(dir) = data_dir {
        config.store.path = dir.join("keelson.redb");
    }
    Ok(config)
}

fn open_core(config: KeelsonConfig) -> anyhow::Result<Core> {
    if let Some(parent) = config.store.path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let store = CoordinationStore::open(&config.store.path)?;
    info!(path = ?config.store.path, "coordination store opened");
    Ok(Core::new(config, store, Arc::new(DryRunProvider)))
}

async fn run_supervisor(config: KeelsonConfig) -> anyhow::Result<()> {
    info!("keelson daemon starting");
    let core = open_core(config)?;
    let supervisor = Arc::new(Supervisor::new(core));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut handle = tokio::spawn({
        let supervisor = supervisor.clone();
        async move { supervisor.run(shutdown_rx).await }
    });

    tokio::select! {
        joined = &mut handle => {
            joined??;
            return Ok(());
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to install Ctrl-C handler")?;
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    }

    tokio::time::timeout(Duration::from_secs(30), handle)
        .await
        .context("supervisor did not stop in time")???;
    info!("keelson daemon stopped");
    Ok(())
}

fn run_tasks_command(config: KeelsonConfig, command: TasksCommand) -> anyhow::Result<()> {
    let core = open_core(config)?;
    let tasks = Tasks::from_core(&core);

    match command {
        TasksCommand::List => {
            for task in tasks.list()? {
                println!("{}", serde_json::to_string(&task)?);
            }
        }
        TasksCommand::Enqueue { operation, address } => {
            let resource = resolve(&core.catalog, &address)?;
            let task = Action::describe(&operation, &resource)?.supervise(&core)?;
            println!("{}", task.id);
        }
        TasksCommand::Revoke { address } => {
            let revoked = tasks.delete_by_resource(&address)?;
            println!("{revoked} task(s) revoked");
        }
    }
    Ok(())
}
