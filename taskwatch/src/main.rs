//! taskwatch - file-backed task tracker.
//!
//! # Commands
//!
//! - `taskwatch run [--name NAME]`: Interactive session (the default)
//! - `taskwatch list --name NAME [--filter F]`: Print a user's tasks and exit
//!
//! # Environment Variables
//!
//! See the [`config`](taskwatch::config) module for available configuration options.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use taskwatch::cli::{self, Console};
use taskwatch::config::Config;
use taskwatch::task::TaskFilter;

/// taskwatch - file-backed task tracker.
///
/// Keeps one task file per user under <data-dir>/tasks, reloads it live when
/// it changes on disk, and writes an activity log with a once-per-second
/// heartbeat under <data-dir>/logs.
#[derive(Parser, Debug)]
#[command(name = "taskwatch")]
#[command(author, version, about, long_about = None)]
#[command(after_help = "\
ENVIRONMENT VARIABLES:
    TASKWATCH_DATA_DIR         Directory holding tasks/ and logs/ (default: .)
    TASKWATCH_HEARTBEAT_MS     Heartbeat period in milliseconds (default: 1000)
    TASKWATCH_STOP_GRACE_MS    Shutdown grace for the heartbeat (default: 1000)
    TASKWATCH_RELOAD           Live reload policy: replace | when-empty (default: replace)
    TASKWATCH_WATCH            Enable live reload (default: true)
    TASKWATCH_HEARTBEAT        Enable the heartbeat (default: true)
    RUST_LOG                   Diagnostic log filter (default: warn)

EXAMPLES:
    # Start an interactive session
    taskwatch run --name alice

    # Show alice's urgent tasks
    taskwatch list --name alice --filter urgent
")]
struct Cli {
    /// Directory holding tasks/ and logs/ (overrides TASKWATCH_DATA_DIR).
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

/// CLI subcommands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Start an interactive session.
    Run {
        /// User name; prompted for when omitted.
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Print a user's tasks without starting a session.
    List {
        /// User name.
        #[arg(short, long)]
        name: String,

        /// Which tasks to show.
        #[arg(short, long, value_enum, default_value_t = FilterArg::All)]
        filter: FilterArg,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FilterArg {
    All,
    Pending,
    Urgent,
    Completed,
}

impl From<FilterArg> for TaskFilter {
    fn from(arg: FilterArg) -> Self {
        match arg {
            FilterArg::All => TaskFilter::All,
            FilterArg::Pending => TaskFilter::Pending,
            FilterArg::Urgent => TaskFilter::Urgent,
            FilterArg::Completed => TaskFilter::Completed,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging();

    let mut config = Config::from_env().context("Failed to load configuration")?;
    if let Some(data_dir) = cli.data_dir {
        config = config.with_data_dir(data_dir);
    }
    debug!(?config, "Configuration loaded");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to create tokio runtime")?;

    let command = cli.command.unwrap_or(Command::Run { name: None });
    runtime.block_on(run(command, config))
}

async fn run(command: Command, config: Config) -> Result<()> {
    let mut console = Console::stdio();

    match command {
        Command::Run { name } => cli::run_interactive(&config, name, &mut console)
            .await
            .context("Session failed"),
        Command::List { name, filter } => cli::list_tasks(&config, &name, filter.into(), &mut console)
            .await
            .with_context(|| format!("Failed to list tasks for {name}")),
    }
}

/// Initializes the logging subsystem.
///
/// Diagnostics go to stderr and default to `warn` so they stay out of the
/// interactive menu.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .init();
}
