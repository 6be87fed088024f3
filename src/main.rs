use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use twinrun::config::Overrides;
use twinrun::twin_config::DispatchMode;

mod cmd;

#[derive(Parser)]
#[command(name = "twinrun")]
#[command(version, about = "Resumable reconciliation and dispatch for persona simulations")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Skip confirmation prompts
    #[arg(long, global = true)]
    pub yes: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Config file to use instead of .twinrun/twinrun.toml
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Valid runs wanted per persona. Overrides twinrun.toml.
    #[arg(long, global = true)]
    pub target: Option<u32>,

    /// Dispatch mode: batch or sequential. Overrides twinrun.toml.
    #[arg(long, global = true)]
    pub mode: Option<DispatchMode>,

    /// Seconds between sequential invocations. Overrides twinrun.toml.
    #[arg(long, global = true)]
    pub delay: Option<u64>,

    /// Reconcile/dispatch cycles per run. Overrides twinrun.toml.
    #[arg(long, global = true)]
    pub max_cycles: Option<u32>,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub fn overrides(&self) -> Overrides {
        Overrides {
            config_file: self.config.clone(),
            target_count: self.target,
            mode: self.mode,
            delay_secs: self.delay,
            max_cycles: self.max_cycles,
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show per-persona completion without changing anything
    Status,
    /// Quarantine erroneous runs and renumber the survivors
    Reconcile,
    /// Reconcile, plan, and dispatch until the target is met or cycles run out
    Run {
        /// Only dispatch these personas (comma-separated)
        #[arg(long, value_delimiter = ',', conflicts_with = "retry_failed")]
        pids: Option<Vec<String>>,

        /// Only dispatch the personas listed in the failure manifest
        #[arg(long)]
        retry_failed: bool,

        /// Print the plan without dispatching
        #[arg(long)]
        dry_run: bool,
    },
    /// Copy the whole output tree to a backup location
    Snapshot {
        /// Destination directory (defaults to paths.snapshot_dir)
        destination: Option<PathBuf>,

        /// Replace an existing destination
        #[arg(long)]
        force: bool,
    },
    /// Delete every run and recreate an empty output root
    Clean,
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Initialize a default twinrun.toml file
    Init,
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "info" } else { "warn" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match &cli.command {
        Commands::Status => cmd::cmd_status(&cli, &project_dir)?,
        Commands::Reconcile => cmd::cmd_reconcile(&cli, &project_dir)?,
        Commands::Run {
            pids,
            retry_failed,
            dry_run,
        } => {
            cmd::cmd_run(&cli, project_dir, pids.clone(), *retry_failed, *dry_run).await?;
        }
        Commands::Snapshot { destination, force } => {
            cmd::cmd_snapshot(&cli, &project_dir, destination.clone(), *force)?
        }
        Commands::Clean => cmd::cmd_clean(&cli, &project_dir)?,
        Commands::Config { command } => cmd::cmd_config(&cli, &project_dir, command.clone())?,
    }

    Ok(())
}
