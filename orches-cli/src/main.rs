//! orches: deploy Podman quadlets and systemd units from a git repository.
//!
//! # Usage
//!
//! ```text
//! orches init <remote> [--dry]
//! orches sync [--dry]
//! orches prune [--dry]
//! orches switch <remote> [--dry]
//! orches status
//! orches run [--interval <seconds>]
//! orches version
//! ```
//!
//! `sync`, `prune`, `switch` and `status` are handed to a running daemon
//! when its socket exists.

mod commands;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};

use commands::{init::InitArgs, run::RunArgs, switch::SwitchArgs};
use orches_core::Config;
use orches_daemon::Command;
use orches_sync::{Interrupt, Pipeline};

#[derive(Parser, Debug)]
#[command(
    name = "orches",
    version,
    about = "GitOps for Podman quadlets and systemd units",
    long_about = None,
)]
struct Cli {
    /// Describe every change without making it.
    #[arg(long, global = true)]
    dry: bool,

    /// More log output (-v debug, -vv trace). RUST_LOG takes precedence.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Clone a repository and deploy every unit in it.
    Init(InitArgs),

    /// Fetch the tracked repository and deploy what changed.
    Sync,

    /// Remove every deployed unit and the local repository.
    Prune,

    /// Track a different repository, deploying only the difference.
    Switch(SwitchArgs),

    /// Show the tracked remote and deployed commit.
    Status,

    /// Sync periodically and serve commands on the daemon socket.
    Run(RunArgs),

    /// Print version and build information.
    Version,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Commands::Version = cli.command {
        commands::version::run();
        return Ok(());
    }

    let config = Config::detect().context("failed to resolve configuration")?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;

    runtime.block_on(async move {
        let interrupt = Interrupt::from_signals().context("failed to install signal handlers")?;
        let pipeline = Pipeline::new(config, cli.dry, interrupt);

        match cli.command {
            Commands::Init(args) => args.run(&pipeline).await,
            Commands::Sync => commands::relay::run(&pipeline, Command::Sync).await,
            Commands::Prune => commands::relay::run(&pipeline, Command::Prune).await,
            Commands::Switch(args) => args.run(&pipeline).await,
            Commands::Status => commands::relay::run(&pipeline, Command::Status).await,
            Commands::Run(args) => args.run(pipeline).await,
            Commands::Version => Ok(()),
        }
    })
}

fn init_tracing(verbose: u8) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
