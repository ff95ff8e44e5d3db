//! wsconnect CLI
//!
//! Resolves SSH destinations for remote workspaces and maintains the
//! shared state behind them:
//! - resolve a workspace to a connectable destination
//! - encode/decode the editor's authority strings
//! - list the SSH identities a connection would offer
//! - sweep stale locks and keep workspaces alive with heartbeats

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wsc_core::config::{self, ResolverConfig};
use wsconnect::commands::{self, ResolveArgs};
use wsconnect::output::print_error;

#[derive(Parser)]
#[command(name = "wsconnect")]
#[command(author, version, about = "SSH connection resolver for remote workspaces")]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve an SSH destination for a running workspace
    Resolve {
        /// Workspace ID
        workspace_id: String,
        /// Workspace instance ID
        #[arg(short, long)]
        instance: String,
        /// Workspace service host (overrides config)
        #[arg(long)]
        host: Option<String>,
        /// Workspace runs in debug mode
        #[arg(long)]
        debug: bool,
        /// Print the resolution as JSON
        #[arg(long)]
        json: bool,
    },

    /// Encode a destination into an editor authority string
    Encode {
        /// Hostname
        host: String,
        /// SSH user
        #[arg(short, long)]
        user: Option<String>,
        /// SSH port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Decode an editor authority string
    Decode {
        /// Encoded authority
        encoded: String,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// List the SSH identities offered to a host, in order
    Identities {
        /// Host to compute SSH config for
        #[arg(long, default_value = "*")]
        host: String,
    },

    /// Send heartbeats for a resolved destination until Ctrl+C
    Heartbeat {
        /// Encoded authority from a previous resolve
        encoded: String,
    },

    /// Manage the shared lock table
    Locks {
        #[command(subcommand)]
        action: LocksAction,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum LocksAction {
    /// Remove locks left behind by dead processes
    Sweep,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show effective configuration
    Show {
        /// Dotted key to print, e.g. timeouts.handshake
        key: Option<String>,
    },
    /// Initialize default configuration
    Init {
        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },
    /// Show config file path
    Path,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, _) => "trace",
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let config_path = cli.config.unwrap_or_else(config::default_config_path);

    match cli.command {
        Commands::Config { action } => match action {
            ConfigAction::Path => commands::config_path(&config_path),
            ConfigAction::Init { force } => commands::config_init(&config_path, force),
            ConfigAction::Show { key } => {
                let config = load(&config_path)?;
                commands::config_show(&config_path, &config, key.as_deref())
            }
        },
        Commands::Encode { host, user, port } => commands::encode_command(&host, user, port),
        Commands::Decode { encoded, json } => commands::decode_command(&encoded, json),
        Commands::Resolve {
            workspace_id,
            instance,
            host,
            debug,
            json,
        } => {
            let config = load(&config_path)?;
            let args = ResolveArgs {
                workspace_id,
                instance_id: instance,
                host,
                debug,
                json,
            };
            commands::resolve_command(config, args).await
        }
        Commands::Identities { host } => {
            let config = load(&config_path)?;
            commands::identities_command(&config, &host).await
        }
        Commands::Heartbeat { encoded } => {
            let config = load(&config_path)?;
            commands::heartbeat_command(&config, &encoded).await
        }
        Commands::Locks { action } => match action {
            LocksAction::Sweep => {
                let config = load(&config_path)?;
                commands::locks_sweep(&config)
            }
        },
    }
}

fn load(path: &Path) -> Result<ResolverConfig> {
    config::load_config_or_default(path)
        .with_context(|| format!("Failed to load config from {}", path.display()))
}
