use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use git_relay::config::Config;
use git_relay::env_vars;
use git_relay::logging;
use git_relay::rest::{ApiDoc, ApiState, RelayServer};
use git_relay::workspace::WorkspaceManager;

#[derive(Parser)]
#[command(name = "git-relay")]
#[command(about = "Authenticated HTTP relay for sandboxed git and bundle operations")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file path
    #[arg(short, long)]
    config: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the relay server (default)
    Serve {
        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Remove orphaned workspaces once and exit
    Sweep {
        /// Minimum age in seconds (default: workspace.orphan_max_age_secs,
        /// never below exec.long_timeout_secs)
        #[arg(long)]
        max_age_secs: Option<u64>,
    },

    /// Print the OpenAPI document as JSON
    Openapi,

    /// List the environment variables the relay reads
    Env,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // These need no configuration (and therefore no secret)
    match cli.command {
        Some(Commands::Openapi) => {
            println!("{}", ApiDoc::json().context("Failed to render OpenAPI document")?);
            return Ok(());
        }
        Some(Commands::Env) => {
            print!("{}", env_vars::render());
            return Ok(());
        }
        _ => {}
    }

    let config = Config::load(cli.config.as_deref())?;
    let _logging_handle = logging::init_logging(&config, cli.debug)?;

    match cli.command {
        Some(Commands::Sweep { max_age_secs }) => cmd_sweep(&config, max_age_secs),
        Some(Commands::Serve { port }) => cmd_serve(config, port).await,
        None => cmd_serve(config, None).await,
        Some(Commands::Openapi | Commands::Env) => Ok(()),
    }
}

async fn cmd_serve(config: Config, port: Option<u16>) -> Result<()> {
    let host = config.server.host.clone();
    let port = port.unwrap_or(config.server.port);
    let janitor_interval = Duration::from_secs(config.workspace.janitor_interval_secs);
    let orphan_max_age = config.orphan_max_age();

    let state = ApiState::new(config).context("Failed to initialize relay")?;
    info!(
        workspace_root = %state.workspaces.root().display(),
        git_available = state.git_available,
        "relay initialized"
    );
    if !state.git_available {
        tracing::warn!("git binary not found; git operations will fail");
    }

    let janitor = state
        .workspaces
        .spawn_janitor(janitor_interval, orphan_max_age);

    let server = RelayServer::bind(state, &host, port).await?;
    let result = server
        .run(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await;

    janitor.abort();
    result
}

fn cmd_sweep(config: &Config, max_age_secs: Option<u64>) -> Result<()> {
    let manager = WorkspaceManager::new(config.workspace_root())?;
    let max_age = config.sweep_max_age(max_age_secs);

    let report = manager.sweep_orphans(max_age)?;
    println!(
        "Removed {} workspace(s) from {}",
        report.removed.len(),
        manager.root().display()
    );
    for path in &report.failed {
        println!("  failed: {}", path.display());
    }
    Ok(())
}
