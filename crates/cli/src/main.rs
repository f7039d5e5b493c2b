//! steward CLI — the main entry point.
//!
//! Commands:
//! - `agent`  — start, list, resume, stop, and delete agents
//! - `review` — run the code-review pipeline over a merge request
//! - `calls`  — inspect recorded LLM calls

use clap::{Parser, Subcommand};

mod commands;
mod config;
mod runtime;

use config::AppConfig;

#[derive(Parser)]
#[command(name = "steward", about = "steward — autonomous agent runtime", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage and run agents
    Agent {
        #[command(subcommand)]
        action: commands::agent::AgentAction,
    },

    /// Review a merge request: `steward review <project> <mr_iid>`
    Review {
        /// Numeric project id or full path with namespace
        project: String,
        mr_iid: i64,
    },

    /// List recorded LLM calls for an agent
    Calls { agent_id: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    let config = AppConfig::load()?;
    tracing::debug!(?config, "Configuration loaded");

    match cli.command {
        Commands::Agent { action } => commands::agent::run(config, action).await?,
        Commands::Review { project, mr_iid } => {
            commands::review::run(config, &project, mr_iid).await?
        }
        Commands::Calls { agent_id } => commands::calls::run(config, &agent_id).await?,
    }

    Ok(())
}
