//! Purrgate CLI — the main entry point.
//!
//! Commands:
//! - `serve`  — Start the NPC gateway HTTP server
//! - `config` — Print the effective configuration
//! - `doctor` — Diagnose environment and provider health

use clap::{Parser, Subcommand};

mod commands;
mod transcript;

#[derive(Parser)]
#[command(
    name = "purrgate",
    about = "Purrgate — selective NPC gateway between a virtual world and an LLM",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the NPC gateway HTTP server
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,

        /// Override the bind host
        #[arg(long)]
        host: Option<String>,
    },

    /// Print the effective configuration (secrets redacted)
    Config,

    /// Diagnose environment, persona file, and provider health
    Doctor,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Serve { port, host } => commands::serve::run(port, host).await?,
        Commands::Config => commands::config_cmd::run()?,
        Commands::Doctor => commands::doctor::run().await?,
    }

    Ok(())
}
