mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "skytour", about = "In-flight, location-aware narration engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the narration pipeline against the simulator
    Run {
        /// Path to the TOML configuration file
        #[arg(long)]
        config: Option<PathBuf>,
        /// Path to the categories TOML file
        #[arg(long)]
        categories: Option<PathBuf>,
        /// Synthesize a circular demo flight instead of a live sim link
        #[arg(long)]
        demo: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            config,
            categories,
            demo,
        } => commands::handle_run(config, categories, demo).await,
    }
}
